//! Difficulty, network weight and PoW retargeting
//!
//! **IMPORTANT**: a target is a CEILING. A higher target is easier, so a
//! higher difficulty means a lower target.
//!
//! Difficulty is reported relative to the minimum-difficulty target
//! `0x1d00ffff`, the same convention block explorers use.

use std::sync::Arc;

use primitive_types::{U256, U512};

use super::chain::ChainedHeader;
use super::consensus::ConsensusOptions;
use super::target::CompactTarget;

/// PoS intervals sampled by the network weight estimate
pub const NETWORK_WEIGHT_INTERVALS: usize = 72;

/// 2^32, the expected hashes per unit of difficulty
const HASHES_PER_DIFFICULTY: f64 = 4_294_967_296.0;

/// Difficulty of a compact target relative to `0x1d00ffff`
pub fn get_difficulty(bits: CompactTarget) -> f64 {
    let mantissa = bits.mantissa();
    if mantissa == 0 {
        return 0.0;
    }

    let mut shift = bits.exponent();
    let mut difficulty = f64::from(0x0000_ffff) / f64::from(mantissa);
    while shift < 29 {
        difficulty *= 256.0;
        shift += 1;
    }
    while shift > 29 {
        difficulty /= 256.0;
        shift -= 1;
    }
    difficulty
}

/// Difficulty of `header`, or of `last_pos` when no header is given.
/// `1.0` when neither exists.
pub fn difficulty_or_last_pos(header: Option<&ChainedHeader>, last_pos: Option<&ChainedHeader>) -> f64 {
    header
        .or(last_pos)
        .map(|h| get_difficulty(CompactTarget(h.header.bits)))
        .unwrap_or(1.0)
}

/// Estimated total stake weight of the network.
///
/// Walks back from `tip` over PoS headers, skipping PoW headers, and averages
/// the work of up to 72 stake intervals over the time they took.
pub fn get_network_weight(tip: Option<&ChainedHeader>, options: &ConsensusOptions) -> f64 {
    let Some(tip) = tip else {
        return 0.0;
    };

    let mut kernels_sum = 0.0;
    let mut elapsed: i64 = 0;
    let mut handled = 0usize;
    let mut previous_stake: Option<&ChainedHeader> = None;

    for header in tip.iter() {
        if handled >= NETWORK_WEIGHT_INTERVALS {
            break;
        }
        if !header.proof_of_stake {
            continue;
        }
        if let Some(prev) = previous_stake {
            kernels_sum += get_difficulty(CompactTarget(prev.header.bits)) * HASHES_PER_DIFFICULTY;
            elapsed += i64::from(prev.time()) - i64::from(header.time());
            handled += 1;
        }
        previous_stake = Some(header);
    }

    if handled == 0 || elapsed <= 0 {
        return 0.0;
    }
    kernels_sum / elapsed as f64 * f64::from(options.pos_timestamp_mask + 1)
}

/// Bitcoin-style PoW retargeting
#[derive(Clone, Debug)]
pub struct DifficultyAdjuster {
    options: Arc<ConsensusOptions>,
}

impl DifficultyAdjuster {
    /// Create a new difficulty adjuster
    pub fn new(options: Arc<ConsensusOptions>) -> Self {
        Self { options }
    }

    /// Compact target required for the block after `tip` with time `new_block_time`
    pub fn next_work_required(&self, tip: &ChainedHeader, new_block_time: u32) -> CompactTarget {
        let options = &self.options;
        let limit = options.pow_limit;
        let interval = options.difficulty_adjustment_interval().max(1);

        if (tip.height + 1) % interval != 0 {
            if options.pow_allow_min_difficulty_blocks {
                // a block more than twice the spacing late may use the minimum difficulty
                if u64::from(new_block_time)
                    > u64::from(tip.time()) + 2 * u64::from(options.pow_target_spacing)
                {
                    return limit;
                }
                return self.last_non_special_bits(tip, interval);
            }
            return CompactTarget(tip.header.bits);
        }

        let first_height = tip.height + 1 - interval;
        let first_time = tip
            .ancestor(first_height)
            .map(|h| h.time())
            .unwrap_or_else(|| tip.time());
        self.calculate_next_work_required(tip, first_time)
    }

    /// Retarget from the timespan between `first_time` and `tip`
    pub fn calculate_next_work_required(&self, tip: &ChainedHeader, first_time: u32) -> CompactTarget {
        let options = &self.options;
        if options.pow_no_retargeting {
            return CompactTarget(tip.header.bits);
        }

        let timespan = i64::from(options.pow_target_timespan);
        let actual = (i64::from(tip.time()) - i64::from(first_time)).clamp(timespan / 4, timespan * 4);

        let limit = options.pow_limit_target();
        let current = CompactTarget(tip.header.bits).expand().value;
        // actual is clamped positive above
        let scaled = current.full_mul(U256::from(actual as u64)) / U512::from(timespan as u64);

        let next = if scaled > U512::from(limit) {
            limit
        } else {
            U256::try_from(scaled).unwrap_or(limit)
        };
        CompactTarget::from_target(next)
    }

    // Bits of the last block that was not a minimum-difficulty exception
    fn last_non_special_bits(&self, tip: &ChainedHeader, interval: u32) -> CompactTarget {
        let limit = self.options.pow_limit.0;
        let mut node = tip;
        while let Some(prev) = node.previous() {
            if node.height % interval != 0 && node.header.bits == limit {
                node = prev;
            } else {
                break;
            }
        }
        CompactTarget(node.header.bits)
    }
}
