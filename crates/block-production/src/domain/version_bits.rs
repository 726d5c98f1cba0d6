//! BIP9 version bits
//!
//! Deployments move through `Defined → Started → LockedIn → Active` (or
//! `Failed` on timeout), one confirmation window at a time. A block's state is
//! the state of the first block of its window, so the walk only looks at
//! window boundaries. States are recomputed from header history on every
//! call; nothing is cached.
//!
//! A deployment's `start_time` and `timeout` are unix timestamps compared
//! with the median time past of each window's last block, not heights.

use serde::{Deserialize, Serialize};

use super::chain::ChainedHeader;
use super::consensus::{ConsensusOptions, Deployment};

/// Top bits every BIP9 version carries
pub const VERSIONBITS_TOP_BITS: i32 = 0x2000_0000;

/// Mask selecting the top three bits
pub const VERSIONBITS_TOP_MASK: u32 = 0xE000_0000;

/// Number of usable signalling bits
pub const VERSIONBITS_NUM_BITS: u8 = 29;

/// Deployment state for one confirmation window
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThresholdState {
    /// Before the start time
    Defined,
    /// Signalling period
    Started,
    /// Threshold reached, activates next window
    LockedIn,
    /// Rules enforced
    Active,
    /// Timed out without locking in
    Failed,
}

/// True when `version` signals for `bit` under BIP9 semantics
pub fn signals(version: i32, bit: u8) -> bool {
    (version as u32 & VERSIONBITS_TOP_MASK) == VERSIONBITS_TOP_BITS as u32
        && (version as u32 >> bit) & 1 == 1
}

/// State of `deployment` for the block built on top of `prev`
pub fn deployment_state(
    prev: Option<&ChainedHeader>,
    deployment: &Deployment,
    period: u32,
    threshold: u32,
) -> ThresholdState {
    match deployment.start_time {
        Deployment::ALWAYS_ACTIVE => return ThresholdState::Active,
        Deployment::NEVER_ACTIVE => return ThresholdState::Failed,
        _ => {}
    }
    let period = period.max(1);

    // move to the last block of the previous window
    let mut cursor = prev.and_then(|p| {
        p.height
            .checked_sub((p.height + 1) % period)
            .and_then(|h| p.ancestor(h))
    });

    let mut to_compute = Vec::new();
    let mut state = ThresholdState::Defined;
    while let Some(node) = cursor {
        if i64::from(node.median_time_past()) < deployment.start_time {
            break;
        }
        to_compute.push(node);
        cursor = node.height.checked_sub(period).and_then(|h| node.ancestor(h));
    }

    while let Some(node) = to_compute.pop() {
        let mtp = i64::from(node.median_time_past());
        state = match state {
            ThresholdState::Defined => {
                if mtp >= deployment.timeout {
                    ThresholdState::Failed
                } else if mtp >= deployment.start_time {
                    ThresholdState::Started
                } else {
                    ThresholdState::Defined
                }
            }
            ThresholdState::Started => {
                if mtp >= deployment.timeout {
                    ThresholdState::Failed
                } else {
                    let count = node
                        .iter()
                        .take(period as usize)
                        .filter(|h| signals(h.header.version, deployment.bit))
                        .count();
                    if count as u32 >= threshold {
                        ThresholdState::LockedIn
                    } else {
                        ThresholdState::Started
                    }
                }
            }
            ThresholdState::LockedIn => ThresholdState::Active,
            terminal => terminal,
        };
    }
    state
}

/// Block version for the block after `previous`: the top bits plus the bit
/// of every deployment that is `Started` or `LockedIn`.
pub fn compute_block_version(previous: &ChainedHeader, options: &ConsensusOptions) -> i32 {
    let mut version = VERSIONBITS_TOP_BITS;
    for deployment in &options.deployments {
        let state = deployment_state(
            Some(previous),
            deployment,
            options.miner_confirmation_window,
            options.rule_change_activation_threshold,
        );
        if matches!(state, ThresholdState::Started | ThresholdState::LockedIn) {
            version |= 1 << deployment.bit;
        }
    }
    version
}
