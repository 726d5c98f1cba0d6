//! Stake candidates, coin-age eligibility and kernel hashing
//!
//! Everything here is pure: the minting loop collects the inputs (wallet
//! outputs, coin view entries, stake modifier, adjusted time) and these
//! functions decide which outputs may stake and which one wins.

use std::fmt;

use primitive_types::{H256, U256, U512};
use serde::{Deserialize, Serialize};

use super::consensus::{CoinAgeRule, ConsensusOptions};
use super::entities::{Amount, OutPoint, TxOut};
use super::target::weighted_target;
use crate::utils::hashing::{hash256, hash_to_u256};

/// Credentials of an unlocked staking wallet
#[derive(Clone, PartialEq, Eq)]
pub struct WalletSecret {
    /// Wallet name
    pub wallet_name: String,

    /// Wallet password, kept in memory while staking
    pub password: String,
}

impl WalletSecret {
    /// Create a wallet secret
    pub fn new(wallet_name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            wallet_name: wallet_name.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for WalletSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletSecret")
            .field("wallet_name", &self.wallet_name)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Output the wallet can spend for staking
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpendableOutput {
    /// Output reference
    pub outpoint: OutPoint,

    /// Output as the wallet knows it
    pub tx_out: TxOut,

    /// Hash of the block containing the output
    pub block_hash: H256,
}

/// Unspent-set entry for one output
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    /// Output
    pub tx_out: TxOut,

    /// Height of the containing block
    pub height: u32,

    /// Time of the containing block
    pub time: u32,

    /// Output was created by a coinstake
    pub is_coinstake: bool,
}

/// One stake candidate for a single minting attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UtxoStakeDescription {
    /// Output reference
    pub outpoint: OutPoint,

    /// Output being staked
    pub tx_out: TxOut,

    /// Hash of the containing block
    pub block_hash: H256,

    /// Unspent-set entry
    pub utxo: UnspentOutput,

    /// Index of the wallet secret that owns the output
    pub secret_index: usize,
}

impl UtxoStakeDescription {
    /// Output value
    pub fn value(&self) -> Amount {
        self.tx_out.value
    }

    /// Confirmations the output will have in the block at `next_height`
    pub fn confirmations_at(&self, next_height: u32) -> u32 {
        (next_height + 1).saturating_sub(self.utxo.height)
    }
}

/// Rules deciding which outputs may stake
#[derive(Clone, Copy, Debug)]
pub struct StakeEligibility {
    coin_age: CoinAgeRule,
    coinbase_maturity: u32,
    minimum_staking_coin_value: Amount,
}

impl StakeEligibility {
    /// Rules for `options` with a wallet-level minimum value
    pub fn new(options: &ConsensusOptions, minimum_staking_coin_value: Amount) -> Self {
        Self {
            coin_age: options.coin_age,
            coinbase_maturity: options.coinbase_maturity,
            minimum_staking_coin_value,
        }
    }

    /// True when `description` may stake in the block at `next_height`
    pub fn is_eligible(&self, description: &UtxoStakeDescription, next_height: u32) -> bool {
        if description.value() < self.minimum_staking_coin_value || description.value() <= 0 {
            return false;
        }
        if description.confirmations_at(next_height) < self.coin_age.min_confirmations_at(next_height) {
            return false;
        }
        if description.utxo.is_coinstake
            && next_height.saturating_sub(description.utxo.height) < self.coinbase_maturity
        {
            return false;
        }
        true
    }

    /// Keep the descriptions that may stake on top of a tip at `as_of_height`,
    /// preserving their order.
    pub fn filter(
        &self,
        descriptions: Vec<UtxoStakeDescription>,
        as_of_height: u32,
    ) -> Vec<UtxoStakeDescription> {
        let next_height = as_of_height + 1;
        descriptions
            .into_iter()
            .filter(|d| self.is_eligible(d, next_height))
            .collect()
    }
}

/// PoS kernel hash
pub fn kernel_hash(stake_modifier: &H256, utxo_time: u32, prevout: &OutPoint, time: u32) -> H256 {
    let mut buf = Vec::with_capacity(32 + 4 + 32 + 4 + 4);
    buf.extend_from_slice(stake_modifier.as_bytes());
    buf.extend_from_slice(&utxo_time.to_le_bytes());
    buf.extend_from_slice(prevout.txid.as_bytes());
    buf.extend_from_slice(&prevout.vout.to_le_bytes());
    buf.extend_from_slice(&time.to_le_bytes());
    hash256(&buf)
}

/// Kernel is valid when `hash <= target * value`
pub fn check_kernel(hash: &H256, target: U256, value: Amount) -> bool {
    if value <= 0 {
        return false;
    }
    U512::from(hash_to_u256(hash)) <= weighted_target(target, value as u64)
}

/// Inputs of one kernel search, fixed for the whole search
#[derive(Clone, Debug)]
pub struct KernelSearchParams {
    /// Stake modifier of the tip
    pub stake_modifier: H256,

    /// Expanded stake target
    pub target: U256,

    /// Time of the tip
    pub prev_time: u32,

    /// Adjusted network time read once for this tick
    pub adjusted_time: u32,

    /// Timestamp granularity mask
    pub timestamp_mask: u32,

    /// Forward window limit
    pub future_drift_secs: u32,

    /// Times up to here were already searched on this tip without a match
    pub searched_until: u32,
}

impl KernelSearchParams {
    /// Candidate block times in ascending order
    pub fn candidate_times(&self) -> Vec<u32> {
        let step = self.timestamp_mask + 1;
        let end = self.adjusted_time.saturating_add(self.future_drift_secs);
        let mut times = Vec::new();
        let mut time = self.adjusted_time & !self.timestamp_mask;
        while time <= end {
            if time > self.prev_time && time > self.searched_until {
                times.push(time);
            }
            match time.checked_add(step) {
                Some(next) => time = next,
                None => break,
            }
        }
        times
    }
}

/// Winning candidate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelMatch {
    /// Index into the eligible list
    pub index: usize,

    /// Block time the kernel is valid for
    pub time: u32,

    /// Kernel hash
    pub hash: H256,
}

/// Result of a kernel search
#[derive(Clone, Debug, Default)]
pub struct KernelSearchOutcome {
    /// First valid kernel, if any
    pub found: Option<KernelMatch>,

    /// Number of kernel hashes computed
    pub hashes_checked: u64,

    /// Span of candidate times searched, in seconds
    pub searched_span: u32,
}

/// Search eligible outputs (outer, in order) and candidate times (inner,
/// ascending) for the first valid kernel.
#[tracing::instrument(skip_all, fields(candidates = eligible.len()))]
pub fn search_kernel(eligible: &[UtxoStakeDescription], params: &KernelSearchParams) -> KernelSearchOutcome {
    let times = params.candidate_times();
    let searched_span = match (times.first(), times.last()) {
        (Some(first), Some(last)) => last - first + params.timestamp_mask + 1,
        _ => 0,
    };

    let mut outcome = KernelSearchOutcome {
        searched_span,
        ..Default::default()
    };

    for (index, description) in eligible.iter().enumerate() {
        for &time in &times {
            if time < description.utxo.time {
                continue;
            }
            let hash = kernel_hash(
                &params.stake_modifier,
                description.utxo.time,
                &description.outpoint,
                time,
            );
            outcome.hashes_checked += 1;
            if check_kernel(&hash, params.target, description.value()) {
                tracing::debug!(index, time, "kernel found");
                outcome.found = Some(KernelMatch { index, time, hash });
                return outcome;
            }
        }
    }
    outcome
}
