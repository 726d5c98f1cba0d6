//! Configuration types for block production

use std::env;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::{Amount, ConsensusOptions, NetworkKind, COIN};
use crate::error::{BlockProductionError, Result};

/// Runtime configuration for block production
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct BlockProductionConfig {
    /// Network whose consensus options apply
    pub network: NetworkKind,

    /// Template and PoW loop settings
    pub miner: MinerSettings,

    /// PoS minting loop settings
    pub minting: MintingSettings,
}

/// Block template and PoW mining settings
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct MinerSettings {
    /// Largest template to build, in bytes (clamped to consensus limits)
    pub block_max_size: usize,

    /// Largest template to build, in weight units (clamped to consensus limits)
    pub block_max_weight: usize,

    /// Minimum fee rate for selection, in satoshis per 1000 bytes
    pub block_min_fee_rate: Amount,

    /// Pause between background mining ticks
    pub mine_interval_ms: u64,

    /// Nonce increments per template before it is rebuilt
    pub max_tries: u64,
}

impl Default for MinerSettings {
    fn default() -> Self {
        Self {
            block_max_size: crate::DEFAULT_BLOCK_MAX_SIZE,
            block_max_weight: crate::DEFAULT_BLOCK_MAX_WEIGHT,
            block_min_fee_rate: crate::DEFAULT_BLOCK_MIN_FEE_RATE,
            mine_interval_ms: 1_000,
            max_tries: u64::from(u32::MAX),
        }
    }
}

impl MinerSettings {
    /// Background mining interval
    pub fn mine_interval(&self) -> Duration {
        Duration::from_millis(self.mine_interval_ms)
    }
}

/// PoS minting settings
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct MintingSettings {
    /// Outputs worth less than this never stake
    pub minimum_staking_coin_value: Amount,

    /// Split large coinstake outputs in two
    pub enable_coinstake_splitting: bool,

    /// Splitting only happens above twice this value
    pub minimum_split_coin_value: Amount,

    /// Pause between minting ticks
    pub stake_interval_ms: u64,

    /// Delay before the first minting tick
    pub initial_delay_ms: u64,
}

impl Default for MintingSettings {
    fn default() -> Self {
        Self {
            minimum_staking_coin_value: crate::DEFAULT_MINIMUM_STAKING_COIN_VALUE,
            enable_coinstake_splitting: true,
            minimum_split_coin_value: 100 * COIN,
            stake_interval_ms: 500,
            initial_delay_ms: 0,
        }
    }
}

impl MintingSettings {
    /// Minting tick interval
    pub fn stake_interval(&self) -> Duration {
        Duration::from_millis(self.stake_interval_ms)
    }

    /// Delay before the first tick
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}

impl BlockProductionConfig {
    /// Defaults overridden by environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BP_NETWORK`: mainnet, testnet or regtest (default: mainnet)
    /// - `BP_BLOCK_MAX_SIZE`: template size cap in bytes
    /// - `BP_BLOCK_MAX_WEIGHT`: template weight cap
    /// - `BP_MIN_STAKING_COIN_VALUE`: smallest stakeable output in satoshis
    /// - `BP_STAKE_INTERVAL_MS`: minting tick interval
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the `BP_*` keys
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(network) = lookup("BP_NETWORK") {
            config.network = network.parse().map_err(BlockProductionError::InvalidConfig)?;
        }
        if let Some(size) = parse_var(&lookup, "BP_BLOCK_MAX_SIZE")? {
            config.miner.block_max_size = size;
        }
        if let Some(weight) = parse_var(&lookup, "BP_BLOCK_MAX_WEIGHT")? {
            config.miner.block_max_weight = weight;
        }
        if let Some(value) = parse_var(&lookup, "BP_MIN_STAKING_COIN_VALUE")? {
            config.minting.minimum_staking_coin_value = value;
        }
        if let Some(interval) = parse_var(&lookup, "BP_STAKE_INTERVAL_MS")? {
            config.minting.stake_interval_ms = interval;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings no build could honour
    pub fn validate(&self) -> Result<()> {
        if self.miner.block_max_size == 0 || self.miner.block_max_weight == 0 {
            return Err(BlockProductionError::InvalidConfig(
                "block size and weight caps must be positive".to_string(),
            ));
        }
        if self.miner.block_min_fee_rate < 0 {
            return Err(BlockProductionError::InvalidConfig(format!(
                "negative minimum fee rate {}",
                self.miner.block_min_fee_rate
            )));
        }
        if self.miner.max_tries == 0 {
            return Err(BlockProductionError::InvalidConfig(
                "max_tries must be at least 1".to_string(),
            ));
        }
        if self.minting.minimum_staking_coin_value < 0 || self.minting.minimum_split_coin_value < 0 {
            return Err(BlockProductionError::InvalidConfig(
                "staking coin values cannot be negative".to_string(),
            ));
        }
        if self.minting.stake_interval_ms == 0 {
            return Err(BlockProductionError::InvalidConfig(
                "stake interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Consensus options for the configured network
    pub fn consensus_options(&self) -> ConsensusOptions {
        ConsensusOptions::for_network(self.network)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| BlockProductionError::InvalidConfig(format!("{key}={raw} is not a valid value"))),
    }
}
