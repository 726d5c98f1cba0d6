//! Per-network consensus parameters
//!
//! `ConsensusOptions` is built once per network and shared by `Arc` with
//! every assembler and mining loop. Nothing mutates it after construction.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use super::entities::{Amount, COIN};
use super::target::CompactTarget;

/// Supported networks
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    /// Production network
    #[default]
    Mainnet,
    /// Public test network
    Testnet,
    /// Local regression-test network
    Regtest,
}

impl std::str::FromStr for NetworkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Self::Mainnet),
            "testnet" | "test" => Ok(Self::Testnet),
            "regtest" => Ok(Self::Regtest),
            other => Err(format!("unknown network '{other}'")),
        }
    }
}

impl std::fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
        };
        f.write_str(name)
    }
}

/// BIP9 deployment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    /// Human readable name
    pub name: String,

    /// Version bit (0..29)
    pub bit: u8,

    /// Median time past at which signalling starts, or one of the
    /// `ALWAYS_ACTIVE` / `NEVER_ACTIVE` sentinels
    pub start_time: i64,

    /// Median time past after which an unlocked deployment fails
    pub timeout: i64,
}

impl Deployment {
    /// Deployment active from genesis
    pub const ALWAYS_ACTIVE: i64 = -1;

    /// Deployment that never activates
    pub const NEVER_ACTIVE: i64 = -2;

    /// Timeout meaning "no timeout"
    pub const NO_TIMEOUT: i64 = i64::MAX;

    /// Create a deployment
    pub fn new(name: &str, bit: u8, start_time: i64, timeout: i64) -> Self {
        Self {
            name: name.to_string(),
            bit,
            start_time,
            timeout,
        }
    }
}

/// Minimum confirmations a staked output needs, changed by a soft fork
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinAgeRule {
    /// Confirmations required before activation
    pub legacy_min_confirmations: u32,

    /// Confirmations required at and after activation
    pub min_confirmations: u32,

    /// First height the stricter rule applies to
    pub activation_height: u32,
}

impl CoinAgeRule {
    /// Confirmations required for a block at `height`
    pub fn min_confirmations_at(&self, height: u32) -> u32 {
        if height >= self.activation_height {
            self.min_confirmations
        } else {
            self.legacy_min_confirmations
        }
    }
}

/// Block reward schedule
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSchedule {
    /// Height that receives the premine
    pub premine_height: u32,

    /// Premine amount
    pub premine_reward: Amount,

    /// Base proof-of-work subsidy
    pub proof_of_work_reward: Amount,

    /// PoW subsidy halving interval (`None` disables halving)
    pub subsidy_halving_interval: Option<u32>,

    /// Proof-of-stake reward per block
    pub proof_of_stake_reward: Amount,
}

impl RewardSchedule {
    /// PoW subsidy for a block at `height`
    pub fn pow_subsidy(&self, height: u32) -> Amount {
        if height == self.premine_height {
            return self.premine_reward;
        }
        match self.subsidy_halving_interval {
            Some(interval) if interval > 0 => {
                let halvings = height / interval;
                if halvings >= 64 {
                    0
                } else {
                    self.proof_of_work_reward >> halvings
                }
            }
            _ => self.proof_of_work_reward,
        }
    }

    /// PoS reward for a block at `height`
    pub fn pos_reward(&self, height: u32) -> Amount {
        if height == self.premine_height {
            self.premine_reward
        } else {
            self.proof_of_stake_reward
        }
    }
}

/// Immutable consensus parameters for one network
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsensusOptions {
    /// Network these options belong to
    pub network: NetworkKind,

    /// Maximum serialized block size without witness data
    pub max_block_base_size: usize,

    /// Maximum block weight
    pub max_block_weight: usize,

    /// Maximum signature operation cost per block
    pub max_block_sigops_cost: i64,

    /// Weight multiplier for non-witness bytes
    pub witness_scale_factor: usize,

    /// Confirmations before coinbase and coinstake outputs can be spent
    pub coinbase_maturity: u32,

    /// Coin-age soft fork for staked outputs
    pub coin_age: CoinAgeRule,

    /// BIP9 deployment table
    pub deployments: Vec<Deployment>,

    /// Blocks per BIP9 signalling period
    pub miner_confirmation_window: u32,

    /// Signalling blocks needed to lock in a deployment
    pub rule_change_activation_threshold: u32,

    /// Easiest allowed PoW target
    pub pow_limit: CompactTarget,

    /// PoW retarget period in seconds
    pub pow_target_timespan: u32,

    /// Target PoW block spacing in seconds
    pub pow_target_spacing: u32,

    /// Allow minimum-difficulty blocks after a long gap
    pub pow_allow_min_difficulty_blocks: bool,

    /// Disable PoW retargeting
    pub pow_no_retargeting: bool,

    /// Last height a PoW block may occupy (`None` for unlimited)
    pub last_pow_block: Option<u32>,

    /// Target PoS block spacing in seconds
    pub pos_target_spacing: u32,

    /// PoS block and kernel timestamps are multiples of `mask + 1`
    pub pos_timestamp_mask: u32,

    /// Maximum seconds a block may be ahead of adjusted network time
    pub future_drift_secs: u32,

    /// Reward schedule
    pub rewards: RewardSchedule,
}

impl ConsensusOptions {
    /// Parameters for `network`
    pub fn for_network(network: NetworkKind) -> Self {
        match network {
            NetworkKind::Mainnet => Self::mainnet(),
            NetworkKind::Testnet => Self::testnet(),
            NetworkKind::Regtest => Self::regtest(),
        }
    }

    /// Mainnet parameters
    pub fn mainnet() -> Self {
        Self {
            network: NetworkKind::Mainnet,
            max_block_base_size: 1_000_000,
            max_block_weight: 4_000_000,
            max_block_sigops_cost: 80_000,
            witness_scale_factor: 4,
            coinbase_maturity: 50,
            coin_age: CoinAgeRule {
                legacy_min_confirmations: 50,
                min_confirmations: 500,
                activation_height: 1_005_250,
            },
            deployments: vec![
                Deployment::new("csv", 0, 1_462_060_800, 1_493_596_800),
                Deployment::new("segwit", 1, 1_479_168_000, 1_510_704_000),
            ],
            miner_confirmation_window: 2016,
            rule_change_activation_threshold: 1916,
            pow_limit: CompactTarget(0x1e0f_ffff),
            pow_target_timespan: 14 * 24 * 60 * 60,
            pow_target_spacing: 10 * 60,
            pow_allow_min_difficulty_blocks: false,
            pow_no_retargeting: false,
            last_pow_block: Some(12_500),
            pos_target_spacing: 64,
            pos_timestamp_mask: 0x0f,
            future_drift_secs: 15,
            rewards: RewardSchedule {
                premine_height: 2,
                premine_reward: 98_000_000 * COIN,
                proof_of_work_reward: 4 * COIN,
                subsidy_halving_interval: None,
                proof_of_stake_reward: COIN,
            },
        }
    }

    /// Testnet parameters
    pub fn testnet() -> Self {
        Self {
            network: NetworkKind::Testnet,
            coinbase_maturity: 10,
            coin_age: CoinAgeRule {
                legacy_min_confirmations: 10,
                min_confirmations: 500,
                activation_height: 436_000,
            },
            deployments: vec![
                Deployment::new("csv", 0, 1_456_790_400, 1_493_596_800),
                Deployment::new("segwit", 1, 1_462_060_800, 1_493_596_800),
            ],
            rule_change_activation_threshold: 1512,
            pow_limit: CompactTarget(0x1f00_ffff),
            pow_allow_min_difficulty_blocks: true,
            rewards: RewardSchedule {
                premine_height: 2,
                premine_reward: 98_000_000 * COIN,
                proof_of_work_reward: 4 * COIN,
                subsidy_halving_interval: None,
                proof_of_stake_reward: COIN,
            },
            ..Self::mainnet()
        }
    }

    /// Regtest parameters
    pub fn regtest() -> Self {
        Self {
            network: NetworkKind::Regtest,
            coinbase_maturity: 10,
            coin_age: CoinAgeRule {
                legacy_min_confirmations: 10,
                min_confirmations: 10,
                activation_height: 0,
            },
            deployments: vec![Deployment::new("testdummy", 28, 0, Deployment::NO_TIMEOUT)],
            miner_confirmation_window: 144,
            rule_change_activation_threshold: 108,
            pow_limit: CompactTarget(0x207f_ffff),
            pow_allow_min_difficulty_blocks: true,
            pow_no_retargeting: true,
            last_pow_block: None,
            rewards: RewardSchedule {
                premine_height: 2,
                premine_reward: 98_000_000 * COIN,
                proof_of_work_reward: 50 * COIN,
                subsidy_halving_interval: Some(150),
                proof_of_stake_reward: COIN,
            },
            ..Self::mainnet()
        }
    }

    /// Blocks between PoW retargets
    pub fn difficulty_adjustment_interval(&self) -> u32 {
        self.pow_target_timespan / self.pow_target_spacing
    }

    /// PoW limit as a 256-bit target
    pub fn pow_limit_target(&self) -> U256 {
        self.pow_limit.expand().value
    }
}
