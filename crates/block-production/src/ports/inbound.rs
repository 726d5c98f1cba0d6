//! Inbound ports (driving side - API)
//!
//! What RPC handlers and node startup call into.

use async_trait::async_trait;
use primitive_types::H256;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::domain::{Amount, ChainedHeader, Script, UtxoStakeDescription, WalletSecret};
use crate::error::Result;

/// Primary port: proof-of-work mining
#[async_trait]
pub trait MiningService: Send + Sync {
    /// Mine until `block_count` blocks are accepted or `cancel` fires.
    /// Returns the hashes of the accepted blocks.
    async fn generate_blocks(
        &self,
        payout_script: &Script,
        block_count: usize,
        max_tries: u64,
        cancel: CancellationToken,
    ) -> Result<Vec<H256>>;

    /// Start the background mining loop
    fn mine(&self, payout_script: Script) -> Result<()>;

    /// Stop the background mining loop
    fn stop_mining(&self);

    /// Current mining status
    fn mining_status(&self) -> MiningStatus;
}

/// Primary port: proof-of-stake minting
#[async_trait]
pub trait StakingService: Send + Sync {
    /// Start the minting loop for the given unlocked wallets
    fn start_stake(&self, secrets: Vec<WalletSecret>) -> Result<()>;

    /// Stop the minting loop and clear its error
    fn stop_stake(&self);

    /// Current staking status
    fn staking_status(&self) -> StakingStatus;

    /// Difficulty of `header`, or of the last PoS block when `None`
    fn get_difficulty(&self, header: Option<&ChainedHeader>) -> f64;

    /// Estimated network stake weight
    fn get_network_weight(&self) -> f64;

    /// Wallet outputs that may stake on top of a tip at `as_of_height`
    async fn get_utxo_stake_descriptions_suitable_for_staking(
        &self,
        secrets: &[WalletSecret],
        as_of_height: u32,
    ) -> Result<Vec<UtxoStakeDescription>>;
}

/// PoW mining status
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MiningStatus {
    /// Background loop is running
    pub enabled: bool,

    /// Last error; cleared by the next success
    pub errors: Option<String>,

    /// Blocks accepted this session
    pub blocks_mined: u64,

    /// Hash of the last accepted block
    pub last_block_hash: Option<H256>,

    /// Height of the last accepted block
    pub last_block_height: Option<u32>,
}

/// Last successful mint
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LastMint {
    /// Block hash
    pub hash: H256,

    /// Block height
    pub height: u32,

    /// Block time
    pub time: u32,

    /// Value staked by the kernel
    pub stake_value: Amount,

    /// Reward plus fees paid to the staker
    pub reward: Amount,
}

/// PoS staking status
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StakingStatus {
    /// Minting loop is running
    pub enabled: bool,

    /// Last tick searched with eligible weight
    pub staking: bool,

    /// Last error; cleared by the next success
    pub errors: Option<String>,

    /// Serialized size of the last template
    pub current_block_size: usize,

    /// Transactions in the last template
    pub current_block_tx: usize,

    /// Transactions in the mempool snapshot
    pub pooled_tx: usize,

    /// Current PoS difficulty
    pub difficulty: f64,

    /// Seconds of candidate time searched in the last tick
    pub search_interval: u32,

    /// Eligible stake weight
    pub weight: Amount,

    /// Estimated network weight
    pub net_stake_weight: f64,

    /// Expected seconds until this node mints
    pub expected_time: u64,

    /// Last successful mint
    pub last_mint: Option<LastMint>,
}
