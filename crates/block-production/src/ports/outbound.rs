//! Outbound ports (driven side - SPI)
//!
//! Collaborators the block production engine consumes. Production code gets
//! real implementations from the node; tests plug in fakes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use primitive_types::H256;
use tokio_util::sync::CancellationToken;

use crate::domain::{
    Block, ChainedHeader, CompactTarget, MempoolSnapshot, OutPoint, SpendableOutput, Transaction,
    TxOut, UnspentOutput, WalletSecret,
};
use crate::error::Result;
use crate::scheduler::LoopHandle;

/// Port: chain tip and block submission
#[async_trait]
pub trait ConsensusManager: Send + Sync {
    /// Current best tip, `None` before genesis is loaded
    fn tip(&self) -> Option<Arc<ChainedHeader>>;

    /// True while the node is still catching up with the network
    fn is_initial_block_download(&self) -> bool;

    /// Validate and connect a block. `Ok(None)` means it was rejected.
    async fn submit_mined_block(&self, block: Block) -> Result<Option<Arc<ChainedHeader>>>;
}

/// Port: point-in-time view of the mempool
pub trait MempoolView: Send + Sync {
    /// Ordered snapshot taken under the mempool lock
    fn snapshot(&self) -> Arc<MempoolSnapshot>;
}

/// Port: unspent output set
#[async_trait]
pub trait CoinView: Send + Sync {
    /// Entries for the outpoints that are still unspent; spent or unknown
    /// outpoints are absent from the map
    async fn fetch_unspent_outputs(
        &self,
        outpoints: &[OutPoint],
    ) -> Result<HashMap<OutPoint, UnspentOutput>>;
}

/// Port: stake chain and PoS validation rules
pub trait StakeValidator: Send + Sync {
    /// Compact stake target for the block after `tip`
    fn next_required_target(&self, tip: &ChainedHeader) -> CompactTarget;

    /// Stake modifier the kernel of the block after `tip` commits to
    fn stake_modifier(&self, tip: &ChainedHeader) -> H256;

    /// True when the block with `hash` is proof-of-stake
    fn is_block_pos(&self, hash: &H256) -> bool;

    /// Most recent header (inclusive) whose type matches `want_pos`
    fn find_last_pos_or_pow<'a>(
        &self,
        tip: &'a ChainedHeader,
        want_pos: bool,
    ) -> Option<&'a ChainedHeader> {
        tip.iter().find(|h| self.is_block_pos(&h.hash) == want_pos)
    }
}

/// Port: staking wallet
pub trait StakingWallet: Send + Sync {
    /// Outputs of the wallet behind `secret` that could be staked
    fn spendable_outputs_for_staking(&self, secret: &WalletSecret) -> Result<Vec<SpendableOutput>>;

    /// Sign the coinstake inputs; `spent` holds the outputs being spent in input order
    fn sign_coinstake(&self, secret: &WalletSecret, tx: &mut Transaction, spent: &[TxOut]) -> Result<()>;

    /// Sign a block hash with the key that owns the kernel
    fn sign_block(&self, secret: &WalletSecret, block_hash: &H256) -> Result<Vec<u8>>;
}

/// Port: network-adjusted clock
pub trait TimeProvider: Send + Sync {
    /// Unix seconds adjusted by the peer time offset
    fn adjusted_unix_time(&self) -> u32;
}

/// System clock plus a peer-derived offset
#[derive(Debug, Default)]
pub struct SystemTimeProvider {
    offset_secs: AtomicI64,
}

impl SystemTimeProvider {
    /// Clock with no offset
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the peer time offset
    pub fn set_offset(&self, offset_secs: i64) {
        self.offset_secs.store(offset_secs, Ordering::Relaxed);
    }
}

impl TimeProvider for SystemTimeProvider {
    fn adjusted_unix_time(&self) -> u32 {
        let now = chrono::Utc::now().timestamp() + self.offset_secs.load(Ordering::Relaxed);
        now.clamp(0, i64::from(u32::MAX)) as u32
    }
}

/// Body of a periodic loop; one call is one tick. An `Err` ends the loop.
pub type PeriodicBody = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Port: periodic background work
pub trait Scheduler: Send + Sync {
    /// Run `body` every `interval` after `initial_delay`. Ticks of one loop
    /// never overlap.
    fn run_periodic(
        &self,
        name: &str,
        body: PeriodicBody,
        interval: Duration,
        initial_delay: Duration,
    ) -> LoopHandle;
}
