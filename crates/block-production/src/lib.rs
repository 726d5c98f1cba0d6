//! # Block Production Engine
//!
//! Block template assembly, proof-of-work mining and proof-of-stake minting
//! for a hybrid PoW/PoS UTXO full node.
//!
//! ## Purpose
//!
//! - Build candidate blocks from the mempool under size, weight and sigop
//!   budgets, ordered by ancestor fee rate
//! - Search nonces for PoW templates, on demand or in a background loop
//! - Search stake kernels over wallet outputs and mint signed PoS blocks
//! - Report difficulty, network weight and expected time to a stake
//!
//! ## Architecture Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │  Mining (Outer)                                     │
//! │  - PowMining: nonce search loop                     │
//! │  - PosMinting: kernel search and coinstake loop     │
//! └─────────────────────────────────────────────────────┘
//!                         │
//! ┌─────────────────────────────────────────────────────┐
//! │  Assembler + Ports (Middle)                         │
//! │  - BlockAssembler: PoW and PoS template variants    │
//! │  - Outbound: ConsensusManager, CoinView, Wallet...  │
//! └─────────────────────────────────────────────────────┘
//!                         │
//! ┌─────────────────────────────────────────────────────┐
//! │  Domain (Inner - Pure Logic)                        │
//! │  - Targets, difficulty, BIP9 version bits           │
//! │  - Kernel search, template invariants               │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Critical Invariants
//!
//! 1. **First transaction**: index 0 is the coinbase (PoW) or coinstake (PoS)
//! 2. **Fee accounting**: `tx_fees[0] == -total_fee`
//! 3. **Parents first**: a selected transaction follows its in-pool parents
//! 4. **Timestamp bounds**: `tip.time < block.time <= adjusted_time + drift`
//! 5. **Budgets**: size, weight and sigop cost stay under the configured caps
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! let scheduler = Arc::new(TokioScheduler::new(shutdown.clone()));
//! let mining = PowMining::new(options, settings, consensus, mempool, time, scheduler, metrics);
//! let hashes = mining.generate_blocks(&payout, 10, u64::MAX, shutdown.child_token()).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Block template assembly
pub mod assembler;
pub mod config;
/// Domain models and consensus math
pub mod domain;
pub mod error;
pub mod metrics;
/// PoW mining and PoS minting loops
pub mod mining;
pub mod ports;
pub mod scheduler;
pub mod telemetry;
pub mod utils;

#[cfg(test)]
mod testing;

pub use assembler::{
    AssemblerCore, AssemblyContext, BlockAssembler, PosBlockAssembler, PowBlockAssembler,
    TransactionSelector,
};
pub use config::{BlockProductionConfig, MinerSettings, MintingSettings};
pub use error::{BlockProductionError, Result};
pub use metrics::Metrics;
pub use mining::{MintingCollaborators, PosMinter, PosMinting, PowMiner, PowMining};

pub use ports::{
    CoinView, ConsensusManager, MempoolView, MiningService, MiningStatus, Scheduler,
    StakeValidator, StakingService, StakingStatus, StakingWallet, TimeProvider,
};

pub use scheduler::{LoopHandle, TokioScheduler};
pub use telemetry::{init_tracing, TelemetryConfig};

/// Nonces tried per blocking batch before the miner checks for cancellation
pub const INNER_LOOP_COUNT: u64 = 0x10000;

/// Default template size cap in bytes
pub const DEFAULT_BLOCK_MAX_SIZE: usize = 750_000;

/// Default template weight cap
pub const DEFAULT_BLOCK_MAX_WEIGHT: usize = 3_000_000;

/// Default minimum fee rate, in satoshis per 1000 bytes
pub const DEFAULT_BLOCK_MIN_FEE_RATE: domain::Amount = 1_000;

/// Default minimum value an output needs to stake
pub const DEFAULT_MINIMUM_STAKING_COIN_VALUE: domain::Amount = 10_000_000;
