//! Domain layer - pure types and consensus math for block production
//!
//! Nothing in here performs I/O or awaits. The assembler and the mining
//! loops feed collaborator data into these types and functions.
//!
//! ## Entities
//!
//! - [`Transaction`], [`Block`], [`BlockHeader`]: bitcoin-style wire types
//! - [`BlockTemplate`]: a candidate block with fee and sigop accounting
//! - [`ChainedHeader`]: immutable, `Arc`-linked chain position
//! - [`MempoolSnapshot`]: point-in-time, fee-rate-ordered pool view
//! - [`UtxoStakeDescription`]: one stake candidate
//!
//! ## Consensus math
//!
//! - [`CompactTarget`]: `nBits` encoding
//! - [`get_difficulty`], [`get_network_weight`], [`DifficultyAdjuster`]
//! - [`compute_block_version`]: BIP9 signalling
//! - [`search_kernel`]: PoS kernel search
//!
//! ## Invariants
//!
//! [`invariants::check_template`] runs on every finished template.

pub mod chain;
pub mod consensus;
pub mod difficulty;
mod entities;
pub mod invariants;
pub mod mempool;
pub mod stake;
pub mod target;
pub mod version_bits;

pub use chain::ChainedHeader;
pub use consensus::{CoinAgeRule, ConsensusOptions, Deployment, NetworkKind, RewardSchedule};
pub use difficulty::{difficulty_or_last_pos, get_difficulty, get_network_weight, DifficultyAdjuster};
pub use entities::*;
pub use invariants::FirstTransactionKind;
pub use mempool::{InMemoryMempool, LockPoints, MempoolEntry, MempoolSnapshot};
pub use stake::{
    search_kernel, KernelMatch, KernelSearchOutcome, KernelSearchParams, SpendableOutput,
    StakeEligibility, UnspentOutput, UtxoStakeDescription, WalletSecret,
};
pub use target::CompactTarget;
pub use version_bits::{compute_block_version, ThresholdState, VERSIONBITS_TOP_BITS};
