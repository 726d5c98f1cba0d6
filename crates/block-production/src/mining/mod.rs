//! Block production loops
//!
//! - [`PowMining`]: nonce search over PoW templates, on demand or in a loop
//! - [`PosMinting`]: periodic kernel search and coinstake minting
//!
//! Both run their background work through the [`Scheduler`](crate::ports::Scheduler)
//! port and report through the status types in [`crate::ports`].

pub mod coinstake;
pub mod pos_minting;
pub mod pow_mining;

pub use coinstake::build_coinstake;
pub use pos_minting::{MintingCollaborators, PosMinter, PosMinting, STAKE_LOOP_NAME};
pub use pow_mining::{PowMiner, PowMining, MINE_LOOP_NAME};
