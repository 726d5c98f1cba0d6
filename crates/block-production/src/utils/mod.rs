//! Utility modules for block production
//!
//! Shared helpers used across domain and mining code.

pub mod hashing;

pub use hashing::*;
