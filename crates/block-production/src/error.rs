//! Error types for block production

use thiserror::Error;

/// Result type alias for block production operations
pub type Result<T> = std::result::Result<T, BlockProductionError>;

/// Errors that can occur during block production
#[derive(Debug, Error)]
pub enum BlockProductionError {
    /// Mempool communication error
    #[error("Mempool error: {0}")]
    MempoolError(String),

    /// Coin view lookup failed
    #[error("Coin view error: {0}")]
    CoinViewError(String),

    /// Wallet could not list, sign or unlock
    #[error("Wallet error: {0}")]
    WalletError(String),

    /// Consensus rejected a submitted block
    #[error("Block {hash} rejected: {reason}")]
    ConsensusRejected {
        /// Display hash of the rejected block
        hash: String,
        /// Reason given by the rule engine
        reason: String,
    },

    /// No wallet output passed the staking filter
    #[error("No UTXOs are eligible for staking")]
    NoEligibleUtxos,

    /// Block time too far ahead of adjusted network time
    #[error("Block time {block_time} is more than {drift}s ahead of adjusted time {adjusted_time}")]
    TimeSyncOutOfBounds {
        /// Proposed block time
        block_time: u32,
        /// Adjusted network time
        adjusted_time: u32,
        /// Allowed drift in seconds
        drift: u32,
    },

    /// Node is still syncing
    #[error("Node is in initial block download")]
    InitialBlockDownload,

    /// Chain has moved past the last PoW height
    #[error("Proof-of-work blocks are not allowed at height {height} (last PoW block {last_pow_block})")]
    ProofOfWorkDisabled {
        /// Height of the block being mined
        height: u32,
        /// Last height a PoW block may occupy
        last_pow_block: u32,
    },

    /// No chain tip available
    #[error("No chain tip available")]
    NoChainTip,

    /// A template or collaborator broke a contract
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Tracing subscriber setup failed
    #[error("Telemetry error: {0}")]
    TelemetryError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Loop or request was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl BlockProductionError {
    /// Check if error is recoverable (record it and retry next tick)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MempoolError(_)
                | Self::CoinViewError(_)
                | Self::WalletError(_)
                | Self::ConsensusRejected { .. }
                | Self::NoEligibleUtxos
                | Self::TimeSyncOutOfBounds { .. }
                | Self::InitialBlockDownload
                | Self::NoChainTip
        )
    }

    /// Check if error is critical (should stop production)
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::InvariantViolation(_)
                | Self::InvalidConfig(_)
                | Self::InternalError(_)
                | Self::ProofOfWorkDisabled { .. }
        )
    }

    /// Cancellation is the normal shutdown path, not a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<serde_json::Error> for BlockProductionError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_recoverability() {
        assert!(BlockProductionError::NoEligibleUtxos.is_recoverable());
        assert!(BlockProductionError::InitialBlockDownload.is_recoverable());
        assert!(BlockProductionError::ConsensusRejected {
            hash: "00".into(),
            reason: "bad-cs-kernel".into()
        }
        .is_recoverable());
        assert!(!BlockProductionError::InvariantViolation("x".into()).is_recoverable());
        assert!(!BlockProductionError::Cancelled.is_recoverable());
    }

    #[test]
    fn test_error_criticality() {
        assert!(BlockProductionError::InvariantViolation("tip".into()).is_critical());
        assert!(BlockProductionError::InvalidConfig("x".into()).is_critical());
        assert!(!BlockProductionError::NoEligibleUtxos.is_critical());
        assert!(!BlockProductionError::Cancelled.is_critical());
    }

    #[test]
    fn test_time_sync_message() {
        let err = BlockProductionError::TimeSyncOutOfBounds {
            block_time: 1_100,
            adjusted_time: 1_000,
            drift: 15,
        };
        assert_eq!(
            err.to_string(),
            "Block time 1100 is more than 15s ahead of adjusted time 1000"
        );
    }
}
