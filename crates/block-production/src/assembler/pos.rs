//! Proof-of-stake template assembly
//!
//! The template carries a placeholder first transaction. The minting loop
//! swaps in the signed coinstake once a kernel is found.

use std::sync::Arc;

use crate::domain::{
    BlockHeader, ChainedHeader, FirstTransactionKind, MempoolEntry, OutPoint, Script, Transaction,
    TxIn, TxOut,
};
use crate::error::{BlockProductionError, Result};
use crate::ports::StakeValidator;

use super::{AssemblerCore, AssemblyContext, BlockAssembler};

/// Builds PoS templates
pub struct PosBlockAssembler {
    core: AssemblerCore,
    stake_validator: Arc<dyn StakeValidator>,
}

impl PosBlockAssembler {
    /// Create a new PoS assembler
    pub fn new(core: AssemblerCore, stake_validator: Arc<dyn StakeValidator>) -> Self {
        Self {
            core,
            stake_validator,
        }
    }

    /// Block time after `tip`: at least one second past it, rounded down to
    /// the timestamp mask when that still moves forward
    pub fn block_time(&self, tip: &ChainedHeader, adjusted_time: u32) -> u32 {
        let time = adjusted_time.max(tip.time() + 1);
        let masked = time & !self.core.options.pos_timestamp_mask;
        if masked > tip.time() {
            masked
        } else {
            time
        }
    }
}

impl std::fmt::Debug for PosBlockAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PosBlockAssembler")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl BlockAssembler for PosBlockAssembler {
    fn core(&self) -> &AssemblerCore {
        &self.core
    }

    fn first_transaction_kind(&self) -> FirstTransactionKind {
        FirstTransactionKind::CoinstakePlaceholder
    }

    fn create_first_transaction(&self, ctx: &AssemblyContext, _payout_script: &Script) -> Transaction {
        let mut tx = Transaction::new(ctx.adjusted_time);
        tx.inputs.push(TxIn {
            prevout: OutPoint::null(),
            script_sig: Script::coinbase(ctx.height, 0),
            sequence: u32::MAX,
        });
        tx.outputs.push(TxOut::empty());
        tx
    }

    // transactions timestamped beyond the drift window would invalidate the block
    fn accepts_entry(&self, ctx: &AssemblyContext, entry: &MempoolEntry) -> bool {
        u64::from(entry.tx.time)
            <= u64::from(ctx.adjusted_time) + u64::from(self.core.options.future_drift_secs)
    }

    fn update_headers(&self, ctx: &AssemblyContext, version: i32) -> Result<BlockHeader> {
        let time = self.block_time(&ctx.tip, ctx.adjusted_time);
        let drift = self.core.options.future_drift_secs;
        if u64::from(time) > u64::from(ctx.adjusted_time) + u64::from(drift) {
            return Err(BlockProductionError::TimeSyncOutOfBounds {
                block_time: time,
                adjusted_time: ctx.adjusted_time,
                drift,
            });
        }
        Ok(BlockHeader {
            version,
            prev_hash: ctx.tip.hash,
            merkle_root: Default::default(),
            time,
            bits: self.stake_validator.next_required_target(&ctx.tip).0,
            nonce: 0,
        })
    }
}
