//! Proof-of-work template assembly

use std::sync::Arc;

use crate::domain::{
    BlockHeader, ChainedHeader, DifficultyAdjuster, FirstTransactionKind, OutPoint, Script,
    Transaction, TxIn, TxOut,
};
use crate::error::Result;

use super::{AssemblerCore, AssemblyContext, BlockAssembler};

/// Builds PoW templates whose coinbase pays subsidy plus fees
#[derive(Debug)]
pub struct PowBlockAssembler {
    core: AssemblerCore,
    difficulty: DifficultyAdjuster,
}

impl PowBlockAssembler {
    /// Create a new PoW assembler
    pub fn new(core: AssemblerCore) -> Self {
        let difficulty = DifficultyAdjuster::new(Arc::clone(&core.options));
        Self { core, difficulty }
    }

    /// Coinbase with a zero-value output and `coinbase(height, extra_nonce)` input script
    pub fn coinbase(height: u32, time: u32, extra_nonce: u32) -> Transaction {
        let mut tx = Transaction::new(time);
        tx.inputs.push(TxIn {
            prevout: OutPoint::null(),
            script_sig: Script::coinbase(height, extra_nonce),
            sequence: u32::MAX,
        });
        tx.outputs.push(TxOut::new(0, Script::empty()));
        tx
    }

    /// Block time for a block after `tip`
    pub fn block_time(tip: &ChainedHeader, adjusted_time: u32) -> u32 {
        adjusted_time.max(tip.time() + 1)
    }
}

impl BlockAssembler for PowBlockAssembler {
    fn core(&self) -> &AssemblerCore {
        &self.core
    }

    fn first_transaction_kind(&self) -> FirstTransactionKind {
        FirstTransactionKind::Coinbase
    }

    fn create_first_transaction(&self, ctx: &AssemblyContext, _payout_script: &Script) -> Transaction {
        Self::coinbase(ctx.height, ctx.adjusted_time, 0)
    }

    fn update_headers(&self, ctx: &AssemblyContext, version: i32) -> Result<BlockHeader> {
        let time = Self::block_time(&ctx.tip, ctx.adjusted_time);
        Ok(BlockHeader {
            version,
            prev_hash: ctx.tip.hash,
            merkle_root: Default::default(),
            time,
            bits: self.difficulty.next_work_required(&ctx.tip, time).0,
            nonce: 0,
        })
    }

    fn finalize_first_transaction(
        &self,
        ctx: &AssemblyContext,
        first: &mut Transaction,
        total_fee: i64,
        payout_script: &Script,
    ) {
        let subsidy = self.core.options.rewards.pow_subsidy(ctx.height);
        first.outputs[0] = TxOut::new(subsidy + total_fee, payout_script.clone());
    }
}
