//! Block template assembly
//!
//! [`BlockAssembler::build`] runs four steps against one tip:
//!
//! 1. [`create_first_transaction`](BlockAssembler::create_first_transaction)
//! 2. [`compute_block_version`](BlockAssembler::compute_block_version)
//! 3. [`add_transactions`](BlockAssembler::add_transactions)
//! 4. [`update_headers`](BlockAssembler::update_headers)
//!
//! then lets the implementation finish the first transaction, assembles the
//! block and runs the template invariants. Each step takes an
//! [`AssemblyContext`] so it can be called on its own.
//!
//! [`PowBlockAssembler`] pays subsidy plus fees to the payout script.
//! [`PosBlockAssembler`] leaves a placeholder for the minting loop to replace
//! with the coinstake.

pub mod pos;
pub mod pow;
pub mod selection;

use std::sync::Arc;

use tracing::info;

use crate::config::MinerSettings;
use crate::domain::invariants::{check_template, check_tip};
use crate::domain::{
    version_bits, Amount, Block, BlockHeader, BlockTemplate, ChainedHeader, ConsensusOptions,
    FirstTransactionKind, MempoolEntry, MempoolSnapshot, Script, Transaction,
};
use crate::error::Result;
use crate::ports::{MempoolView, TimeProvider};
use crate::utils::display_hash;

pub use pos::PosBlockAssembler;
pub use pow::PowBlockAssembler;
pub use selection::{BlockBudget, SelectionPoint, TransactionSelection, TransactionSelector};

/// Everything a build reads once, up front
#[derive(Clone, Debug)]
pub struct AssemblyContext {
    /// Tip the block extends
    pub tip: Arc<ChainedHeader>,

    /// Height of the new block
    pub height: u32,

    /// Adjusted network time at the start of the build
    pub adjusted_time: u32,

    /// Median time past of the tip; lock times are checked against it
    pub lock_time_cutoff: i64,
}

impl AssemblyContext {
    /// Height and cutoff for transaction selection
    pub fn selection_point(&self) -> SelectionPoint {
        SelectionPoint {
            height: self.height,
            lock_time_cutoff: self.lock_time_cutoff,
        }
    }
}

/// Collaborators and settings shared by every assembler
#[derive(Clone)]
pub struct AssemblerCore {
    /// Consensus parameters
    pub options: Arc<ConsensusOptions>,

    /// Mempool to snapshot
    pub mempool: Arc<dyn MempoolView>,

    /// Network-adjusted clock
    pub time: Arc<dyn TimeProvider>,

    /// Miner settings
    pub settings: MinerSettings,

    selector: TransactionSelector,
}

impl AssemblerCore {
    /// Core with the selection budget derived from `settings` and `options`
    pub fn new(
        options: Arc<ConsensusOptions>,
        mempool: Arc<dyn MempoolView>,
        time: Arc<dyn TimeProvider>,
        settings: MinerSettings,
    ) -> Self {
        let selector = TransactionSelector::new(
            BlockBudget::new(&settings, &options),
            settings.block_min_fee_rate,
        );
        Self {
            options,
            mempool,
            time,
            settings,
            selector,
        }
    }

    /// Transaction selector for this core's budget
    pub fn selector(&self) -> &TransactionSelector {
        &self.selector
    }
}

impl std::fmt::Debug for AssemblerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssemblerCore")
            .field("network", &self.options.network)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Builds block templates on top of a tip
pub trait BlockAssembler: Send + Sync {
    /// Shared collaborators
    fn core(&self) -> &AssemblerCore;

    /// Shape the first transaction must have when the template is finished
    fn first_transaction_kind(&self) -> FirstTransactionKind;

    /// Step 1: the coinbase or placeholder
    fn create_first_transaction(&self, ctx: &AssemblyContext, payout_script: &Script) -> Transaction;

    /// Step 2: BIP9 version for the block after `previous`
    fn compute_block_version(&self, previous: &ChainedHeader) -> i32 {
        version_bits::compute_block_version(previous, &self.core().options)
    }

    /// Extra per-entry rule applied during selection
    fn accepts_entry(&self, _ctx: &AssemblyContext, _entry: &MempoolEntry) -> bool {
        true
    }

    /// Step 3: greedy selection from the mempool snapshot
    fn add_transactions(&self, ctx: &AssemblyContext, snapshot: &MempoolSnapshot) -> TransactionSelection {
        self.core()
            .selector()
            .select(snapshot, ctx.selection_point(), |entry| self.accepts_entry(ctx, entry))
    }

    /// Step 4: header fields for the new block
    fn update_headers(&self, ctx: &AssemblyContext, version: i32) -> Result<BlockHeader>;

    /// Fill in the first transaction once fees and block time are known
    fn finalize_first_transaction(
        &self,
        _ctx: &AssemblyContext,
        _first: &mut Transaction,
        _total_fee: Amount,
        _payout_script: &Script,
    ) {
    }

    /// Read the clock and median time once for a build on `tip`
    fn context(&self, tip: &Arc<ChainedHeader>) -> Result<AssemblyContext> {
        check_tip(tip)?;
        Ok(AssemblyContext {
            tip: Arc::clone(tip),
            height: tip.height + 1,
            adjusted_time: self.core().time.adjusted_unix_time(),
            lock_time_cutoff: i64::from(tip.median_time_past()),
        })
    }

    /// Run every step and return a checked template
    fn build(&self, tip: &Arc<ChainedHeader>, payout_script: &Script) -> Result<BlockTemplate> {
        let ctx = self.context(tip)?;
        self.build_from(&ctx, payout_script)
    }

    /// [`build`](BlockAssembler::build) with a context the caller already read
    fn build_from(&self, ctx: &AssemblyContext, payout_script: &Script) -> Result<BlockTemplate> {
        let core = self.core();

        let mut first = self.create_first_transaction(ctx, payout_script);
        let version = self.compute_block_version(&ctx.tip);
        let snapshot = core.mempool.snapshot();
        let selection = self.add_transactions(ctx, &snapshot);
        let header = self.update_headers(ctx, version)?;

        first.time = header.time;
        self.finalize_first_transaction(ctx, &mut first, selection.total_fee, payout_script);

        let template = assemble(first, header, ctx, selection, core.options.witness_scale_factor);
        check_template(&template, &ctx.tip, &core.options, self.first_transaction_kind())?;

        info!(
            height = template.height,
            prev = %display_hash(&ctx.tip.hash),
            tx_count = template.block.transactions.len(),
            fees = template.total_fee,
            pooled = snapshot.len(),
            "block template built"
        );
        Ok(template)
    }
}

fn assemble(
    first: Transaction,
    header: BlockHeader,
    ctx: &AssemblyContext,
    selection: TransactionSelection,
    witness_scale_factor: usize,
) -> BlockTemplate {
    let first_sigops = (first.legacy_sigop_count() * witness_scale_factor) as i64;

    let mut transactions = Vec::with_capacity(selection.entries.len() + 1);
    let mut tx_fees = Vec::with_capacity(selection.entries.len() + 1);
    let mut tx_sigops_cost = Vec::with_capacity(selection.entries.len() + 1);

    transactions.push(first);
    tx_fees.push(-selection.total_fee);
    tx_sigops_cost.push(first_sigops);

    for entry in &selection.entries {
        transactions.push((*entry.tx).clone());
        tx_fees.push(entry.fee);
        tx_sigops_cost.push(entry.sigop_cost);
    }

    let mut block = Block {
        header,
        transactions,
        signature: Vec::new(),
    };
    block.update_merkle_root();

    BlockTemplate {
        block,
        height: ctx.height,
        total_fee: selection.total_fee,
        tx_fees,
        tx_sigops_cost,
        selected_count: selection.selected_count,
        updated_count: selection.updated_count,
    }
}
