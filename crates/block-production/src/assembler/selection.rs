//! Greedy transaction selection over a mempool snapshot
//!
//! One pass over the snapshot in fee-rate order. A candidate that fails any
//! check is skipped and never revisited in the same pass, so selection is
//! O(n) after the snapshot sort.

use std::collections::HashSet;
use std::sync::Arc;

use primitive_types::H256;
use tracing::{debug, trace};

use crate::config::MinerSettings;
use crate::domain::{Amount, ConsensusOptions, MempoolEntry, MempoolSnapshot};

/// Bytes kept free for the first transaction
pub const COINBASE_RESERVED_SIZE: usize = 1_000;

/// Weight kept free for the first transaction
pub const COINBASE_RESERVED_WEIGHT: usize = 4_000;

/// Sigop cost kept free for the first transaction
pub const COINBASE_RESERVED_SIGOPS: i64 = 400;

/// Size, weight and sigop limits for one template
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockBudget {
    /// Serialized size cap
    pub max_size: usize,

    /// Weight cap
    pub max_weight: usize,

    /// Sigop cost cap
    pub max_sigops_cost: i64,

    /// Weight per serialized byte
    pub witness_scale_factor: usize,
}

impl BlockBudget {
    /// Miner settings clamped to what consensus allows
    pub fn new(settings: &MinerSettings, options: &ConsensusOptions) -> Self {
        let max_size = settings.block_max_size.clamp(
            COINBASE_RESERVED_SIZE,
            options
                .max_block_base_size
                .saturating_sub(COINBASE_RESERVED_SIZE)
                .max(COINBASE_RESERVED_SIZE),
        );
        let max_weight = settings.block_max_weight.clamp(
            COINBASE_RESERVED_WEIGHT,
            options
                .max_block_weight
                .saturating_sub(COINBASE_RESERVED_WEIGHT)
                .max(COINBASE_RESERVED_WEIGHT),
        );
        Self {
            max_size,
            max_weight,
            max_sigops_cost: options.max_block_sigops_cost,
            witness_scale_factor: options.witness_scale_factor,
        }
    }
}

/// Block height and lock-time cutoff selection is evaluated against
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SelectionPoint {
    /// Height of the block being built
    pub height: u32,

    /// Median time past of the tip
    pub lock_time_cutoff: i64,
}

/// Outcome of one selection pass
#[derive(Clone, Debug, Default)]
pub struct TransactionSelection {
    /// Selected entries in block order
    pub entries: Vec<Arc<MempoolEntry>>,

    /// Sum of selected fees
    pub total_fee: Amount,

    /// Block size including the reserved first-transaction space
    pub block_size: usize,

    /// Block weight including the reserved first-transaction weight
    pub block_weight: usize,

    /// Sigop cost including the reserved first-transaction sigops
    pub sigops_cost: i64,

    /// Number of entries selected
    pub selected_count: usize,

    /// Entries whose package data was updated; always 0 for this selector
    pub updated_count: usize,
}

impl TransactionSelection {
    /// Fee of each selected entry in block order
    pub fn fees(&self) -> Vec<Amount> {
        self.entries.iter().map(|e| e.fee).collect()
    }
}

/// Greedy fee-rate selector
#[derive(Clone, Debug)]
pub struct TransactionSelector {
    budget: BlockBudget,
    min_fee_rate: Amount,
}

impl TransactionSelector {
    /// Selector for `budget` that drops entries paying under `min_fee_rate` per kB
    pub fn new(budget: BlockBudget, min_fee_rate: Amount) -> Self {
        Self {
            budget,
            min_fee_rate,
        }
    }

    /// Budget in force
    pub fn budget(&self) -> &BlockBudget {
        &self.budget
    }

    /// Walk `snapshot` once and keep every entry that fits. `accept` is an
    /// extra per-entry rule supplied by the assembler.
    #[tracing::instrument(skip_all, fields(height = point.height, pool = snapshot.len()))]
    pub fn select(
        &self,
        snapshot: &MempoolSnapshot,
        point: SelectionPoint,
        accept: impl Fn(&MempoolEntry) -> bool,
    ) -> TransactionSelection {
        let mut selection = TransactionSelection {
            block_size: COINBASE_RESERVED_SIZE,
            block_weight: COINBASE_RESERVED_WEIGHT,
            sigops_cost: COINBASE_RESERVED_SIGOPS,
            ..Default::default()
        };
        let mut in_block: HashSet<H256> = HashSet::new();

        for entry in snapshot.iter() {
            if in_block.contains(&entry.txid) {
                continue;
            }
            if entry.fee < 0 || entry.modified_fee < 0 {
                debug!(txid = %format!("{:x}", entry.txid), fee = entry.fee, "skipping negative-fee entry");
                continue;
            }
            if !self.fits(&selection, entry) {
                trace!(txid = %format!("{:x}", entry.txid), size = entry.size, "entry does not fit");
                continue;
            }
            if !entry.lock_points.is_final(point.height, point.lock_time_cutoff) {
                continue;
            }
            if !entry.meets_fee_rate(self.min_fee_rate) {
                continue;
            }
            if has_unselected_parent(entry, snapshot, &in_block) {
                continue;
            }
            if !accept(entry) {
                continue;
            }

            in_block.insert(entry.txid);
            selection.block_size += entry.size;
            selection.block_weight += entry.size * self.budget.witness_scale_factor;
            selection.sigops_cost += entry.sigop_cost;
            selection.total_fee += entry.fee;
            selection.entries.push(entry.clone());
        }

        selection.selected_count = selection.entries.len();
        debug!(
            selected = selection.selected_count,
            fees = selection.total_fee,
            size = selection.block_size,
            "selection finished"
        );
        selection
    }

    fn fits(&self, selection: &TransactionSelection, entry: &MempoolEntry) -> bool {
        let weight = entry.size * self.budget.witness_scale_factor;
        selection.block_size + entry.size <= self.budget.max_size
            && selection.block_weight + weight <= self.budget.max_weight
            && selection.sigops_cost + entry.sigop_cost <= self.budget.max_sigops_cost
    }
}

/// An input spends a pool transaction that is not yet in the block
fn has_unselected_parent(entry: &MempoolEntry, snapshot: &MempoolSnapshot, in_block: &HashSet<H256>) -> bool {
    entry.tx.inputs.iter().any(|input| {
        let parent = &input.prevout.txid;
        snapshot.contains(parent) && !in_block.contains(parent)
    })
}
