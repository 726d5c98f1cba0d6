//! Mempool entries and point-in-time snapshots
//!
//! The assembler never walks the live pool. It takes a `MempoolSnapshot`,
//! built under the pool's read lock and already sorted by descendant fee
//! rate, and works on that.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::RwLock;
use primitive_types::H256;
use serde::{Deserialize, Serialize};

use super::entities::{Amount, Transaction};
use crate::ports::MempoolView;

/// Height and time after which a transaction's relative locks are satisfied
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockPoints {
    /// Minimum block height
    pub height: u32,

    /// Minimum lock-time cutoff (median time past); 0 when unconstrained
    pub time: i64,
}

impl LockPoints {
    /// True when a block at `height` with `lock_time_cutoff` may include the tx
    pub fn is_final(&self, height: u32, lock_time_cutoff: i64) -> bool {
        self.height <= height && (self.time == 0 || self.time < lock_time_cutoff)
    }
}

/// Immutable view of one pool transaction
#[derive(Clone, Debug)]
pub struct MempoolEntry {
    /// Transaction
    pub tx: Arc<Transaction>,

    /// Cached txid
    pub txid: H256,

    /// Fee actually paid
    pub fee: Amount,

    /// Fee including any prioritisation delta; drives ordering
    pub modified_fee: Amount,

    /// Declared priority
    pub priority: f64,

    /// Serialized size
    pub size: usize,

    /// Signature operation cost
    pub sigop_cost: i64,

    /// Size of this entry plus its in-pool ancestors
    pub size_with_ancestors: usize,

    /// Modified fees of this entry plus its in-pool ancestors
    pub fees_with_ancestors: Amount,

    /// Sigop cost of this entry plus its in-pool ancestors
    pub sigops_with_ancestors: i64,

    /// Size of this entry plus its in-pool descendants
    pub size_with_descendants: usize,

    /// Modified fees of this entry plus its in-pool descendants
    pub fees_with_descendants: Amount,

    /// Relative lock-time points
    pub lock_points: LockPoints,

    /// Insertion sequence number, used as the ordering tie-break
    pub entry_id: u64,
}

impl MempoolEntry {
    /// Entry with no in-pool relatives
    pub fn new(tx: Transaction, fee: Amount, entry_id: u64, witness_scale_factor: usize) -> Self {
        let size = tx.size();
        let sigop_cost = (tx.legacy_sigop_count() * witness_scale_factor) as i64;
        Self {
            txid: tx.txid(),
            tx: Arc::new(tx),
            fee,
            modified_fee: fee,
            priority: 0.0,
            size,
            sigop_cost,
            size_with_ancestors: size,
            fees_with_ancestors: fee,
            sigops_with_ancestors: sigop_cost,
            size_with_descendants: size,
            fees_with_descendants: fee,
            lock_points: LockPoints::default(),
            entry_id,
        }
    }

    /// Set descendant aggregates
    pub fn with_descendants(mut self, size: usize, fees: Amount) -> Self {
        self.size_with_descendants = size;
        self.fees_with_descendants = fees;
        self
    }

    /// Set lock points
    pub fn with_lock_points(mut self, lock_points: LockPoints) -> Self {
        self.lock_points = lock_points;
        self
    }

    /// Set a prioritisation fee delta
    pub fn with_fee_delta(mut self, delta: Amount) -> Self {
        self.modified_fee = self.fee + delta;
        self.fees_with_descendants += delta;
        self.fees_with_ancestors += delta;
        self
    }

    /// The larger of the entry's own fee rate and its descendant package rate,
    /// as a `(fee, size)` fraction
    pub fn descendant_score(&self) -> (Amount, usize) {
        let own = (self.modified_fee, self.size);
        let package = (self.fees_with_descendants, self.size_with_descendants);
        if compare_rates(package, own) == Ordering::Greater {
            package
        } else {
            own
        }
    }

    /// True when the modified fee meets `min_fee_per_kb`
    pub fn meets_fee_rate(&self, min_fee_per_kb: Amount) -> bool {
        i128::from(self.modified_fee) * 1000 >= i128::from(min_fee_per_kb) * self.size as i128
    }
}

/// Compare `a.0 / a.1` with `b.0 / b.1` without floats
fn compare_rates(a: (Amount, usize), b: (Amount, usize)) -> Ordering {
    let lhs = i128::from(a.0) * b.1 as i128;
    let rhs = i128::from(b.0) * a.1 as i128;
    lhs.cmp(&rhs)
}

/// Selection order: higher descendant score first, then lower entry id
pub fn selection_order(a: &MempoolEntry, b: &MempoolEntry) -> Ordering {
    compare_rates(b.descendant_score(), a.descendant_score()).then(a.entry_id.cmp(&b.entry_id))
}

/// Ordered, read-only copy of the pool
#[derive(Debug, Default)]
pub struct MempoolSnapshot {
    entries: Vec<Arc<MempoolEntry>>,
    index: HashMap<H256, usize>,
}

impl MempoolSnapshot {
    /// Sort `entries` into selection order and index them by txid
    pub fn new(mut entries: Vec<Arc<MempoolEntry>>) -> Self {
        entries.sort_by(|a, b| selection_order(a, b));
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.txid, i))
            .collect();
        Self { entries, index }
    }

    /// Entries in selection order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<MempoolEntry>> {
        self.entries.iter()
    }

    /// Look up an entry by txid
    pub fn get(&self, txid: &H256) -> Option<&Arc<MempoolEntry>> {
        self.index.get(txid).map(|&i| &self.entries[i])
    }

    /// True when `txid` is in the pool
    pub fn contains(&self, txid: &H256) -> bool {
        self.index.contains_key(txid)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the pool was empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Simple lock-protected pool, enough to feed the assembler
pub struct InMemoryMempool {
    entries: RwLock<HashMap<H256, Arc<MempoolEntry>>>,
    next_entry_id: AtomicU64,
    witness_scale_factor: usize,
}

impl InMemoryMempool {
    /// Create an empty pool
    pub fn new(witness_scale_factor: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_entry_id: AtomicU64::new(0),
            witness_scale_factor,
        }
    }

    /// Add a transaction with no in-pool relatives
    pub fn add_transaction(&self, tx: Transaction, fee: Amount) -> Arc<MempoolEntry> {
        let entry_id = self.next_entry_id.fetch_add(1, AtomicOrdering::Relaxed);
        self.add_entry(MempoolEntry::new(tx, fee, entry_id, self.witness_scale_factor))
    }

    /// Add a prepared entry, replacing any entry with the same txid
    pub fn add_entry(&self, entry: MempoolEntry) -> Arc<MempoolEntry> {
        let entry = Arc::new(entry);
        self.entries.write().insert(entry.txid, Arc::clone(&entry));
        entry
    }

    /// Next insertion sequence number
    pub fn next_entry_id(&self) -> u64 {
        self.next_entry_id.fetch_add(1, AtomicOrdering::Relaxed)
    }

    /// Remove transactions that were mined
    pub fn remove_for_block(&self, txids: &[H256]) {
        let mut entries = self.entries.write();
        for txid in txids {
            entries.remove(txid);
        }
    }

    /// Number of pooled transactions
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl MempoolView for InMemoryMempool {
    fn snapshot(&self) -> Arc<MempoolSnapshot> {
        let entries: Vec<Arc<MempoolEntry>> = self.entries.read().values().cloned().collect();
        Arc::new(MempoolSnapshot::new(entries))
    }
}
