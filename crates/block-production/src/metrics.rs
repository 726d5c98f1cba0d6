//! Metrics collection for block production

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the assembler and both production loops
#[derive(Debug, Default)]
pub struct Metrics {
    /// Templates built
    pub templates_built: AtomicU64,

    /// PoW blocks accepted by consensus
    pub blocks_mined: AtomicU64,

    /// PoS blocks accepted by consensus
    pub blocks_minted: AtomicU64,

    /// Submitted blocks that consensus rejected
    pub blocks_rejected: AtomicU64,

    /// Mempool transactions placed into templates
    pub transactions_included: AtomicU64,

    /// Header hashes computed by the nonce search
    pub hashes_tried: AtomicU64,

    /// Kernel hashes computed by the stake search
    pub kernels_checked: AtomicU64,

    /// Minting ticks that ended with a recorded error
    pub minting_errors: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished template
    pub fn record_template(&self, selected: usize) {
        self.templates_built.fetch_add(1, Ordering::Relaxed);
        self.transactions_included
            .fetch_add(selected as u64, Ordering::Relaxed);
    }

    /// Record an accepted PoW block
    pub fn record_block_mined(&self) {
        self.blocks_mined.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an accepted PoS block
    pub fn record_block_minted(&self) {
        self.blocks_minted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected submission
    pub fn record_rejection(&self) {
        self.blocks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record nonce search work
    pub fn record_hashes(&self, count: u64) {
        self.hashes_tried.fetch_add(count, Ordering::Relaxed);
    }

    /// Record kernel search work
    pub fn record_kernels(&self, count: u64) {
        self.kernels_checked.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a minting tick that failed
    pub fn record_minting_error(&self) {
        self.minting_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Blocks accepted from either loop
    pub fn get_blocks_produced(&self) -> u64 {
        self.blocks_mined.load(Ordering::Relaxed) + self.blocks_minted.load(Ordering::Relaxed)
    }

    /// Average mempool transactions per template
    pub fn get_avg_transactions_per_template(&self) -> f64 {
        let templates = self.templates_built.load(Ordering::Relaxed);
        if templates == 0 {
            return 0.0;
        }
        let txs = self.transactions_included.load(Ordering::Relaxed);
        txs as f64 / templates as f64
    }
}
