//! Proof-of-work mining
//!
//! `generate_blocks` builds a template on the current tip, stamps a fresh
//! extra nonce into the coinbase and scans header nonces on the blocking
//! pool in batches of [`INNER_LOOP_COUNT`]. Between batches it checks for
//! cancellation and tip changes. A rejected block's template is reused once
//! if the tip did not move; a submission error counts as a rejection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use primitive_types::{H256, U256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::assembler::{AssemblerCore, BlockAssembler, PowBlockAssembler};
use crate::config::MinerSettings;
use crate::domain::{BlockHeader, BlockTemplate, ChainedHeader, CompactTarget, ConsensusOptions, Script};
use crate::error::{BlockProductionError, Result};
use crate::metrics::Metrics;
use crate::ports::{
    ConsensusManager, MempoolView, MiningService, MiningStatus, PeriodicBody, Scheduler, TimeProvider,
};
use crate::scheduler::LoopHandle;
use crate::utils::{display_hash, meets_target};
use crate::INNER_LOOP_COUNT;

/// Name of the background mining loop
pub const MINE_LOOP_NAME: &str = "PowMining.Mine";

/// Extra nonce bookkeeping across templates
#[derive(Debug, Default)]
struct ExtraNonce {
    sentinel: Option<H256>,
    value: u32,
}

impl ExtraNonce {
    /// Bump the extra nonce for `template`, rewrite the coinbase script and
    /// refresh the merkle root. Resets when the template builds on a new tip.
    fn apply(&mut self, template: &mut BlockTemplate) {
        let prev = template.block.header.prev_hash;
        if self.sentinel != Some(prev) {
            self.value = 0;
            self.sentinel = Some(prev);
        }
        self.value = self.value.wrapping_add(1);

        if let Some(coinbase) = template.block.transactions.first_mut() {
            if let Some(input) = coinbase.inputs.first_mut() {
                input.script_sig = Script::coinbase(template.height, self.value);
            }
        }
        template.block.update_merkle_root();
    }
}

/// Result of scanning one batch of nonces
struct NonceBatch {
    header: BlockHeader,
    found: bool,
    exhausted: bool,
    tried: u64,
}

fn scan_nonces(mut header: BlockHeader, target: U256, limit: u64) -> NonceBatch {
    let mut tried = 0;
    while tried < limit {
        tried += 1;
        if meets_target(&header.hash(), &target) {
            return NonceBatch {
                header,
                found: true,
                exhausted: false,
                tried,
            };
        }
        if header.nonce == u32::MAX {
            return NonceBatch {
                header,
                found: false,
                exhausted: true,
                tried,
            };
        }
        header.nonce += 1;
    }
    NonceBatch {
        header,
        found: false,
        exhausted: false,
        tried,
    }
}

/// Shared state behind [`PowMining`] and its background loop
pub struct PowMiner {
    consensus: Arc<dyn ConsensusManager>,
    assembler: PowBlockAssembler,
    options: Arc<ConsensusOptions>,
    time: Arc<dyn TimeProvider>,
    metrics: Arc<Metrics>,
    status: RwLock<MiningStatus>,
}

impl PowMiner {
    fn check_pow_allowed(&self, tip: &ChainedHeader) -> Result<()> {
        if let Some(last_pow_block) = self.options.last_pow_block {
            let height = tip.height + 1;
            if height > last_pow_block {
                return Err(BlockProductionError::ProofOfWorkDisabled {
                    height,
                    last_pow_block,
                });
            }
        }
        Ok(())
    }

    fn tip(&self) -> Result<Arc<ChainedHeader>> {
        self.consensus.tip().ok_or(BlockProductionError::NoChainTip)
    }

    fn tip_moved(&self, prev_hash: &H256) -> bool {
        self.consensus
            .tip()
            .map_or(true, |tip| tip.hash != *prev_hash)
    }

    /// Give a rejected template a new time so its second attempt hashes differently
    fn refresh_time(&self, template: &mut BlockTemplate, tip: &ChainedHeader) {
        let time = PowBlockAssembler::block_time(tip, self.time.adjusted_unix_time());
        template.block.header.time = time;
        template.block.header.nonce = 0;
        if let Some(coinbase) = template.block.transactions.first_mut() {
            coinbase.time = time;
        }
    }

    /// Scan nonces until a header meets its target, `max_tries` is used up,
    /// the nonce space runs out or the tip moves. `Ok(None)` asks the caller
    /// to rebuild.
    async fn search_nonce(
        &self,
        mut header: BlockHeader,
        max_tries: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<BlockHeader>> {
        let target = CompactTarget(header.bits).to_target().ok_or_else(|| {
            BlockProductionError::InvariantViolation(format!("unusable bits {:#010x}", header.bits))
        })?;

        let mut tries = 0u64;
        while tries < max_tries {
            if cancel.is_cancelled() {
                return Err(BlockProductionError::Cancelled);
            }
            if self.tip_moved(&header.prev_hash) {
                debug!("tip moved during nonce search");
                return Ok(None);
            }

            let limit = (max_tries - tries).min(INNER_LOOP_COUNT);
            let batch = tokio::task::spawn_blocking(move || scan_nonces(header, target, limit))
                .await
                .map_err(|e| BlockProductionError::InternalError(format!("nonce search task failed: {e}")))?;

            tries += batch.tried;
            self.metrics.record_hashes(batch.tried);
            header = batch.header;

            if batch.found {
                return Ok(Some(header));
            }
            if batch.exhausted {
                debug!(tries, "nonce space exhausted");
                return Ok(None);
            }
        }
        Ok(None)
    }

    /// Mine until `block_count` blocks are accepted or `cancel` fires
    pub async fn generate_blocks(
        &self,
        payout_script: &Script,
        block_count: usize,
        max_tries: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<H256>> {
        if max_tries == 0 {
            return Err(BlockProductionError::InvalidConfig(
                "max_tries must be positive".to_string(),
            ));
        }
        let mut hashes = Vec::new();
        let mut extra_nonce = ExtraNonce::default();
        let mut retry: Option<BlockTemplate> = None;

        while hashes.len() < block_count {
            if cancel.is_cancelled() {
                break;
            }

            let tip = self.tip()?;
            self.check_pow_allowed(&tip)?;

            let (mut template, reused) = match retry.take() {
                Some(mut template) if template.block.header.prev_hash == tip.hash => {
                    self.refresh_time(&mut template, &tip);
                    (template, true)
                }
                _ => {
                    let template = self.assembler.build(&tip, payout_script)?;
                    self.metrics.record_template(template.selected_count);
                    (template, false)
                }
            };
            extra_nonce.apply(&mut template);

            let header = match self.search_nonce(template.block.header, max_tries, cancel).await {
                Ok(Some(header)) => header,
                Ok(None) => {
                    // the rebuild path may never await otherwise
                    tokio::task::yield_now().await;
                    continue;
                }
                Err(e) if e.is_cancellation() => break,
                Err(e) => return Err(e),
            };
            template.block.header = header;

            if cancel.is_cancelled() {
                break;
            }

            let hash = template.block.hash();
            let submitted = match self.consensus.submit_mined_block(template.block.clone()).await {
                Ok(Some(connected)) => Ok(connected),
                Ok(None) => Err("block not connected".to_string()),
                Err(e) => Err(e.to_string()),
            };
            match submitted {
                Ok(connected) => {
                    info!(
                        height = connected.height,
                        hash = %display_hash(&hash),
                        tx_count = template.block.transactions.len(),
                        fees = template.total_fee,
                        "[pow] block mined"
                    );
                    self.metrics.record_block_mined();
                    {
                        let mut status = self.status.write();
                        status.blocks_mined += 1;
                        status.last_block_hash = Some(hash);
                        status.last_block_height = Some(connected.height);
                        status.errors = None;
                    }
                    hashes.push(hash);
                }
                Err(reason) => {
                    let rejection = BlockProductionError::ConsensusRejected {
                        hash: display_hash(&hash),
                        reason,
                    };
                    warn!(height = template.height, error = %rejection, reused, "[pow] block rejected");
                    self.metrics.record_rejection();
                    self.status.write().errors = Some(rejection.to_string());
                    if !reused && !self.tip_moved(&template.block.header.prev_hash) {
                        retry = Some(template);
                    }
                }
            }
        }
        Ok(hashes)
    }

    /// One tick of the background loop
    async fn mine_tick(&self, payout_script: &Script, max_tries: u64, cancel: &CancellationToken) -> Result<()> {
        match self.generate_blocks(payout_script, 1, max_tries, cancel).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_cancellation() => Ok(()),
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "[pow] mining tick failed");
                self.status.write().errors = Some(e.to_string());
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "[pow] mining stopped");
                let mut status = self.status.write();
                status.errors = Some(e.to_string());
                status.enabled = false;
                Err(e)
            }
        }
    }
}

/// PoW mining service
pub struct PowMining {
    miner: Arc<PowMiner>,
    scheduler: Arc<dyn Scheduler>,
    settings: MinerSettings,
    handle: Mutex<Option<LoopHandle>>,
}

impl PowMining {
    /// Create a new mining service
    pub fn new(
        options: Arc<ConsensusOptions>,
        settings: MinerSettings,
        consensus: Arc<dyn ConsensusManager>,
        mempool: Arc<dyn MempoolView>,
        time: Arc<dyn TimeProvider>,
        scheduler: Arc<dyn Scheduler>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let core = AssemblerCore::new(Arc::clone(&options), mempool, Arc::clone(&time), settings.clone());
        let miner = PowMiner {
            consensus,
            assembler: PowBlockAssembler::new(core),
            options,
            time,
            metrics,
            status: RwLock::new(MiningStatus::default()),
        };
        Self {
            miner: Arc::new(miner),
            scheduler,
            settings,
            handle: Mutex::new(None),
        }
    }

    /// Template assembler used by this service
    pub fn assembler(&self) -> &PowBlockAssembler {
        &self.miner.assembler
    }
}

#[async_trait]
impl MiningService for PowMining {
    async fn generate_blocks(
        &self,
        payout_script: &Script,
        block_count: usize,
        max_tries: u64,
        cancel: CancellationToken,
    ) -> Result<Vec<H256>> {
        self.miner
            .generate_blocks(payout_script, block_count, max_tries, &cancel)
            .await
    }

    fn mine(&self, payout_script: Script) -> Result<()> {
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(LoopHandle::is_running) {
            return Ok(());
        }

        let miner = Arc::clone(&self.miner);
        let max_tries = self.settings.max_tries;
        let body: PeriodicBody = Arc::new(move |cancel: CancellationToken| {
            let miner = Arc::clone(&miner);
            let payout = payout_script.clone();
            async move { miner.mine_tick(&payout, max_tries, &cancel).await }.boxed()
        });

        *handle = Some(self.scheduler.run_periodic(
            MINE_LOOP_NAME,
            body,
            self.settings.mine_interval(),
            Duration::ZERO,
        ));
        let mut status = self.miner.status.write();
        status.enabled = true;
        status.errors = None;
        info!("[pow] mining started");
        Ok(())
    }

    fn stop_mining(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.dispose();
            info!("[pow] mining stopped");
        }
        self.miner.status.write().enabled = false;
    }

    fn mining_status(&self) -> MiningStatus {
        self.miner.status.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InMemoryMempool, COIN};
    use crate::testing::{chain, spend, FakeConsensus, FixedTime, ManualScheduler};

    struct Harness {
        mining: PowMining,
        consensus: Arc<FakeConsensus>,
        scheduler: Arc<ManualScheduler>,
        metrics: Arc<Metrics>,
    }

    fn harness(options: ConsensusOptions, tip: Arc<ChainedHeader>, mempool: Arc<InMemoryMempool>) -> Harness {
        let now = tip.time() + 30;
        let consensus = Arc::new(FakeConsensus::new(tip));
        let scheduler = Arc::new(ManualScheduler::default());
        let metrics = Arc::new(Metrics::new());
        let settings = MinerSettings {
            block_min_fee_rate: 0,
            ..Default::default()
        };
        let mining = PowMining::new(
            Arc::new(options),
            settings,
            consensus.clone(),
            mempool,
            Arc::new(FixedTime::new(now)),
            scheduler.clone(),
            metrics.clone(),
        );
        Harness {
            mining,
            consensus,
            scheduler,
            metrics,
        }
    }

    fn payout() -> Script {
        Script::from_bytes(vec![0x51])
    }

    #[tokio::test]
    async fn test_generate_blocks_extends_chain() {
        let options = ConsensusOptions::regtest();
        let mempool = Arc::new(InMemoryMempool::new(4));
        mempool.add_transaction(spend(1, 1_000), 2_000);
        let h = harness(options.clone(), chain(10, 600), mempool);

        let hashes = h
            .mining
            .generate_blocks(&payout(), 3, u64::MAX, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(hashes.len(), 3);
        let tip = h.consensus.tip().unwrap();
        assert_eq!(tip.height, 13);
        assert_eq!(tip.hash, hashes[2]);

        let blocks = h.consensus.submitted();
        let first = &blocks[0];
        let target = CompactTarget(first.header.bits).to_target().unwrap();
        assert!(meets_target(&first.hash(), &target));
        assert_eq!(first.transactions[0].outputs[0].value, 50 * COIN + 2_000);
        assert_eq!(first.transactions[0].outputs[0].script_pubkey, payout());

        let status = h.mining.mining_status();
        assert_eq!(status.blocks_mined, 3);
        assert_eq!(status.last_block_height, Some(13));
        assert_eq!(h.metrics.blocks_mined.load(std::sync::atomic::Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_rejected_template_reused_once_with_new_extra_nonce() {
        let h = harness(ConsensusOptions::regtest(), chain(10, 600), Arc::new(InMemoryMempool::new(4)));
        h.consensus.reject_next(1);

        let hashes = h
            .mining
            .generate_blocks(&payout(), 1, u64::MAX, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(hashes.len(), 1);
        let blocks = h.consensus.submitted();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].header.prev_hash, blocks[1].header.prev_hash);
        assert_eq!(blocks[0].transactions[0].inputs[0].script_sig, Script::coinbase(11, 1));
        assert_eq!(blocks[1].transactions[0].inputs[0].script_sig, Script::coinbase(11, 2));
        assert!(h.mining.mining_status().errors.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_mines_nothing() {
        let h = harness(ConsensusOptions::regtest(), chain(10, 600), Arc::new(InMemoryMempool::new(4)));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let hashes = h.mining.generate_blocks(&payout(), 5, u64::MAX, cancel).await.unwrap();
        assert!(hashes.is_empty());
        assert!(h.consensus.submitted().is_empty());
    }

    /// Service whose next block needs a hash of at most 1
    fn impossible_target_mining() -> (Arc<PowMining>, Arc<FakeConsensus>, Arc<Metrics>) {
        let options = ConsensusOptions {
            pow_limit: CompactTarget(0x0300_0001),
            ..ConsensusOptions::regtest()
        };
        let tip = chain(10, 600);
        let consensus = Arc::new(FakeConsensus::new(tip.clone()));
        let metrics = Arc::new(Metrics::new());
        let mining = Arc::new(PowMining::new(
            Arc::new(options),
            MinerSettings::default(),
            consensus.clone(),
            Arc::new(InMemoryMempool::new(4)),
            // past the min-difficulty gap, so the pow limit applies
            Arc::new(FixedTime::new(tip.time() + 5_000)),
            Arc::new(ManualScheduler::default()),
            metrics.clone(),
        ));
        (mining, consensus, metrics)
    }

    #[tokio::test]
    async fn test_cancel_during_search() {
        let (mining, consensus, _) = impossible_target_mining();

        let cancel = CancellationToken::new();
        let task = {
            let mining = Arc::clone(&mining);
            let cancel = cancel.clone();
            tokio::spawn(async move { mining.generate_blocks(&payout(), 1, u64::MAX, cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let hashes = task.await.unwrap().unwrap();
        assert!(hashes.is_empty());
        assert!(consensus.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_rebuilds_after_each_exhausted_budget_until_cancelled() {
        let (mining, _, metrics) = impossible_target_mining();

        let cancel = CancellationToken::new();
        let task = {
            let mining = Arc::clone(&mining);
            let cancel = cancel.clone();
            tokio::spawn(async move { mining.generate_blocks(&payout(), 1, 1, cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let hashes = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("cancellation is observed between rebuilds")
            .unwrap()
            .unwrap();
        assert!(hashes.is_empty());
        // one hash per template, the last one may be cut short by cancellation
        let templates = metrics.templates_built.load(std::sync::atomic::Ordering::Relaxed);
        let hashes_tried = metrics.hashes_tried.load(std::sync::atomic::Ordering::Relaxed);
        assert!(templates > 1);
        assert!(hashes_tried <= templates && hashes_tried + 1 >= templates);
    }

    #[tokio::test]
    async fn test_zero_max_tries_rejected() {
        let h = harness(ConsensusOptions::regtest(), chain(10, 600), Arc::new(InMemoryMempool::new(4)));
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            h.mining.generate_blocks(&payout(), 1, 0, CancellationToken::new()),
        )
        .await
        .expect("returns without searching");
        assert!(matches!(result, Err(BlockProductionError::InvalidConfig(_))));
        assert!(h.consensus.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_submit_error_counts_as_rejection() {
        let h = harness(ConsensusOptions::regtest(), chain(10, 600), Arc::new(InMemoryMempool::new(4)));
        h.consensus.fail_next(1);

        let hashes = h
            .mining
            .generate_blocks(&payout(), 3, u64::MAX, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(hashes.len(), 3);
        assert_eq!(h.consensus.tip().unwrap().height, 13);
        let blocks = h.consensus.submitted();
        assert_eq!(blocks.len(), 4);
        // the failed template was reused with the next extra nonce
        assert_eq!(blocks[0].header.prev_hash, blocks[1].header.prev_hash);
        assert_eq!(blocks[1].transactions[0].inputs[0].script_sig, Script::coinbase(11, 2));
        assert_eq!(h.metrics.blocks_rejected.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert!(h.mining.mining_status().errors.is_none());
    }

    #[tokio::test]
    async fn test_submit_error_keeps_blocks_already_accepted() {
        let h = harness(ConsensusOptions::regtest(), chain(10, 600), Arc::new(InMemoryMempool::new(4)));
        let first = h
            .mining
            .generate_blocks(&payout(), 1, u64::MAX, CancellationToken::new())
            .await
            .unwrap();
        // every later submission fails; the loop keeps retrying until cancelled
        h.consensus.fail_next(usize::MAX);

        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            let miner = Arc::clone(&h.mining.miner);
            tokio::spawn(async move { miner.generate_blocks(&payout(), 2, u64::MAX, &cancel).await })
        };
        while h.consensus.submitted().len() < 3 {
            tokio::task::yield_now().await;
        }
        cancel.cancel();

        let hashes = task.await.unwrap().unwrap();
        assert!(hashes.is_empty());
        assert_eq!(first.len(), 1);
        assert_eq!(h.consensus.tip().unwrap().hash, first[0]);
        assert!(h.mining.mining_status().errors.unwrap().contains("rule engine crashed"));
    }

    #[tokio::test]
    async fn test_max_tries_bounds_each_template() {
        let h = harness(ConsensusOptions::regtest(), chain(10, 600), Arc::new(InMemoryMempool::new(4)));
        let miner = &h.mining.miner;
        let mut header = miner.assembler.build(&miner.tip().unwrap(), &payout()).unwrap().block.header;
        // a target of 1 is never met
        header.bits = 0x0300_0001;

        let found = miner.search_nonce(header, 100, &CancellationToken::new()).await.unwrap();
        assert!(found.is_none());
        assert_eq!(h.metrics.hashes_tried.load(std::sync::atomic::Ordering::Relaxed), 100);
    }

    #[tokio::test]
    async fn test_last_pow_block_enforced() {
        let options = ConsensusOptions {
            last_pow_block: Some(10),
            ..ConsensusOptions::regtest()
        };
        let h = harness(options, chain(10, 600), Arc::new(InMemoryMempool::new(4)));
        let err = h
            .mining
            .generate_blocks(&payout(), 1, u64::MAX, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BlockProductionError::ProofOfWorkDisabled { height: 11, .. }));
    }

    #[tokio::test]
    async fn test_mine_loop_tick_and_stop() {
        let h = harness(ConsensusOptions::regtest(), chain(10, 600), Arc::new(InMemoryMempool::new(4)));
        h.mining.mine(payout()).unwrap();
        assert!(h.mining.mining_status().enabled);
        assert_eq!(h.scheduler.loop_names(), vec![MINE_LOOP_NAME.to_string()]);

        h.scheduler.tick(0).await.unwrap();
        assert_eq!(h.consensus.tip().unwrap().height, 11);

        h.mining.stop_mining();
        assert!(!h.mining.mining_status().enabled);
        assert!(h.scheduler.token(0).is_cancelled());
    }

    #[tokio::test]
    async fn test_pow_disabled_ends_loop() {
        let options = ConsensusOptions {
            last_pow_block: Some(10),
            ..ConsensusOptions::regtest()
        };
        let h = harness(options, chain(10, 600), Arc::new(InMemoryMempool::new(4)));
        h.mining.mine(payout()).unwrap();

        assert!(h.scheduler.tick(0).await.is_err());
        let status = h.mining.mining_status();
        assert!(!status.enabled);
        assert!(status.errors.is_some());
    }
}
