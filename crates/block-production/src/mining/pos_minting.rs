//! Proof-of-stake minting
//!
//! Each tick collects the wallets' stakeable outputs, filters them by value
//! and coin age, builds a PoS template and searches for a kernel. A found
//! kernel becomes a signed coinstake that replaces the template's
//! placeholder before the block is signed and submitted.
//!
//! Recoverable failures are recorded in [`StakingStatus::errors`] and the
//! loop keeps running. Anything else stops the loop and disables staking.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use primitive_types::H256;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::assembler::{AssemblerCore, BlockAssembler, PosBlockAssembler};
use crate::config::{MinerSettings, MintingSettings};
use crate::domain::invariants::check_template;
use crate::domain::{
    difficulty_or_last_pos, get_network_weight, search_kernel, Amount, BlockTemplate, ChainedHeader,
    CompactTarget, ConsensusOptions, FirstTransactionKind, KernelSearchParams, OutPoint, Script,
    StakeEligibility, UtxoStakeDescription, WalletSecret,
};
use crate::error::{BlockProductionError, Result};
use crate::metrics::Metrics;
use crate::ports::{
    CoinView, ConsensusManager, LastMint, MempoolView, PeriodicBody, Scheduler, StakeValidator,
    StakingService, StakingStatus, StakingWallet, TimeProvider,
};
use crate::scheduler::LoopHandle;
use crate::utils::display_hash;

use super::coinstake::build_coinstake;

/// Name of the minting loop
pub const STAKE_LOOP_NAME: &str = "PosMinting.Stake";

/// Collaborators of the minting loop
#[derive(Clone)]
pub struct MintingCollaborators {
    /// Chain tip and block submission
    pub consensus: Arc<dyn ConsensusManager>,

    /// Mempool the templates are filled from
    pub mempool: Arc<dyn MempoolView>,

    /// Unspent output set
    pub coin_view: Arc<dyn CoinView>,

    /// Staking wallet
    pub wallet: Arc<dyn StakingWallet>,

    /// Stake targets, modifiers and block types
    pub stake_validator: Arc<dyn StakeValidator>,

    /// Network-adjusted clock
    pub time: Arc<dyn TimeProvider>,

    /// Runs the minting loop
    pub scheduler: Arc<dyn Scheduler>,
}

/// Kernel search bookkeeping for the current tip
#[derive(Debug, Default)]
struct SearchState {
    tip: Option<H256>,
    last_coinstake_search_time: u32,
}

/// Shared state behind [`PosMinting`] and its loop
pub struct PosMinter {
    consensus: Arc<dyn ConsensusManager>,
    coin_view: Arc<dyn CoinView>,
    wallet: Arc<dyn StakingWallet>,
    stake_validator: Arc<dyn StakeValidator>,
    assembler: PosBlockAssembler,
    options: Arc<ConsensusOptions>,
    settings: MintingSettings,
    eligibility: StakeEligibility,
    metrics: Arc<Metrics>,
    status: RwLock<StakingStatus>,
    search: Mutex<SearchState>,
}

impl PosMinter {
    /// Wallet outputs that may stake on top of a tip at `as_of_height`.
    /// Outputs the coin view no longer knows are dropped.
    pub async fn suitable_for_staking(
        &self,
        secrets: &[WalletSecret],
        as_of_height: u32,
    ) -> Result<Vec<UtxoStakeDescription>> {
        let mut descriptions = Vec::new();

        for (secret_index, secret) in secrets.iter().enumerate() {
            let spendable = self.wallet.spendable_outputs_for_staking(secret)?;
            let outpoints: Vec<OutPoint> = spendable.iter().map(|s| s.outpoint).collect();
            let coins = self.coin_view.fetch_unspent_outputs(&outpoints).await?;

            for output in spendable {
                let Some(utxo) = coins.get(&output.outpoint) else {
                    debug!(wallet = %secret.wallet_name, txid = %display_hash(&output.outpoint.txid), "output missing from coin view");
                    continue;
                };
                descriptions.push(UtxoStakeDescription {
                    outpoint: output.outpoint,
                    tx_out: output.tx_out,
                    block_hash: output.block_hash,
                    utxo: utxo.clone(),
                    secret_index,
                });
            }
        }

        let collected = descriptions.len();
        let eligible = self.eligibility.filter(descriptions, as_of_height);
        debug!(collected, eligible = eligible.len(), as_of_height, "stake candidates filtered");
        Ok(eligible)
    }

    /// Difficulty of `header`, or of the last PoS block (genesis when there is none)
    fn difficulty(&self, header: Option<&ChainedHeader>) -> f64 {
        let tip = self.consensus.tip();
        let last_pos = tip.as_deref().and_then(|tip| {
            self.stake_validator
                .find_last_pos_or_pow(tip, true)
                .or_else(|| tip.iter().last())
        });
        difficulty_or_last_pos(header, last_pos)
    }

    fn network_weight(&self) -> f64 {
        let tip = self.consensus.tip();
        get_network_weight(tip.as_deref(), &self.options)
    }

    fn expected_time(&self, weight: Amount, network_weight: f64) -> u64 {
        if weight <= 0 {
            return 0;
        }
        (f64::from(self.options.pos_target_spacing) * network_weight / weight as f64) as u64
    }

    /// Time up to which the current tip was already searched. Resets when
    /// the tip changed since the last tick.
    fn begin_search(&self, tip: &ChainedHeader) -> u32 {
        let mut search = self.search.lock();
        if search.tip != Some(tip.hash) {
            search.tip = Some(tip.hash);
            search.last_coinstake_search_time = tip.time();
        }
        search.last_coinstake_search_time
    }

    /// Mark times up to `searched_until` as searched without a match
    fn end_search(&self, searched_until: u32) {
        let mut search = self.search.lock();
        search.last_coinstake_search_time = search.last_coinstake_search_time.max(searched_until);
    }

    /// Apply `update` to the status unless `cancel` fired. Checked under the
    /// status lock; `stop_stake` cancels before it resets the status.
    fn update_status(&self, cancel: &CancellationToken, update: impl FnOnce(&mut StakingStatus)) {
        let mut status = self.status.write();
        if !cancel.is_cancelled() {
            update(&mut *status);
        }
    }

    fn record_template(&self, cancel: &CancellationToken, template: &BlockTemplate, pooled: usize) {
        let size = template.block.size();
        let tx_count = template.block.transactions.len();
        self.update_status(cancel, |status| {
            status.current_block_size = size;
            status.current_block_tx = tx_count;
            status.pooled_tx = pooled;
        });
    }

    /// One minting attempt against the current tip
    async fn stake(&self, secrets: &[WalletSecret], cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(BlockProductionError::Cancelled);
        }
        if self.consensus.is_initial_block_download() {
            return Err(BlockProductionError::InitialBlockDownload);
        }
        let tip = self.consensus.tip().ok_or(BlockProductionError::NoChainTip)?;

        let eligible = self.suitable_for_staking(secrets, tip.height).await?;
        if eligible.is_empty() {
            self.update_status(cancel, |status| status.staking = false);
            return Err(BlockProductionError::NoEligibleUtxos);
        }

        let weight: Amount = eligible.iter().map(UtxoStakeDescription::value).sum();
        let network_weight = get_network_weight(Some(&*tip), &self.options);
        let difficulty = self.difficulty(None);
        let expected_time = self.expected_time(weight, network_weight);
        self.update_status(cancel, |status| {
            status.staking = true;
            status.weight = weight;
            status.net_stake_weight = network_weight;
            status.expected_time = expected_time;
            status.difficulty = difficulty;
        });

        if cancel.is_cancelled() {
            return Err(BlockProductionError::Cancelled);
        }

        // clock is read once; the template and the kernel search share it
        let ctx = self.assembler.context(&tip)?;
        let mut template = self.assembler.build_from(&ctx, &Script::empty())?;
        self.record_template(cancel, &template, self.assembler.core().mempool.snapshot().len());

        let target = CompactTarget(template.block.header.bits).to_target().ok_or_else(|| {
            BlockProductionError::InvariantViolation(format!(
                "unusable stake bits {:#010x}",
                template.block.header.bits
            ))
        })?;
        let params = KernelSearchParams {
            stake_modifier: self.stake_validator.stake_modifier(&tip),
            target,
            prev_time: tip.time(),
            adjusted_time: ctx.adjusted_time,
            timestamp_mask: self.options.pos_timestamp_mask,
            future_drift_secs: self.options.future_drift_secs,
            searched_until: self.begin_search(&tip),
        };

        let outcome = search_kernel(&eligible, &params);
        self.metrics.record_kernels(outcome.hashes_checked);
        self.update_status(cancel, |status| status.search_interval = outcome.searched_span);

        let Some(found) = outcome.found else {
            self.end_search(params.adjusted_time.saturating_add(params.future_drift_secs));
            debug!(
                height = ctx.height,
                candidates = eligible.len(),
                hashes = outcome.hashes_checked,
                since = params.searched_until,
                "[pos] no kernel found"
            );
            return Ok(());
        };

        let kernel = &eligible[found.index];
        let secret = secrets.get(kernel.secret_index).ok_or_else(|| {
            BlockProductionError::InvariantViolation(format!("no secret at index {}", kernel.secret_index))
        })?;

        let reward = self.options.rewards.pos_reward(template.height) + template.total_fee;
        let mut coinstake = build_coinstake(kernel, found.time, reward, &self.settings);
        self.wallet
            .sign_coinstake(secret, &mut coinstake, std::slice::from_ref(&kernel.tx_out))?;

        template.replace_first_transaction(coinstake, self.options.witness_scale_factor);
        template.block.header.time = found.time;
        template.block.update_merkle_root();
        check_template(&template, &tip, &self.options, FirstTransactionKind::Coinstake)?;

        let hash = template.block.hash();
        template.block.signature = self.wallet.sign_block(secret, &hash)?;

        if cancel.is_cancelled() {
            return Err(BlockProductionError::Cancelled);
        }

        let height = template.height;
        let submitted = match self.consensus.submit_mined_block(template.block).await {
            Ok(Some(connected)) => Ok(connected),
            Ok(None) => Err("block not connected".to_string()),
            Err(e) => Err(e.to_string()),
        };
        match submitted {
            Ok(connected) => {
                info!(
                    height = connected.height,
                    hash = %display_hash(&hash),
                    stake = kernel.value(),
                    reward,
                    "[pos] block minted"
                );
                self.metrics.record_block_minted();
                self.status.write().last_mint = Some(LastMint {
                    hash,
                    height: connected.height,
                    time: found.time,
                    stake_value: kernel.value(),
                    reward,
                });
                Ok(())
            }
            Err(reason) => {
                self.metrics.record_rejection();
                warn!(height, hash = %display_hash(&hash), %reason, "[pos] block rejected");
                Err(BlockProductionError::ConsensusRejected {
                    hash: display_hash(&hash),
                    reason,
                })
            }
        }
    }

    /// One loop tick. Recoverable errors are recorded and swallowed.
    async fn tick(&self, secrets: &[WalletSecret], cancel: &CancellationToken) -> Result<()> {
        match self.stake(secrets, cancel).await {
            Ok(()) => {
                self.update_status(cancel, |status| status.errors = None);
                Ok(())
            }
            Err(e) if e.is_cancellation() => Ok(()),
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "[pos] minting tick failed");
                self.metrics.record_minting_error();
                self.update_status(cancel, |status| status.errors = Some(e.to_string()));
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "[pos] minting stopped");
                self.metrics.record_minting_error();
                self.update_status(cancel, |status| {
                    status.errors = Some(e.to_string());
                    status.enabled = false;
                    status.staking = false;
                });
                Err(e)
            }
        }
    }
}

/// PoS minting service
pub struct PosMinting {
    minter: Arc<PosMinter>,
    scheduler: Arc<dyn Scheduler>,
    handle: Mutex<Option<LoopHandle>>,
}

impl PosMinting {
    /// Create a new minting service
    pub fn new(
        options: Arc<ConsensusOptions>,
        miner_settings: MinerSettings,
        settings: MintingSettings,
        collaborators: MintingCollaborators,
        metrics: Arc<Metrics>,
    ) -> Self {
        let core = AssemblerCore::new(
            Arc::clone(&options),
            collaborators.mempool,
            collaborators.time,
            miner_settings,
        );
        let minter = PosMinter {
            consensus: collaborators.consensus,
            coin_view: collaborators.coin_view,
            wallet: collaborators.wallet,
            stake_validator: Arc::clone(&collaborators.stake_validator),
            assembler: PosBlockAssembler::new(core, collaborators.stake_validator),
            eligibility: StakeEligibility::new(&options, settings.minimum_staking_coin_value),
            options,
            settings,
            metrics,
            status: RwLock::new(StakingStatus::default()),
            search: Mutex::new(SearchState::default()),
        };
        Self {
            minter: Arc::new(minter),
            scheduler: collaborators.scheduler,
            handle: Mutex::new(None),
        }
    }

    /// Run one minting tick outside the scheduler
    pub async fn stake_once(&self, secrets: &[WalletSecret], cancel: &CancellationToken) -> Result<()> {
        self.minter.tick(secrets, cancel).await
    }
}

#[async_trait]
impl StakingService for PosMinting {
    fn start_stake(&self, secrets: Vec<WalletSecret>) -> Result<()> {
        if secrets.is_empty() {
            return Err(BlockProductionError::InvalidConfig(
                "at least one wallet secret is required to stake".to_string(),
            ));
        }
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(LoopHandle::is_running) {
            return Err(BlockProductionError::InvalidConfig(
                "staking is already running".to_string(),
            ));
        }

        let minter = Arc::clone(&self.minter);
        let secrets = Arc::new(secrets);
        let wallets = secrets.len();
        let body: PeriodicBody = Arc::new(move |cancel: CancellationToken| {
            let minter = Arc::clone(&minter);
            let secrets = Arc::clone(&secrets);
            async move { minter.tick(&secrets, &cancel).await }.boxed()
        });

        *handle = Some(self.scheduler.run_periodic(
            STAKE_LOOP_NAME,
            body,
            self.minter.settings.stake_interval(),
            self.minter.settings.initial_delay(),
        ));
        {
            let mut status = self.minter.status.write();
            status.enabled = true;
            status.errors = None;
        }
        info!(wallets, "[pos] staking started");
        Ok(())
    }

    fn stop_stake(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.dispose();
            info!("[pos] staking stopped");
        }
        let mut status = self.minter.status.write();
        status.enabled = false;
        status.staking = false;
        status.errors = None;
    }

    fn staking_status(&self) -> StakingStatus {
        self.minter.status.read().clone()
    }

    fn get_difficulty(&self, header: Option<&ChainedHeader>) -> f64 {
        self.minter.difficulty(header)
    }

    fn get_network_weight(&self) -> f64 {
        self.minter.network_weight()
    }

    async fn get_utxo_stake_descriptions_suitable_for_staking(
        &self,
        secrets: &[WalletSecret],
        as_of_height: u32,
    ) -> Result<Vec<UtxoStakeDescription>> {
        self.minter.suitable_for_staking(secrets, as_of_height).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InMemoryMempool, TxOut, COIN};
    use crate::testing::{
        pos_chain, spend, FakeCoinView, FakeConsensus, FakeStakeValidator, FakeWallet, FixedTime,
        ManualScheduler,
    };
    use std::sync::atomic::Ordering;

    struct Harness {
        minting: PosMinting,
        consensus: Arc<FakeConsensus>,
        coin_view: Arc<FakeCoinView>,
        wallet: Arc<FakeWallet>,
        scheduler: Arc<ManualScheduler>,
        mempool: Arc<InMemoryMempool>,
        metrics: Arc<Metrics>,
    }

    fn harness_with(validator: FakeStakeValidator, settings: MintingSettings) -> Harness {
        let tip = pos_chain(40, 64);
        let consensus = Arc::new(FakeConsensus::new(tip.clone()));
        let coin_view = Arc::new(FakeCoinView::default());
        let wallet = Arc::new(FakeWallet::default());
        let scheduler = Arc::new(ManualScheduler::default());
        let mempool = Arc::new(InMemoryMempool::new(4));
        let metrics = Arc::new(Metrics::new());
        let collaborators = MintingCollaborators {
            consensus: consensus.clone(),
            mempool: mempool.clone(),
            coin_view: coin_view.clone(),
            wallet: wallet.clone(),
            stake_validator: Arc::new(validator),
            time: Arc::new(FixedTime::new(tip.time() + 64)),
            scheduler: scheduler.clone(),
        };
        let miner_settings = MinerSettings {
            block_min_fee_rate: 0,
            ..Default::default()
        };
        let minting = PosMinting::new(
            Arc::new(ConsensusOptions::regtest()),
            miner_settings,
            settings,
            collaborators,
            metrics.clone(),
        );
        Harness {
            minting,
            consensus,
            coin_view,
            wallet,
            scheduler,
            mempool,
            metrics,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeStakeValidator::easy(), MintingSettings::default())
    }

    fn secrets() -> Vec<WalletSecret> {
        vec![WalletSecret::new("main", "hunter2")]
    }

    /// Give the wallet an output at `height` that the coin view also knows
    fn fund(h: &Harness, seed: u8, value: Amount, height: u32) -> OutPoint {
        let outpoint = h.wallet.add_output("main", seed, value);
        h.coin_view.add(outpoint, value, height, 1_000, false);
        outpoint
    }

    #[tokio::test]
    async fn test_mints_block_with_coinstake() {
        let h = harness();
        let tip = h.consensus.tip().unwrap();
        fund(&h, 1, 50 * COIN, 1);
        h.mempool.add_transaction(spend(9, tip.time()), 5_000);

        h.minting.stake_once(&secrets(), &CancellationToken::new()).await.unwrap();

        let blocks = h.consensus.submitted();
        assert_eq!(blocks.len(), 1);
        let block = &blocks[0];
        assert!(block.is_proof_of_stake());
        assert!(!block.signature.is_empty());
        assert_eq!(block.transactions[0].time, block.header.time);
        assert_eq!(block.header.time % 16, 0);
        assert_eq!(block.header.merkle_root, block.compute_merkle_root());
        assert_eq!(block.transactions[0].total_out(), 50 * COIN + COIN + 5_000);
        assert_eq!(h.wallet.coinstakes_signed(), 1);

        let status = h.minting.staking_status();
        let last = status.last_mint.unwrap();
        assert_eq!(last.height, tip.height + 1);
        assert_eq!(last.stake_value, 50 * COIN);
        assert_eq!(last.reward, COIN + 5_000);
        assert_eq!(status.weight, 50 * COIN);
        assert!(status.errors.is_none());
        assert_eq!(h.metrics.blocks_minted.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_no_kernel_is_not_an_error() {
        let h = harness_with(FakeStakeValidator::impossible(), MintingSettings::default());
        fund(&h, 1, 50 * COIN, 1);

        h.minting.stake_once(&secrets(), &CancellationToken::new()).await.unwrap();

        assert!(h.consensus.submitted().is_empty());
        let status = h.minting.staking_status();
        assert!(status.errors.is_none());
        assert!(status.staking);
        assert!(status.search_interval > 0);
        assert!(h.metrics.kernels_checked.load(Ordering::Relaxed) > 0);
    }

    #[tokio::test]
    async fn test_small_coins_excluded() {
        let settings = MintingSettings {
            minimum_staking_coin_value: 10 * COIN,
            ..Default::default()
        };
        let h = harness_with(FakeStakeValidator::easy(), settings);
        let big = fund(&h, 1, 20 * COIN, 1);
        fund(&h, 2, 5 * COIN, 1);
        let tip = h.consensus.tip().unwrap();

        let eligible = h
            .minting
            .get_utxo_stake_descriptions_suitable_for_staking(&secrets(), tip.height)
            .await
            .unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].outpoint, big);
    }

    #[tokio::test]
    async fn test_outputs_missing_from_coin_view_dropped() {
        let h = harness();
        fund(&h, 1, 20 * COIN, 1);
        h.wallet.add_output("main", 2, 20 * COIN);
        let tip = h.consensus.tip().unwrap();

        let eligible = h
            .minting
            .get_utxo_stake_descriptions_suitable_for_staking(&secrets(), tip.height)
            .await
            .unwrap();
        assert_eq!(eligible.len(), 1);
    }

    #[tokio::test]
    async fn test_young_coins_are_not_eligible() {
        let h = harness();
        let tip = h.consensus.tip().unwrap();
        // regtest needs 10 confirmations
        fund(&h, 1, 20 * COIN, tip.height - 7);

        h.minting.stake_once(&secrets(), &CancellationToken::new()).await.unwrap();
        let status = h.minting.staking_status();
        assert_eq!(status.errors, Some(BlockProductionError::NoEligibleUtxos.to_string()));
        assert!(!status.staking);
    }

    #[tokio::test]
    async fn test_initial_block_download_refuses_to_search() {
        let h = harness();
        fund(&h, 1, 50 * COIN, 1);
        h.consensus.set_initial_block_download(true);

        h.minting.stake_once(&secrets(), &CancellationToken::new()).await.unwrap();
        assert!(h.consensus.submitted().is_empty());
        assert_eq!(
            h.minting.staking_status().errors,
            Some(BlockProductionError::InitialBlockDownload.to_string())
        );
    }

    #[tokio::test]
    async fn test_rejected_block_recorded() {
        let h = harness();
        fund(&h, 1, 50 * COIN, 1);
        h.consensus.reject_next(1);

        h.minting.stake_once(&secrets(), &CancellationToken::new()).await.unwrap();
        let status = h.minting.staking_status();
        assert!(status.errors.unwrap().contains("rejected"));
        assert!(status.last_mint.is_none());
        assert_eq!(h.metrics.blocks_rejected.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_submit_error_recorded_and_loop_continues() {
        let h = harness();
        fund(&h, 1, 50 * COIN, 1);
        h.consensus.fail_next(1);
        h.minting.start_stake(secrets()).unwrap();

        h.scheduler.tick(0).await.unwrap();
        let status = h.minting.staking_status();
        assert!(status.enabled);
        assert!(status.last_mint.is_none());
        assert!(status.errors.unwrap().contains("rule engine crashed"));
        assert_eq!(h.metrics.blocks_rejected.load(Ordering::Relaxed), 1);

        // same tip and clock, so the same kernel is found again
        h.scheduler.tick(0).await.unwrap();
        let status = h.minting.staking_status();
        assert!(status.errors.is_none());
        assert!(status.last_mint.is_some());
        assert_eq!(h.consensus.submitted().len(), 2);
    }

    #[tokio::test]
    async fn test_stop_during_tick_leaves_status_reset() {
        let h = harness();
        fund(&h, 1, 50 * COIN, 1);
        h.consensus.reject_next(1);
        let gate = h.consensus.hold_submissions();
        h.minting.start_stake(secrets()).unwrap();

        let tick = {
            let scheduler = Arc::clone(&h.scheduler);
            tokio::spawn(async move { scheduler.tick(0).await })
        };
        while h.consensus.submitted().is_empty() {
            tokio::task::yield_now().await;
        }

        h.minting.stop_stake();
        gate.notify_one();
        tick.await.unwrap().unwrap();

        let status = h.minting.staking_status();
        assert!(!status.enabled);
        assert!(!status.staking);
        assert!(status.errors.is_none());
        assert_eq!(h.metrics.blocks_rejected.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_kernel_signed_by_the_wallet_that_owns_it() {
        let h = harness();
        let tip = h.consensus.tip().unwrap();
        // "main" only holds a coin too young to stake
        fund(&h, 1, 20 * COIN, tip.height - 7);
        let cold = h.wallet.add_output("cold", 3, 40 * COIN);
        h.coin_view.add(cold, 40 * COIN, 1, 1_000, false);
        let secrets = vec![
            WalletSecret::new("main", "hunter2"),
            WalletSecret::new("cold", "correct horse"),
        ];

        let eligible = h
            .minting
            .get_utxo_stake_descriptions_suitable_for_staking(&secrets, tip.height)
            .await
            .unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].secret_index, 1);

        h.minting.stake_once(&secrets, &CancellationToken::new()).await.unwrap();
        assert_eq!(h.wallet.signers(), vec!["cold".to_string()]);
        let status = h.minting.staking_status();
        assert_eq!(status.weight, 40 * COIN);
        assert_eq!(status.last_mint.unwrap().stake_value, 40 * COIN);
    }

    #[tokio::test]
    async fn test_searched_times_skipped_on_same_tip() {
        let h = harness_with(FakeStakeValidator::impossible(), MintingSettings::default());
        fund(&h, 1, 50 * COIN, 1);

        h.minting.stake_once(&secrets(), &CancellationToken::new()).await.unwrap();
        let checked = h.metrics.kernels_checked.load(Ordering::Relaxed);
        assert!(checked > 0);

        h.minting.stake_once(&secrets(), &CancellationToken::new()).await.unwrap();
        assert_eq!(h.metrics.kernels_checked.load(Ordering::Relaxed), checked);
        let status = h.minting.staking_status();
        assert_eq!(status.search_interval, 0);
        assert!(status.errors.is_none());
    }

    #[tokio::test]
    async fn test_retry_without_crash() {
        let h = harness();
        fund(&h, 1, 50 * COIN, 1);
        h.minting.start_stake(secrets()).unwrap();
        assert!(h.minting.staking_status().enabled);

        h.wallet.fail_listing(true);
        h.scheduler.tick(0).await.unwrap();
        let first = h.minting.staking_status().errors.unwrap();
        assert!(first.contains("Wallet"));

        h.wallet.fail_listing(false);
        h.coin_view.fail(true);
        h.scheduler.tick(0).await.unwrap();
        let second = h.minting.staking_status().errors.unwrap();
        assert!(second.contains("Coin view"));
        assert_ne!(first, second);
        assert!(h.minting.staking_status().enabled);

        h.minting.stop_stake();
        let status = h.minting.staking_status();
        assert!(!status.enabled);
        assert!(status.errors.is_none());
        assert!(h.scheduler.token(0).is_cancelled());
    }

    #[tokio::test]
    async fn test_success_clears_previous_error() {
        let h = harness();
        fund(&h, 1, 50 * COIN, 1);
        h.consensus.set_initial_block_download(true);
        h.minting.stake_once(&secrets(), &CancellationToken::new()).await.unwrap();
        assert!(h.minting.staking_status().errors.is_some());

        h.consensus.set_initial_block_download(false);
        h.minting.stake_once(&secrets(), &CancellationToken::new()).await.unwrap();
        assert!(h.minting.staking_status().errors.is_none());
    }

    #[tokio::test]
    async fn test_invariant_violation_stops_loop() {
        let h = harness();
        let tip = h.consensus.tip().unwrap();
        fund(&h, 1, 50 * COIN, 1);
        // the wallet prepends a paying output, so output 0 is no longer the marker
        h.wallet.sign_with_extra_output(TxOut::new(COIN, Script::from_bytes(vec![0x51])));
        h.minting.start_stake(secrets()).unwrap();

        let err = h.scheduler.tick(0).await.unwrap_err();
        assert!(err.is_critical());
        let status = h.minting.staking_status();
        assert!(!status.enabled);
        assert!(status.errors.is_some());
        assert_eq!(h.consensus.tip().unwrap().hash, tip.hash);
    }

    #[tokio::test]
    async fn test_cancelled_tick_records_nothing() {
        let h = harness();
        fund(&h, 1, 50 * COIN, 1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        h.minting.stake_once(&secrets(), &cancel).await.unwrap();
        assert!(h.minting.staking_status().errors.is_none());
        assert!(h.consensus.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let h = harness();
        h.minting.start_stake(secrets()).unwrap();
        assert!(h.minting.start_stake(secrets()).is_err());
        assert!(h.minting.start_stake(Vec::new()).is_err());
    }

    #[test]
    fn test_difficulty_and_weight_follow_the_chain() {
        let h = harness();
        let tip = h.consensus.tip().unwrap();
        let difficulty = h.minting.get_difficulty(None);
        assert_eq!(difficulty, crate::domain::get_difficulty(CompactTarget(tip.header.bits)));
        assert!(h.minting.get_network_weight() > 0.0);
    }
}
