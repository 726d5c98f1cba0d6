//! Test fakes for the outbound ports and chain builders

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use primitive_types::H256;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::domain::{
    Amount, Block, BlockHeader, ChainedHeader, CompactTarget, OutPoint, Script, SpendableOutput,
    Transaction, TxIn, TxOut, UnspentOutput, WalletSecret,
};
use crate::error::{BlockProductionError, Result};
use crate::ports::{
    CoinView, ConsensusManager, PeriodicBody, Scheduler, StakeValidator, StakingWallet, TimeProvider,
};
use crate::scheduler::LoopHandle;

/// Genesis time of test chains; a multiple of 16
pub const GENESIS_TIME: u32 = 1_600_000_000;

/// Bits of every header in test chains
pub const TEST_BITS: u32 = 0x207f_ffff;

fn build_chain(blocks: u32, spacing: u32, proof_of_stake: bool) -> Arc<ChainedHeader> {
    let mut tip = ChainedHeader::genesis(
        BlockHeader {
            version: 1,
            time: GENESIS_TIME,
            bits: TEST_BITS,
            ..Default::default()
        },
        proof_of_stake,
    );
    for i in 1..=blocks {
        tip = tip.extend(
            BlockHeader {
                version: 1,
                time: GENESIS_TIME + i * spacing,
                bits: TEST_BITS,
                nonce: i,
                ..Default::default()
            },
            proof_of_stake,
        );
    }
    tip
}

/// PoW chain of `blocks` blocks after genesis
pub fn chain(blocks: u32, spacing: u32) -> Arc<ChainedHeader> {
    build_chain(blocks, spacing, false)
}

/// PoS chain of `blocks` blocks after genesis
pub fn pos_chain(blocks: u32, spacing: u32) -> Arc<ChainedHeader> {
    build_chain(blocks, spacing, true)
}

/// Transaction spending a made-up confirmed output
pub fn spend(seed: u8, time: u32) -> Transaction {
    let mut tx = Transaction::new(time);
    tx.inputs.push(TxIn::spending(OutPoint::new(H256::repeat_byte(seed), 0)));
    tx.outputs.push(TxOut::new(5_000, Script::from_bytes(vec![0x51])));
    tx
}

/// Script the fake wallet's outputs pay to
pub fn stake_script() -> Script {
    let mut bytes = vec![0x21];
    bytes.extend_from_slice(&[0x02; 33]);
    bytes.push(0xac);
    Script::from_bytes(bytes)
}

/// Clock frozen at one instant
#[derive(Debug)]
pub struct FixedTime(AtomicU32);

impl FixedTime {
    pub fn new(now: u32) -> Self {
        Self(AtomicU32::new(now))
    }
}

impl TimeProvider for FixedTime {
    fn adjusted_unix_time(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Consensus manager that connects any block extending its tip
pub struct FakeConsensus {
    tip: RwLock<Arc<ChainedHeader>>,
    ibd: AtomicBool,
    reject: Mutex<usize>,
    fail: Mutex<usize>,
    gate: Mutex<Option<Arc<Notify>>>,
    submitted: Mutex<Vec<Block>>,
}

impl FakeConsensus {
    pub fn new(tip: Arc<ChainedHeader>) -> Self {
        Self {
            tip: RwLock::new(tip),
            ibd: AtomicBool::new(false),
            reject: Mutex::new(0),
            fail: Mutex::new(0),
            gate: Mutex::new(None),
            submitted: Mutex::new(Vec::new()),
        }
    }

    /// Reject the next `count` submissions
    pub fn reject_next(&self, count: usize) {
        *self.reject.lock() = count;
    }

    /// Fail the next `count` submissions with an internal error
    pub fn fail_next(&self, count: usize) {
        *self.fail.lock() = count;
    }

    /// Park every later submission until the returned notify fires once per block
    pub fn hold_submissions(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    pub fn set_initial_block_download(&self, ibd: bool) {
        self.ibd.store(ibd, Ordering::SeqCst);
    }

    /// Every block submitted so far, accepted or not
    pub fn submitted(&self) -> Vec<Block> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl ConsensusManager for FakeConsensus {
    fn tip(&self) -> Option<Arc<ChainedHeader>> {
        Some(self.tip.read().clone())
    }

    fn is_initial_block_download(&self) -> bool {
        self.ibd.load(Ordering::SeqCst)
    }

    async fn submit_mined_block(&self, block: Block) -> Result<Option<Arc<ChainedHeader>>> {
        self.submitted.lock().push(block.clone());
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        {
            let mut fail = self.fail.lock();
            if *fail > 0 {
                *fail -= 1;
                return Err(BlockProductionError::InternalError("rule engine crashed".to_string()));
            }
        }
        {
            let mut reject = self.reject.lock();
            if *reject > 0 {
                *reject -= 1;
                return Ok(None);
            }
        }
        let mut tip = self.tip.write();
        if block.header.prev_hash != tip.hash || block.header.merkle_root != block.compute_merkle_root() {
            return Ok(None);
        }
        let connected = tip.extend(block.header, block.is_proof_of_stake());
        *tip = Arc::clone(&connected);
        Ok(Some(connected))
    }
}

/// Coin view backed by a map
#[derive(Default)]
pub struct FakeCoinView {
    coins: RwLock<HashMap<OutPoint, UnspentOutput>>,
    failing: AtomicBool,
}

impl FakeCoinView {
    pub fn add(&self, outpoint: OutPoint, value: Amount, height: u32, time: u32, is_coinstake: bool) {
        self.coins.write().insert(
            outpoint,
            UnspentOutput {
                tx_out: TxOut::new(value, stake_script()),
                height,
                time,
                is_coinstake,
            },
        );
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl CoinView for FakeCoinView {
    async fn fetch_unspent_outputs(&self, outpoints: &[OutPoint]) -> Result<HashMap<OutPoint, UnspentOutput>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BlockProductionError::CoinViewError("coin database unavailable".to_string()));
        }
        let coins = self.coins.read();
        Ok(outpoints
            .iter()
            .filter_map(|o| coins.get(o).map(|c| (*o, c.clone())))
            .collect())
    }
}

/// Wallet with a fixed output list per wallet name
#[derive(Default)]
pub struct FakeWallet {
    outputs: RwLock<HashMap<String, Vec<SpendableOutput>>>,
    failing_listing: AtomicBool,
    extra_output: Mutex<Option<TxOut>>,
    coinstakes_signed: AtomicUsize,
    signers: Mutex<Vec<String>>,
}

impl FakeWallet {
    /// Add an output paying `value` to `wallet` and return its outpoint
    pub fn add_output(&self, wallet: &str, seed: u8, value: Amount) -> OutPoint {
        let outpoint = OutPoint::new(H256::repeat_byte(seed), 0);
        self.outputs
            .write()
            .entry(wallet.to_string())
            .or_default()
            .push(SpendableOutput {
                outpoint,
                tx_out: TxOut::new(value, stake_script()),
                block_hash: H256::repeat_byte(!seed),
            });
        outpoint
    }

    pub fn fail_listing(&self, failing: bool) {
        self.failing_listing.store(failing, Ordering::SeqCst);
    }

    /// Make signing prepend `output` to the coinstake
    pub fn sign_with_extra_output(&self, output: TxOut) {
        *self.extra_output.lock() = Some(output);
    }

    pub fn coinstakes_signed(&self) -> usize {
        self.coinstakes_signed.load(Ordering::SeqCst)
    }

    /// Wallet names that signed coinstakes, in order
    pub fn signers(&self) -> Vec<String> {
        self.signers.lock().clone()
    }
}

impl StakingWallet for FakeWallet {
    fn spendable_outputs_for_staking(&self, secret: &WalletSecret) -> Result<Vec<SpendableOutput>> {
        if self.failing_listing.load(Ordering::SeqCst) {
            return Err(BlockProductionError::WalletError(format!(
                "wallet {} is locked",
                secret.wallet_name
            )));
        }
        Ok(self
            .outputs
            .read()
            .get(&secret.wallet_name)
            .cloned()
            .unwrap_or_default())
    }

    fn sign_coinstake(&self, secret: &WalletSecret, tx: &mut Transaction, spent: &[TxOut]) -> Result<()> {
        if spent.len() != tx.inputs.len() {
            return Err(BlockProductionError::WalletError("spent outputs do not match inputs".to_string()));
        }
        for input in &mut tx.inputs {
            input.script_sig = Script::from_bytes(vec![0x47; 72]);
        }
        if let Some(extra) = self.extra_output.lock().clone() {
            tx.outputs.insert(0, extra);
        }
        self.coinstakes_signed.fetch_add(1, Ordering::SeqCst);
        self.signers.lock().push(secret.wallet_name.clone());
        Ok(())
    }

    fn sign_block(&self, _secret: &WalletSecret, block_hash: &H256) -> Result<Vec<u8>> {
        let mut signature = vec![0x30];
        signature.extend_from_slice(block_hash.as_bytes());
        Ok(signature)
    }
}

/// Stake validator with a fixed target; every block counts as PoS
#[derive(Debug, Clone)]
pub struct FakeStakeValidator {
    pub bits: CompactTarget,
    pub modifier: H256,
}

impl FakeStakeValidator {
    /// Any kernel meets this target
    pub fn easy() -> Self {
        Self {
            bits: CompactTarget(0x207f_ffff),
            modifier: H256::repeat_byte(0x11),
        }
    }

    /// No kernel meets a target of 1 in practice
    pub fn impossible() -> Self {
        Self {
            bits: CompactTarget(0x0300_0001),
            modifier: H256::repeat_byte(0x11),
        }
    }
}

impl StakeValidator for FakeStakeValidator {
    fn next_required_target(&self, _tip: &ChainedHeader) -> CompactTarget {
        self.bits
    }

    fn stake_modifier(&self, _tip: &ChainedHeader) -> H256 {
        self.modifier
    }

    fn is_block_pos(&self, _hash: &H256) -> bool {
        true
    }
}

/// Scheduler that records loops and runs ticks only when a test asks
#[derive(Default)]
pub struct ManualScheduler {
    loops: Mutex<Vec<(String, PeriodicBody, CancellationToken)>>,
}

impl ManualScheduler {
    pub fn loop_names(&self) -> Vec<String> {
        self.loops.lock().iter().map(|(name, _, _)| name.clone()).collect()
    }

    pub fn token(&self, index: usize) -> CancellationToken {
        self.loops.lock()[index].2.clone()
    }

    /// Run one tick of loop `index`
    pub async fn tick(&self, index: usize) -> Result<()> {
        let (body, token) = {
            let loops = self.loops.lock();
            let (_, body, token) = &loops[index];
            (Arc::clone(body), token.clone())
        };
        body(token).await
    }
}

impl Scheduler for ManualScheduler {
    fn run_periodic(
        &self,
        name: &str,
        body: PeriodicBody,
        _interval: Duration,
        _initial_delay: Duration,
    ) -> LoopHandle {
        let token = CancellationToken::new();
        self.loops.lock().push((name.to_string(), body, token.clone()));
        LoopHandle::new(name, token, None)
    }
}
