//! Domain entities for block production
//!
//! Transactions and blocks use a bitcoin-style little-endian encoding with
//! compact-size prefixes. Transactions carry a `time` field, as PoS chains of
//! this family do. The encoding drives txids, block hashes, block size and the
//! merkle root.

use primitive_types::H256;
use serde::{Deserialize, Serialize};

use crate::utils::hashing::{hash256, merkle_root};

/// Amount in the smallest currency unit. Signed so fee deltas can be negative.
pub type Amount = i64;

/// One coin in base units
pub const COIN: Amount = 100_000_000;

/// Serialized block header size in bytes
pub const HEADER_SIZE: usize = 80;

const OP_0: u8 = 0x00;
const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;
const OP_1NEGATE: u8 = 0x4f;
const OP_1: u8 = 0x51;
const OP_CHECKSIG: u8 = 0xac;
const OP_CHECKSIGVERIFY: u8 = 0xad;
const OP_CHECKMULTISIG: u8 = 0xae;
const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

/// Legacy sigop weight of a bare multisig opcode
const MAX_PUBKEYS_PER_MULTISIG: usize = 20;

/// Raw script bytes
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Script(pub Vec<u8>);

impl Script {
    /// The empty script
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Wrap raw bytes
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Coinbase input script: the block height followed by the extra nonce
    pub fn coinbase(height: u32, extra_nonce: u32) -> Self {
        let mut script = Self::empty();
        script.push_int(i64::from(height));
        script.push_int(i64::from(extra_nonce));
        script
    }

    /// Append a minimally encoded integer push
    pub fn push_int(&mut self, value: i64) {
        match value {
            0 => self.0.push(OP_0),
            -1 => self.0.push(OP_1NEGATE),
            1..=16 => self.0.push(OP_1 + (value as u8) - 1),
            _ => self.push_data(&script_num(value)),
        }
    }

    /// Append a data push with the shortest length prefix
    pub fn push_data(&mut self, data: &[u8]) {
        let len = data.len();
        if len < OP_PUSHDATA1 as usize {
            self.0.push(len as u8);
        } else if len <= 0xff {
            self.0.push(OP_PUSHDATA1);
            self.0.push(len as u8);
        } else if len <= 0xffff {
            self.0.push(OP_PUSHDATA2);
            self.0.extend_from_slice(&(len as u16).to_le_bytes());
        } else {
            self.0.push(OP_PUSHDATA4);
            self.0.extend_from_slice(&(len as u32).to_le_bytes());
        }
        self.0.extend_from_slice(data);
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Script length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the zero-length script
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Legacy (inaccurate) signature operation count.
    ///
    /// Push payloads are skipped; a truncated push ends the walk.
    pub fn sigop_count(&self) -> usize {
        let bytes = &self.0;
        let mut count = 0;
        let mut i = 0;
        while i < bytes.len() {
            let op = bytes[i];
            i += 1;
            let push_len = match op {
                0x01..=0x4b => op as usize,
                OP_PUSHDATA1 => match bytes.get(i) {
                    Some(len) => {
                        i += 1;
                        *len as usize
                    }
                    None => break,
                },
                OP_PUSHDATA2 => match bytes.get(i..i + 2) {
                    Some(len) => {
                        i += 2;
                        u16::from_le_bytes([len[0], len[1]]) as usize
                    }
                    None => break,
                },
                OP_PUSHDATA4 => match bytes.get(i..i + 4) {
                    Some(len) => {
                        i += 4;
                        u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize
                    }
                    None => break,
                },
                OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                    count += 1;
                    0
                }
                OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                    count += MAX_PUBKEYS_PER_MULTISIG;
                    0
                }
                _ => 0,
            };
            i = i.saturating_add(push_len);
        }
        count
    }
}

/// CScriptNum encoding: little-endian magnitude with a sign bit in the top byte
fn script_num(value: i64) -> Vec<u8> {
    let negative = value < 0;
    let mut abs = value.unsigned_abs();
    let mut out = Vec::new();
    while abs > 0 {
        out.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    if let Some(last) = out.last_mut() {
        if *last & 0x80 != 0 {
            out.push(if negative { 0x80 } else { 0x00 });
        } else if negative {
            *last |= 0x80;
        }
    }
    out
}

/// Reference to a transaction output
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    /// Id of the transaction holding the output
    pub txid: H256,

    /// Output index
    pub vout: u32,
}

impl OutPoint {
    /// Create an outpoint
    pub fn new(txid: H256, vout: u32) -> Self {
        Self { txid, vout }
    }

    /// The outpoint spent by coinbase inputs
    pub fn null() -> Self {
        Self {
            txid: H256::zero(),
            vout: u32::MAX,
        }
    }

    /// True for the coinbase sentinel
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.vout == u32::MAX
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.txid.as_bytes());
        out.extend_from_slice(&self.vout.to_le_bytes());
    }
}

/// Transaction input
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    /// Output being spent
    pub prevout: OutPoint,

    /// Unlocking script
    pub script_sig: Script,

    /// Sequence number
    pub sequence: u32,
}

impl TxIn {
    /// Input spending `prevout` with an empty script
    pub fn spending(prevout: OutPoint) -> Self {
        Self {
            prevout,
            script_sig: Script::empty(),
            sequence: u32::MAX,
        }
    }
}

/// Transaction output
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    /// Value in base units
    pub value: Amount,

    /// Locking script
    pub script_pubkey: Script,
}

impl TxOut {
    /// Create an output
    pub fn new(value: Amount, script_pubkey: Script) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }

    /// Zero-value output with an empty script. Used as the coinstake marker
    /// and as the PoS placeholder output.
    pub fn empty() -> Self {
        Self::new(0, Script::empty())
    }

    /// True for the zero-value empty-script marker
    pub fn is_empty(&self) -> bool {
        self.value == 0 && self.script_pubkey.is_empty()
    }
}

/// Timestamped transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Format version
    pub version: i32,

    /// Transaction time (unix seconds)
    pub time: u32,

    /// Inputs
    pub inputs: Vec<TxIn>,

    /// Outputs
    pub outputs: Vec<TxOut>,

    /// Lock time
    pub lock_time: u32,
}

impl Transaction {
    /// Empty version-1 transaction
    pub fn new(time: u32) -> Self {
        Self {
            version: 1,
            time,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
        }
    }

    /// Single null input, the shape of a coinbase
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// At least one real input and a first output that is the empty marker
    pub fn is_coinstake(&self) -> bool {
        !self.inputs.is_empty()
            && !self.inputs[0].prevout.is_null()
            && self.outputs.len() >= 2
            && self.outputs[0].is_empty()
    }

    /// Sum of output values
    pub fn total_out(&self) -> Amount {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// Serialized bytes
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        self.encode_into(&mut out);
        out
    }

    /// Serialized size in bytes
    pub fn size(&self) -> usize {
        self.serialize().len()
    }

    /// Transaction id (sha256d of the serialization)
    pub fn txid(&self) -> H256 {
        hash256(&self.serialize())
    }

    /// Legacy sigop count over all scripts
    pub fn legacy_sigop_count(&self) -> usize {
        let inputs: usize = self.inputs.iter().map(|i| i.script_sig.sigop_count()).sum();
        let outputs: usize = self
            .outputs
            .iter()
            .map(|o| o.script_pubkey.sigop_count())
            .sum();
        inputs + outputs
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.time.to_le_bytes());
        write_compact_size(out, self.inputs.len() as u64);
        for input in &self.inputs {
            input.prevout.encode_into(out);
            write_bytes(out, input.script_sig.as_bytes());
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_compact_size(out, self.outputs.len() as u64);
        for output in &self.outputs {
            out.extend_from_slice(&output.value.to_le_bytes());
            write_bytes(out, output.script_pubkey.as_bytes());
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
    }
}

/// 80-byte block header
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Version with BIP9 signalling bits
    pub version: i32,

    /// Hash of the previous block
    pub prev_hash: H256,

    /// Merkle root of the transactions
    pub merkle_root: H256,

    /// Unix timestamp
    pub time: u32,

    /// Compact difficulty target
    pub bits: u32,

    /// Proof-of-work nonce
    pub nonce: u32,
}

impl BlockHeader {
    /// Serialized header bytes
    pub fn serialize(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(self.prev_hash.as_bytes());
        out[36..68].copy_from_slice(self.merkle_root.as_bytes());
        out[68..72].copy_from_slice(&self.time.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    /// Block hash (sha256d of the header)
    pub fn hash(&self) -> H256 {
        hash256(&self.serialize())
    }
}

/// Block: header, ordered transactions and the PoS block signature
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Header
    pub header: BlockHeader,

    /// Transactions; index 0 is the coinbase or coinstake
    pub transactions: Vec<Transaction>,

    /// Signature over the block hash (empty for PoW blocks)
    pub signature: Vec<u8>,
}

impl Block {
    /// Block hash
    pub fn hash(&self) -> H256 {
        self.header.hash()
    }

    /// Merkle root of the current transaction list
    pub fn compute_merkle_root(&self) -> H256 {
        let txids: Vec<H256> = self.transactions.iter().map(Transaction::txid).collect();
        merkle_root(&txids)
    }

    /// Recompute and store the merkle root
    pub fn update_merkle_root(&mut self) {
        self.header.merkle_root = self.compute_merkle_root();
    }

    /// Serialized size in bytes
    pub fn size(&self) -> usize {
        let mut out = Vec::with_capacity(HEADER_SIZE + 256);
        out.extend_from_slice(&self.header.serialize());
        write_compact_size(&mut out, self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.encode_into(&mut out);
        }
        write_bytes(&mut out, &self.signature);
        out.len()
    }

    /// True when the first transaction is a coinstake
    pub fn is_proof_of_stake(&self) -> bool {
        self.transactions
            .first()
            .is_some_and(Transaction::is_coinstake)
    }
}

/// Candidate block with fee and sigop accounting
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockTemplate {
    /// Block being assembled
    pub block: Block,

    /// Height the block will occupy
    pub height: u32,

    /// Sum of the selected transactions' fees
    pub total_fee: Amount,

    /// Per-transaction fees; index 0 holds `-total_fee`
    pub tx_fees: Vec<Amount>,

    /// Per-transaction sigop cost
    pub tx_sigops_cost: Vec<i64>,

    /// Mempool transactions selected into the block
    pub selected_count: usize,

    /// Always 0; kept for interface symmetry with package-aware selectors
    pub updated_count: usize,
}

impl BlockTemplate {
    /// Replace the first transaction, recompute its sigop cost and refresh
    /// the merkle root
    pub fn replace_first_transaction(&mut self, tx: Transaction, witness_scale_factor: usize) {
        let sigops = (tx.legacy_sigop_count() * witness_scale_factor) as i64;
        if let Some(first) = self.block.transactions.first_mut() {
            *first = tx;
        } else {
            self.block.transactions.push(tx);
        }
        match self.tx_sigops_cost.first_mut() {
            Some(cost) => *cost = sigops,
            None => self.tx_sigops_cost.push(sigops),
        }
        self.block.update_merkle_root();
    }
}

/// Bitcoin compact-size integer
pub fn write_compact_size(out: &mut Vec<u8>, n: u64) {
    if n < 0xfd {
        out.push(n as u8);
    } else if n <= 0xffff {
        out.push(0xfd);
        out.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xffff_ffff {
        out.push(0xfe);
        out.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        out.push(0xff);
        out.extend_from_slice(&n.to_le_bytes());
    }
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_compact_size(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}
