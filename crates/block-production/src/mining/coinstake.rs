//! Coinstake construction

use crate::config::MintingSettings;
use crate::domain::{Amount, Transaction, TxIn, TxOut, UtxoStakeDescription};

/// Unsigned coinstake spending `kernel` at block time `time`.
///
/// Output 0 is the empty marker. The owner gets back the staked value plus
/// `reward`, in one output or, with splitting enabled and a total above
/// twice `minimum_split_coin_value`, in two.
pub fn build_coinstake(
    kernel: &UtxoStakeDescription,
    time: u32,
    reward: Amount,
    settings: &MintingSettings,
) -> Transaction {
    let mut tx = Transaction::new(time);
    tx.inputs.push(TxIn::spending(kernel.outpoint));
    tx.outputs.push(TxOut::empty());

    let script = kernel.tx_out.script_pubkey.clone();
    let total = kernel.value() + reward;

    if should_split(total, settings) {
        let half = total / 2;
        tx.outputs.push(TxOut::new(half, script.clone()));
        tx.outputs.push(TxOut::new(total - half, script));
    } else {
        tx.outputs.push(TxOut::new(total, script));
    }
    tx
}

fn should_split(total: Amount, settings: &MintingSettings) -> bool {
    settings.enable_coinstake_splitting
        && total > settings.minimum_split_coin_value.saturating_mul(2)
}
