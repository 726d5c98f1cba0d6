//! Invariant checkers for block templates
//!
//! Run after assembly and again after the coinstake is substituted. A failure
//! means a collaborator or the assembler broke its contract, so every check
//! returns `InvariantViolation`.

use std::collections::HashSet;

use super::chain::ChainedHeader;
use super::consensus::ConsensusOptions;
use super::entities::BlockTemplate;
use crate::error::{BlockProductionError, Result};

/// Which first transaction a template must carry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FirstTransactionKind {
    /// PoW coinbase
    Coinbase,
    /// PoS placeholder before the minting loop fills it in
    CoinstakePlaceholder,
    /// Real coinstake
    Coinstake,
}

/// The tip a template is built on must be usable
pub fn check_tip(tip: &ChainedHeader) -> Result<()> {
    if tip.height == u32::MAX {
        return Err(BlockProductionError::InvariantViolation(
            "tip height cannot be extended".to_string(),
        ));
    }
    if tip.hash != tip.header.hash() {
        return Err(BlockProductionError::InvariantViolation(format!(
            "tip at height {} does not match its header",
            tip.height
        )));
    }
    Ok(())
}

/// Fee and sigop arrays line up with the transactions, and slot 0 holds
/// `-total_fee`
pub fn check_fee_accounting(template: &BlockTemplate) -> Result<()> {
    let count = template.block.transactions.len();
    if template.tx_fees.len() != count || template.tx_sigops_cost.len() != count {
        return Err(BlockProductionError::InvariantViolation(format!(
            "fee arrays ({}, {}) do not match {} transactions",
            template.tx_fees.len(),
            template.tx_sigops_cost.len(),
            count
        )));
    }
    let selected: i64 = template.tx_fees.iter().skip(1).sum();
    if selected != template.total_fee || template.tx_fees.first() != Some(&-template.total_fee) {
        return Err(BlockProductionError::InvariantViolation(format!(
            "total fee {} does not match selected fees {}",
            template.total_fee, selected
        )));
    }
    Ok(())
}

/// No transaction appears twice
pub fn check_no_duplicates(template: &BlockTemplate) -> Result<()> {
    let mut seen = HashSet::new();
    for tx in &template.block.transactions {
        let txid = tx.txid();
        if !seen.insert(txid) {
            return Err(BlockProductionError::InvariantViolation(format!(
                "duplicate transaction {txid:x}"
            )));
        }
    }
    Ok(())
}

/// Size, weight and sigop budgets hold
pub fn check_budgets(template: &BlockTemplate, options: &ConsensusOptions) -> Result<()> {
    let size = template.block.size();
    if size > options.max_block_base_size {
        return Err(BlockProductionError::InvariantViolation(format!(
            "block size {size} exceeds {}",
            options.max_block_base_size
        )));
    }
    let weight = size * options.witness_scale_factor;
    if weight > options.max_block_weight {
        return Err(BlockProductionError::InvariantViolation(format!(
            "block weight {weight} exceeds {}",
            options.max_block_weight
        )));
    }
    let sigops: i64 = template.tx_sigops_cost.iter().sum();
    if sigops > options.max_block_sigops_cost {
        return Err(BlockProductionError::InvariantViolation(format!(
            "sigop cost {sigops} exceeds {}",
            options.max_block_sigops_cost
        )));
    }
    Ok(())
}

/// First transaction has the expected shape and no other transaction does
pub fn check_first_transaction(template: &BlockTemplate, kind: FirstTransactionKind) -> Result<()> {
    let Some(first) = template.block.transactions.first() else {
        return Err(BlockProductionError::InvariantViolation(
            "template has no transactions".to_string(),
        ));
    };
    let ok = match kind {
        FirstTransactionKind::Coinbase => first.is_coinbase(),
        FirstTransactionKind::CoinstakePlaceholder => {
            first.outputs.len() == 1 && first.outputs[0].is_empty()
        }
        FirstTransactionKind::Coinstake => first.is_coinstake(),
    };
    if !ok {
        return Err(BlockProductionError::InvariantViolation(format!(
            "first transaction is not a {kind:?}"
        )));
    }
    if template
        .block
        .transactions
        .iter()
        .skip(1)
        .any(|tx| tx.is_coinbase() || tx.is_coinstake())
    {
        return Err(BlockProductionError::InvariantViolation(
            "coinbase or coinstake outside slot 0".to_string(),
        ));
    }
    Ok(())
}

/// Header links to `tip` and moves time forward
pub fn check_header(template: &BlockTemplate, tip: &ChainedHeader) -> Result<()> {
    let header = &template.block.header;
    if header.prev_hash != tip.hash {
        return Err(BlockProductionError::InvariantViolation(
            "header does not extend the tip".to_string(),
        ));
    }
    if header.time <= tip.time() {
        return Err(BlockProductionError::InvariantViolation(format!(
            "block time {} not after tip time {}",
            header.time,
            tip.time()
        )));
    }
    if header.merkle_root != template.block.compute_merkle_root() {
        return Err(BlockProductionError::InvariantViolation(
            "stale merkle root".to_string(),
        ));
    }
    Ok(())
}

/// All template checks
pub fn check_template(
    template: &BlockTemplate,
    tip: &ChainedHeader,
    options: &ConsensusOptions,
    kind: FirstTransactionKind,
) -> Result<()> {
    check_first_transaction(template, kind)?;
    check_no_duplicates(template)?;
    check_fee_accounting(template)?;
    check_budgets(template, options)?;
    check_header(template, tip)?;
    Ok(())
}
