//! Gas fee calculation utilities
//!
//! Handles calculation of effective gas price and total fees for both
//! legacy and EIP-1559 transactions, from the fields the indexer
//! annotates on a raw transaction. A transaction whose fee cannot be
//! derived simply yields no fee record; it never aborts parsing.

use crate::types::RawTransaction;
use alloy_primitives::U256;
use tracing::warn;

/// Calculate the effective gas price for a transaction.
///
/// Priority order:
/// 1. `gas_price` for legacy transactions
/// 2. EIP-1559: `min(max_fee, base_fee + max_priority_fee)`
pub fn effective_gas_price(tx: &RawTransaction) -> Option<U256> {
    if tx.is_legacy() {
        return tx.gas_price;
    }

    if tx.is_eip1559() {
        let base_fee = tx.base_fee_per_gas?;
        let max_fee = tx.max_fee_per_gas?;
        let max_priority_fee = tx.max_priority_fee_per_gas.unwrap_or(U256::ZERO);

        let calculated = base_fee.saturating_add(max_priority_fee);
        return Some(calculated.min(max_fee));
    }

    warn!(txid = %tx.txid, "transaction type not recognized (neither legacy nor EIP-1559)");
    None
}

/// Total fee paid for a transaction: `gas_used * effective_gas_price`.
pub fn transaction_fee(tx: &RawTransaction) -> Option<U256> {
    let gas_used = tx.gas_used?;
    let price = effective_gas_price(tx)?;
    Some(gas_used.saturating_mul(price))
}
