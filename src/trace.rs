//! Call trace utilities for internal native-asset transfers
//!
//! This module understands the output of the `callTracer` debug tracer
//! and extracts the internal transfers that touch a tracked address, in
//! either direction. They feed the parser engine as extra native legs.
//!
//! Guardrails:
//! - The root node is skipped: its value is the transaction's own
//!   `value` and is already counted by the native pass.
//! - DELEGATECALL / STATICCALL nodes are ignored even if they report a
//!   value.
//! - SELFDESTRUCT-like nodes count as value transfers to the
//!   beneficiary if present.
//! - A reverted transaction yields no transfers at all.

use crate::types::CallTrace;
use alloy_primitives::{Address, U256};

/// Internal native-asset transfer discovered from a call trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalTransfer {
    /// Sending address
    pub from: Address,
    /// Receiving address
    pub to: Address,
    /// Amount of wei moved
    pub value: U256,
}

fn is_value_transfer_node(node_type: &str) -> bool {
    // CALL, CALLCODE, and SELFDESTRUCT may move value. STATICCALL and
    // DELEGATECALL never do, even if a buggy tracer reports one.
    let t = node_type.to_ascii_uppercase();
    matches!(t.as_str(), "CALL" | "CALLCODE" | "SELFDESTRUCT")
}

/// Collect internal transfers touching `tracked` from a call trace.
///
/// - `trace`: root of the `callTracer` call tree.
/// - `tx_succeeded`: whether the *overall* transaction succeeded. If
///   false, no transfers are returned (the state changes rolled back).
/// - `tracked`: address whose credits and debits to collect.
pub fn collect_internal_transfers(
    trace: &CallTrace,
    tx_succeeded: bool,
    tracked: Address,
) -> Vec<InternalTransfer> {
    let mut result = Vec::new();

    if !tx_succeeded {
        return result;
    }

    fn walk(node: &CallTrace, tracked: Address, is_root: bool, out: &mut Vec<InternalTransfer>) {
        if !is_root {
            let node_type = node.r#type.as_deref().unwrap_or("");
            if is_value_transfer_node(node_type) {
                if let (Some(from), Some(to)) = (node.from, node.to) {
                    if node.value > U256::ZERO && (from == tracked || to == tracked) {
                        out.push(InternalTransfer {
                            from,
                            to,
                            value: node.value,
                        });
                    }
                }
            }
        }

        if let Some(children) = &node.calls {
            for child in children {
                walk(child, tracked, false, out);
            }
        }
    }

    walk(trace, tracked, true, &mut result);
    result
}
