//! Wrapped-asset wrap / unwrap decoding
//!
//! `deposit()` wraps native value into the wrapper token; `withdraw`
//! unwraps it. The wrapper emits no Transfer event for either, so the
//! indexer has no sub-record and the legs are produced here. The native
//! side of an unwrap arrives as an internal transfer.

use crate::parse::{abi, ContractRegistry, DecodedTransfer, DecoderResult, TransferDirection};
use crate::tokens::TokenInfo;
use crate::types::RawTransaction;
use alloy_primitives::Address;

/// Selector of `deposit()`.
const DEPOSIT_SELECTOR: [u8; 4] = [0xd0, 0xe3, 0x0d, 0xb0];

/// Selector of `withdraw(uint256)`.
const WITHDRAW_SELECTOR: [u8; 4] = [0x2e, 0x1a, 0x7d, 0x4d];

fn wrapper_token(weth: Address) -> TokenInfo {
    TokenInfo {
        contract: weth,
        decimals: 18,
        name: "Wrapped Ether".to_string(),
        symbol: "WETH".to_string(),
    }
}

/// Decode a call to the wrapper contract.
pub fn decode(tx: &RawTransaction, tracked: Address, registry: &ContractRegistry) -> DecoderResult {
    if tracked != tx.from {
        return DecoderResult::None;
    }
    let weth = registry.weth;

    match abi::selector(&tx.input) {
        Some(DEPOSIT_SELECTOR) => DecoderResult::Transfers {
            legs: vec![DecodedTransfer {
                direction: TransferDirection::Receive,
                contract: Some(weth),
                value: tx.value,
                counterparty: Some(weth),
                token: Some(wrapper_token(weth)),
            }],
            claimed: vec![weth],
        },
        Some(WITHDRAW_SELECTOR) => {
            let Some(amount) = abi::arg_u256(&tx.input, 0) else {
                return DecoderResult::None;
            };
            DecoderResult::Transfers {
                legs: vec![DecodedTransfer {
                    direction: TransferDirection::Send,
                    contract: Some(weth),
                    value: amount,
                    counterparty: Some(weth),
                    token: Some(wrapper_token(weth)),
                }],
                claimed: vec![weth],
            }
        }
        _ => DecoderResult::None,
    }
}
