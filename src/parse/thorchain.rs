//! Cross-chain swap router decoding
//!
//! The router's `deposit` and `transferOut` calls carry a
//! colon-delimited memo whose first field tags the operation: a swap
//! leaving this chain, an outbound settlement arriving on it, or a
//! refund. Swap legs compute the sell side locally from the
//! transaction's own calldata and value; outbound and refund legs
//! resolve their originating amounts through the settlement ledger,
//! since those are not present in the chain transaction. A settlement
//! ledger failure propagates so the worker can retry.

use crate::error::{IndexerError, ParseError};
use crate::parse::{abi, token_asset, DecoderResult, Refund, Trade, NATIVE_ASSET};
use crate::types::{self, RawTransaction};
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;

const DEX_NAME: &str = "thorchain";

/// Selector of `deposit(address,address,uint256,string)`.
const DEPOSIT_SELECTOR: [u8; 4] = [0x1f, 0xec, 0xe7, 0xb4];

/// Selector of `transferOut(address,address,uint256,string)`.
const TRANSFER_OUT_SELECTOR: [u8; 4] = [0x57, 0x4d, 0xa7, 0x17];

/// The originating side of a settled swap or refund, as reported by the
/// settlement ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementAction {
    pub sell_asset: String,
    pub sell_amount: U256,
    pub fee_asset: String,
    pub fee_amount: U256,
    pub liquidity_fee: Option<U256>,
}

/// External settlement-ledger service resolving cross-chain amounts.
#[async_trait]
pub trait SettlementLedger: Send + Sync {
    async fn action(&self, txid: B256) -> Result<SettlementAction, IndexerError>;
}

/// Operation tagged by the first memo field.
#[derive(Debug, Clone, PartialEq, Eq)]
enum MemoOp {
    Swap { asset: String },
    Out { txid: B256 },
    Refund { txid: B256 },
}

fn parse_memo(memo: &str) -> Option<MemoOp> {
    let mut parts = memo.split(':');
    let tag = parts.next()?.trim().to_ascii_uppercase();
    match tag.as_str() {
        "SWAP" | "=" | "S" => {
            let asset = parts.next()?.trim();
            if asset.is_empty() {
                return None;
            }
            Some(MemoOp::Swap {
                asset: asset.to_string(),
            })
        }
        "OUT" => Some(MemoOp::Out {
            txid: types::parse_b256(parts.next()?.trim()).ok()?,
        }),
        "REFUND" => Some(MemoOp::Refund {
            txid: types::parse_b256(parts.next()?.trim()).ok()?,
        }),
        _ => None,
    }
}

/// Asset id for a router asset argument; the zero address is native.
fn router_asset(asset: Address) -> String {
    if asset == Address::ZERO {
        NATIVE_ASSET.to_string()
    } else {
        token_asset(asset)
    }
}

/// Decode a call to the swap router.
pub async fn decode(
    tx: &RawTransaction,
    tracked: Address,
    settlement: &dyn SettlementLedger,
) -> Result<DecoderResult, ParseError> {
    match abi::selector(&tx.input) {
        Some(DEPOSIT_SELECTOR) => Ok(decode_deposit(tx, tracked)),
        Some(TRANSFER_OUT_SELECTOR) => decode_transfer_out(tx, tracked, settlement).await,
        _ => Ok(DecoderResult::None),
    }
}

/// `deposit` starts a swap leaving this chain: the sell side is local,
/// the buy side settles elsewhere and stays amountless here.
fn decode_deposit(tx: &RawTransaction, tracked: Address) -> DecoderResult {
    if tracked != tx.from {
        return DecoderResult::None;
    }
    let (Some(asset), Some(amount), Some(memo)) = (
        abi::arg_address(&tx.input, 1),
        abi::arg_u256(&tx.input, 2),
        abi::arg_string(&tx.input, 3),
    ) else {
        return DecoderResult::None;
    };

    let Some(MemoOp::Swap { asset: buy_asset }) = parse_memo(&memo) else {
        return DecoderResult::None;
    };

    let (sell_asset, sell_amount) = if asset == Address::ZERO {
        (NATIVE_ASSET.to_string(), tx.value)
    } else {
        (token_asset(asset), amount)
    };

    DecoderResult::Trade(Trade {
        dex_name: DEX_NAME.to_string(),
        buy_asset,
        buy_amount: U256::ZERO,
        sell_asset,
        sell_amount,
        fee_asset: NATIVE_ASSET.to_string(),
        fee_amount: U256::ZERO,
        memo: Some(memo),
        liquidity_fee: None,
    })
}

/// `transferOut` settles a swap (or refund) onto this chain: the local
/// side is the payout, the originating side comes from the ledger.
async fn decode_transfer_out(
    tx: &RawTransaction,
    tracked: Address,
    settlement: &dyn SettlementLedger,
) -> Result<DecoderResult, ParseError> {
    let (Some(to), Some(asset), Some(amount), Some(memo)) = (
        abi::arg_address(&tx.input, 0),
        abi::arg_address(&tx.input, 1),
        abi::arg_u256(&tx.input, 2),
        abi::arg_string(&tx.input, 3),
    ) else {
        return Ok(DecoderResult::None);
    };

    if tracked != to {
        return Ok(DecoderResult::None);
    }

    let payout_asset = router_asset(asset);
    let payout_amount = if asset == Address::ZERO { tx.value } else { amount };

    match parse_memo(&memo) {
        Some(MemoOp::Out { txid }) => {
            let action = settlement
                .action(txid)
                .await
                .map_err(|source| ParseError::Settlement { txid, source })?;
            Ok(DecoderResult::Trade(Trade {
                dex_name: DEX_NAME.to_string(),
                buy_asset: payout_asset,
                buy_amount: payout_amount,
                sell_asset: action.sell_asset,
                sell_amount: action.sell_amount,
                fee_asset: action.fee_asset,
                fee_amount: action.fee_amount,
                memo: Some(memo),
                liquidity_fee: action.liquidity_fee,
            }))
        }
        Some(MemoOp::Refund { txid }) => {
            let action = settlement
                .action(txid)
                .await
                .map_err(|source| ParseError::Settlement { txid, source })?;
            Ok(DecoderResult::Refund(Refund {
                dex_name: DEX_NAME.to_string(),
                refund_asset: payout_asset,
                refund_amount: payout_amount,
                sell_asset: action.sell_asset,
                sell_amount: action.sell_amount,
                fee_asset: action.fee_asset,
                fee_amount: action.fee_amount,
                memo: Some(memo),
            }))
        }
        _ => Ok(DecoderResult::None),
    }
}
