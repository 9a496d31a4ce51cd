//! Transaction parser engine
//!
//! Turns a raw transaction plus a tracked address into a normalized,
//! protocol-aware representation: aggregated value transfers, fee
//! attribution, and an optional trade or refund record.
//!
//! Dispatch is contract-address first (against the protocol registry),
//! then selector within the matched protocol. Every transaction also
//! goes through the native and token passes regardless of dispatch. A
//! decoder that cannot fully decode its matched payload yields nothing
//! and the transaction still aggregates its plain transfers.

pub mod abi;
pub mod erc20;
pub mod multisig;
pub mod registry;
pub mod thorchain;
pub mod uniswap;
pub mod weth;
pub mod zrx;

pub use registry::{ContractRegistry, Protocol};
pub use thorchain::{SettlementAction, SettlementLedger};

use crate::error::ParseError;
use crate::fee;
use crate::tokens::{TokenCache, TokenInfo};
use crate::trace::InternalTransfer;
use crate::types::RawTransaction;
use alloy_primitives::{Address, B256, U256};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Asset id of the chain's base asset.
pub const NATIVE_ASSET: &str = "ETH";

/// Asset id for a token contract.
pub fn token_asset(contract: Address) -> String {
    format!("erc20:{:#x}", contract)
}

/// Direction of a transfer relative to the tracked address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Send,
    Receive,
}

/// One contributing leg of an aggregated transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferComponent {
    pub value: U256,
}

/// Aggregated transfer for one (direction, asset, counterparty) key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transfer {
    #[serde(rename = "type")]
    pub direction: TransferDirection,
    pub asset: String,
    #[serde(rename = "totalValue")]
    pub total_value: U256,
    pub components: Vec<TransferComponent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterparty: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenInfo>,
}

/// Fee paid by the tracked address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fee {
    pub asset: String,
    pub value: U256,
}

/// DEX trade detected on a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trade {
    #[serde(rename = "dexName")]
    pub dex_name: String,
    #[serde(rename = "buyAsset")]
    pub buy_asset: String,
    #[serde(rename = "buyAmount")]
    pub buy_amount: U256,
    #[serde(rename = "sellAsset")]
    pub sell_asset: String,
    #[serde(rename = "sellAmount")]
    pub sell_amount: U256,
    #[serde(rename = "feeAsset")]
    pub fee_asset: String,
    #[serde(rename = "feeAmount")]
    pub fee_amount: U256,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    #[serde(rename = "liquidityFee", skip_serializing_if = "Option::is_none")]
    pub liquidity_fee: Option<U256>,
}

/// Swap refund detected on a transaction. Mutually exclusive with
/// [`Trade`] on one normalized transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Refund {
    #[serde(rename = "dexName")]
    pub dex_name: String,
    #[serde(rename = "refundAsset")]
    pub refund_asset: String,
    #[serde(rename = "refundAmount")]
    pub refund_amount: U256,
    #[serde(rename = "sellAsset")]
    pub sell_asset: String,
    #[serde(rename = "sellAmount")]
    pub sell_amount: U256,
    #[serde(rename = "feeAsset")]
    pub fee_asset: String,
    #[serde(rename = "feeAmount")]
    pub fee_amount: U256,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

/// Normalized transaction published to the client's result queue.
/// Pure derived data, never persisted by this core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedTransaction {
    pub txid: B256,
    pub address: Address,
    #[serde(rename = "blockHeight", skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
    #[serde(rename = "blockTime")]
    pub block_time: u64,
    pub confirmations: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee: Option<Fee>,
    pub transfers: Vec<Transfer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade: Option<Trade>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund: Option<Refund>,
}

impl NormalizedTransaction {
    /// A self-send moves an asset from the tracked address back to
    /// itself: matching send and receive aggregates with equal totals.
    pub fn is_self_send(&self) -> bool {
        self.transfers.iter().any(|send| {
            send.direction == TransferDirection::Send
                && self.transfers.iter().any(|recv| {
                    recv.direction == TransferDirection::Receive
                        && recv.asset == send.asset
                        && recv.total_value == send.total_value
                        && recv.total_value > U256::ZERO
                })
        })
    }
}

/// Transfer leg produced by a protocol sub-decoder, before aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransfer {
    pub direction: TransferDirection,
    /// Token contract, or None for the native asset
    pub contract: Option<Address>,
    pub value: U256,
    pub counterparty: Option<Address>,
    pub token: Option<TokenInfo>,
}

/// Result of one protocol sub-decoder.
///
/// `Transfers` legs replace the indexer's token sub-records for the
/// claimed contracts so a leg is never counted twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderResult {
    Trade(Trade),
    Refund(Refund),
    Transfers {
        legs: Vec<DecodedTransfer>,
        claimed: Vec<Address>,
    },
    None,
}

/// Accumulates transfer legs keyed by (direction, asset, counterparty).
///
/// Repeated contributions to one key grow `total_value` and append a
/// component record instead of creating a new transfer, so multi-leg
/// trades collapse into one aggregated transfer per asset while keeping
/// the individual leg amounts. Legs in the same direction and asset
/// whose counterparties disagree (a trade hopping through two pools)
/// still aggregate; the counterparty is kept only while every leg
/// agrees on it.
#[derive(Debug, Default)]
pub struct TransferAggregator {
    entries: Vec<Transfer>,
}

impl TransferAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one leg. Zero-value legs are ignored.
    pub fn add(
        &mut self,
        direction: TransferDirection,
        asset: &str,
        counterparty: Option<Address>,
        value: U256,
        token: Option<TokenInfo>,
    ) {
        if value == U256::ZERO {
            return;
        }
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|t| t.direction == direction && t.asset == asset)
        {
            entry.total_value = entry.total_value.saturating_add(value);
            entry.components.push(TransferComponent { value });
            if entry.counterparty != counterparty {
                entry.counterparty = None;
            }
            if entry.token.is_none() {
                entry.token = token;
            }
            return;
        }
        self.entries.push(Transfer {
            direction,
            asset: asset.to_string(),
            total_value: value,
            components: vec![TransferComponent { value }],
            counterparty,
            token,
        });
    }

    /// Add a decoder-produced leg.
    pub fn add_decoded(&mut self, leg: DecodedTransfer) {
        let asset = match leg.contract {
            Some(contract) => token_asset(contract),
            None => NATIVE_ASSET.to_string(),
        };
        self.add(leg.direction, &asset, leg.counterparty, leg.value, leg.token);
    }

    /// Aggregated transfers in first-contribution order.
    pub fn finish(self) -> Vec<Transfer> {
        self.entries
    }
}

/// The parser engine with its injected collaborators.
pub struct ParserEngine {
    registry: ContractRegistry,
    tokens: TokenCache,
    settlement: Arc<dyn SettlementLedger>,
}

impl ParserEngine {
    pub fn new(
        registry: ContractRegistry,
        tokens: TokenCache,
        settlement: Arc<dyn SettlementLedger>,
    ) -> Self {
        Self {
            registry,
            tokens,
            settlement,
        }
    }

    /// Parse a raw transaction for one tracked address.
    ///
    /// `internal_transfers` are trace-derived native legs touching the
    /// tracked address; the caller fetches them for contract calls.
    pub async fn parse(
        &self,
        tx: &RawTransaction,
        tracked: Address,
        internal_transfers: &[InternalTransfer],
    ) -> Result<NormalizedTransaction, ParseError> {
        let decoded = if tx.is_success() {
            self.dispatch(tx, tracked).await?
        } else {
            DecoderResult::None
        };

        let mut trade = None;
        let mut refund = None;
        let mut decoder_legs = Vec::new();
        let mut claimed: Vec<Address> = Vec::new();
        match decoded {
            DecoderResult::Trade(t) => trade = Some(t),
            DecoderResult::Refund(r) => refund = Some(r),
            DecoderResult::Transfers { legs, claimed: c } => {
                decoder_legs = legs;
                claimed = c;
            }
            DecoderResult::None => {}
        }

        let mut agg = TransferAggregator::new();

        // A reverted transaction moved no value; only the fee survives.
        if tx.is_success() {
            // Native pass, always evaluated regardless of dispatch.
            if tx.value > U256::ZERO {
                if tracked == tx.from {
                    agg.add(TransferDirection::Send, NATIVE_ASSET, tx.to, tx.value, None);
                }
                if tx.to == Some(tracked) {
                    agg.add(
                        TransferDirection::Receive,
                        NATIVE_ASSET,
                        Some(tx.from),
                        tx.value,
                        None,
                    );
                }
            }

            // Trace-derived internal native legs.
            for transfer in internal_transfers {
                if transfer.to == tracked {
                    agg.add(
                        TransferDirection::Receive,
                        NATIVE_ASSET,
                        Some(transfer.from),
                        transfer.value,
                        None,
                    );
                }
                if transfer.from == tracked {
                    agg.add(
                        TransferDirection::Send,
                        NATIVE_ASSET,
                        Some(transfer.to),
                        transfer.value,
                        None,
                    );
                }
            }

            // Token pass over the indexer's sub-records.
            for leg in erc20::token_legs(tx, tracked, &claimed) {
                agg.add_decoded(leg);
            }

            for leg in decoder_legs {
                agg.add_decoded(leg);
            }
        }

        let fee = if tracked == tx.from {
            fee::transaction_fee(tx).map(|value| Fee {
                asset: NATIVE_ASSET.to_string(),
                value,
            })
        } else {
            None
        };

        Ok(NormalizedTransaction {
            txid: tx.txid,
            address: tracked,
            block_height: tx.block_height,
            block_time: tx.block_time,
            confirmations: tx.confirmations,
            fee,
            transfers: agg.finish(),
            trade,
            refund,
        })
    }

    async fn dispatch(
        &self,
        tx: &RawTransaction,
        tracked: Address,
    ) -> Result<DecoderResult, ParseError> {
        let Some(to) = tx.to else {
            return Ok(DecoderResult::None);
        };
        match self.registry.protocol_for(to) {
            Some(Protocol::Weth) => Ok(weth::decode(tx, tracked, &self.registry)),
            Some(Protocol::UniswapV2Router) => {
                uniswap::decode(tx, tracked, &self.registry, &self.tokens).await
            }
            Some(Protocol::ThorchainRouter) => {
                thorchain::decode(tx, tracked, self.settlement.as_ref()).await
            }
            Some(Protocol::ZrxProxy) => Ok(zrx::decode(tx, tracked)),
            None => Ok(DecoderResult::None),
        }
    }
}

/// Every address a transaction may affect, for sync fan-out.
///
/// Besides sender, receiver, and token transfer parties, this widens
/// through relay payloads: a multi-signature `submitTransaction` inner
/// destination and a token `transfer` calldata destination.
pub fn associated_addresses(tx: &RawTransaction, _registry: &ContractRegistry) -> Vec<Address> {
    let mut set = BTreeSet::new();
    set.insert(tx.from);
    if let Some(to) = tx.to {
        set.insert(to);
    }
    for transfer in &tx.token_transfers {
        set.insert(transfer.from);
        set.insert(transfer.to);
    }
    if let Some(destination) = multisig::relay_destination(&tx.input) {
        set.insert(destination);
    }
    if let Some(destination) = erc20::transfer_destination(&tx.input) {
        set.insert(destination);
    }
    set.into_iter().collect()
}
