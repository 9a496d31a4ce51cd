//! Indexer query surface
//!
//! The `Indexer` trait describes the consumed slice of the indexer / node
//! API: block and transaction lookup, paginated address history, call
//! traces, chain info, and raw-transaction broadcast. `HttpIndexer`
//! implements it over the indexer's REST endpoints plus the node's
//! JSON-RPC, with a bounded per-call timeout and exponential-backoff
//! retry at the transport layer.

use crate::error::IndexerError;
use crate::parse::{abi, SettlementAction, SettlementLedger};
use crate::tokens::{TokenInfo, TokenMetadataSource};
use crate::types::{self, Block, CallTrace, ChainInfo, RawTransaction};
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Typed view of the indexer / node query surface.
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Get a block by hash.
    async fn block_by_hash(&self, hash: B256) -> Result<Block, IndexerError>;

    /// Get a block by height.
    async fn block_by_height(&self, height: u64) -> Result<Block, IndexerError>;

    /// Get a transaction by id, with token-transfer sub-records.
    async fn transaction(&self, txid: B256) -> Result<RawTransaction, IndexerError>;

    /// Get one page of transaction ids for an address over `[from_height, to_height]`.
    ///
    /// Pages are numbered from 1. A page shorter than `page_size` is the last.
    async fn address_txids(
        &self,
        address: Address,
        page: u32,
        page_size: u32,
        from_height: u64,
        to_height: Option<u64>,
    ) -> Result<Vec<B256>, IndexerError>;

    /// Get internal-transaction ids for an address over `[from_height, to_height]`.
    ///
    /// These come from the trace index and may overlap the primary listing.
    async fn internal_txids(
        &self,
        address: Address,
        from_height: u64,
        to_height: Option<u64>,
    ) -> Result<Vec<B256>, IndexerError>;

    /// Get the call trace for a transaction.
    async fn call_trace(&self, txid: B256) -> Result<CallTrace, IndexerError>;

    /// Get the indexer / backend height summary.
    async fn chain_info(&self) -> Result<ChainInfo, IndexerError>;

    /// Broadcast a raw transaction, returning its id.
    async fn broadcast(&self, raw_tx: &[u8]) -> Result<B256, IndexerError>;
}

/// HTTP implementation of [`Indexer`].
pub struct HttpIndexer {
    client: reqwest::Client,
    indexer_url: String,
    node_url: String,
}

impl HttpIndexer {
    /// Create a new client against the indexer REST base URL and the node RPC URL.
    pub fn new(indexer_url: String, node_url: String) -> Result<Self, IndexerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            indexer_url,
            node_url,
        })
    }

    fn retry_policy() -> ExponentialBackoff {
        ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(60)),
            ..Default::default()
        }
    }

    /// GET a JSON document with transport-level retry.
    ///
    /// 404 is a permanent not-found; 5xx and transport failures are transient.
    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, IndexerError> {
        let body = retry(Self::retry_policy(), || async {
            let resp = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(IndexerError::Transport(e)))?;

            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(backoff::Error::permanent(IndexerError::NotFound(
                    url.clone(),
                )));
            }
            if resp.status().is_server_error() {
                return Err(backoff::Error::transient(IndexerError::Malformed(format!(
                    "{}: {}",
                    url,
                    resp.status()
                ))));
            }
            let resp = resp
                .error_for_status()
                .map_err(|e| backoff::Error::permanent(IndexerError::Transport(e)))?;

            resp.bytes()
                .await
                .map_err(|e| backoff::Error::transient(IndexerError::Transport(e)))
        })
        .await?;

        serde_json::from_slice(&body).map_err(|e| IndexerError::Malformed(e.to_string()))
    }

    /// Make a JSON-RPC call against the node.
    ///
    /// An explicit error object maps to [`IndexerError::Node`]; a null
    /// result maps to [`IndexerError::NotFound`].
    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, IndexerError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        let response: Value = retry(Self::retry_policy(), || async {
            let resp = self
                .client
                .post(&self.node_url)
                .json(&request)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(IndexerError::Transport(e)))?;
            resp.json::<Value>()
                .await
                .map_err(|e| backoff::Error::transient(IndexerError::Transport(e)))
        })
        .await?;

        if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown node error")
                .to_string();
            return Err(IndexerError::Node { code, message });
        }

        match response.get("result") {
            Some(Value::Null) | None => Err(IndexerError::NotFound(format!("{} result", method))),
            Some(result) => Ok(result.clone()),
        }
    }
}

/// One page of the address txid listing.
#[derive(Debug, Deserialize)]
struct AddressTxidsPage {
    #[serde(
        rename = "txids",
        default,
        deserialize_with = "types::deserialize_hex_b256_vec"
    )]
    txids: Vec<B256>,
}

#[derive(Debug, Deserialize)]
struct BroadcastResult {
    result: String,
}

#[async_trait]
impl Indexer for HttpIndexer {
    async fn block_by_hash(&self, hash: B256) -> Result<Block, IndexerError> {
        self.get_json(format!("{}/api/v2/block/{:#x}", self.indexer_url, hash))
            .await
    }

    async fn block_by_height(&self, height: u64) -> Result<Block, IndexerError> {
        self.get_json(format!("{}/api/v2/block/{}", self.indexer_url, height))
            .await
    }

    async fn transaction(&self, txid: B256) -> Result<RawTransaction, IndexerError> {
        self.get_json(format!("{}/api/v2/tx/{:#x}", self.indexer_url, txid))
            .await
    }

    async fn address_txids(
        &self,
        address: Address,
        page: u32,
        page_size: u32,
        from_height: u64,
        to_height: Option<u64>,
    ) -> Result<Vec<B256>, IndexerError> {
        let mut url = format!(
            "{}/api/v2/address/{:#x}?details=txids&page={}&pageSize={}&from={}",
            self.indexer_url, address, page, page_size, from_height
        );
        if let Some(to) = to_height {
            url.push_str(&format!("&to={}", to));
        }
        debug!(%address, page, "fetching address txid page");
        let page: AddressTxidsPage = self.get_json(url).await?;
        Ok(page.txids)
    }

    async fn internal_txids(
        &self,
        address: Address,
        from_height: u64,
        to_height: Option<u64>,
    ) -> Result<Vec<B256>, IndexerError> {
        let mut url = format!(
            "{}/api/v2/address/{:#x}?details=txids&internals=true&from={}",
            self.indexer_url, address, from_height
        );
        if let Some(to) = to_height {
            url.push_str(&format!("&to={}", to));
        }
        let page: AddressTxidsPage = self.get_json(url).await?;
        Ok(page.txids)
    }

    async fn call_trace(&self, txid: B256) -> Result<CallTrace, IndexerError> {
        let params = json!([format!("{:#x}", txid), { "tracer": "callTracer" }]);
        let result = self.rpc_call("debug_traceTransaction", params).await?;
        serde_json::from_value(result).map_err(|e| IndexerError::Malformed(e.to_string()))
    }

    async fn chain_info(&self) -> Result<ChainInfo, IndexerError> {
        self.get_json(format!("{}/api/v2", self.indexer_url)).await
    }

    async fn broadcast(&self, raw_tx: &[u8]) -> Result<B256, IndexerError> {
        let url = format!(
            "{}/api/v2/sendtx/0x{}",
            self.indexer_url,
            hex::encode(raw_tx)
        );
        let result: BroadcastResult = self.get_json(url).await?;
        types::parse_b256(&result.result).map_err(IndexerError::Malformed)
    }
}

/// Selector of `decimals()`.
const DECIMALS_SELECTOR: &str = "0x313ce567";
/// Selector of `name()`.
const NAME_SELECTOR: &str = "0x06fdde03";
/// Selector of `symbol()`.
const SYMBOL_SELECTOR: &str = "0x95d89b41";

impl HttpIndexer {
    /// `eth_call` against a contract, returning the raw return data.
    async fn eth_call(&self, contract: Address, data: &str) -> Result<Vec<u8>, IndexerError> {
        let params = json!([{ "to": format!("{:#x}", contract), "data": data }, "latest"]);
        let result = self.rpc_call("eth_call", params).await?;
        let hex_str = result
            .as_str()
            .ok_or_else(|| IndexerError::Malformed("eth_call result is not a string".into()))?;
        let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        hex::decode(hex_str).map_err(|e| IndexerError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl TokenMetadataSource for HttpIndexer {
    /// Fetch decimals, name, and symbol from the token contract.
    async fn token_metadata(&self, contract: Address) -> Result<TokenInfo, IndexerError> {
        let decimals_raw = self.eth_call(contract, DECIMALS_SELECTOR).await?;
        let decimals = abi::word_u256(&decimals_raw, 0)
            .and_then(|v| u8::try_from(v).ok())
            .ok_or_else(|| IndexerError::Malformed(format!("bad decimals for {contract}")))?;

        let name_raw = self.eth_call(contract, NAME_SELECTOR).await?;
        let name = abi::word_string(&name_raw, 0).unwrap_or_default();

        let symbol_raw = self.eth_call(contract, SYMBOL_SELECTOR).await?;
        let symbol = abi::word_string(&symbol_raw, 0).unwrap_or_default();

        Ok(TokenInfo {
            contract,
            decimals,
            name,
            symbol,
        })
    }
}

/// HTTP client for the external settlement-ledger service resolving
/// cross-chain swap amounts.
pub struct HttpSettlementLedger {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSettlementLedger {
    pub fn new(base_url: String) -> Result<Self, IndexerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, base_url })
    }
}

#[derive(Debug, Deserialize)]
struct ActionsResponse {
    #[serde(default)]
    actions: Vec<ActionEntry>,
}

#[derive(Debug, Deserialize)]
struct ActionEntry {
    #[serde(rename = "in", default)]
    inbound: Vec<ActionLeg>,
    #[serde(default)]
    metadata: Option<ActionMetadata>,
}

#[derive(Debug, Deserialize)]
struct ActionLeg {
    #[serde(default)]
    coins: Vec<ActionCoin>,
}

#[derive(Debug, Deserialize)]
struct ActionCoin {
    asset: String,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct ActionMetadata {
    #[serde(default)]
    swap: Option<SwapMetadata>,
}

#[derive(Debug, Deserialize)]
struct SwapMetadata {
    #[serde(rename = "liquidityFee", default)]
    liquidity_fee: Option<String>,
    #[serde(rename = "networkFees", default)]
    network_fees: Vec<ActionCoin>,
}

fn parse_amount(amount: &str) -> Result<U256, IndexerError> {
    amount
        .parse()
        .map_err(|_| IndexerError::Malformed(format!("bad ledger amount {amount}")))
}

#[async_trait]
impl SettlementLedger for HttpSettlementLedger {
    async fn action(&self, txid: B256) -> Result<SettlementAction, IndexerError> {
        let url = format!("{}/v2/actions?txid={:x}&limit=1", self.base_url, txid);
        let response = self.client.get(&url).send().await?;
        let body: ActionsResponse = response.error_for_status()?.json().await?;

        let entry = body
            .actions
            .into_iter()
            .next()
            .ok_or_else(|| IndexerError::NotFound(format!("settlement action {txid}")))?;

        let sell = entry
            .inbound
            .first()
            .and_then(|leg| leg.coins.first())
            .ok_or_else(|| IndexerError::Malformed(format!("action {txid} has no inbound coin")))?;

        let swap = entry.metadata.as_ref().and_then(|m| m.swap.as_ref());
        let (fee_asset, fee_amount) = match swap.and_then(|s| s.network_fees.first()) {
            Some(fee) => (fee.asset.clone(), parse_amount(&fee.amount)?),
            None => (sell.asset.clone(), U256::ZERO),
        };
        let liquidity_fee = match swap.and_then(|s| s.liquidity_fee.as_deref()) {
            Some(amount) => Some(parse_amount(amount)?),
            None => None,
        };

        Ok(SettlementAction {
            sell_asset: sell.asset.clone(),
            sell_amount: parse_amount(&sell.amount)?,
            fee_asset,
            fee_amount,
            liquidity_fee,
        })
    }
}
