//! Indexer and node wire types
//!
//! Type definitions for blocks, raw transactions, token transfer
//! sub-records, and call traces as returned by the indexer / node RPC.
//! Hash and amount fields arrive as hex strings and are parsed into
//! alloy types.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Deserializer};

/// Block as returned by the indexer.
#[derive(Debug, Clone, Deserialize)]
pub struct Block {
    /// Block hash (hex string in JSON)
    #[serde(rename = "hash", deserialize_with = "deserialize_hex_b256")]
    pub hash: B256,

    /// Block height
    #[serde(rename = "height")]
    pub height: u64,

    /// Parent block hash (hex string in JSON)
    #[serde(rename = "previousBlockHash", deserialize_with = "deserialize_hex_b256")]
    pub parent_hash: B256,

    /// Next block hash, absent at the tip
    #[serde(
        rename = "nextBlockHash",
        default,
        deserialize_with = "deserialize_hex_b256_opt"
    )]
    pub next_hash: Option<B256>,

    /// Block timestamp (Unix epoch seconds)
    #[serde(rename = "time", default)]
    pub timestamp: u64,

    /// Transaction ids contained in the block
    #[serde(rename = "txids", default, deserialize_with = "deserialize_hex_b256_vec")]
    pub txids: Vec<B256>,
}

/// Raw transaction as returned by the indexer, including any
/// token-transfer sub-records it annotated.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTransaction {
    /// Transaction id (hex string in JSON)
    #[serde(rename = "txid", deserialize_with = "deserialize_hex_b256")]
    pub txid: B256,

    /// Hash of the containing block, absent for mempool transactions
    #[serde(
        rename = "blockHash",
        default,
        deserialize_with = "deserialize_hex_b256_opt"
    )]
    pub block_hash: Option<B256>,

    /// Height of the containing block, absent for mempool transactions
    #[serde(rename = "blockHeight", default)]
    pub block_height: Option<u64>,

    /// Block timestamp (Unix epoch seconds)
    #[serde(rename = "blockTime", default)]
    pub block_time: u64,

    /// Confirmation count; zero for unconfirmed transactions
    #[serde(rename = "confirmations", default)]
    pub confirmations: u64,

    /// Sender address (hex string in JSON)
    #[serde(rename = "from", deserialize_with = "deserialize_hex_address")]
    pub from: Address,

    /// Recipient address (None for contract creation)
    #[serde(
        rename = "to",
        default,
        deserialize_with = "deserialize_hex_address_opt"
    )]
    pub to: Option<Address>,

    /// Value transferred in wei (hex string in JSON)
    #[serde(rename = "value", deserialize_with = "deserialize_hex_u256")]
    pub value: U256,

    /// Contract call payload, empty for plain transfers
    #[serde(rename = "input", default, deserialize_with = "deserialize_hex_bytes")]
    pub input: Vec<u8>,

    /// Execution status: 1 = success, 0 = failure
    #[serde(rename = "status", default = "default_status")]
    pub status: u64,

    /// Gas price (legacy transactions, hex string in JSON)
    #[serde(
        rename = "gasPrice",
        default,
        deserialize_with = "deserialize_hex_u256_opt"
    )]
    pub gas_price: Option<U256>,

    /// Max fee per gas (EIP-1559, hex string in JSON)
    #[serde(
        rename = "maxFeePerGas",
        default,
        deserialize_with = "deserialize_hex_u256_opt"
    )]
    pub max_fee_per_gas: Option<U256>,

    /// Max priority fee per gas (EIP-1559, hex string in JSON)
    #[serde(
        rename = "maxPriorityFeePerGas",
        default,
        deserialize_with = "deserialize_hex_u256_opt"
    )]
    pub max_priority_fee_per_gas: Option<U256>,

    /// Base fee of the containing block (EIP-1559, hex string in JSON)
    #[serde(
        rename = "baseFeePerGas",
        default,
        deserialize_with = "deserialize_hex_u256_opt"
    )]
    pub base_fee_per_gas: Option<U256>,

    /// Gas consumed by the transaction (hex string in JSON)
    #[serde(
        rename = "gasUsed",
        default,
        deserialize_with = "deserialize_hex_u256_opt"
    )]
    pub gas_used: Option<U256>,

    /// Token transfer sub-records extracted by the indexer
    #[serde(rename = "tokenTransfers", default)]
    pub token_transfers: Vec<TokenTransfer>,
}

fn default_status() -> u64 {
    1
}

impl RawTransaction {
    /// Check if this is a legacy transaction (has gasPrice, no maxFeePerGas).
    pub fn is_legacy(&self) -> bool {
        self.gas_price.is_some() && self.max_fee_per_gas.is_none()
    }

    /// Check if this is an EIP-1559 transaction (has maxFeePerGas).
    pub fn is_eip1559(&self) -> bool {
        self.max_fee_per_gas.is_some()
    }

    /// Check if the transaction executed successfully.
    pub fn is_success(&self) -> bool {
        self.status == 1
    }

    /// Check if this transaction calls a contract (non-empty payload).
    pub fn is_contract_call(&self) -> bool {
        !self.input.is_empty()
    }
}

/// Token transfer sub-record annotated by the indexer.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenTransfer {
    /// Token contract address (hex string in JSON)
    #[serde(rename = "contract", deserialize_with = "deserialize_hex_address")]
    pub contract: Address,

    /// Sender of the token transfer
    #[serde(rename = "from", deserialize_with = "deserialize_hex_address")]
    pub from: Address,

    /// Receiver of the token transfer
    #[serde(rename = "to", deserialize_with = "deserialize_hex_address")]
    pub to: Address,

    /// Transferred amount in base units (hex string in JSON)
    #[serde(rename = "value", deserialize_with = "deserialize_hex_u256")]
    pub value: U256,

    /// Token decimals
    #[serde(rename = "decimals", default)]
    pub decimals: u8,

    /// Token name
    #[serde(rename = "name", default)]
    pub name: String,

    /// Token symbol
    #[serde(rename = "symbol", default)]
    pub symbol: String,
}

/// Indexer / backend height summary.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainInfo {
    /// Best height known to the indexer, absent while it is catching up
    #[serde(rename = "bestHeight", default)]
    pub best_height: Option<u64>,

    /// Height reported by the backing node
    #[serde(rename = "backendHeight", default)]
    pub backend_height: Option<u64>,
}

/// Call trace node produced by `debug_traceTransaction` with `callTracer`.
///
/// Kept intentionally liberal (many optional fields) so it can handle
/// slightly different implementations across clients. For internal
/// transfer extraction we only care about:
/// - `type`  (CALL / CALLCODE / STATICCALL / DELEGATECALL / SELFDESTRUCT / ...)
/// - `from`  (sender address)
/// - `to`    (receiver address, may be None for CREATE)
/// - `value` (amount of wei transferred)
/// - `calls` (nested children)
#[derive(Debug, Clone, Deserialize)]
pub struct CallTrace {
    /// Call type: CALL / STATICCALL / DELEGATECALL / CALLCODE / SELFDESTRUCT / ...
    #[serde(rename = "type")]
    pub r#type: Option<String>,

    /// Sender address (hex string in JSON, may be omitted in some edge cases).
    #[serde(default, deserialize_with = "deserialize_hex_address_opt")]
    pub from: Option<Address>,

    /// Recipient address (hex string in JSON, None for CREATE-like nodes).
    #[serde(default, deserialize_with = "deserialize_hex_address_opt")]
    pub to: Option<Address>,

    /// Value transferred in wei (hex string in JSON).
    ///
    /// Missing or empty values are treated as zero for robustness.
    #[serde(default, deserialize_with = "deserialize_hex_u256_trace")]
    pub value: U256,

    /// Nested child calls.
    #[serde(default)]
    pub calls: Option<Vec<CallTrace>>,

    /// Optional error / revert reason field used by some clients.
    #[serde(default)]
    pub error: Option<String>,
}

// Hex deserialization helpers

/// Pad an odd-length hex string with a leading zero.
/// This handles cases where the backend returns hex strings without leading zeros.
fn pad_hex_string(s: &str) -> String {
    if s.is_empty() {
        return s.to_string();
    }
    if s.len() % 2 == 1 {
        format!("0{}", s)
    } else {
        s.to_string()
    }
}

/// Deserialize a hex string to U256.
fn deserialize_hex_u256<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let s = s.strip_prefix("0x").unwrap_or(&s);
    if s.is_empty() {
        return Ok(U256::ZERO);
    }
    let s = pad_hex_string(s);
    let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
    Ok(U256::from_be_slice(&bytes))
}

/// Deserialize an optional hex string to U256.
fn deserialize_hex_u256_opt<'de, D>(deserializer: D) -> Result<Option<U256>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    match s {
        Some(s) => {
            let s = s.strip_prefix("0x").unwrap_or(&s);
            if s.is_empty() {
                Ok(Some(U256::ZERO))
            } else {
                let s = pad_hex_string(s);
                let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
                Ok(Some(U256::from_be_slice(&bytes)))
            }
        }
        None => Ok(None),
    }
}

/// Deserialize a hex string to B256.
fn deserialize_hex_b256<'de, D>(deserializer: D) -> Result<B256, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_b256(&s).map_err(serde::de::Error::custom)
}

/// Deserialize an optional hex string to B256.
fn deserialize_hex_b256_opt<'de, D>(deserializer: D) -> Result<Option<B256>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    match s {
        Some(s) if !s.is_empty() => parse_b256(&s).map(Some).map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

/// Deserialize a list of hex strings to B256 values.
pub(crate) fn deserialize_hex_b256_vec<'de, D>(deserializer: D) -> Result<Vec<B256>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = Vec::<String>::deserialize(deserializer)?;
    items
        .iter()
        .map(|s| parse_b256(s).map_err(serde::de::Error::custom))
        .collect()
}

pub(crate) fn parse_b256(s: &str) -> Result<B256, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let s = pad_hex_string(s);
    let bytes = hex::decode(&s).map_err(|e| e.to_string())?;
    if bytes.len() != 32 {
        return Err(format!("Expected 32 bytes for hash, got {}", bytes.len()));
    }
    Ok(B256::from_slice(&bytes))
}

/// Deserialize a hex string to Address.
fn deserialize_hex_address<'de, D>(deserializer: D) -> Result<Address, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_hex_address(&s).map_err(serde::de::Error::custom)
}

/// Deserialize an optional hex string to Address.
fn deserialize_hex_address_opt<'de, D>(deserializer: D) -> Result<Option<Address>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    match s {
        Some(s) if !s.is_empty() => parse_hex_address(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

/// Parse an address from a hex string, with or without 0x prefix.
pub fn parse_hex_address(s: &str) -> Result<Address, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let s = pad_hex_string(s);
    let bytes = hex::decode(&s).map_err(|e| e.to_string())?;
    if bytes.len() != 20 {
        return Err(format!("Expected 20 bytes for address, got {}", bytes.len()));
    }
    Ok(Address::from_slice(&bytes))
}

/// Deserialize a hex string to bytes.
fn deserialize_hex_bytes<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let s = s.strip_prefix("0x").unwrap_or(&s);
    if s.is_empty() {
        Ok(Vec::new())
    } else {
        let s = pad_hex_string(s);
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Deserialize a hex string (or null / missing) to U256 for trace values.
///
/// This variant is a bit more forgiving than `deserialize_hex_u256`:
/// - null / missing ⇒ 0
/// - empty string  ⇒ 0
fn deserialize_hex_u256_trace<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    match s {
        Some(s) => {
            let s = s.strip_prefix("0x").unwrap_or(&s);
            if s.is_empty() {
                Ok(U256::ZERO)
            } else {
                let s = pad_hex_string(s);
                let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
                Ok(U256::from_be_slice(&bytes))
            }
        }
        None => Ok(U256::ZERO),
    }
}
