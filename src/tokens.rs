//! Token metadata lookup and cache
//!
//! In-memory cache to avoid repeated contract calls for token metadata.
//! Decimals, name, and symbol are immutable once deployed, so entries
//! are cached forever.

use crate::error::IndexerError;
use alloy_primitives::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Token contract metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Token contract address
    pub contract: Address,
    /// Token decimals
    pub decimals: u8,
    /// Token name
    pub name: String,
    /// Token symbol
    pub symbol: String,
}

/// On-demand token metadata lookup (a contract call behind the scenes).
#[async_trait]
pub trait TokenMetadataSource: Send + Sync {
    async fn token_metadata(&self, contract: Address) -> Result<TokenInfo, IndexerError>;
}

/// Caching front for a [`TokenMetadataSource`].
#[derive(Clone)]
pub struct TokenCache {
    source: Arc<dyn TokenMetadataSource>,
    cache: Arc<Mutex<HashMap<Address, TokenInfo>>>,
}

impl TokenCache {
    pub fn new(source: Arc<dyn TokenMetadataSource>) -> Self {
        Self {
            source,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Metadata for a token contract, fetched once and cached forever.
    pub async fn metadata(&self, contract: Address) -> Result<TokenInfo, IndexerError> {
        if let Some(info) = self.cache.lock().await.get(&contract) {
            return Ok(info.clone());
        }
        let info = self.source.token_metadata(contract).await?;
        self.cache.lock().await.insert(contract, info.clone());
        Ok(info)
    }
}
