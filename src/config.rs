//! Configuration and registration loading
//!
//! Handles the ingester's tunables and loading of the registrations
//! file. A missing or invalid required setting is fatal at startup,
//! before any message is consumed.

use crate::registry::RegistrationDocument;
use crate::types::parse_hex_address;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Runtime tunables for the ingestion pipeline.
///
/// The reorg depth cap and the sync-lock TTL were hard-coded per chain
/// in older designs with no documented derivation; both are plain
/// configuration here.
#[derive(Debug, Clone)]
pub struct IngesterConfig {
    /// Indexer REST base URL
    pub indexer_url: String,
    /// Node JSON-RPC URL (traces, token metadata)
    pub node_url: String,
    /// Settlement-ledger base URL (cross-chain swap amounts)
    pub settlement_url: String,
    /// Sync lock time-to-live
    pub lock_ttl: Duration,
    /// Maximum reorg walk depth before failing loudly
    pub max_reorg_depth: usize,
    /// Page size for address history pagination
    pub page_size: u32,
    /// Concurrently in-flight history pages per batch
    pub batch_size: usize,
    /// Per-worker prefetch (handler concurrency) limit
    pub prefetch: usize,
    /// Delay before a retry or requeue republish
    pub retry_delay: Duration,
    /// Block feed poll interval
    pub poll_interval: Duration,
}

impl IngesterConfig {
    /// Validate settings that have no usable fallback.
    pub fn validate(&self) -> Result<()> {
        if self.indexer_url.is_empty() {
            anyhow::bail!("indexer URL must not be empty");
        }
        if self.node_url.is_empty() {
            anyhow::bail!("node URL must not be empty");
        }
        if self.page_size == 0 {
            anyhow::bail!("page size must be at least 1");
        }
        if self.max_reorg_depth == 0 {
            anyhow::bail!("max reorg depth must be at least 1");
        }
        Ok(())
    }
}

/// One entry of the registrations file.
#[derive(Debug, Deserialize)]
struct RegistrationEntry {
    #[serde(rename = "clientId")]
    client_id: String,
    #[serde(default)]
    addresses: Vec<String>,
    #[serde(default)]
    xpub: Option<String>,
}

/// Load client registrations from a JSON file.
///
/// The file holds an array of `{ "clientId": ..., "addresses": [...] }`
/// entries; addresses accept hex with or without the 0x prefix.
pub fn load_registrations(path: &Path) -> Result<Vec<RegistrationDocument>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read registrations file: {:?}", path))?;

    let entries: Vec<RegistrationEntry> =
        serde_json::from_str(&contents).context("Failed to parse registrations file")?;

    let mut documents = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.client_id.is_empty() {
            anyhow::bail!("registration entry with empty clientId");
        }
        if entry.addresses.is_empty() {
            anyhow::bail!("registration {} watches no addresses", entry.client_id);
        }

        let mut addresses = Vec::with_capacity(entry.addresses.len());
        for raw in &entry.addresses {
            let address = parse_hex_address(raw).map_err(|e| {
                anyhow::anyhow!("Invalid address {} for {}: {}", raw, entry.client_id, e)
            })?;
            addresses.push(address);
        }

        let mut doc = RegistrationDocument::new(entry.client_id, &addresses);
        doc.xpub = entry.xpub;
        documents.push(doc);
    }

    if documents.is_empty() {
        anyhow::bail!("Registrations file is empty (no clients to watch)");
    }

    Ok(documents)
}
