//! Registration documents and the registry store contract
//!
//! A registration ties a tenant (`client_id`) to the set of addresses it
//! watches, along with per-address sync progress and the in-flight sync
//! lock. The registry store is the single source of truth for sync
//! progress; callers read-then-write without a cross-operation
//! transaction and rely on the lock TTL as the safety net.

use crate::error::StoreError;
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current time as Unix epoch seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Time-boxed marker preventing redundant concurrent backfill of one address.
///
/// `key` identifies the in-flight sync target (`{toHeight}:{txid}`).
/// At most one unexpired lock exists per (address, client); an expired
/// lock may be preempted by any worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLock {
    /// Identity of the in-flight sync target
    pub key: String,
    /// Acquisition time (Unix epoch seconds)
    pub started_at: u64,
}

impl SyncLock {
    /// Check whether the lock has outlived its TTL at time `now`.
    pub fn is_expired(&self, ttl: Duration, now: u64) -> bool {
        now.saturating_sub(self.started_at) >= ttl.as_secs()
    }

    /// Check whether this lock blocks an attempt with `key`.
    ///
    /// A lock only blocks a *different* sync target within its TTL:
    /// redelivery of the same target may proceed (idempotent), and an
    /// expired lock never blocks (liveness over strict exclusivity).
    pub fn blocks(&self, key: &str, ttl: Duration, now: u64) -> bool {
        self.key != key && !self.is_expired(ttl, now)
    }
}

/// Per-address sync progress held under a registration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSyncMeta {
    /// Height through which history has been backfilled
    #[serde(rename = "lastSyncedHeight", default)]
    pub last_synced_height: Option<u64>,

    /// In-flight sync lock, if any
    #[serde(rename = "syncLock", default)]
    pub sync_lock: Option<SyncLock>,
}

/// A tenant's registration: watched identities plus per-address sync state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationDocument {
    /// Tenant identifier; also names the result exchange
    #[serde(rename = "clientId")]
    pub client_id: String,

    /// Hierarchical public key the watched addresses were derived from,
    /// if the tenant registered one. Carried for the control plane; the
    /// ingester operates on the derived addresses in `ingester_meta`.
    #[serde(rename = "xpub", default)]
    pub xpub: Option<String>,

    /// Watched address → sync progress
    #[serde(rename = "ingesterMeta", default)]
    pub ingester_meta: HashMap<Address, AddressSyncMeta>,
}

impl RegistrationDocument {
    /// Create a registration watching the given plain addresses.
    pub fn new(client_id: impl Into<String>, addresses: &[Address]) -> Self {
        Self {
            client_id: client_id.into(),
            xpub: None,
            ingester_meta: addresses
                .iter()
                .map(|a| (*a, AddressSyncMeta::default()))
                .collect(),
        }
    }

    /// Sync metadata for an address, defaulting to never-synced.
    pub fn meta_for(&self, address: Address) -> AddressSyncMeta {
        self.ingester_meta.get(&address).cloned().unwrap_or_default()
    }

    /// Whether this registration watches the address.
    pub fn watches(&self, address: Address) -> bool {
        self.ingester_meta.contains_key(&address)
    }
}

/// Narrow read/update contract over the registration document store.
pub trait RegistryStore: Send + Sync {
    /// All registration documents watching `address`.
    fn get_by_address(&self, address: Address) -> Result<Vec<RegistrationDocument>, StoreError>;

    /// Set (`Some(key)`, stamped with the current time) or clear (`None`)
    /// the sync lock for (address, client).
    fn update_syncing(
        &self,
        address: Address,
        client_id: &str,
        key: Option<String>,
    ) -> Result<(), StoreError>;

    /// Record the height through which (address, client) has been synced.
    fn update_block(&self, address: Address, client_id: &str, height: u64)
        -> Result<(), StoreError>;

    /// Create or replace a registration document.
    fn upsert(&self, doc: &RegistrationDocument) -> Result<(), StoreError>;

    /// Remove a registration on unregistration.
    fn remove(&self, client_id: &str) -> Result<(), StoreError>;
}

/// In-memory registry store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryRegistryStore {
    docs: Mutex<HashMap<String, RegistrationDocument>>,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegistryStore for MemoryRegistryStore {
    fn get_by_address(&self, address: Address) -> Result<Vec<RegistrationDocument>, StoreError> {
        let docs = self.docs.lock().expect("registry lock poisoned");
        let mut matches: Vec<RegistrationDocument> = docs
            .values()
            .filter(|d| d.watches(address))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        Ok(matches)
    }

    fn update_syncing(
        &self,
        address: Address,
        client_id: &str,
        key: Option<String>,
    ) -> Result<(), StoreError> {
        let mut docs = self.docs.lock().expect("registry lock poisoned");
        let doc = docs
            .get_mut(client_id)
            .ok_or_else(|| StoreError::Backend(format!("no registration for {}", client_id)))?;
        let meta = doc.ingester_meta.entry(address).or_default();
        meta.sync_lock = key.map(|key| SyncLock {
            key,
            started_at: unix_now(),
        });
        Ok(())
    }

    fn update_block(
        &self,
        address: Address,
        client_id: &str,
        height: u64,
    ) -> Result<(), StoreError> {
        let mut docs = self.docs.lock().expect("registry lock poisoned");
        let doc = docs
            .get_mut(client_id)
            .ok_or_else(|| StoreError::Backend(format!("no registration for {}", client_id)))?;
        let meta = doc.ingester_meta.entry(address).or_default();
        meta.last_synced_height = Some(height);
        Ok(())
    }

    fn upsert(&self, doc: &RegistrationDocument) -> Result<(), StoreError> {
        let mut docs = self.docs.lock().expect("registry lock poisoned");
        docs.insert(doc.client_id.clone(), doc.clone());
        Ok(())
    }

    fn remove(&self, client_id: &str) -> Result<(), StoreError> {
        let mut docs = self.docs.lock().expect("registry lock poisoned");
        docs.remove(client_id);
        Ok(())
    }
}
