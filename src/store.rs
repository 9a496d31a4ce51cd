//! Block store trait and RocksDB implementation
//!
//! Persists the confirmed block chain (for reorg resolution) and the
//! registration documents (for the sync coordinator). Blocks are never
//! deleted, only flagged orphaned for audit. Uses RocksDB with column
//! families and postcard record serialization.

use crate::error::StoreError;
use crate::keys::{
    decode_address_index_client, encode_address_index_key, encode_address_index_prefix,
    encode_block_index_key, encode_block_key, encode_meta_key, encode_registration_key,
    META_TIP_HEIGHT,
};
use crate::registry::{unix_now, RegistrationDocument, RegistryStore, SyncLock};
use alloy_primitives::{Address, B256};
use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Persisted block, the unit the reorg resolver works over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Block hash
    pub hash: B256,
    /// Block height
    pub height: u64,
    /// Parent block hash
    pub parent_hash: B256,
    /// Hash of the following canonical block, if persisted
    pub next_hash: Option<B256>,
    /// Set when the block was replaced by a competing chain
    pub orphaned: bool,
}

impl BlockRecord {
    /// Record for a newly confirmed block.
    pub fn confirmed(hash: B256, height: u64, parent_hash: B256) -> Self {
        Self {
            hash,
            height,
            parent_hash,
            next_hash: None,
            orphaned: false,
        }
    }
}

/// Persistence contract for the confirmed chain.
pub trait BlockStore: Send + Sync {
    /// The highest persisted non-orphaned block, if any.
    fn tip(&self) -> Result<Option<BlockRecord>, StoreError>;

    /// The canonical (non-orphaned) block at a height, if any.
    fn block_at_height(&self, height: u64) -> Result<Option<BlockRecord>, StoreError>;

    /// A block by hash, orphaned or not.
    fn block_by_hash(&self, hash: B256) -> Result<Option<BlockRecord>, StoreError>;

    /// Persist a confirmed block and advance the tip to it.
    ///
    /// Links the parent's `next_hash` when the parent is the canonical
    /// block below.
    fn put_block(&self, block: &BlockRecord) -> Result<(), StoreError>;

    /// Flag a block orphaned. Idempotent; the record is kept for audit.
    fn mark_orphaned(&self, hash: B256) -> Result<(), StoreError>;
}

/// RocksDB-backed implementation of [`BlockStore`] and [`RegistryStore`].
///
/// Column families:
/// - blocks: canonical block per height
/// - block_index: every block ever persisted, by hash
/// - registrations: registration document per client id
/// - address_index: (address, client id) membership index
/// - meta: metadata (tip height)
pub struct RocksFeedStore {
    db: DB,
}

impl RocksFeedStore {
    /// Open or create a RocksDB database at the given path.
    ///
    /// Creates all required column families if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let column_families = vec![
            ColumnFamilyDescriptor::new("blocks", Options::default()),
            ColumnFamilyDescriptor::new("block_index", Options::default()),
            ColumnFamilyDescriptor::new("registrations", Options::default()),
            ColumnFamilyDescriptor::new("address_index", Options::default()),
            ColumnFamilyDescriptor::new("meta", Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, column_families)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("column family '{}' not found", name)))
    }

    fn get_record<T: for<'de> Deserialize<'de>>(
        &self,
        cf_name: &str,
        key: &[u8],
    ) -> Result<Option<T>, StoreError> {
        let cf = self.cf(cf_name)?;
        match self
            .db
            .get_cf(cf, key)
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(bytes) => {
                let record = postcard::from_bytes(&bytes)
                    .map_err(|e| StoreError::Corrupt(hex::encode(key), e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn put_record<T: Serialize>(
        &self,
        cf_name: &str,
        key: &[u8],
        record: &T,
    ) -> Result<(), StoreError> {
        let cf = self.cf(cf_name)?;
        let value =
            postcard::to_allocvec(record).map_err(|e| StoreError::Backend(e.to_string()))?;
        self.db
            .put_cf(cf, key, &value)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn tip_height(&self) -> Result<Option<u64>, StoreError> {
        let cf = self.cf("meta")?;
        match self
            .db
            .get_cf(cf, encode_meta_key(META_TIP_HEIGHT))
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StoreError::Corrupt("meta:tip".into(), "bad length".into()))?;
                Ok(Some(u64::from_be_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    fn set_tip_height(&self, height: u64) -> Result<(), StoreError> {
        let cf = self.cf("meta")?;
        self.db
            .put_cf(cf, encode_meta_key(META_TIP_HEIGHT), height.to_be_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn get_registration(&self, client_id: &str) -> Result<Option<RegistrationDocument>, StoreError> {
        self.get_record("registrations", &encode_registration_key(client_id))
    }

    fn put_registration(&self, doc: &RegistrationDocument) -> Result<(), StoreError> {
        self.put_record("registrations", &encode_registration_key(&doc.client_id), doc)
    }
}

impl BlockStore for RocksFeedStore {
    fn tip(&self) -> Result<Option<BlockRecord>, StoreError> {
        let Some(mut height) = self.tip_height()? else {
            return Ok(None);
        };
        // Walk down past orphaned records left by an interrupted reorg cycle.
        loop {
            match self.get_record::<BlockRecord>("blocks", &encode_block_key(height))? {
                Some(record) if !record.orphaned => return Ok(Some(record)),
                _ if height == 0 => return Ok(None),
                _ => height -= 1,
            }
        }
    }

    fn block_at_height(&self, height: u64) -> Result<Option<BlockRecord>, StoreError> {
        let record: Option<BlockRecord> = self.get_record("blocks", &encode_block_key(height))?;
        Ok(record.filter(|r| !r.orphaned))
    }

    fn block_by_hash(&self, hash: B256) -> Result<Option<BlockRecord>, StoreError> {
        self.get_record("block_index", &encode_block_index_key(hash))
    }

    fn put_block(&self, block: &BlockRecord) -> Result<(), StoreError> {
        // Link the canonical parent forward before writing the new block.
        if let Some(prev_height) = block.height.checked_sub(1) {
            if let Some(mut parent) = self.block_at_height(prev_height)? {
                if parent.hash == block.parent_hash && parent.next_hash != Some(block.hash) {
                    parent.next_hash = Some(block.hash);
                    self.put_record("blocks", &encode_block_key(parent.height), &parent)?;
                    self.put_record("block_index", &encode_block_index_key(parent.hash), &parent)?;
                }
            }
        }

        self.put_record("blocks", &encode_block_key(block.height), block)?;
        self.put_record("block_index", &encode_block_index_key(block.hash), block)?;

        // The tip marker only moves up; `tip()` walks down past orphans,
        // so re-persisting an old height must not regress it.
        let tip = self.tip_height()?.unwrap_or(0).max(block.height);
        self.set_tip_height(tip)
    }

    fn mark_orphaned(&self, hash: B256) -> Result<(), StoreError> {
        let Some(mut record) = self.block_by_hash(hash)? else {
            return Ok(());
        };
        if record.orphaned {
            return Ok(());
        }
        record.orphaned = true;
        self.put_record("block_index", &encode_block_index_key(hash), &record)?;

        // Flag the height-keyed copy too, if it is still this block.
        let key = encode_block_key(record.height);
        if let Some(by_height) = self.get_record::<BlockRecord>("blocks", &key)? {
            if by_height.hash == hash {
                self.put_record("blocks", &key, &record)?;
            }
        }
        Ok(())
    }
}

impl RegistryStore for RocksFeedStore {
    fn get_by_address(&self, address: Address) -> Result<Vec<RegistrationDocument>, StoreError> {
        let cf = self.cf("address_index")?;
        let prefix = encode_address_index_prefix(address);
        let mut client_ids = Vec::new();
        for item in self.db.prefix_iterator_cf(cf, &prefix) {
            let (key, _) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            if let Some(client_id) = decode_address_index_client(&key) {
                client_ids.push(client_id.to_string());
            }
        }
        client_ids.sort();

        let mut docs = Vec::with_capacity(client_ids.len());
        for client_id in client_ids {
            if let Some(doc) = self.get_registration(&client_id)? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    fn update_syncing(
        &self,
        address: Address,
        client_id: &str,
        key: Option<String>,
    ) -> Result<(), StoreError> {
        let mut doc = self
            .get_registration(client_id)?
            .ok_or_else(|| StoreError::Backend(format!("no registration for {}", client_id)))?;
        let meta = doc.ingester_meta.entry(address).or_default();
        meta.sync_lock = key.map(|key| SyncLock {
            key,
            started_at: unix_now(),
        });
        self.put_registration(&doc)
    }

    fn update_block(
        &self,
        address: Address,
        client_id: &str,
        height: u64,
    ) -> Result<(), StoreError> {
        let mut doc = self
            .get_registration(client_id)?
            .ok_or_else(|| StoreError::Backend(format!("no registration for {}", client_id)))?;
        let meta = doc.ingester_meta.entry(address).or_default();
        meta.last_synced_height = Some(height);
        self.put_registration(&doc)
    }

    fn upsert(&self, doc: &RegistrationDocument) -> Result<(), StoreError> {
        let cf = self.cf("address_index")?;

        // Drop index entries for addresses the new document no longer watches.
        if let Some(old) = self.get_registration(&doc.client_id)? {
            for address in old.ingester_meta.keys() {
                if !doc.ingester_meta.contains_key(address) {
                    self.db
                        .delete_cf(cf, encode_address_index_key(*address, &doc.client_id))
                        .map_err(|e| StoreError::Backend(e.to_string()))?;
                }
            }
        }

        for address in doc.ingester_meta.keys() {
            self.db
                .put_cf(cf, encode_address_index_key(*address, &doc.client_id), b"")
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        self.put_registration(doc)
    }

    fn remove(&self, client_id: &str) -> Result<(), StoreError> {
        let Some(doc) = self.get_registration(client_id)? else {
            return Ok(());
        };
        let cf = self.cf("address_index")?;
        for address in doc.ingester_meta.keys() {
            self.db
                .delete_cf(cf, encode_address_index_key(*address, client_id))
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        self.db
            .delete_cf(
                self.cf("registrations")?,
                encode_registration_key(client_id),
            )
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, B256};
    use tempfile::TempDir;

    fn hash(n: u8) -> B256 {
        let mut bytes = [0u8; 32];
        bytes[31] = n;
        B256::from(bytes)
    }

    fn open_store() -> (RocksFeedStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksFeedStore::open(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn test_block_chain_roundtrip() {
        let (store, _dir) = open_store();
        assert!(store.tip().unwrap().is_none());

        store
            .put_block(&BlockRecord::confirmed(hash(1), 1, hash(0)))
            .unwrap();
        store
            .put_block(&BlockRecord::confirmed(hash(2), 2, hash(1)))
            .unwrap();

        let tip = store.tip().unwrap().unwrap();
        assert_eq!(tip.height, 2);
        assert_eq!(tip.hash, hash(2));

        // Parent was linked forward.
        let parent = store.block_at_height(1).unwrap().unwrap();
        assert_eq!(parent.next_hash, Some(hash(2)));
        assert_eq!(store.block_by_hash(hash(1)).unwrap().unwrap().height, 1);
    }

    #[test]
    fn test_orphaned_block_is_kept_but_not_canonical() {
        let (store, _dir) = open_store();
        store
            .put_block(&BlockRecord::confirmed(hash(1), 1, hash(0)))
            .unwrap();
        store
            .put_block(&BlockRecord::confirmed(hash(2), 2, hash(1)))
            .unwrap();

        store.mark_orphaned(hash(2)).unwrap();
        assert!(store.block_at_height(2).unwrap().is_none());
        // Kept for audit, addressable by hash.
        let orphan = store.block_by_hash(hash(2)).unwrap().unwrap();
        assert!(orphan.orphaned);
        // Tip walks down past the orphan.
        assert_eq!(store.tip().unwrap().unwrap().height, 1);

        // Replacement block at the same height becomes canonical.
        store
            .put_block(&BlockRecord::confirmed(hash(22), 2, hash(1)))
            .unwrap();
        assert_eq!(store.block_at_height(2).unwrap().unwrap().hash, hash(22));
        assert!(store.block_by_hash(hash(2)).unwrap().unwrap().orphaned);
    }

    #[test]
    fn test_registry_on_rocks() {
        let (store, _dir) = open_store();
        let a = address!("0000000000000000000000000000000000000001");
        let b = address!("0000000000000000000000000000000000000002");

        store
            .upsert(&RegistrationDocument::new("client-a", &[a, b]))
            .unwrap();
        store
            .upsert(&RegistrationDocument::new("client-b", &[a]))
            .unwrap();

        let docs = store.get_by_address(a).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].client_id, "client-a");
        assert_eq!(docs[1].client_id, "client-b");
        assert_eq!(store.get_by_address(b).unwrap().len(), 1);

        store.update_block(a, "client-b", 7).unwrap();
        store
            .update_syncing(a, "client-b", Some("7:0xaa".to_string()))
            .unwrap();
        let doc = store
            .get_by_address(a)
            .unwrap()
            .into_iter()
            .find(|d| d.client_id == "client-b")
            .unwrap();
        assert_eq!(doc.meta_for(a).last_synced_height, Some(7));
        assert_eq!(doc.meta_for(a).sync_lock.unwrap().key, "7:0xaa");

        // Re-registering with fewer addresses drops the stale index entry.
        store
            .upsert(&RegistrationDocument::new("client-a", &[b]))
            .unwrap();
        assert_eq!(store.get_by_address(a).unwrap().len(), 1);

        store.remove("client-b").unwrap();
        assert!(store.get_by_address(a).unwrap().is_empty());
    }
}
