//! Per-address sync coordination
//!
//! For a transaction affecting an address, decides which registrations
//! need historical backfill, enforces single-flight syncing per address
//! through the time-boxed registry lock, paginates the indexer's txid
//! listing in bounded concurrent batches, and fans out one sync message
//! per discovered transaction id.
//!
//! Locking is optimistic: the registry lock field is read then written
//! without a transaction, and the TTL is the safety net. A stuck lock
//! must never permanently block an address, so expiry always wins over
//! strict exclusivity.

use crate::broker::{encode, topics, AddressTxMessage, MessageBroker};
use crate::error::SyncError;
use crate::indexer::Indexer;
use crate::registry::{unix_now, AddressSyncMeta, RegistrationDocument, RegistryStore};
use crate::types::RawTransaction;
use alloy_primitives::{Address, B256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Coordinator tunables. The lock TTL and the reorg buffer were
/// hard-coded per chain in older designs; both are plain configuration
/// here.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Sync lock time-to-live
    pub lock_ttl: Duration,
    /// Page size for the indexer txid listing
    pub page_size: u32,
    /// Upper bound on concurrently in-flight listing pages
    pub batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(300),
            page_size: 100,
            batch_size: 5,
        }
    }
}

/// Outcome of a sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Backfill finished (or the address is not registered).
    Done,
    /// Another sync target holds the lock; redeliver the message later.
    Requeue,
}

/// The slice of a transaction the coordinator needs.
#[derive(Debug, Clone)]
pub struct TxSyncRequest {
    pub txid: B256,
    pub block_height: Option<u64>,
    pub confirmations: u64,
}

impl From<&RawTransaction> for TxSyncRequest {
    fn from(tx: &RawTransaction) -> Self {
        Self {
            txid: tx.txid,
            block_height: tx.block_height,
            confirmations: tx.confirmations,
        }
    }
}

/// Coordinates per-address history backfill.
pub struct SyncCoordinator {
    registry: Arc<dyn RegistryStore>,
    indexer: Arc<dyn Indexer>,
    broker: Arc<dyn MessageBroker>,
    config: SyncConfig,
}

impl SyncCoordinator {
    pub fn new(
        registry: Arc<dyn RegistryStore>,
        indexer: Arc<dyn Indexer>,
        broker: Arc<dyn MessageBroker>,
        config: SyncConfig,
    ) -> Self {
        Self {
            registry,
            indexer,
            broker,
            config,
        }
    }

    /// Backfill history for `address` if any registration watches it.
    ///
    /// Unconfirmed transactions sync to the tip (`to_height` unset);
    /// confirmed ones sync through their block. An unexpired lock held
    /// for a *different* sync target yields [`SyncOutcome::Requeue`]
    /// instead of blocking, preserving broker liveness. Any failure
    /// mid-sync leaves the lock to expire via its TTL and surfaces as a
    /// retryable error.
    pub async fn sync_if_registered(
        &self,
        request: &TxSyncRequest,
        address: Address,
    ) -> Result<SyncOutcome, SyncError> {
        let docs = self.registry.get_by_address(address)?;
        if docs.is_empty() {
            return Ok(SyncOutcome::Done);
        }

        let to_height = if request.confirmations == 0 {
            None
        } else {
            request.block_height
        };
        let sync_key = match to_height {
            Some(height) => format!("{}:{:#x}", height, request.txid),
            None => format!("tip:{:#x}", request.txid),
        };

        for doc in docs {
            let meta = doc.meta_for(address);
            if let Some(lock) = &meta.sync_lock {
                if lock.blocks(&sync_key, self.config.lock_ttl, unix_now()) {
                    debug!(
                        %address,
                        client_id = %doc.client_id,
                        held = %lock.key,
                        wanted = %sync_key,
                        "sync lock contended, requeueing"
                    );
                    return Ok(SyncOutcome::Requeue);
                }
            }
            self.sync_document(&doc, address, &meta, &sync_key, to_height)
                .await?;
        }

        Ok(SyncOutcome::Done)
    }

    async fn sync_document(
        &self,
        doc: &RegistrationDocument,
        address: Address,
        meta: &AddressSyncMeta,
        sync_key: &str,
        to_height: Option<u64>,
    ) -> Result<(), SyncError> {
        self.registry
            .update_syncing(address, &doc.client_id, Some(sync_key.to_string()))?;

        let from_height = meta.last_synced_height.map_or(0, |h| h + 1);
        let txids = self.list_txids(address, from_height, to_height).await?;

        info!(
            %address,
            client_id = %doc.client_id,
            from_height,
            ?to_height,
            count = txids.len(),
            "fanning out address sync targets"
        );

        for txid in &txids {
            let message = AddressTxMessage {
                client_id: doc.client_id.clone(),
                address,
                txid: *txid,
            };
            self.broker
                .publish_keyed(
                    topics::TXID_ADDRESS,
                    encode(&message)?,
                    Some(format!("{}:{}:{:#x}", doc.client_id, address, txid)),
                )
                .await?;
        }

        let synced_through = match to_height {
            Some(height) => height,
            None => {
                let info = self.indexer.chain_info().await?;
                info.best_height
                    .or(info.backend_height)
                    .ok_or(SyncError::NoBestHeight)?
            }
        };

        self.registry
            .update_block(address, &doc.client_id, synced_through)?;
        self.registry.update_syncing(address, &doc.client_id, None)?;
        Ok(())
    }

    /// Paginate the txid listing in bounded concurrent batches, then
    /// merge in trace-indexed internal transaction ids, deduplicated
    /// against the primary list.
    async fn list_txids(
        &self,
        address: Address,
        from_height: u64,
        to_height: Option<u64>,
    ) -> Result<Vec<B256>, SyncError> {
        let page_size = self.config.page_size;
        let batch_size = self.config.batch_size.max(1);

        let mut txids = Vec::new();
        let mut page: u32 = 1;
        loop {
            let batch = (0..batch_size as u32).map(|offset| {
                self.indexer
                    .address_txids(address, page + offset, page_size, from_height, to_height)
            });
            let pages = futures::future::try_join_all(batch).await?;

            let exhausted = pages.iter().any(|p| p.len() < page_size as usize);
            for fetched in pages {
                txids.extend(fetched);
            }
            if exhausted {
                break;
            }
            page += batch_size as u32;
        }

        let mut seen: HashSet<B256> = txids.iter().copied().collect();
        let internal = self
            .indexer
            .internal_txids(address, from_height, to_height)
            .await?;
        for txid in internal {
            if seen.insert(txid) {
                txids.push(txid);
            }
        }

        Ok(txids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{decode, MemoryBroker};
    use crate::registry::{MemoryRegistryStore, SyncLock};
    use crate::testutil::FakeIndexer;
    use alloy_primitives::address;
    use std::sync::atomic::Ordering;

    fn txid(n: u8) -> B256 {
        let mut bytes = [0u8; 32];
        bytes[31] = n;
        B256::from(bytes)
    }

    fn watched() -> Address {
        address!("0000000000000000000000000000000000000001")
    }

    struct Fixture {
        registry: Arc<MemoryRegistryStore>,
        indexer: Arc<FakeIndexer>,
        broker: Arc<MemoryBroker>,
        coordinator: SyncCoordinator,
    }

    fn fixture(config: SyncConfig) -> Fixture {
        let registry = Arc::new(MemoryRegistryStore::new());
        let indexer = Arc::new(FakeIndexer::new());
        let broker = Arc::new(MemoryBroker::new());
        let coordinator = SyncCoordinator::new(
            registry.clone(),
            indexer.clone(),
            broker.clone(),
            config,
        );
        Fixture {
            registry,
            indexer,
            broker,
            coordinator,
        }
    }

    fn confirmed_request(n: u8, height: u64) -> TxSyncRequest {
        TxSyncRequest {
            txid: txid(n),
            block_height: Some(height),
            confirmations: 6,
        }
    }

    #[tokio::test]
    async fn test_unregistered_address_is_a_cheap_no_op() {
        let f = fixture(SyncConfig::default());
        let outcome = f
            .coordinator
            .sync_if_registered(&confirmed_request(1, 100), watched())
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Done);
        assert_eq!(f.indexer.txid_page_calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.broker.pending(topics::TXID_ADDRESS), 0);
    }

    #[tokio::test]
    async fn test_backfill_fans_out_and_records_progress() {
        let f = fixture(SyncConfig {
            page_size: 3,
            batch_size: 2,
            ..SyncConfig::default()
        });
        f.registry
            .upsert(&RegistrationDocument::new("client-a", &[watched()]))
            .unwrap();
        f.indexer.set_address_txids(
            watched(),
            vec![txid(1), txid(2), txid(3), txid(4), txid(5), txid(6), txid(7)],
        );
        // One internal txid overlaps the primary list, one is new.
        f.indexer
            .set_internal_txids(watched(), vec![txid(3), txid(8)]);

        let outcome = f
            .coordinator
            .sync_if_registered(&confirmed_request(7, 120), watched())
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::Done);

        // 7 primary + 1 deduplicated internal.
        assert_eq!(f.broker.pending(topics::TXID_ADDRESS), 8);
        let mut rx = f.broker.consume(topics::TXID_ADDRESS, 16).await.unwrap();
        let mut seen = Vec::new();
        for _ in 0..8 {
            let delivery = rx.recv().await.unwrap();
            let message: AddressTxMessage = decode(&delivery).unwrap();
            assert_eq!(message.client_id, "client-a");
            assert_eq!(message.address, watched());
            seen.push(message.txid);
        }
        assert!(seen.contains(&txid(8)));
        assert_eq!(seen.iter().filter(|t| **t == txid(3)).count(), 1);

        let meta = f.registry.get_by_address(watched()).unwrap()[0].meta_for(watched());
        assert_eq!(meta.last_synced_height, Some(120));
        assert!(meta.sync_lock.is_none());
    }

    #[tokio::test]
    async fn test_unexpired_lock_with_different_key_requeues() {
        let f = fixture(SyncConfig::default());
        let mut doc = RegistrationDocument::new("client-a", &[watched()]);
        doc.ingester_meta.get_mut(&watched()).unwrap().sync_lock = Some(SyncLock {
            key: format!("99:{:#x}", txid(42)),
            started_at: unix_now(),
        });
        f.registry.upsert(&doc).unwrap();

        let outcome = f
            .coordinator
            .sync_if_registered(&confirmed_request(1, 100), watched())
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Requeue);
        // The blocked attempt performed no pagination and no fan-out.
        assert_eq!(f.indexer.txid_page_calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.broker.pending(topics::TXID_ADDRESS), 0);
    }

    #[tokio::test]
    async fn test_redelivered_same_key_proceeds() {
        let f = fixture(SyncConfig::default());
        let request = confirmed_request(1, 100);
        let mut doc = RegistrationDocument::new("client-a", &[watched()]);
        doc.ingester_meta.get_mut(&watched()).unwrap().sync_lock = Some(SyncLock {
            key: format!("100:{:#x}", request.txid),
            started_at: unix_now(),
        });
        f.registry.upsert(&doc).unwrap();
        f.indexer.set_address_txids(watched(), vec![txid(1)]);

        let outcome = f
            .coordinator
            .sync_if_registered(&request, watched())
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::Done);
    }

    #[tokio::test]
    async fn test_expired_lock_is_preempted() {
        let ttl = Duration::from_secs(300);
        let f = fixture(SyncConfig {
            lock_ttl: ttl,
            ..SyncConfig::default()
        });
        let mut doc = RegistrationDocument::new("client-a", &[watched()]);
        doc.ingester_meta.get_mut(&watched()).unwrap().sync_lock = Some(SyncLock {
            key: format!("99:{:#x}", txid(42)),
            started_at: unix_now().saturating_sub(ttl.as_secs() + 1),
        });
        f.registry.upsert(&doc).unwrap();
        f.indexer.set_address_txids(watched(), vec![txid(1)]);

        let outcome = f
            .coordinator
            .sync_if_registered(&confirmed_request(1, 100), watched())
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Done);
        let meta = f.registry.get_by_address(watched()).unwrap()[0].meta_for(watched());
        assert!(meta.sync_lock.is_none());
        assert_eq!(meta.last_synced_height, Some(100));
    }

    #[tokio::test]
    async fn test_unconfirmed_tx_syncs_to_reported_height() {
        let f = fixture(SyncConfig::default());
        f.registry
            .upsert(&RegistrationDocument::new("client-a", &[watched()]))
            .unwrap();
        f.indexer.set_address_txids(watched(), vec![txid(1)]);
        // Indexer metadata absent; backend height is the fallback.
        f.indexer.set_heights(None, Some(512));

        let request = TxSyncRequest {
            txid: txid(1),
            block_height: None,
            confirmations: 0,
        };
        let outcome = f
            .coordinator
            .sync_if_registered(&request, watched())
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Done);
        let meta = f.registry.get_by_address(watched()).unwrap()[0].meta_for(watched());
        assert_eq!(meta.last_synced_height, Some(512));
    }

    #[tokio::test]
    async fn test_no_height_anywhere_is_an_error_and_lock_survives() {
        let f = fixture(SyncConfig::default());
        f.registry
            .upsert(&RegistrationDocument::new("client-a", &[watched()]))
            .unwrap();
        f.indexer.set_address_txids(watched(), vec![txid(1)]);
        f.indexer.set_heights(None, None);

        let request = TxSyncRequest {
            txid: txid(1),
            block_height: None,
            confirmations: 0,
        };
        let err = f
            .coordinator
            .sync_if_registered(&request, watched())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NoBestHeight));

        // The failed sync leaves its lock in place until the TTL runs out.
        let meta = f.registry.get_by_address(watched()).unwrap()[0].meta_for(watched());
        assert!(meta.sync_lock.is_some());
    }
}
