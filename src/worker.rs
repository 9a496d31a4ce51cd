//! Ingestion worker harness
//!
//! Each worker is a long-lived consumer bound to one topic with a
//! bounded prefetch. Handlers return an explicit outcome and the
//! harness alone decides what happens on the broker: acknowledge on
//! success, redeliver after backoff on recoverable failure, or
//! republish to the sibling requeue topic on a business-level "not yet"
//! (lock contention) to avoid redelivery storms on the same queue.

use crate::broker::{
    decode, encode, topics, AddressTxMessage, BlockMessage, Delivery, MessageBroker, TxidMessage,
};
use crate::error::{IndexerError, ReorgError};
use crate::indexer::Indexer;
use crate::parse::{self, ContractRegistry, ParserEngine};
use crate::reorg::ReorgResolver;
use crate::store::{BlockRecord, BlockStore};
use crate::sync::{SyncCoordinator, SyncOutcome, TxSyncRequest};
use crate::trace::collect_internal_transfers;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// What the harness should do with a handled delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Done (or permanently unprocessable): acknowledge.
    Ack,
    /// Recoverable failure: redeliver after backoff.
    Retry,
    /// Not yet (lock contention): republish to the requeue topic.
    Requeue,
}

/// A message handler bound into a worker.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: &Delivery) -> HandlerOutcome;
}

/// Generic consume loop: one topic, bounded concurrency, outcome-driven
/// ack/retry/requeue.
pub struct Worker {
    broker: Arc<dyn MessageBroker>,
    topic: String,
    prefetch: usize,
    retry_delay: Duration,
    handler: Arc<dyn MessageHandler>,
}

impl Worker {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        topic: impl Into<String>,
        prefetch: usize,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            broker,
            topic: topic.into(),
            prefetch: prefetch.max(1),
            retry_delay: Duration::from_secs(5),
            handler,
        }
    }

    /// Override the delay applied before a retry or requeue.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Consume until the broker closes the topic.
    pub async fn run(self) -> Result<()> {
        let mut deliveries = self
            .broker
            .consume(&self.topic, self.prefetch)
            .await
            .with_context(|| format!("Failed to consume topic {}", self.topic))?;
        info!(topic = %self.topic, prefetch = self.prefetch, "worker consuming");

        let semaphore = Arc::new(Semaphore::new(self.prefetch));
        while let Some(delivery) = deliveries.recv().await {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .context("worker semaphore closed")?;
            let broker = self.broker.clone();
            let handler = self.handler.clone();
            let topic = self.topic.clone();
            let retry_delay = self.retry_delay;

            tokio::spawn(async move {
                let outcome = handler.handle(&delivery).await;
                let result = match outcome {
                    HandlerOutcome::Ack => broker.ack(&delivery).await,
                    HandlerOutcome::Retry => {
                        tokio::time::sleep(retry_delay).await;
                        broker.redeliver(delivery).await
                    }
                    HandlerOutcome::Requeue => {
                        tokio::time::sleep(retry_delay).await;
                        broker
                            .publish_keyed(
                                &topics::requeue(&topic),
                                delivery.payload.clone(),
                                delivery.ack_key.clone(),
                            )
                            .await
                    }
                };
                if let Err(e) = result {
                    error!(topic = %topic, "broker operation failed: {e}");
                }
                drop(permit);
            });
        }
        Ok(())
    }
}

/// Polls the indexer for new best heights and publishes each newly
/// observed block hash onto the block topic. The reorg resolver in the
/// block worker handles gaps and divergence, so only the newest block
/// is announced per poll.
pub struct BlockFeed {
    indexer: Arc<dyn Indexer>,
    broker: Arc<dyn MessageBroker>,
    poll_interval: Duration,
}

impl BlockFeed {
    pub fn new(
        indexer: Arc<dyn Indexer>,
        broker: Arc<dyn MessageBroker>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            indexer,
            broker,
            poll_interval,
        }
    }

    /// Run the poll loop.
    pub async fn run(self) -> Result<()> {
        let mut last_seen: Option<u64> = None;
        loop {
            match self.observe(&mut last_seen).await {
                Ok(()) => {}
                Err(e) => warn!("block feed poll failed: {e:#}"),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn observe(&self, last_seen: &mut Option<u64>) -> Result<()> {
        let info = self.indexer.chain_info().await?;
        let Some(best) = info.best_height.or(info.backend_height) else {
            return Ok(());
        };
        if Some(best) == *last_seen {
            return Ok(());
        }

        let block = self
            .indexer
            .block_by_height(best)
            .await
            .with_context(|| format!("Failed to fetch best block {}", best))?;
        self.broker
            .publish_keyed(
                topics::BLOCK,
                encode(&BlockMessage { hash: block.hash })?,
                Some(format!("block:{:#x}", block.hash)),
            )
            .await?;
        info!(height = best, hash = %block.hash, "observed new block");
        *last_seen = Some(best);
        Ok(())
    }
}

/// Block worker: resolves reorgs for each observed node block, persists
/// the confirmed chain forward from the resume point, and fans out one
/// message per contained transaction.
pub struct BlockHandler {
    indexer: Arc<dyn Indexer>,
    store: Arc<dyn BlockStore>,
    broker: Arc<dyn MessageBroker>,
    resolver: ReorgResolver,
}

impl BlockHandler {
    pub fn new(
        indexer: Arc<dyn Indexer>,
        store: Arc<dyn BlockStore>,
        broker: Arc<dyn MessageBroker>,
        resolver: ReorgResolver,
    ) -> Self {
        Self {
            indexer,
            store,
            broker,
            resolver,
        }
    }

    async fn process(&self, delivery: &Delivery) -> Result<()> {
        let message: BlockMessage = decode(delivery)?;
        let observed = self
            .indexer
            .block_by_hash(message.hash)
            .await
            .context("Failed to fetch observed block")?;

        let outcome = self
            .resolver
            .resolve(self.store.as_ref(), self.indexer.as_ref(), &observed)
            .await?;

        for orphan in &outcome.orphaned {
            self.broker
                .publish_keyed(
                    topics::REORG_BLOCK,
                    encode(orphan)?,
                    Some(format!("reorg:{:#x}", orphan.hash)),
                )
                .await?;
        }

        let resume_height = outcome.resume_height();
        for height in resume_height..=observed.height {
            let block = if height == resume_height {
                outcome.resume_block.clone()
            } else {
                self.indexer
                    .block_by_height(height)
                    .await
                    .with_context(|| format!("Failed to fetch block {}", height))?
            };

            self.store
                .put_block(&BlockRecord::confirmed(
                    block.hash,
                    block.height,
                    block.parent_hash,
                ))?;

            for txid in &block.txids {
                let message = TxidMessage { txid: *txid };
                self.broker
                    .publish_keyed(
                        topics::TXID,
                        encode(&message)?,
                        Some(format!("txid:{:#x}", txid)),
                    )
                    .await?;
            }
            info!(height, txs = block.txids.len(), "confirmed block persisted");
        }

        Ok(())
    }
}

#[async_trait]
impl MessageHandler for BlockHandler {
    async fn handle(&self, delivery: &Delivery) -> HandlerOutcome {
        match self.process(delivery).await {
            Ok(()) => HandlerOutcome::Ack,
            Err(e) => match e.downcast_ref::<ReorgError>() {
                // A parent-hash walk that never reconnects is fatal for
                // this cycle; retrying would loop on the same chain.
                Some(ReorgError::DepthExceeded { .. }) => {
                    error!("reorg walk failed fatally: {e:#}");
                    HandlerOutcome::Ack
                }
                _ => {
                    warn!("block handling failed, retrying: {e:#}");
                    HandlerOutcome::Retry
                }
            },
        }
    }
}

/// Tx worker: computes the affected address set for each fanned-out
/// transaction and runs the sync coordinator for every address.
pub struct TxHandler {
    indexer: Arc<dyn Indexer>,
    coordinator: Arc<SyncCoordinator>,
    contracts: ContractRegistry,
}

impl TxHandler {
    pub fn new(
        indexer: Arc<dyn Indexer>,
        coordinator: Arc<SyncCoordinator>,
        contracts: ContractRegistry,
    ) -> Self {
        Self {
            indexer,
            coordinator,
            contracts,
        }
    }

    async fn process(&self, delivery: &Delivery) -> Result<SyncOutcome> {
        let message: TxidMessage = decode(delivery)?;
        let tx = self
            .indexer
            .transaction(message.txid)
            .await
            .context("Failed to fetch transaction")?;

        let request = TxSyncRequest::from(&tx);
        let mut outcome = SyncOutcome::Done;
        for address in parse::associated_addresses(&tx, &self.contracts) {
            if self.coordinator.sync_if_registered(&request, address).await?
                == SyncOutcome::Requeue
            {
                outcome = SyncOutcome::Requeue;
            }
        }
        Ok(outcome)
    }
}

#[async_trait]
impl MessageHandler for TxHandler {
    async fn handle(&self, delivery: &Delivery) -> HandlerOutcome {
        match self.process(delivery).await {
            Ok(SyncOutcome::Done) => HandlerOutcome::Ack,
            Ok(SyncOutcome::Requeue) => HandlerOutcome::Requeue,
            Err(e) => {
                warn!("tx sync failed, retrying: {e:#}");
                HandlerOutcome::Retry
            }
        }
    }
}

/// Address worker: fetches and parses each per-address sync target and
/// publishes the normalized transaction to the client's result queue.
pub struct AddressHandler {
    indexer: Arc<dyn Indexer>,
    engine: Arc<ParserEngine>,
    broker: Arc<dyn MessageBroker>,
}

impl AddressHandler {
    pub fn new(
        indexer: Arc<dyn Indexer>,
        engine: Arc<ParserEngine>,
        broker: Arc<dyn MessageBroker>,
    ) -> Self {
        Self {
            indexer,
            engine,
            broker,
        }
    }

    async fn process(&self, delivery: &Delivery) -> Result<()> {
        let message: AddressTxMessage = decode(delivery)?;
        let tx = self
            .indexer
            .transaction(message.txid)
            .await
            .context("Failed to fetch transaction")?;

        // Contract interactions can move value below the top level; the
        // call trace recovers those legs where the node supports it.
        let internal = if tx.is_contract_call() && tx.is_success() {
            match self.indexer.call_trace(tx.txid).await {
                Ok(trace) => collect_internal_transfers(&trace, tx.is_success(), message.address),
                Err(IndexerError::NotFound(_)) | Err(IndexerError::Node { .. }) => Vec::new(),
                Err(e) => return Err(e.into()),
            }
        } else {
            Vec::new()
        };

        let parsed = self.engine.parse(&tx, message.address, &internal).await?;

        self.broker
            .publish_keyed(
                &topics::client_tx(&message.client_id),
                encode(&parsed)?,
                Some(format!(
                    "{}:{:#x}:{}",
                    message.client_id, message.txid, message.address
                )),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for AddressHandler {
    async fn handle(&self, delivery: &Delivery) -> HandlerOutcome {
        match self.process(delivery).await {
            Ok(()) => HandlerOutcome::Ack,
            Err(e) => {
                warn!("address parse failed, retrying: {e:#}");
                HandlerOutcome::Retry
            }
        }
    }
}
