//! Blockchain ingester binary
//!
//! Wires the block feed, reorg-resolving block worker, sync-coordinating
//! tx worker, and parsing address worker onto the broker topics, with
//! all collaborators injected explicitly.

use anyhow::{Context, Result};
use chainfeed::broker::{topics, MemoryBroker};
use chainfeed::config::{load_registrations, IngesterConfig};
use chainfeed::indexer::{HttpIndexer, HttpSettlementLedger};
use chainfeed::parse::{ContractRegistry, ParserEngine};
use chainfeed::registry::RegistryStore;
use chainfeed::reorg::ReorgResolver;
use chainfeed::store::RocksFeedStore;
use chainfeed::sync::{SyncConfig, SyncCoordinator};
use chainfeed::tokens::TokenCache;
use chainfeed::worker::{AddressHandler, BlockFeed, BlockHandler, TxHandler, Worker};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Blockchain ingestion and transaction decoding pipeline
#[derive(Parser)]
#[command(name = "ingester")]
#[command(about = "Ingest blocks, resolve reorgs, sync registered addresses, decode transactions")]
struct Args {
    /// Indexer REST base URL
    #[arg(long, default_value = "http://127.0.0.1:8332")]
    indexer_url: String,

    /// Node JSON-RPC URL (call traces, token metadata)
    #[arg(long, default_value = "http://127.0.0.1:8545")]
    node_url: String,

    /// Settlement-ledger base URL (cross-chain swap amounts)
    #[arg(long, default_value = "https://midgard.ninerealms.com")]
    settlement_url: String,

    /// Path to the registrations file (JSON)
    #[arg(short, long, default_value = "registrations.json")]
    registrations: PathBuf,

    /// Path to the RocksDB database directory
    #[arg(short, long, default_value = "./feed_db")]
    db_path: PathBuf,

    /// Sync lock TTL in seconds
    #[arg(long, default_value_t = 300)]
    lock_ttl: u64,

    /// Maximum reorg walk depth before failing loudly
    #[arg(long, default_value_t = 64)]
    max_reorg_depth: usize,

    /// Page size for address history pagination
    #[arg(long, default_value_t = 100)]
    page_size: u32,

    /// Concurrently in-flight history pages per batch
    #[arg(long, default_value_t = 5)]
    batch_size: usize,

    /// Per-worker prefetch (handler concurrency) limit
    #[arg(long, default_value_t = 10)]
    prefetch: usize,

    /// Block feed poll interval in seconds
    #[arg(long, default_value_t = 12)]
    poll_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = IngesterConfig {
        indexer_url: args.indexer_url,
        node_url: args.node_url,
        settlement_url: args.settlement_url,
        lock_ttl: Duration::from_secs(args.lock_ttl),
        max_reorg_depth: args.max_reorg_depth,
        page_size: args.page_size,
        batch_size: args.batch_size,
        prefetch: args.prefetch,
        retry_delay: Duration::from_secs(5),
        poll_interval: Duration::from_secs(args.poll_interval),
    };
    config.validate().context("Invalid configuration")?;

    info!("Starting ingester");
    info!("Indexer: {}", config.indexer_url);
    info!("Node: {}", config.node_url);
    info!("Database: {:?}", args.db_path);

    // Stores and clients, injected explicitly into each worker.
    let store = Arc::new(
        RocksFeedStore::open(&args.db_path)
            .with_context(|| format!("Failed to open database at {:?}", args.db_path))?,
    );
    let indexer = Arc::new(
        HttpIndexer::new(config.indexer_url.clone(), config.node_url.clone())
            .context("Failed to create indexer client")?,
    );
    let settlement = Arc::new(
        HttpSettlementLedger::new(config.settlement_url.clone())
            .context("Failed to create settlement ledger client")?,
    );
    let broker = Arc::new(MemoryBroker::new());

    // Seed registrations from the file.
    let documents =
        load_registrations(&args.registrations).context("Failed to load registrations")?;
    info!("Loaded {} client registrations", documents.len());
    for doc in &documents {
        store.upsert(doc).context("Failed to store registration")?;
    }

    let contracts = ContractRegistry::mainnet();
    let engine = Arc::new(ParserEngine::new(
        contracts.clone(),
        TokenCache::new(indexer.clone()),
        settlement,
    ));
    let coordinator = Arc::new(SyncCoordinator::new(
        store.clone(),
        indexer.clone(),
        broker.clone(),
        SyncConfig {
            lock_ttl: config.lock_ttl,
            page_size: config.page_size,
            batch_size: config.batch_size,
        },
    ));

    let feed = BlockFeed::new(indexer.clone(), broker.clone(), config.poll_interval);

    let block_handler = Arc::new(BlockHandler::new(
        indexer.clone(),
        store.clone(),
        broker.clone(),
        ReorgResolver::new(config.max_reorg_depth),
    ));
    let tx_handler = Arc::new(TxHandler::new(
        indexer.clone(),
        coordinator,
        contracts.clone(),
    ));
    let address_handler = Arc::new(AddressHandler::new(indexer, engine, broker.clone()));

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(feed.run()));
    tasks.push(tokio::spawn(
        Worker::new(
            broker.clone(),
            topics::BLOCK,
            config.prefetch,
            block_handler,
        )
        .with_retry_delay(config.retry_delay)
        .run(),
    ));
    // The tx and address workers also drain their requeue topics, where
    // lock-contended messages land after a delay.
    for topic in [topics::TXID.to_string(), topics::requeue(topics::TXID)] {
        tasks.push(tokio::spawn(
            Worker::new(broker.clone(), topic, config.prefetch, tx_handler.clone())
                .with_retry_delay(config.retry_delay)
                .run(),
        ));
    }
    for topic in [
        topics::TXID_ADDRESS.to_string(),
        topics::requeue(topics::TXID_ADDRESS),
    ] {
        tasks.push(tokio::spawn(
            Worker::new(
                broker.clone(),
                topic,
                config.prefetch,
                address_handler.clone(),
            )
            .with_retry_delay(config.retry_delay)
            .run(),
        ));
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for shutdown signal")?;
    info!("Received Ctrl+C, shutting down gracefully...");
    for task in &tasks {
        task.abort();
    }

    info!("Ingester stopped");
    Ok(())
}
