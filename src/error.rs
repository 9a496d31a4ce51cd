//! Component error types
//!
//! Each subsystem returns its own typed error; the worker harness is the
//! only layer that maps errors onto ack/retry/requeue decisions.

use alloy_primitives::{Address, B256};

/// Errors from the indexer / node query surface.
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    /// Transport-level failure (connection, timeout, TLS). Retryable.
    #[error("Indexer transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The node returned an explicit error object.
    #[error("Node error {code}: {message}")]
    Node { code: i64, message: String },

    /// The requested entity does not exist. Distinct from a node error.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Response body did not match the expected shape.
    #[error("Malformed indexer response: {0}")]
    Malformed(String),
}

/// Errors from the registry / block store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Corrupt record under key {0}: {1}")]
    Corrupt(String, String),
}

/// Errors from the transaction parser engine.
///
/// A decoder that merely fails to understand its payload does not error;
/// it falls through to plain transfer aggregation. Parse errors are
/// reserved for failures of injected collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Token metadata lookup failed for {contract}: {source}")]
    TokenMetadata {
        contract: Address,
        source: IndexerError,
    },

    #[error("Settlement ledger lookup failed for {txid}: {source}")]
    Settlement { txid: B256, source: IndexerError },
}

/// Errors from the sync coordinator.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Indexer(#[from] IndexerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// No usable height to record as synced-through.
    #[error("Neither indexer nor backend reported a best height")]
    NoBestHeight,
}

/// Errors from the reorg resolver.
#[derive(Debug, thiserror::Error)]
pub enum ReorgError {
    #[error(transparent)]
    Indexer(#[from] IndexerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The parent-hash walk did not terminate within the configured depth.
    /// Fatal for the block-sync cycle; never silently retried.
    #[error("Reorg walk exceeded max depth {max_depth} at block {hash} (height {height})")]
    DepthExceeded {
        max_depth: usize,
        hash: B256,
        height: u64,
    },

    /// The stored chain ran out below a divergent block.
    #[error("Persisted chain has no ancestor below height {0}")]
    MissingAncestor(u64),
}

/// Errors from the message broker.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Topic {0} is not open for consumption")]
    NoConsumer(String),

    #[error("Broker channel closed for topic {0}")]
    Closed(String),

    #[error("Payload codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
