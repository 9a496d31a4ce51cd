//! Chainfeed - blockchain ingestion and transaction decoding pipeline
//!
//! Ingests blocks and transactions from an indexer, resolves chain
//! reorganizations, tracks registered addresses per client, backfills
//! each address's history, and decodes raw transactions into a
//! normalized, protocol-aware representation republished to per-client
//! delivery queues.

pub mod broker;
pub mod config;
pub mod error;
pub mod fee;
pub mod indexer;
pub mod keys;
pub mod parse;
pub mod registry;
pub mod reorg;
pub mod store;
pub mod sync;
pub mod tokens;
pub mod trace;
pub mod types;
pub mod worker;

#[cfg(test)]
pub mod testutil;

// Re-export the main types for convenience
pub use broker::{MemoryBroker, MessageBroker};
pub use indexer::{HttpIndexer, Indexer};
pub use parse::{ContractRegistry, NormalizedTransaction, ParserEngine};
pub use registry::{RegistrationDocument, RegistryStore, SyncLock};
pub use reorg::{ReorgBlock, ReorgResolver};
pub use store::{BlockStore, RocksFeedStore};
pub use sync::{SyncConfig, SyncCoordinator, SyncOutcome};
