//! Chain reorganization resolution
//!
//! Compares the persisted chain tip against a newly observed node block
//! and determines where to resume syncing. On divergence the stale
//! persisted blocks are flagged orphaned (never deleted) and reported as
//! `ReorgBlock` notifications so downstream consumers can reconcile any
//! state keyed by those blocks.
//!
//! The walk is an explicit loop with an accumulator, capped at a
//! configurable depth: a parent-hash chain that fails to reconnect
//! within the cap is a fatal error for the block-sync cycle, not a
//! retry.

use crate::error::ReorgError;
use crate::indexer::Indexer;
use crate::store::BlockStore;
use crate::types::Block;
use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Orphan notification published on the reorg topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorgBlock {
    pub hash: B256,
    pub height: u64,
    #[serde(rename = "prevHash")]
    pub parent_hash: B256,
}

/// Result of resolving one observed block against the persisted chain.
#[derive(Debug)]
pub struct ReorgOutcome {
    /// Node block at the height syncing should resume from.
    pub resume_block: Block,
    /// Stale persisted blocks, in tip-downward order.
    pub orphaned: Vec<ReorgBlock>,
}

impl ReorgOutcome {
    pub fn resume_height(&self) -> u64 {
        self.resume_block.height
    }
}

/// Resolves reorganizations against a block store and the node's chain.
pub struct ReorgResolver {
    max_depth: usize,
}

impl ReorgResolver {
    /// Create a resolver with the given maximum walk depth.
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Resolve an observed node block against the persisted tip.
    ///
    /// Contiguous (or first-ever) blocks resume at the observed height
    /// with nothing orphaned. On divergence the persisted side is
    /// orphaned block by block while the node side steps to its parent,
    /// until the two chains reconnect.
    pub async fn resolve(
        &self,
        store: &dyn BlockStore,
        indexer: &dyn Indexer,
        observed: &Block,
    ) -> Result<ReorgOutcome, ReorgError> {
        let mut node_block = observed.clone();
        let mut tip = store.tip()?;
        let mut orphaned = Vec::new();

        loop {
            let Some(current) = tip else {
                // Persisted chain exhausted (or empty): nothing left to compare.
                break;
            };

            // Catching up: the observed block is far ahead of the tip. Pull
            // the node's block just above the tip and compare there.
            if node_block.height > current.height + 1 {
                node_block = indexer.block_by_height(current.height + 1).await?;
                tip = Some(current);
                continue;
            }

            if node_block.height == current.height + 1 && node_block.parent_hash == current.hash {
                // Chains connect; the persisted tip is still canonical.
                break;
            }

            // Redelivered or stale observation: the node block is already
            // canonical, so there is nothing to orphan.
            if store
                .block_by_hash(node_block.hash)?
                .is_some_and(|existing| !existing.orphaned)
            {
                break;
            }

            // Divergence: the persisted tip is stale.
            if orphaned.len() >= self.max_depth {
                return Err(ReorgError::DepthExceeded {
                    max_depth: self.max_depth,
                    hash: current.hash,
                    height: current.height,
                });
            }

            warn!(
                hash = %current.hash,
                height = current.height,
                "orphaning stale block"
            );
            store.mark_orphaned(current.hash)?;
            orphaned.push(ReorgBlock {
                hash: current.hash,
                height: current.height,
                parent_hash: current.parent_hash,
            });

            // Step the node side down only when it sits above the new tip;
            // if the persisted chain was the longer one, keep comparing
            // against the same node block.
            if node_block.height > current.height {
                node_block = indexer.block_by_hash(node_block.parent_hash).await?;
            }

            tip = match current.height.checked_sub(1) {
                Some(prev_height) => store.block_at_height(prev_height)?,
                None => None,
            };
        }

        Ok(ReorgOutcome {
            resume_block: node_block,
            orphaned,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BlockRecord;
    use crate::testutil::{block, FakeIndexer, MemoryBlockStore};
    

    fn hash(n: u64) -> B256 {
        B256::from(alloy_primitives::U256::from(n))
    }

    /// Persist a linear chain [1..=n] with hash(i) at height i.
    fn seed_chain(store: &MemoryBlockStore, n: u64) {
        for i in 1..=n {
            store
                .put_block(&BlockRecord::confirmed(hash(i), i, hash(i - 1)))
                .unwrap();
        }
    }

    /// Register a competing node chain that diverges above `fork`:
    /// heights fork+1..=n carry hash(1000+i) and link to each other,
    /// with the block at fork+1 linking back to hash(fork).
    fn seed_fork(indexer: &FakeIndexer, fork: u64, n: u64) {
        for i in (fork + 1)..=n {
            let parent = if i == fork + 1 { hash(fork) } else { hash(1000 + i - 1) };
            indexer.add_block(block(hash(1000 + i), i, parent));
        }
    }

    #[tokio::test]
    async fn test_contiguous_block_orphans_nothing() {
        let store = MemoryBlockStore::new();
        let indexer = FakeIndexer::new();
        seed_chain(&store, 5);

        let observed = block(hash(6), 6, hash(5));
        let outcome = ReorgResolver::new(10)
            .resolve(&store, &indexer, &observed)
            .await
            .unwrap();

        assert_eq!(outcome.resume_height(), 6);
        assert!(outcome.orphaned.is_empty());
    }

    #[tokio::test]
    async fn test_empty_store_resumes_at_observed() {
        let store = MemoryBlockStore::new();
        let indexer = FakeIndexer::new();

        let observed = block(hash(100), 100, hash(99));
        let outcome = ReorgResolver::new(10)
            .resolve(&store, &indexer, &observed)
            .await
            .unwrap();

        assert_eq!(outcome.resume_height(), 100);
        assert!(outcome.orphaned.is_empty());
    }

    #[tokio::test]
    async fn test_divergence_orphans_exactly_the_stale_suffix() {
        // Persisted [1..=5], node chain diverges above 2: blocks 3..=6
        // on the competing branch. Expect {3,4,5} orphaned, resume at 3.
        let store = MemoryBlockStore::new();
        let indexer = FakeIndexer::new();
        seed_chain(&store, 5);
        seed_fork(&indexer, 2, 6);

        let observed = indexer.block_at(6);
        let outcome = ReorgResolver::new(10)
            .resolve(&store, &indexer, &observed)
            .await
            .unwrap();

        assert_eq!(outcome.resume_height(), 3);
        assert_eq!(outcome.resume_block.hash, hash(1003));
        let orphaned_heights: Vec<u64> = outcome.orphaned.iter().map(|b| b.height).collect();
        assert_eq!(orphaned_heights, vec![5, 4, 3]);
        for b in &outcome.orphaned {
            assert!(store.block_by_hash(b.hash).unwrap().unwrap().orphaned);
        }
        // Blocks at and below the fork stay canonical.
        assert!(store.block_at_height(2).unwrap().is_some());
        assert!(store.block_at_height(1).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_catch_up_across_gap_without_reorg() {
        // Tip at 3, observed at 7 on the same chain: resolver fetches the
        // node block just above the tip and finds it contiguous.
        let store = MemoryBlockStore::new();
        let indexer = FakeIndexer::new();
        seed_chain(&store, 3);
        for i in 4..=7 {
            indexer.add_block(block(hash(i), i, hash(i - 1)));
        }

        let observed = indexer.block_at(7);
        let outcome = ReorgResolver::new(10)
            .resolve(&store, &indexer, &observed)
            .await
            .unwrap();

        assert_eq!(outcome.resume_height(), 4);
        assert!(outcome.orphaned.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_chain_fails_at_depth_cap() {
        // Node blocks never reconnect to the persisted chain.
        let store = MemoryBlockStore::new();
        let indexer = FakeIndexer::new();
        seed_chain(&store, 6);
        for i in 1..=6 {
            // Competing branch rooted in an unknown ancestor.
            let parent = hash(2000 + i - 1);
            indexer.add_block(block(hash(2000 + i), i, parent));
        }

        let observed = indexer.block_at(6);
        let err = ReorgResolver::new(3)
            .resolve(&store, &indexer, &observed)
            .await
            .unwrap_err();

        match err {
            ReorgError::DepthExceeded { max_depth, .. } => assert_eq!(max_depth, 3),
            other => panic!("expected DepthExceeded, got {:?}", other),
        }
    }
}
