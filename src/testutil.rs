//! In-memory fakes shared across unit tests.

use crate::error::{IndexerError, StoreError};
use crate::indexer::Indexer;
use crate::parse::{SettlementAction, SettlementLedger};
use crate::store::{BlockRecord, BlockStore};
use crate::tokens::{TokenInfo, TokenMetadataSource};
use crate::types::{Block, CallTrace, ChainInfo, RawTransaction};
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Build a wire block with no transactions.
pub fn block(hash: B256, height: u64, parent_hash: B256) -> Block {
    Block {
        hash,
        height,
        parent_hash,
        next_hash: None,
        timestamp: 1_700_000_000 + height,
        txids: Vec::new(),
    }
}

/// Build a confirmed raw transaction with sensible defaults.
pub fn raw_tx(txid: B256, from: Address, to: Option<Address>, value: U256) -> RawTransaction {
    RawTransaction {
        txid,
        block_hash: None,
        block_height: Some(100),
        block_time: 1_700_000_000,
        confirmations: 6,
        from,
        to,
        value,
        input: Vec::new(),
        status: 1,
        gas_price: Some(U256::from(20_000_000_000u64)),
        max_fee_per_gas: None,
        max_priority_fee_per_gas: None,
        base_fee_per_gas: None,
        gas_used: Some(U256::from(21_000u64)),
        token_transfers: Vec::new(),
    }
}

/// In-memory [`BlockStore`].
#[derive(Default)]
pub struct MemoryBlockStore {
    canonical: Mutex<HashMap<u64, BlockRecord>>,
    by_hash: Mutex<HashMap<B256, BlockRecord>>,
    tip_height: Mutex<Option<u64>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockStore for MemoryBlockStore {
    fn tip(&self) -> Result<Option<BlockRecord>, StoreError> {
        let tip_height = *self.tip_height.lock().unwrap();
        let Some(mut height) = tip_height else {
            return Ok(None);
        };
        let canonical = self.canonical.lock().unwrap();
        loop {
            match canonical.get(&height) {
                Some(record) if !record.orphaned => return Ok(Some(record.clone())),
                _ if height == 0 => return Ok(None),
                _ => height -= 1,
            }
        }
    }

    fn block_at_height(&self, height: u64) -> Result<Option<BlockRecord>, StoreError> {
        Ok(self
            .canonical
            .lock()
            .unwrap()
            .get(&height)
            .filter(|r| !r.orphaned)
            .cloned())
    }

    fn block_by_hash(&self, hash: B256) -> Result<Option<BlockRecord>, StoreError> {
        Ok(self.by_hash.lock().unwrap().get(&hash).cloned())
    }

    fn put_block(&self, block: &BlockRecord) -> Result<(), StoreError> {
        self.canonical
            .lock()
            .unwrap()
            .insert(block.height, block.clone());
        self.by_hash
            .lock()
            .unwrap()
            .insert(block.hash, block.clone());
        let mut tip = self.tip_height.lock().unwrap();
        *tip = Some(tip.unwrap_or(0).max(block.height));
        Ok(())
    }

    fn mark_orphaned(&self, hash: B256) -> Result<(), StoreError> {
        let mut by_hash = self.by_hash.lock().unwrap();
        let Some(record) = by_hash.get_mut(&hash) else {
            return Ok(());
        };
        record.orphaned = true;
        let height = record.height;
        let mut canonical = self.canonical.lock().unwrap();
        if let Some(c) = canonical.get_mut(&height) {
            if c.hash == hash {
                c.orphaned = true;
            }
        }
        Ok(())
    }
}

/// In-memory [`Indexer`] with call counters for interaction assertions.
#[derive(Default)]
pub struct FakeIndexer {
    blocks_by_hash: Mutex<HashMap<B256, Block>>,
    blocks_by_height: Mutex<HashMap<u64, Block>>,
    txs: Mutex<HashMap<B256, RawTransaction>>,
    address_txids: Mutex<HashMap<Address, Vec<B256>>>,
    internal_txids: Mutex<HashMap<Address, Vec<B256>>>,
    traces: Mutex<HashMap<B256, CallTrace>>,
    best_height: Mutex<Option<u64>>,
    backend_height: Mutex<Option<u64>>,
    pub txid_page_calls: AtomicUsize,
}

impl FakeIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_block(&self, block: Block) {
        self.blocks_by_height
            .lock()
            .unwrap()
            .insert(block.height, block.clone());
        self.blocks_by_hash.lock().unwrap().insert(block.hash, block);
    }

    pub fn block_at(&self, height: u64) -> Block {
        self.blocks_by_height.lock().unwrap()[&height].clone()
    }

    pub fn add_tx(&self, tx: RawTransaction) {
        self.txs.lock().unwrap().insert(tx.txid, tx);
    }

    pub fn set_address_txids(&self, address: Address, txids: Vec<B256>) {
        self.address_txids.lock().unwrap().insert(address, txids);
    }

    pub fn set_internal_txids(&self, address: Address, txids: Vec<B256>) {
        self.internal_txids.lock().unwrap().insert(address, txids);
    }

    pub fn add_trace(&self, txid: B256, trace: CallTrace) {
        self.traces.lock().unwrap().insert(txid, trace);
    }

    pub fn set_heights(&self, best: Option<u64>, backend: Option<u64>) {
        *self.best_height.lock().unwrap() = best;
        *self.backend_height.lock().unwrap() = backend;
    }
}

#[async_trait]
impl Indexer for FakeIndexer {
    async fn block_by_hash(&self, hash: B256) -> Result<Block, IndexerError> {
        self.blocks_by_hash
            .lock()
            .unwrap()
            .get(&hash)
            .cloned()
            .ok_or_else(|| IndexerError::NotFound(format!("block {hash}")))
    }

    async fn block_by_height(&self, height: u64) -> Result<Block, IndexerError> {
        self.blocks_by_height
            .lock()
            .unwrap()
            .get(&height)
            .cloned()
            .ok_or_else(|| IndexerError::NotFound(format!("block {height}")))
    }

    async fn transaction(&self, txid: B256) -> Result<RawTransaction, IndexerError> {
        self.txs
            .lock()
            .unwrap()
            .get(&txid)
            .cloned()
            .ok_or_else(|| IndexerError::NotFound(format!("tx {txid}")))
    }

    async fn address_txids(
        &self,
        address: Address,
        page: u32,
        page_size: u32,
        _from_height: u64,
        _to_height: Option<u64>,
    ) -> Result<Vec<B256>, IndexerError> {
        self.txid_page_calls.fetch_add(1, Ordering::SeqCst);
        let all = self
            .address_txids
            .lock()
            .unwrap()
            .get(&address)
            .cloned()
            .unwrap_or_default();
        let start = ((page.max(1) - 1) as usize) * page_size as usize;
        Ok(all
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .collect())
    }

    async fn internal_txids(
        &self,
        address: Address,
        _from_height: u64,
        _to_height: Option<u64>,
    ) -> Result<Vec<B256>, IndexerError> {
        Ok(self
            .internal_txids
            .lock()
            .unwrap()
            .get(&address)
            .cloned()
            .unwrap_or_default())
    }

    async fn call_trace(&self, txid: B256) -> Result<CallTrace, IndexerError> {
        self.traces
            .lock()
            .unwrap()
            .get(&txid)
            .cloned()
            .ok_or_else(|| IndexerError::NotFound(format!("trace {txid}")))
    }

    async fn chain_info(&self) -> Result<ChainInfo, IndexerError> {
        Ok(ChainInfo {
            best_height: *self.best_height.lock().unwrap(),
            backend_height: *self.backend_height.lock().unwrap(),
        })
    }

    async fn broadcast(&self, _raw_tx: &[u8]) -> Result<B256, IndexerError> {
        Ok(B256::ZERO)
    }
}

/// Token metadata source that fabricates metadata for any contract.
#[derive(Default)]
pub struct FakeTokens {
    overrides: Mutex<HashMap<Address, TokenInfo>>,
}

impl FakeTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, info: TokenInfo) {
        self.overrides.lock().unwrap().insert(info.contract, info);
    }
}

#[async_trait]
impl TokenMetadataSource for FakeTokens {
    async fn token_metadata(&self, contract: Address) -> Result<TokenInfo, IndexerError> {
        if let Some(info) = self.overrides.lock().unwrap().get(&contract) {
            return Ok(info.clone());
        }
        Ok(TokenInfo {
            contract,
            decimals: 18,
            name: "Fake Token".to_string(),
            symbol: "FAKE".to_string(),
        })
    }
}

/// Settlement ledger backed by a map; unknown txids are not found.
#[derive(Default)]
pub struct FakeSettlement {
    actions: Mutex<HashMap<B256, SettlementAction>>,
}

impl FakeSettlement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, txid: B256, action: SettlementAction) {
        self.actions.lock().unwrap().insert(txid, action);
    }
}

#[async_trait]
impl SettlementLedger for FakeSettlement {
    async fn action(&self, txid: B256) -> Result<SettlementAction, IndexerError> {
        self.actions
            .lock()
            .unwrap()
            .get(&txid)
            .cloned()
            .ok_or_else(|| IndexerError::NotFound(format!("action {txid}")))
    }
}
