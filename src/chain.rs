use crate::block::Block;
use crate::error::{ChainError, Result};
use crate::store::KvStore;
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Body of the block created at height 0 when the store is empty.
pub const GENESIS_BODY: &str = "First block in the chain - Genesis block";

/// The ledger engine: an append-only chain of hash-linked blocks kept in a
/// [`KvStore`] under their heights.
///
/// Construction does no I/O. [`Blockchain::initialize`] must complete before
/// any other operation is accepted; until then they fail with
/// [`ChainError::NotInitialized`].
pub struct Blockchain<S> {
    store: S,
    /// Serializes initialize/append: the read-height, build, write sequence
    /// must never interleave between two writers.
    writer: Mutex<()>,
    ready: AtomicBool,
}

impl<S: KvStore> Blockchain<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            writer: Mutex::new(()),
            ready: AtomicBool::new(false),
        }
    }

    /// Bring the chain to a usable state, writing the genesis block if the
    /// store is empty. Idempotent.
    pub fn initialize(&self) -> Result<()> {
        let _guard = self.lock_writer()?;
        if self.is_initialized() {
            return Ok(());
        }
        if self.store.count()? == 0 {
            let genesis = self.append_locked(Block::new(GENESIS_BODY))?;
            info!(hash = %genesis.hash, "created genesis block");
        }
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Height of the most recent block, or `None` if the store holds none.
    pub fn current_height(&self) -> Result<Option<u64>> {
        self.ensure_ready()?;
        self.stored_height()
    }

    /// Number of stored blocks.
    pub fn block_count(&self) -> Result<u64> {
        self.ensure_ready()?;
        self.store.count()
    }

    /// Append a new block carrying `payload` and return it once persisted.
    ///
    /// If the write fails the block is not committed and the error is returned.
    pub fn append<T: Serialize + ?Sized>(&self, payload: &T) -> Result<Block> {
        self.ensure_ready()?;
        let body = serde_json::to_value(payload)?;
        let _guard = self.lock_writer()?;
        self.append_locked(Block::new(body))
    }

    /// Read the block stored at `height`.
    pub fn get_block(&self, height: u64) -> Result<Block> {
        self.ensure_ready()?;
        self.read_block(height)
    }

    /// All stored blocks in height order.
    pub fn blocks(&self) -> Result<Vec<Block>> {
        let count = self.block_count()?;
        (0..count).map(|h| self.read_block(h)).collect()
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn ensure_ready(&self) -> Result<()> {
        if !self.is_initialized() {
            return Err(ChainError::NotInitialized);
        }
        Ok(())
    }

    pub(crate) fn read_block(&self, height: u64) -> Result<Block> {
        let data = self.store.get(height)?;
        let block = Block::from_bytes(&data)?;
        debug!(height, "read block");
        Ok(block)
    }

    fn stored_height(&self) -> Result<Option<u64>> {
        Ok(self.store.count()?.checked_sub(1))
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, ()>> {
        self.writer
            .lock()
            .map_err(|_| ChainError::Persistence("writer lock poisoned".into()))
    }

    /// Caller must hold the writer lock.
    fn append_locked(&self, mut block: Block) -> Result<Block> {
        let tip = self.stored_height()?;
        block.height = tip.map_or(0, |h| h + 1);
        block.time = Utc::now().timestamp();
        if let Some(prev) = tip {
            block.previous_block_hash = self.read_block(prev)?.hash;
        }
        block.hash = block.compute_hash()?;

        self.store.put(block.height, &block.to_bytes()?)?;
        info!(height = block.height, hash = %block.hash, "appended block");
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::FlakyStore;
    use crate::store::{FileStore, MemoryStore};
    use serde_json::json;
    use std::sync::Arc;

    fn fresh_chain() -> Blockchain<MemoryStore> {
        let chain = Blockchain::new(MemoryStore::new());
        chain.initialize().unwrap();
        chain
    }

    #[test]
    fn operations_rejected_before_initialize() {
        let chain = Blockchain::new(MemoryStore::new());
        assert!(!chain.is_initialized());
        assert!(matches!(chain.append("x"), Err(ChainError::NotInitialized)));
        assert!(matches!(chain.get_block(0), Err(ChainError::NotInitialized)));
        assert!(matches!(chain.current_height(), Err(ChainError::NotInitialized)));
        // Construction alone must not touch the store.
        assert_eq!(chain.store().count().unwrap(), 0);
    }

    #[test]
    fn initialize_creates_genesis() {
        let chain = fresh_chain();
        assert!(chain.is_initialized());
        assert_eq!(chain.block_count().unwrap(), 1);
        assert_eq!(chain.current_height().unwrap(), Some(0));

        let genesis = chain.get_block(0).unwrap();
        assert_eq!(genesis.height, 0);
        assert_eq!(genesis.previous_block_hash, "");
        assert_eq!(genesis.body, json!(GENESIS_BODY));
        assert!(genesis.verify().unwrap());
    }

    #[test]
    fn initialize_is_idempotent() {
        let chain = fresh_chain();
        chain.initialize().unwrap();
        assert_eq!(chain.block_count().unwrap(), 1);
    }

    #[test]
    fn append_links_to_genesis() {
        let chain = fresh_chain();
        let genesis = chain.get_block(0).unwrap();

        let block = chain.append("hello").unwrap();
        assert_eq!(block.height, 1);
        assert_eq!(block.previous_block_hash, genesis.hash);
        assert_eq!(block.body, json!("hello"));
        assert!(block.time > 0);
        assert_eq!(chain.get_block(1).unwrap(), block);
    }

    #[test]
    fn ten_appends_reach_height_ten() {
        let chain = fresh_chain();
        for i in 1..=10 {
            chain.append(&format!("Block {} added", i)).unwrap();
        }
        assert_eq!(chain.current_height().unwrap(), Some(10));

        let blocks = chain.blocks().unwrap();
        assert_eq!(blocks.len(), 11);
        for (i, block) in blocks.iter().enumerate() {
            assert_eq!(block.height, i as u64);
            if i > 0 {
                assert_eq!(block.previous_block_hash, blocks[i - 1].hash);
            }
        }
    }

    #[test]
    fn structured_payloads() {
        let chain = fresh_chain();
        let block = chain.append(&json!({"from": "a", "to": "b", "amount": 3})).unwrap();
        assert_eq!(chain.get_block(block.height).unwrap().body["amount"], json!(3));
    }

    #[test]
    fn missing_height_is_not_found() {
        let chain = fresh_chain();
        for i in 0..4 {
            chain.append(&i).unwrap();
        }
        assert_eq!(chain.block_count().unwrap(), 5);
        assert!(matches!(chain.get_block(99), Err(ChainError::NotFound(99))));
    }

    #[test]
    fn malformed_entry_is_serialization_error() {
        let chain = fresh_chain();
        chain.store().put(1, b"{not a block").unwrap();
        assert!(matches!(chain.get_block(1), Err(ChainError::Serialization(_))));
    }

    #[test]
    fn failed_write_is_not_committed() {
        let chain = Blockchain::new(FlakyStore::default());
        chain.initialize().unwrap();
        chain.append("one").unwrap();

        chain.store().set_fail_puts(true);
        assert!(matches!(chain.append("lost"), Err(ChainError::Persistence(_))));
        assert_eq!(chain.current_height().unwrap(), Some(1));

        chain.store().set_fail_puts(false);
        let block = chain.append("two").unwrap();
        assert_eq!(block.height, 2);
        assert_eq!(block.previous_block_hash, chain.get_block(1).unwrap().hash);
    }

    #[test]
    fn failed_genesis_aborts_startup() {
        let chain = Blockchain::new(FlakyStore::default());
        chain.store().set_fail_puts(true);
        assert!(chain.initialize().is_err());
        assert!(!chain.is_initialized());
    }

    #[test]
    fn concurrent_appends_get_distinct_heights() {
        let chain = Arc::new(fresh_chain());
        std::thread::scope(|s| {
            for t in 0..8 {
                let chain = Arc::clone(&chain);
                s.spawn(move || {
                    for i in 0..10 {
                        chain.append(&format!("t{}-{}", t, i)).unwrap();
                    }
                });
            }
        });

        assert_eq!(chain.current_height().unwrap(), Some(80));
        let blocks = chain.blocks().unwrap();
        for pair in blocks.windows(2) {
            assert_eq!(pair[1].height, pair[0].height + 1);
            assert_eq!(pair[1].previous_block_hash, pair[0].hash);
        }
    }

    #[test]
    fn file_backed_chain_resumes() {
        let tmp = tempfile::tempdir().unwrap();
        let last = {
            let chain = Blockchain::new(FileStore::open(tmp.path()).unwrap());
            chain.initialize().unwrap();
            chain.append("persisted").unwrap()
        };

        let chain = Blockchain::new(FileStore::open(tmp.path()).unwrap());
        chain.initialize().unwrap();
        assert_eq!(chain.current_height().unwrap(), Some(1));
        assert_eq!(chain.get_block(1).unwrap(), last);

        let next = chain.append("after reopen").unwrap();
        assert_eq!(next.previous_block_hash, last.hash);
    }
}
