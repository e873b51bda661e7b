use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::db::database::{Database, SchemaCache};
use crate::db::options::{TransactionOptions, TransactionType};
use crate::db::session::Session;
use crate::error::{Result, TesseraError};
use crate::graph::data_graph::DataGraph;
use crate::graph::schema_graph::SchemaGraph;
use crate::kv::{KvCursor, KvEngine, KvError};
use crate::schema::TypeManager;
use crate::traversal::TraversalCache;

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

/// Per-transaction caches handed to the traversal engine and reasoner.
pub struct Cache {
    schema_graph: Arc<SchemaGraph>,
    traversal: Arc<TraversalCache>,
}

impl Cache {
    fn new(schema_graph: Arc<SchemaGraph>, traversal_capacity: usize) -> Self {
        Cache {
            schema_graph,
            traversal: Arc::new(TraversalCache::new(traversal_capacity)),
        }
    }

    pub fn schema_graph(&self) -> &Arc<SchemaGraph> {
        &self.schema_graph
    }

    pub fn traversal(&self) -> &Arc<TraversalCache> {
        &self.traversal
    }
}

enum Variant {
    Schema { cache: Cache },
    Data { schema_cache: Arc<SchemaCache> },
}

pub struct Transaction {
    uid: u64,
    tx_type: TransactionType,
    options: TransactionOptions,
    database: Arc<Database>,
    session: Weak<Session>,
    storage: Arc<TxStorage>,
    schema_graph: Arc<SchemaGraph>,
    data_graph: Arc<DataGraph>,
    is_open: AtomicBool,
    variant: Variant,
}

impl Transaction {
    pub(crate) fn open_schema(
        session: &Arc<Session>,
        tx_type: TransactionType,
        options: TransactionOptions,
    ) -> Result<Arc<Transaction>> {
        let database = Arc::clone(session.database());
        let storage = TxStorage::open(database.engine(), tx_type)?;
        let schema_graph = Arc::new(SchemaGraph::new(
            Arc::clone(&storage),
            database.schema_keys(),
            tx_type.is_read(),
        ));
        let data_graph = Arc::new(DataGraph::new(
            Arc::clone(&storage),
            Arc::clone(&schema_graph),
            database.data_keys(),
        ));
        let cache = Cache::new(
            Arc::clone(&schema_graph),
            database.options().traversal_cache_capacity,
        );
        let tx = Arc::new(Transaction {
            uid: NEXT_TX_ID.fetch_add(1, Ordering::Relaxed),
            tx_type,
            options,
            database,
            session: Arc::downgrade(session),
            storage,
            schema_graph,
            data_graph,
            is_open: AtomicBool::new(true),
            variant: Variant::Schema { cache },
        });
        tx.storage.set_owner(&tx);
        session.register(&tx);
        debug!(tx_id = tx.uid, tx_type = tx_type.name(), "schema transaction opened");
        Ok(tx)
    }

    pub(crate) fn open_data(
        session: &Arc<Session>,
        tx_type: TransactionType,
        options: TransactionOptions,
    ) -> Result<Arc<Transaction>> {
        let database = Arc::clone(session.database());
        let storage = TxStorage::open(database.engine(), tx_type)?;
        // The read side is held only long enough to pin the cached schema
        // graph; schema commits hold the write side across cache eviction.
        let schema_cache = {
            let _read = database.data_read_schema_lock().read();
            let cache = database.cache()?;
            cache.retain();
            cache
        };
        let schema_graph = Arc::clone(schema_cache.graph());
        let data_graph = Arc::new(DataGraph::new(
            Arc::clone(&storage),
            Arc::clone(&schema_graph),
            database.data_keys(),
        ));
        let tx = Arc::new(Transaction {
            uid: NEXT_TX_ID.fetch_add(1, Ordering::Relaxed),
            tx_type,
            options,
            database,
            session: Arc::downgrade(session),
            storage,
            schema_graph,
            data_graph,
            is_open: AtomicBool::new(true),
            variant: Variant::Data { schema_cache },
        });
        tx.storage.set_owner(&tx);
        session.register(&tx);
        debug!(tx_id = tx.uid, tx_type = tx_type.name(), "data transaction opened");
        Ok(tx)
    }

    pub(crate) fn uid(&self) -> u64 {
        self.uid
    }

    pub fn tx_type(&self) -> TransactionType {
        self.tx_type
    }

    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::Acquire)
    }

    pub fn is_schema(&self) -> bool {
        matches!(self.variant, Variant::Schema { .. })
    }

    pub fn is_data(&self) -> bool {
        matches!(self.variant, Variant::Data { .. })
    }

    /// Traversal and schema caches of a schema transaction.
    pub fn cache(&self) -> Result<&Cache> {
        match &self.variant {
            Variant::Schema { cache } => Ok(cache),
            Variant::Data { .. } => Err(TesseraError::IllegalCast {
                from: "data transaction",
                to: "schema transaction",
            }),
        }
    }

    pub fn storage(&self) -> Result<&Arc<TxStorage>> {
        if !self.is_open() {
            return Err(TesseraError::TransactionClosed);
        }
        Ok(&self.storage)
    }

    pub fn types(&self) -> Result<TypeManager> {
        if !self.is_open() {
            return Err(TesseraError::TransactionClosed);
        }
        Ok(TypeManager::new(
            Arc::clone(&self.schema_graph),
            Arc::clone(&self.data_graph),
        ))
    }

    pub fn data(&self) -> Result<&Arc<DataGraph>> {
        if !self.is_open() {
            return Err(TesseraError::TransactionClosed);
        }
        Ok(&self.data_graph)
    }

    pub(crate) fn schema_graph(&self) -> &Arc<SchemaGraph> {
        &self.schema_graph
    }

    /// Discards buffered mutations; the transaction stays open for reads.
    pub fn rollback(&self) -> Result<()> {
        match &self.variant {
            Variant::Schema { .. } => {
                self.schema_graph.clear();
                self.data_graph.clear();
            }
            Variant::Data { .. } => self.data_graph.clear(),
        }
        self.storage.rollback_kv()?;
        warn!(tx_id = self.uid, "transaction rolled back");
        Ok(())
    }

    /// One-shot commit. Fails with `ILLEGAL_COMMIT` on read transactions and
    /// with `TRANSACTION_CLOSED` on any later call.
    pub fn commit(&self) -> Result<()> {
        match &self.variant {
            Variant::Schema { .. } => self.commit_schema(),
            Variant::Data { .. } => self.commit_data(),
        }
    }

    fn commit_schema(&self) -> Result<()> {
        if self
            .is_open
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TesseraError::TransactionClosed);
        }
        let mut schema_write = None;
        let result = self.commit_schema_flush(&mut schema_write);
        // A fresh schema graph must be rebuilt by the next user; eviction
        // happens while the write side is still held so a data transaction
        // opening right after cannot pin the stale cache.
        self.database.evict_cached_schema();
        drop(schema_write);
        self.schema_graph.clear();
        self.data_graph.clear();
        self.close_resources();
        match &result {
            Ok(()) => info!(tx_id = self.uid, "schema transaction committed"),
            Err(e) => warn!(tx_id = self.uid, error = %e, "schema commit failed"),
        }
        result
    }

    fn commit_schema_flush<'tx>(
        &'tx self,
        schema_write: &mut Option<RwLockWriteGuard<'tx, ()>>,
    ) -> Result<()> {
        if self.tx_type.is_read() {
            return Err(TesseraError::IllegalCommit);
        }
        if self.data_graph.is_modified() {
            return Err(TesseraError::SessionSchemaViolation);
        }
        // Only writes follow from here.
        self.storage.disable_indexing();
        self.types_unchecked().validate_types()?;
        self.schema_graph.flush()?;
        *schema_write = Some(self.database.data_read_schema_lock().write());
        self.storage.commit_kv().map_err(|e| {
            let _ = self.storage.rollback_kv();
            TesseraError::StorageFailure(e.to_string())
        })
    }

    fn commit_data(&self) -> Result<()> {
        if self
            .is_open
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TesseraError::TransactionClosed);
        }
        let result = (|| -> Result<()> {
            if self.tx_type.is_read() {
                return Err(TesseraError::IllegalCommit);
            }
            if self.schema_graph.is_modified() {
                return Err(TesseraError::SessionDataViolation);
            }
            self.storage.disable_indexing();
            self.types_unchecked().validate_things()?;
            self.data_graph.flush()?;
            self.storage.commit_kv().map_err(|e| {
                let _ = self.storage.rollback_kv();
                TesseraError::StorageFailure(e.to_string())
            })
        })();
        self.data_graph.clear();
        if let Variant::Data { schema_cache } = &self.variant {
            schema_cache.may_refresh_storage();
        }
        self.close_resources();
        match &result {
            Ok(()) => info!(tx_id = self.uid, "data transaction committed"),
            Err(e) => warn!(tx_id = self.uid, error = %e, "data commit failed"),
        }
        result
    }

    // Commit paths run after the open flag has been flipped.
    fn types_unchecked(&self) -> TypeManager {
        TypeManager::new(Arc::clone(&self.schema_graph), Arc::clone(&self.data_graph))
    }

    /// Idempotent; releases storage, iterators, pooled cursors, the schema
    /// cache pin, and the session registration.
    pub fn close(&self) {
        if self
            .is_open
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.close_resources();
            debug!(tx_id = self.uid, "transaction closed");
        }
    }

    fn close_resources(&self) {
        self.storage.close();
        if let Variant::Data { schema_cache } = &self.variant {
            schema_cache.release();
        }
        if let Some(session) = self.session.upgrade() {
            session.remove(self.uid);
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.close();
    }
}

/// Storage façade serialising every key-value call of one transaction.
///
/// Reads take the read side of the transaction lock, writes the write side,
/// so a worker pool sharing the transaction cannot mutate mid-iteration.
/// Any engine error closes the whole transaction before it surfaces as
/// `STORAGE_FAILURE`.
pub struct TxStorage {
    tx_type: TransactionType,
    engine: Arc<dyn KvEngine>,
    kv: RwLock<Box<dyn crate::kv::KvTx>>,
    iterators: Mutex<Vec<Weak<IteratorCore>>>,
    recycled: Mutex<Vec<Box<dyn KvCursor>>>,
    is_open: AtomicBool,
    owner: Mutex<Weak<Transaction>>,
}

impl TxStorage {
    pub(crate) fn open(engine: &Arc<dyn KvEngine>, tx_type: TransactionType) -> Result<Arc<Self>> {
        let kv = engine
            .begin_tx(tx_type.is_write())
            .map_err(|e| TesseraError::StorageFailure(e.to_string()))?;
        Ok(Arc::new(TxStorage {
            tx_type,
            engine: Arc::clone(engine),
            kv: RwLock::new(kv),
            iterators: Mutex::new(Vec::new()),
            recycled: Mutex::new(Vec::new()),
            is_open: AtomicBool::new(true),
            owner: Mutex::new(Weak::new()),
        }))
    }

    fn set_owner(&self, tx: &Arc<Transaction>) {
        *self.owner.lock() = Arc::downgrade(tx);
    }

    pub fn tx_type(&self) -> TransactionType {
        self.tx_type
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::Acquire)
    }

    fn validate_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(TesseraError::TransactionClosed)
        }
    }

    /// Engine errors are transaction-fatal: close first, then surface.
    fn fatal(&self, err: KvError) -> TesseraError {
        warn!(error = %err, "storage failure, closing transaction");
        let owner = self.owner.lock().upgrade();
        match owner {
            Some(tx) => tx.close(),
            None => self.close(),
        }
        TesseraError::StorageFailure(err.to_string())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.validate_open()?;
        let kv = self.kv.read();
        kv.get(key).map_err(|e| self.fatal(e))
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.validate_open()?;
        let mut kv = self.kv.write();
        kv.put(key, value).map_err(|e| self.fatal(e))
    }

    pub fn put_untracked(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.validate_open()?;
        let mut kv = self.kv.write();
        kv.put_untracked(key, value).map_err(|e| self.fatal(e))
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.validate_open()?;
        let mut kv = self.kv.write();
        kv.delete(key).map_err(|e| self.fatal(e))
    }

    /// Greatest key with the given prefix. The prefix's last byte must be
    /// below `0xFF`, which the encoding layer guarantees.
    pub fn get_last(&self, prefix: &[u8]) -> Result<Option<Vec<u8>>> {
        self.validate_open()?;
        debug_assert!(prefix.last().is_some_and(|b| *b != 0xFF));
        let mut upper = prefix.to_vec();
        match upper.last_mut() {
            Some(last) => *last = last.wrapping_add(1),
            None => return Err(TesseraError::Internal("empty get_last prefix")),
        }
        let mut cursor = self.internal_cursor()?;
        let found = {
            let _kv = self.kv.read();
            cursor.seek_for_prev(&upper).map_err(|e| self.fatal(e))?
        };
        if self.tx_type.is_read() {
            self.recycle(cursor);
        }
        Ok(found.and_then(|(key, _)| key.starts_with(prefix).then_some(key)))
    }

    /// Registered prefix iterator. Closing the transaction closes it; its
    /// cursor returns to the pool on drop in read transactions.
    pub fn iterate(self: &Arc<Self>, prefix: &[u8]) -> Result<TxIterator> {
        self.validate_open()?;
        let core = Arc::new(IteratorCore {
            storage: Arc::clone(self),
            prefix: prefix.to_vec(),
            closed: AtomicBool::new(false),
            state: Mutex::new(IterState {
                cursor: None,
                started: false,
                done: false,
            }),
        });
        let mut iterators = self.iterators.lock();
        iterators.retain(|weak| weak.strong_count() > 0);
        iterators.push(Arc::downgrade(&core));
        Ok(TxIterator { core })
    }

    fn internal_cursor(&self) -> Result<Box<dyn KvCursor>> {
        if self.tx_type.is_read() {
            if let Some(cursor) = self.recycled.lock().pop() {
                return Ok(cursor);
            }
        }
        let kv = self.kv.read();
        kv.cursor().map_err(|e| self.fatal(e))
    }

    fn recycle(&self, cursor: Box<dyn KvCursor>) {
        debug_assert!(self.tx_type.is_read());
        if self.is_open() {
            self.recycled.lock().push(cursor);
        }
    }

    pub(crate) fn disable_indexing(&self) {
        self.kv.write().disable_indexing();
    }

    pub(crate) fn commit_kv(&self) -> crate::kv::KvResult<()> {
        self.kv.write().commit()
    }

    pub(crate) fn rollback_kv(&self) -> Result<()> {
        self.validate_open()?;
        self.kv
            .write()
            .rollback()
            .map_err(|e| TesseraError::StorageFailure(e.to_string()))
    }

    /// Replaces the read snapshot with a fresh one. Pooled cursors pin the
    /// old snapshot, so the pool is drained.
    pub(crate) fn refresh(&self) -> Result<()> {
        debug_assert!(self.tx_type.is_read());
        self.validate_open()?;
        let fresh = self
            .engine
            .begin_tx(false)
            .map_err(|e| TesseraError::StorageFailure(e.to_string()))?;
        let old = std::mem::replace(&mut *self.kv.write(), fresh);
        drop(old);
        self.recycled.lock().clear();
        Ok(())
    }

    pub(crate) fn close(&self) {
        if self
            .is_open
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            for weak in self.iterators.lock().drain(..) {
                if let Some(core) = weak.upgrade() {
                    core.close_abandon();
                }
            }
            self.recycled.lock().clear();
            // Skipped when a failing call still holds the lock; the buffer
            // dies with the engine transaction either way.
            if let Some(mut kv) = self.kv.try_write() {
                let _ = kv.rollback();
            }
        }
    }
}

struct IterState {
    cursor: Option<Box<dyn KvCursor>>,
    started: bool,
    done: bool,
}

struct IteratorCore {
    storage: Arc<TxStorage>,
    prefix: Vec<u8>,
    closed: AtomicBool,
    state: Mutex<IterState>,
}

impl IteratorCore {
    fn step(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if self.closed.load(Ordering::Acquire) || !self.storage.is_open() {
            return Err(TesseraError::TransactionClosed);
        }
        let mut state = self.state.lock();
        if state.done {
            return Ok(None);
        }
        if state.cursor.is_none() {
            state.cursor = Some(self.storage.internal_cursor()?);
        }
        let started = state.started;
        state.started = true;
        let cursor = state.cursor.as_mut().expect("cursor installed above");
        let entry = {
            let _kv = self.storage.kv.read();
            if started {
                cursor.next()
            } else {
                cursor.seek(&self.prefix)
            }
        };
        match entry {
            Ok(Some(found)) => Ok(Some(found)),
            Ok(None) => {
                state.done = true;
                Ok(None)
            }
            Err(e) => Err(self.storage.fatal(e)),
        }
    }

    fn close_abandon(&self) {
        self.closed.store(true, Ordering::Release);
        // try_lock: a step in flight on another thread finishes first and
        // observes the closed flag on its next call.
        if let Some(mut state) = self.state.try_lock() {
            state.cursor = None;
            state.done = true;
        }
    }
}

/// Prefix iterator over a transaction's read view.
pub struct TxIterator {
    core: Arc<IteratorCore>,
}

impl Iterator for TxIterator {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.core.step() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl Drop for TxIterator {
    fn drop(&mut self) {
        let mut state = self.core.state.lock();
        if let Some(cursor) = state.cursor.take() {
            if self.core.storage.tx_type.is_read()
                && !self.core.closed.load(Ordering::Acquire)
                && self.core.storage.is_open()
            {
                self.core.storage.recycle(cursor);
            }
        }
        state.done = true;
    }
}
