use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::db::options::{DatabaseOptions, TransactionOptions, TransactionType};
use crate::db::session::{Session, SessionKind};
use crate::db::transaction::TxStorage;
use crate::error::Result;
use crate::graph::keygen::{DataKeyGenerator, SchemaKeyGenerator};
use crate::graph::schema_graph::SchemaGraph;
use crate::kv::{KvEngine, MemoryKv};
use crate::traversal::TraversalCache;

/// A database owns its engine, the cached schema graph, and the
/// data-read/schema-write lock serialising schema commits against
/// data-transaction opens.
pub struct Database {
    name: String,
    options: DatabaseOptions,
    engine: Arc<dyn KvEngine>,
    data_read_schema_lock: RwLock<()>,
    schema_keys: Arc<SchemaKeyGenerator>,
    data_keys: Arc<DataKeyGenerator>,
    cache: Mutex<Option<Arc<SchemaCache>>>,
}

impl Database {
    pub fn open(name: impl Into<String>) -> Result<Arc<Database>> {
        Self::open_with(name, DatabaseOptions::default())
    }

    pub fn open_with(name: impl Into<String>, options: DatabaseOptions) -> Result<Arc<Database>> {
        Self::open_on(Arc::new(MemoryKv::new()), name, options)
    }

    /// Opens over a caller-provided engine.
    pub fn open_on(
        engine: Arc<dyn KvEngine>,
        name: impl Into<String>,
        options: DatabaseOptions,
    ) -> Result<Arc<Database>> {
        let database = Arc::new(Database {
            name: name.into(),
            options,
            engine,
            data_read_schema_lock: RwLock::new(()),
            schema_keys: Arc::new(SchemaKeyGenerator::new()),
            data_keys: Arc::new(DataKeyGenerator::new()),
            cache: Mutex::new(None),
        });
        database.bootstrap()?;
        info!(database = %database.name, "database opened");
        Ok(database)
    }

    /// Creates the root types through an ordinary schema write transaction
    /// when the store is empty.
    fn bootstrap(self: &Arc<Self>) -> Result<()> {
        let session = Session::new(Arc::clone(self), SessionKind::Schema);
        let tx = session.transaction(TransactionType::Write, TransactionOptions::default())?;
        if tx.schema_graph().initialise()? {
            tx.commit()?;
            debug!(database = %self.name, "root types created");
        } else {
            tx.close();
        }
        session.close();
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    pub fn engine(&self) -> &Arc<dyn KvEngine> {
        &self.engine
    }

    pub fn session(self: &Arc<Self>, kind: SessionKind) -> Arc<Session> {
        Session::new(Arc::clone(self), kind)
    }

    pub(crate) fn data_read_schema_lock(&self) -> &RwLock<()> {
        &self.data_read_schema_lock
    }

    pub(crate) fn schema_keys(&self) -> Arc<SchemaKeyGenerator> {
        Arc::clone(&self.schema_keys)
    }

    pub(crate) fn data_keys(&self) -> Arc<DataKeyGenerator> {
        Arc::clone(&self.data_keys)
    }

    /// The cached schema graph, rebuilt on demand after eviction.
    pub(crate) fn cache(&self) -> Result<Arc<SchemaCache>> {
        let mut slot = self.cache.lock();
        if let Some(cache) = slot.as_ref() {
            return Ok(Arc::clone(cache));
        }
        let storage = TxStorage::open(&self.engine, TransactionType::Read)?;
        let graph = Arc::new(SchemaGraph::new(
            Arc::clone(&storage),
            self.schema_keys(),
            true,
        ));
        let cache = Arc::new(SchemaCache::new(
            storage,
            graph,
            self.options.schema_refresh_rate,
            self.options.traversal_cache_capacity,
        ));
        *slot = Some(Arc::clone(&cache));
        debug!(database = %self.name, "schema cache built");
        Ok(cache)
    }

    /// Evicts the cached schema graph; live data transactions keep it alive
    /// through their pins and the last release closes its storage.
    pub(crate) fn evict_cached_schema(&self) {
        if let Some(cache) = self.cache.lock().take() {
            cache.evict();
            debug!(database = %self.name, "schema cache evicted");
        }
    }
}

/// Shared schema graph over a long-lived read snapshot, pinned by every
/// live data transaction.
pub(crate) struct SchemaCache {
    storage: Arc<TxStorage>,
    graph: Arc<SchemaGraph>,
    traversal: Arc<TraversalCache>,
    refs: AtomicU64,
    may_close: AtomicBool,
    refresh_counter: AtomicU32,
    refresh_rate: u32,
}

impl SchemaCache {
    fn new(
        storage: Arc<TxStorage>,
        graph: Arc<SchemaGraph>,
        refresh_rate: u32,
        traversal_capacity: usize,
    ) -> Self {
        SchemaCache {
            storage,
            graph,
            traversal: Arc::new(TraversalCache::new(traversal_capacity)),
            refs: AtomicU64::new(0),
            may_close: AtomicBool::new(false),
            refresh_counter: AtomicU32::new(0),
            refresh_rate: refresh_rate.max(1),
        }
    }

    pub(crate) fn graph(&self) -> &Arc<SchemaGraph> {
        &self.graph
    }

    #[allow(dead_code)]
    pub(crate) fn traversal(&self) -> &Arc<TraversalCache> {
        &self.traversal
    }

    pub(crate) fn retain(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release(&self) {
        if self.refs.fetch_sub(1, Ordering::AcqRel) == 1 && self.may_close.load(Ordering::Acquire)
        {
            self.storage.close();
        }
    }

    pub(crate) fn evict(&self) {
        self.may_close.store(true, Ordering::Release);
        if self.refs.load(Ordering::Acquire) == 0 {
            self.storage.close();
        }
    }

    /// Signalled by every data commit; every `refresh_rate` signals the
    /// backing snapshot rolls forward so lookups of types committed since
    /// the cache was built do not require a reopen.
    pub(crate) fn may_refresh_storage(&self) {
        let signals = self.refresh_counter.fetch_add(1, Ordering::AcqRel) + 1;
        if signals == self.refresh_rate {
            self.refresh_counter
                .fetch_sub(self.refresh_rate, Ordering::AcqRel);
            match self.storage.refresh() {
                Ok(()) => debug!("schema cache storage refreshed"),
                Err(e) => warn!(error = %e, "schema cache storage refresh failed"),
            }
        }
    }
}
