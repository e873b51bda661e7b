//! Ordered key-value adapter.
//!
//! The transactional core is engine-agnostic: any store offering ordered
//! byte keys, prefix iteration, and optimistic transactions with a snapshot
//! read view satisfies this contract. Keys are opaque byte strings compared
//! lexicographically.

use thiserror::Error;

mod memory;

pub use memory::MemoryKv;

pub type KvResult<T> = std::result::Result<T, KvError>;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("optimistic write conflict")]
    Conflict,
    #[error("key-value transaction is closed")]
    Closed,
}

/// Diagnostic counters exposed by an engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct KvMetrics {
    pub cursors_created: u64,
    pub transactions_begun: u64,
}

/// An ordered key-value store with optimistic transactions.
pub trait KvEngine: Send + Sync {
    /// Begins a transaction whose reads observe a snapshot taken now.
    fn begin_tx(&self, writable: bool) -> KvResult<Box<dyn KvTx>>;

    fn metrics(&self) -> KvMetrics;
}

/// A single optimistic transaction.
///
/// Writes through [`KvTx::put`] and [`KvTx::delete`] are tracked: commit
/// validates that no other transaction committed a version of those keys
/// after this transaction's snapshot, and fails with [`KvError::Conflict`]
/// otherwise. [`KvTx::put_untracked`] bypasses that validation.
pub trait KvTx: Send + Sync {
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>>;

    fn put(&mut self, key: &[u8], value: &[u8]) -> KvResult<()>;

    fn put_untracked(&mut self, key: &[u8], value: &[u8]) -> KvResult<()>;

    fn delete(&mut self, key: &[u8]) -> KvResult<()>;

    /// Opens a cursor over this transaction's read view. Cursors of write
    /// transactions observe the live write buffer.
    fn cursor(&self) -> KvResult<Box<dyn KvCursor>>;

    /// Hint that no further reads will follow; engines without an
    /// uncommitted-read index ignore it.
    fn disable_indexing(&mut self);

    fn commit(&mut self) -> KvResult<()>;

    /// Discards buffered writes. The snapshot stays readable.
    fn rollback(&mut self) -> KvResult<()>;
}

/// A re-seekable cursor over an ordered snapshot.
pub trait KvCursor: Send {
    /// Positions at the first key starting with `prefix` and returns it.
    fn seek(&mut self, prefix: &[u8]) -> KvResult<Option<(Vec<u8>, Vec<u8>)>>;

    /// Advances to the next key under the seek prefix.
    fn next(&mut self) -> KvResult<Option<(Vec<u8>, Vec<u8>)>>;

    /// Returns the greatest key `<= upper`, without constraining later
    /// [`KvCursor::seek`] calls.
    fn seek_for_prev(&mut self, upper: &[u8]) -> KvResult<Option<(Vec<u8>, Vec<u8>)>>;
}
