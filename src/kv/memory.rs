//! Reference engine: an ordered in-memory store with version chains.
//!
//! Every committed write transaction is assigned a commit sequence number;
//! a snapshot is the sequence observed at begin. A key's visible version at
//! snapshot `s` is the greatest version with sequence `<= s`; deletions are
//! tombstones. Write transactions overlay their live buffer over the
//! snapshot for reads and cursors.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{KvCursor, KvEngine, KvError, KvMetrics, KvResult, KvTx};

type CommitSeq = u64;

#[derive(Debug, Clone)]
struct Version {
    seq: CommitSeq,
    value: Option<Vec<u8>>,
}

#[derive(Default)]
struct Committed {
    seq: CommitSeq,
    versions: BTreeMap<Vec<u8>, Vec<Version>>,
}

impl Committed {
    fn visible(&self, key: &[u8], snapshot: CommitSeq) -> Option<&Vec<u8>> {
        let chain = self.versions.get(key)?;
        chain
            .iter()
            .rev()
            .find(|v| v.seq <= snapshot)
            .and_then(|v| v.value.as_ref())
    }
}

#[derive(Default)]
struct Counters {
    cursors_created: AtomicU64,
    transactions_begun: AtomicU64,
}

pub struct MemoryKv {
    committed: Arc<RwLock<Committed>>,
    counters: Arc<Counters>,
}

impl MemoryKv {
    pub fn new() -> Self {
        MemoryKv {
            committed: Arc::new(RwLock::new(Committed::default())),
            counters: Arc::new(Counters::default()),
        }
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl KvEngine for MemoryKv {
    fn begin_tx(&self, writable: bool) -> KvResult<Box<dyn KvTx>> {
        self.counters.transactions_begun.fetch_add(1, Ordering::Relaxed);
        let snapshot = self.committed.read().seq;
        Ok(Box::new(MemoryTx {
            committed: Arc::clone(&self.committed),
            counters: Arc::clone(&self.counters),
            snapshot,
            writable,
            buffer: Arc::new(RwLock::new(BTreeMap::new())),
            open: true,
        }))
    }

    fn metrics(&self) -> KvMetrics {
        KvMetrics {
            cursors_created: self.counters.cursors_created.load(Ordering::Relaxed),
            transactions_begun: self.counters.transactions_begun.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
struct Mutation {
    value: Option<Vec<u8>>,
    tracked: bool,
}

struct MemoryTx {
    committed: Arc<RwLock<Committed>>,
    counters: Arc<Counters>,
    snapshot: CommitSeq,
    writable: bool,
    buffer: Arc<RwLock<BTreeMap<Vec<u8>, Mutation>>>,
    open: bool,
}

impl MemoryTx {
    fn buffered_write(&mut self, key: &[u8], value: Option<Vec<u8>>, tracked: bool) -> KvResult<()> {
        if !self.open {
            return Err(KvError::Closed);
        }
        debug_assert!(self.writable);
        self.buffer
            .write()
            .insert(key.to_vec(), Mutation { value, tracked });
        Ok(())
    }
}

impl KvTx for MemoryTx {
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        if !self.open {
            return Err(KvError::Closed);
        }
        if let Some(mutation) = self.buffer.read().get(key) {
            return Ok(mutation.value.clone());
        }
        Ok(self.committed.read().visible(key, self.snapshot).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> KvResult<()> {
        self.buffered_write(key, Some(value.to_vec()), true)
    }

    fn put_untracked(&mut self, key: &[u8], value: &[u8]) -> KvResult<()> {
        self.buffered_write(key, Some(value.to_vec()), false)
    }

    fn delete(&mut self, key: &[u8]) -> KvResult<()> {
        self.buffered_write(key, None, true)
    }

    fn cursor(&self) -> KvResult<Box<dyn KvCursor>> {
        if !self.open {
            return Err(KvError::Closed);
        }
        self.counters.cursors_created.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemoryCursor {
            committed: Arc::clone(&self.committed),
            buffer: Arc::clone(&self.buffer),
            snapshot: self.snapshot,
            prefix: Vec::new(),
            position: None,
        }))
    }

    fn disable_indexing(&mut self) {
        // No uncommitted-read index to skip.
    }

    fn commit(&mut self) -> KvResult<()> {
        if !self.open {
            return Err(KvError::Closed);
        }
        let mut committed = self.committed.write();
        let buffer = self.buffer.read();
        for (key, mutation) in buffer.iter() {
            if !mutation.tracked {
                continue;
            }
            if let Some(chain) = committed.versions.get(key) {
                let conflicting = chain.last().map_or(false, |v| v.seq > self.snapshot);
                if conflicting {
                    return Err(KvError::Conflict);
                }
            }
        }
        committed.seq += 1;
        let seq = committed.seq;
        for (key, mutation) in buffer.iter() {
            committed
                .versions
                .entry(key.clone())
                .or_default()
                .push(Version {
                    seq,
                    value: mutation.value.clone(),
                });
        }
        drop(buffer);
        self.open = false;
        Ok(())
    }

    fn rollback(&mut self) -> KvResult<()> {
        if !self.open {
            return Err(KvError::Closed);
        }
        self.buffer.write().clear();
        Ok(())
    }
}

/// Stateless-stepping cursor: every advance is a fresh range query over the
/// committed map merged with the transaction buffer, so a cursor can be
/// re-seeked indefinitely and shared through a recycling pool.
struct MemoryCursor {
    committed: Arc<RwLock<Committed>>,
    buffer: Arc<RwLock<BTreeMap<Vec<u8>, Mutation>>>,
    snapshot: CommitSeq,
    prefix: Vec<u8>,
    position: Option<Vec<u8>>,
}

impl MemoryCursor {
    fn first_at_or_after(&self, lower: Bound<Vec<u8>>) -> Option<(Vec<u8>, Vec<u8>)> {
        let committed = self.committed.read();
        let buffer = self.buffer.read();
        let range = (lower, Bound::Unbounded);
        let mut c_iter = committed.versions.range::<Vec<u8>, _>(range.clone()).peekable();
        let mut b_iter = buffer.range::<Vec<u8>, _>(range).peekable();
        loop {
            let c_key = c_iter.peek().map(|(k, _)| (*k).clone());
            let b_key = b_iter.peek().map(|(k, _)| (*k).clone());
            match (c_key, b_key) {
                (None, None) => return None,
                (Some(_), None) => {
                    let (key, _) = c_iter.next().unwrap();
                    if let Some(value) = committed.visible(key, self.snapshot) {
                        return Some((key.clone(), value.clone()));
                    }
                }
                (None, Some(_)) => {
                    let (key, mutation) = b_iter.next().unwrap();
                    if let Some(value) = &mutation.value {
                        return Some((key.clone(), value.clone()));
                    }
                }
                (Some(ck), Some(bk)) if bk < ck => {
                    let (key, mutation) = b_iter.next().unwrap();
                    if let Some(value) = &mutation.value {
                        return Some((key.clone(), value.clone()));
                    }
                }
                (Some(ck), Some(bk)) if ck < bk => {
                    let (key, _) = c_iter.next().unwrap();
                    if let Some(value) = committed.visible(key, self.snapshot) {
                        return Some((key.clone(), value.clone()));
                    }
                }
                (Some(_), Some(_)) => {
                    // Same key: the buffer shadows the committed chain.
                    c_iter.next();
                    let (key, mutation) = b_iter.next().unwrap();
                    if let Some(value) = &mutation.value {
                        return Some((key.clone(), value.clone()));
                    }
                }
            }
        }
    }

    fn last_at_or_before(&self, upper: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
        let committed = self.committed.read();
        let buffer = self.buffer.read();
        let range = (Bound::Unbounded, Bound::Included(upper.to_vec()));
        let mut c_iter = committed
            .versions
            .range::<Vec<u8>, _>(range.clone())
            .rev()
            .peekable();
        let mut b_iter = buffer.range::<Vec<u8>, _>(range).rev().peekable();
        loop {
            let c_key = c_iter.peek().map(|(k, _)| (*k).clone());
            let b_key = b_iter.peek().map(|(k, _)| (*k).clone());
            match (c_key, b_key) {
                (None, None) => return None,
                (Some(_), None) => {
                    let (key, _) = c_iter.next().unwrap();
                    if let Some(value) = committed.visible(key, self.snapshot) {
                        return Some((key.clone(), value.clone()));
                    }
                }
                (None, Some(_)) => {
                    let (key, mutation) = b_iter.next().unwrap();
                    if let Some(value) = &mutation.value {
                        return Some((key.clone(), value.clone()));
                    }
                }
                (Some(ck), Some(bk)) if bk > ck => {
                    let (key, mutation) = b_iter.next().unwrap();
                    if let Some(value) = &mutation.value {
                        return Some((key.clone(), value.clone()));
                    }
                }
                (Some(ck), Some(bk)) if ck > bk => {
                    let (key, _) = c_iter.next().unwrap();
                    if let Some(value) = committed.visible(key, self.snapshot) {
                        return Some((key.clone(), value.clone()));
                    }
                }
                (Some(_), Some(_)) => {
                    c_iter.next();
                    let (key, mutation) = b_iter.next().unwrap();
                    if let Some(value) = &mutation.value {
                        return Some((key.clone(), value.clone()));
                    }
                }
            }
        }
    }
}

impl KvCursor for MemoryCursor {
    fn seek(&mut self, prefix: &[u8]) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        self.prefix = prefix.to_vec();
        self.position = None;
        match self.first_at_or_after(Bound::Included(prefix.to_vec())) {
            Some((key, value)) if key.starts_with(prefix) => {
                self.position = Some(key.clone());
                Ok(Some((key, value)))
            }
            _ => Ok(None),
        }
    }

    fn next(&mut self) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        let position = match &self.position {
            Some(p) => p.clone(),
            None => return Ok(None),
        };
        match self.first_at_or_after(Bound::Excluded(position)) {
            Some((key, value)) if key.starts_with(&self.prefix) => {
                self.position = Some(key.clone());
                Ok(Some((key, value)))
            }
            _ => {
                self.position = None;
                Ok(None)
            }
        }
    }

    fn seek_for_prev(&mut self, upper: &[u8]) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(self.last_at_or_before(upper))
    }
}
