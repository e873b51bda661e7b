//! Monotonic identifier generators, seeded from storage on first use.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::db::TxStorage;
use crate::error::{Result, TesseraError};
use crate::graph::encoding::{ThingVertexId, TypeVertexId, VertexKind};

/// Allocates `u16` type ids per type kind. Ids whose low byte is `0xFF` are
/// skipped so every type iid is usable as a `get_last` prefix.
pub struct SchemaKeyGenerator {
    next: Mutex<FxHashMap<u8, u16>>,
}

impl SchemaKeyGenerator {
    pub fn new() -> Self {
        SchemaKeyGenerator {
            next: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn next_id(&self, storage: &TxStorage, kind: VertexKind) -> Result<u16> {
        debug_assert!(kind.is_type());
        let mut next = self.next.lock();
        let mut candidate = match next.get(&kind.prefix()) {
            Some(id) => *id,
            None => match storage.get_last(&[kind.prefix()])? {
                Some(key) => TypeVertexId::from_bytes(&key)?.id().wrapping_add(1),
                None => 1,
            },
        };
        while candidate & 0xFF == 0xFF {
            candidate = candidate.wrapping_add(1);
        }
        if candidate == 0 {
            return Err(TesseraError::Internal("type id space exhausted"));
        }
        next.insert(kind.prefix(), candidate + 1);
        Ok(candidate)
    }
}

impl Default for SchemaKeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocates `u64` instance sequences per concrete (thing kind, type id).
pub struct DataKeyGenerator {
    next: Mutex<FxHashMap<[u8; 3], u64>>,
}

impl DataKeyGenerator {
    pub fn new() -> Self {
        DataKeyGenerator {
            next: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn next_seq(&self, storage: &TxStorage, kind: VertexKind, type_id: u16) -> Result<u64> {
        debug_assert!(kind.is_thing());
        let prefix = ThingVertexId::instance_prefix(kind, type_id);
        let mut next = self.next.lock();
        let candidate = match next.get(&prefix) {
            Some(seq) => *seq,
            None => match storage.get_last(&prefix)? {
                // The greatest key under an instance prefix always starts
                // with the greatest instance iid.
                Some(key) => ThingVertexId::from_bytes(&key)?.seq() + 1,
                None => 1,
            },
        };
        next.insert(prefix, candidate + 1);
        Ok(candidate)
    }
}

impl Default for DataKeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}
