//! Persistent type graph.
//!
//! Vertices load lazily, one prefix scan each: the scan over a vertex iid
//! yields its property record and every edge record in both directions.
//! Loaded vertices are cached in an arena keyed by iid; adjacency holds
//! iids, never references. Mutations update the arena and buffer the
//! corresponding key-value operations, which flush at commit.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::db::TxStorage;
use crate::error::{Result, TesseraError};
use crate::graph::encoding::{
    label_index_key, type_edge_key, type_edge_reverse_key, EdgeKind, TypeVertexId, ValueType,
    VertexKind, TYPE_IID_LEN,
};
use crate::graph::keygen::SchemaKeyGenerator;

const FLAG_ABSTRACT: u8 = 0x01;
const FLAG_ROOT: u8 = 0x02;

/// An outgoing type edge, optionally shadowing an ancestor's edge of the
/// same kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TypeEdge {
    pub to: TypeVertexId,
    pub overridden: Option<TypeVertexId>,
}

struct TypeVertexState {
    label: String,
    is_abstract: bool,
    is_root: bool,
    value_type: Option<ValueType>,
    outs: FxHashMap<EdgeKind, Vec<TypeEdge>>,
    ins: FxHashMap<EdgeKind, Vec<TypeVertexId>>,
}

impl TypeVertexState {
    fn encode_record(&self) -> Vec<u8> {
        let mut flags = 0u8;
        if self.is_abstract {
            flags |= FLAG_ABSTRACT;
        }
        if self.is_root {
            flags |= FLAG_ROOT;
        }
        let mut record = Vec::with_capacity(2 + self.label.len());
        record.push(flags);
        record.push(self.value_type.map_or(0, ValueType::tag));
        record.extend_from_slice(self.label.as_bytes());
        record
    }

    fn decode_record(record: &[u8]) -> Result<Self> {
        if record.len() < 2 {
            return Err(TesseraError::Internal("truncated type vertex record"));
        }
        let value_type = match record[1] {
            0 => None,
            tag => Some(ValueType::from_tag(tag)?),
        };
        Ok(TypeVertexState {
            label: String::from_utf8(record[2..].to_vec())
                .map_err(|_| TesseraError::Internal("invalid utf8 in type label"))?,
            is_abstract: record[0] & FLAG_ABSTRACT != 0,
            is_root: record[0] & FLAG_ROOT != 0,
            value_type,
            outs: FxHashMap::default(),
            ins: FxHashMap::default(),
        })
    }
}

#[derive(Default)]
struct Inner {
    vertices: FxHashMap<TypeVertexId, TypeVertexState>,
    by_label: FxHashMap<String, TypeVertexId>,
    erased: FxHashSet<TypeVertexId>,
    pending: FxHashMap<Vec<u8>, Option<Vec<u8>>>,
}

pub struct SchemaGraph {
    storage: Arc<TxStorage>,
    keys: Arc<SchemaKeyGenerator>,
    read_only: bool,
    inner: RwLock<Inner>,
}

impl SchemaGraph {
    pub fn new(storage: Arc<TxStorage>, keys: Arc<SchemaKeyGenerator>, read_only: bool) -> Self {
        SchemaGraph {
            storage,
            keys,
            read_only,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn storage(&self) -> &Arc<TxStorage> {
        &self.storage
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_modified(&self) -> bool {
        !self.inner.read().pending.is_empty()
    }

    /// Drops every cached vertex and buffered mutation.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.vertices.clear();
        inner.by_label.clear();
        inner.erased.clear();
        inner.pending.clear();
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(TesseraError::SessionDataViolation);
        }
        Ok(())
    }

    /// Creates the root type vertices when the store is empty. Returns
    /// whether anything was written.
    pub fn initialise(&self) -> Result<bool> {
        if self.get("thing")?.is_some() {
            return Ok(false);
        }
        let thing = self.create_root(VertexKind::ThingType)?;
        for kind in [
            VertexKind::EntityType,
            VertexKind::AttributeType,
            VertexKind::RelationType,
            VertexKind::RoleType,
        ] {
            let root = self.create_root(kind)?;
            self.put_edge(root, EdgeKind::Sub, thing)?;
        }
        Ok(true)
    }

    fn create_root(&self, kind: VertexKind) -> Result<TypeVertexId> {
        let label = kind
            .root_label()
            .ok_or(TesseraError::Internal("thing kind has no root"))?;
        self.create_vertex(label, kind, true, true, None)
    }

    pub fn create(&self, label: &str, kind: VertexKind) -> Result<TypeVertexId> {
        self.create_vertex(label, kind, false, false, None)
    }

    fn create_vertex(
        &self,
        label: &str,
        kind: VertexKind,
        is_root: bool,
        is_abstract: bool,
        value_type: Option<ValueType>,
    ) -> Result<TypeVertexId> {
        self.ensure_writable()?;
        if !kind.is_type() {
            return Err(TesseraError::Internal("thing kind in type vertex"));
        }
        let mut inner = self.inner.write();
        if self.get_locked(&mut inner, label)?.is_some() {
            return Err(TesseraError::TypeWrite(format!(
                "label '{label}' is already in use"
            )));
        }
        let id = TypeVertexId::new(kind, self.keys.next_id(&self.storage, kind)?);
        let state = TypeVertexState {
            label: label.to_string(),
            is_abstract,
            is_root,
            value_type,
            outs: FxHashMap::default(),
            ins: FxHashMap::default(),
        };
        inner
            .pending
            .insert(id.bytes().to_vec(), Some(state.encode_record()));
        inner
            .pending
            .insert(label_index_key(label), Some(id.bytes().to_vec()));
        inner.by_label.insert(label.to_string(), id);
        inner.vertices.insert(id, state);
        Ok(id)
    }

    pub fn get(&self, label: &str) -> Result<Option<TypeVertexId>> {
        let mut inner = self.inner.write();
        self.get_locked(&mut inner, label)
    }

    fn get_locked(&self, inner: &mut Inner, label: &str) -> Result<Option<TypeVertexId>> {
        if let Some(id) = inner.by_label.get(label) {
            return Ok(Some(*id));
        }
        let key = label_index_key(label);
        if inner.pending.get(&key) == Some(&None) {
            return Ok(None);
        }
        match self.storage.get(&key)? {
            Some(iid) => {
                let id = TypeVertexId::from_bytes(&iid)?;
                inner.by_label.insert(label.to_string(), id);
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    fn loaded<'a>(
        &self,
        inner: &'a mut Inner,
        id: TypeVertexId,
    ) -> Result<&'a mut TypeVertexState> {
        if inner.erased.contains(&id) {
            return Err(TesseraError::TypeWrite("type has been deleted".to_string()));
        }
        if !inner.vertices.contains_key(&id) {
            let state = self
                .load_vertex(id)?
                .ok_or(TesseraError::Internal("dangling type vertex reference"))?;
            inner.by_label.insert(state.label.clone(), id);
            inner.vertices.insert(id, state);
        }
        Ok(inner.vertices.get_mut(&id).expect("loaded above"))
    }

    fn load_vertex(&self, id: TypeVertexId) -> Result<Option<TypeVertexState>> {
        let prefix = id.bytes();
        let mut record: Option<Vec<u8>> = None;
        let mut outs: FxHashMap<EdgeKind, Vec<TypeEdge>> = FxHashMap::default();
        let mut ins: FxHashMap<EdgeKind, Vec<TypeVertexId>> = FxHashMap::default();
        for entry in self.storage.iterate(&prefix)? {
            let (key, value) = entry?;
            if key.len() == TYPE_IID_LEN {
                record = Some(value);
            } else if key.len() == 2 * TYPE_IID_LEN + 1 {
                let (kind, reverse) = EdgeKind::from_infix(key[TYPE_IID_LEN])?;
                let other = TypeVertexId::from_bytes(&key[TYPE_IID_LEN + 1..])?;
                if reverse {
                    ins.entry(kind).or_default().push(other);
                } else {
                    let overridden = if value.is_empty() {
                        None
                    } else {
                        Some(TypeVertexId::from_bytes(&value)?)
                    };
                    outs.entry(kind).or_default().push(TypeEdge { to: other, overridden });
                }
            } else {
                return Err(TesseraError::Internal("malformed schema record"));
            }
        }
        Ok(record
            .map(|r| TypeVertexState::decode_record(&r))
            .transpose()?
            .map(|mut state| {
                state.outs = outs;
                state.ins = ins;
                state
            }))
    }

    pub fn label(&self, id: TypeVertexId) -> Result<String> {
        let mut inner = self.inner.write();
        Ok(self.loaded(&mut inner, id)?.label.clone())
    }

    pub fn set_label(&self, id: TypeVertexId, label: &str) -> Result<()> {
        self.ensure_writable()?;
        let mut inner = self.inner.write();
        if self.get_locked(&mut inner, label)?.is_some() {
            return Err(TesseraError::TypeWrite(format!(
                "label '{label}' is already in use"
            )));
        }
        let state = self.loaded(&mut inner, id)?;
        let old = std::mem::replace(&mut state.label, label.to_string());
        let record = state.encode_record();
        inner.by_label.remove(&old);
        inner.by_label.insert(label.to_string(), id);
        inner.pending.insert(label_index_key(&old), None);
        inner
            .pending
            .insert(label_index_key(label), Some(id.bytes().to_vec()));
        inner.pending.insert(id.bytes().to_vec(), Some(record));
        Ok(())
    }

    pub fn is_abstract(&self, id: TypeVertexId) -> Result<bool> {
        let mut inner = self.inner.write();
        Ok(self.loaded(&mut inner, id)?.is_abstract)
    }

    pub fn set_abstract(&self, id: TypeVertexId, is_abstract: bool) -> Result<()> {
        self.ensure_writable()?;
        let mut inner = self.inner.write();
        let state = self.loaded(&mut inner, id)?;
        state.is_abstract = is_abstract;
        let record = state.encode_record();
        inner.pending.insert(id.bytes().to_vec(), Some(record));
        Ok(())
    }

    pub fn is_root(&self, id: TypeVertexId) -> Result<bool> {
        let mut inner = self.inner.write();
        Ok(self.loaded(&mut inner, id)?.is_root)
    }

    pub fn value_type(&self, id: TypeVertexId) -> Result<Option<ValueType>> {
        let mut inner = self.inner.write();
        Ok(self.loaded(&mut inner, id)?.value_type)
    }

    pub fn set_value_type(&self, id: TypeVertexId, value_type: ValueType) -> Result<()> {
        self.ensure_writable()?;
        let mut inner = self.inner.write();
        let state = self.loaded(&mut inner, id)?;
        state.value_type = Some(value_type);
        let record = state.encode_record();
        inner.pending.insert(id.bytes().to_vec(), Some(record));
        Ok(())
    }

    /// The single `SUB` parent, absent only on roots.
    pub fn sup(&self, id: TypeVertexId) -> Result<Option<TypeVertexId>> {
        let mut inner = self.inner.write();
        let state = self.loaded(&mut inner, id)?;
        Ok(state
            .outs
            .get(&EdgeKind::Sub)
            .and_then(|edges| edges.first())
            .map(|edge| edge.to))
    }

    pub fn set_sup(&self, id: TypeVertexId, parent: TypeVertexId) -> Result<()> {
        self.ensure_writable()?;
        if let Some(current) = self.sup(id)? {
            if current == parent {
                return Ok(());
            }
            self.delete_edge(id, EdgeKind::Sub, current)?;
        }
        self.put_edge(id, EdgeKind::Sub, parent)
    }

    pub fn outs(&self, id: TypeVertexId, kind: EdgeKind) -> Result<Vec<TypeEdge>> {
        let mut inner = self.inner.write();
        let state = self.loaded(&mut inner, id)?;
        Ok(state.outs.get(&kind).cloned().unwrap_or_default())
    }

    pub fn ins(&self, id: TypeVertexId, kind: EdgeKind) -> Result<Vec<TypeVertexId>> {
        let mut inner = self.inner.write();
        let state = self.loaded(&mut inner, id)?;
        Ok(state.ins.get(&kind).cloned().unwrap_or_default())
    }

    pub fn out_edge(
        &self,
        from: TypeVertexId,
        kind: EdgeKind,
        to: TypeVertexId,
    ) -> Result<Option<TypeEdge>> {
        Ok(self
            .outs(from, kind)?
            .into_iter()
            .find(|edge| edge.to == to))
    }

    /// Idempotent edge insertion; both directions are recorded.
    pub fn put_edge(&self, from: TypeVertexId, kind: EdgeKind, to: TypeVertexId) -> Result<()> {
        self.ensure_writable()?;
        if !kind.is_type_edge() {
            return Err(TesseraError::Internal("thing edge in type graph"));
        }
        let mut inner = self.inner.write();
        self.loaded(&mut inner, to)?;
        let from_state = self.loaded(&mut inner, from)?;
        let edges = from_state.outs.entry(kind).or_default();
        if edges.iter().any(|edge| edge.to == to) {
            return Ok(());
        }
        edges.push(TypeEdge {
            to,
            overridden: None,
        });
        let to_state = inner.vertices.get_mut(&to).expect("loaded above");
        to_state.ins.entry(kind).or_default().push(from);
        inner
            .pending
            .insert(type_edge_key(from, kind, to), Some(Vec::new()));
        inner
            .pending
            .insert(type_edge_reverse_key(from, kind, to), Some(Vec::new()));
        Ok(())
    }

    /// Installs (or clears) the overridden pointer of an existing edge.
    pub fn set_override(
        &self,
        from: TypeVertexId,
        kind: EdgeKind,
        to: TypeVertexId,
        overridden: Option<TypeVertexId>,
    ) -> Result<()> {
        self.ensure_writable()?;
        let mut inner = self.inner.write();
        let from_state = self.loaded(&mut inner, from)?;
        let edge = from_state
            .outs
            .get_mut(&kind)
            .and_then(|edges| edges.iter_mut().find(|edge| edge.to == to))
            .ok_or(TesseraError::Internal("override on missing edge"))?;
        edge.overridden = overridden;
        let value = overridden.map_or_else(Vec::new, |o| o.bytes().to_vec());
        inner
            .pending
            .insert(type_edge_key(from, kind, to), Some(value));
        Ok(())
    }

    /// Idempotent edge removal.
    pub fn delete_edge(&self, from: TypeVertexId, kind: EdgeKind, to: TypeVertexId) -> Result<()> {
        self.ensure_writable()?;
        let mut inner = self.inner.write();
        self.loaded(&mut inner, to)?;
        let from_state = self.loaded(&mut inner, from)?;
        if let Some(edges) = from_state.outs.get_mut(&kind) {
            edges.retain(|edge| edge.to != to);
        }
        let to_state = inner.vertices.get_mut(&to).expect("loaded above");
        if let Some(sources) = to_state.ins.get_mut(&kind) {
            sources.retain(|source| *source != from);
        }
        inner.pending.insert(type_edge_key(from, kind, to), None);
        inner
            .pending
            .insert(type_edge_reverse_key(from, kind, to), None);
        Ok(())
    }

    /// Removes the vertex, its label index entry, and every incident edge.
    pub fn delete_vertex(&self, id: TypeVertexId) -> Result<()> {
        self.ensure_writable()?;
        let (outs, ins) = {
            let mut inner = self.inner.write();
            let state = self.loaded(&mut inner, id)?;
            let outs: Vec<(EdgeKind, TypeVertexId)> = state
                .outs
                .iter()
                .flat_map(|(kind, edges)| edges.iter().map(|edge| (*kind, edge.to)))
                .collect();
            let ins: Vec<(EdgeKind, TypeVertexId)> = state
                .ins
                .iter()
                .flat_map(|(kind, sources)| sources.iter().map(|source| (*kind, *source)))
                .collect();
            (outs, ins)
        };
        for (kind, to) in outs {
            self.delete_edge(id, kind, to)?;
        }
        for (kind, from) in ins {
            self.delete_edge(from, kind, id)?;
        }
        let mut inner = self.inner.write();
        let state = inner
            .vertices
            .remove(&id)
            .ok_or(TesseraError::Internal("deleting unloaded vertex"))?;
        inner.by_label.remove(&state.label);
        inner.pending.insert(label_index_key(&state.label), None);
        inner.pending.insert(id.bytes().to_vec(), None);
        inner.erased.insert(id);
        Ok(())
    }

    /// Writes buffered mutations into the transaction.
    pub fn flush(&self) -> Result<()> {
        let pending: Vec<(Vec<u8>, Option<Vec<u8>>)> = {
            let mut inner = self.inner.write();
            inner.pending.drain().collect()
        };
        for (key, op) in pending {
            match op {
                Some(value) => self.storage.put(&key, &value)?,
                None => self.storage.delete(&key)?,
            }
        }
        Ok(())
    }
}
