//! Thing graph: instances, has-edges, and role players.
//!
//! Creations and edge writes buffer in memory and flush at commit; reads
//! merge the buffer with a storage prefix scan so a transaction observes
//! its own writes.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::db::{TxIterator, TxStorage};
use crate::error::{Result, TesseraError};
use crate::graph::encoding::{
    has_edge_key, has_edge_reverse_key, role_player_key, role_player_reverse_key, EdgeKind,
    ThingVertexId, TypeVertexId, Value, VertexKind, THING_IID_LEN,
};
use crate::graph::keygen::DataKeyGenerator;
use crate::graph::schema_graph::SchemaGraph;

struct RolePlayerEdge {
    relation: ThingVertexId,
    role_type: TypeVertexId,
    repetition: u8,
    player: ThingVertexId,
}

#[derive(Default)]
struct Inner {
    things: FxHashMap<ThingVertexId, Option<Value>>,
    has: FxHashMap<ThingVertexId, Vec<ThingVertexId>>,
    role_players: Vec<RolePlayerEdge>,
    pending: FxHashMap<Vec<u8>, Option<Vec<u8>>>,
}

pub struct DataGraph {
    storage: Arc<TxStorage>,
    schema: Arc<SchemaGraph>,
    keys: Arc<DataKeyGenerator>,
    inner: RwLock<Inner>,
}

impl DataGraph {
    pub fn new(
        storage: Arc<TxStorage>,
        schema: Arc<SchemaGraph>,
        keys: Arc<DataKeyGenerator>,
    ) -> Self {
        DataGraph {
            storage,
            schema,
            keys,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn storage(&self) -> &Arc<TxStorage> {
        &self.storage
    }

    pub fn schema(&self) -> &Arc<SchemaGraph> {
        &self.schema
    }

    pub fn is_modified(&self) -> bool {
        !self.inner.read().pending.is_empty()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.things.clear();
        inner.has.clear();
        inner.role_players.clear();
        inner.pending.clear();
    }

    fn create_thing(&self, type_: TypeVertexId, value: Option<Value>) -> Result<ThingVertexId> {
        if self.schema.is_abstract(type_)? {
            return Err(TesseraError::TypeWrite(format!(
                "'{}' is abstract and cannot have instances",
                self.schema.label(type_)?
            )));
        }
        let kind = type_
            .kind()
            .instance_kind()
            .ok_or(TesseraError::Internal("type kind without instances"))?;
        let seq = self.keys.next_seq(&self.storage, kind, type_.id())?;
        let id = ThingVertexId::new(kind, type_.id(), seq);
        let record = value.as_ref().map_or_else(Vec::new, Value::encode);
        let mut inner = self.inner.write();
        inner.pending.insert(id.bytes().to_vec(), Some(record));
        inner.things.insert(id, value);
        Ok(id)
    }

    pub fn create_entity(&self, type_: TypeVertexId) -> Result<ThingVertexId> {
        if type_.kind() != VertexKind::EntityType {
            return Err(TesseraError::IllegalCast {
                from: type_.kind().name(),
                to: VertexKind::EntityType.name(),
            });
        }
        self.create_thing(type_, None)
    }

    pub fn create_relation(&self, type_: TypeVertexId) -> Result<ThingVertexId> {
        if type_.kind() != VertexKind::RelationType {
            return Err(TesseraError::IllegalCast {
                from: type_.kind().name(),
                to: VertexKind::RelationType.name(),
            });
        }
        self.create_thing(type_, None)
    }

    pub fn create_attribute(&self, type_: TypeVertexId, value: Value) -> Result<ThingVertexId> {
        if type_.kind() != VertexKind::AttributeType {
            return Err(TesseraError::IllegalCast {
                from: type_.kind().name(),
                to: VertexKind::AttributeType.name(),
            });
        }
        match self.schema.value_type(type_)? {
            Some(declared) if declared == value.value_type() => {}
            Some(declared) => {
                return Err(TesseraError::TypeWrite(format!(
                    "attribute value of type {} does not match declared {}",
                    value.value_type().name(),
                    declared.name()
                )))
            }
            None => {
                return Err(TesseraError::TypeWrite(
                    "attribute type has no value type".to_string(),
                ))
            }
        }
        self.create_thing(type_, Some(value))
    }

    /// Records ownership of an attribute instance.
    pub fn put_has(&self, owner: ThingVertexId, attribute: ThingVertexId) -> Result<()> {
        if attribute.kind() != VertexKind::Attribute {
            return Err(TesseraError::IllegalCast {
                from: attribute.kind().name(),
                to: VertexKind::Attribute.name(),
            });
        }
        let mut inner = self.inner.write();
        inner
            .pending
            .insert(has_edge_key(owner, attribute), Some(Vec::new()));
        inner
            .pending
            .insert(has_edge_reverse_key(owner, attribute), Some(Vec::new()));
        let owned = inner.has.entry(owner).or_default();
        if !owned.contains(&attribute) {
            owned.push(attribute);
        }
        Ok(())
    }

    /// Records a role player, allocating the next repetition index for the
    /// (relation, role, player) triple.
    pub fn put_role_player(
        &self,
        relation: ThingVertexId,
        role_type: TypeVertexId,
        player: ThingVertexId,
    ) -> Result<u8> {
        if relation.kind() != VertexKind::Relation {
            return Err(TesseraError::IllegalCast {
                from: relation.kind().name(),
                to: VertexKind::Relation.name(),
            });
        }
        if role_type.kind() != VertexKind::RoleType {
            return Err(TesseraError::IllegalCast {
                from: role_type.kind().name(),
                to: VertexKind::RoleType.name(),
            });
        }
        let repetition = self.next_repetition(relation, role_type, player)?;
        let mut inner = self.inner.write();
        inner.pending.insert(
            role_player_key(relation, role_type, repetition, player),
            Some(Vec::new()),
        );
        inner.pending.insert(
            role_player_reverse_key(relation, role_type, repetition, player),
            Some(Vec::new()),
        );
        inner.role_players.push(RolePlayerEdge {
            relation,
            role_type,
            repetition,
            player,
        });
        Ok(repetition)
    }

    fn next_repetition(
        &self,
        relation: ThingVertexId,
        role_type: TypeVertexId,
        player: ThingVertexId,
    ) -> Result<u8> {
        let mut max: Option<u8> = None;
        {
            let inner = self.inner.read();
            for edge in &inner.role_players {
                if edge.relation == relation
                    && edge.role_type == role_type
                    && edge.player == player
                {
                    max = Some(max.map_or(edge.repetition, |m| m.max(edge.repetition)));
                }
            }
        }
        let mut prefix = Vec::with_capacity(THING_IID_LEN + 3);
        prefix.extend_from_slice(&relation.bytes());
        prefix.push(EdgeKind::RolePlayer.infix());
        prefix.extend_from_slice(&role_type.id().to_be_bytes());
        for entry in self.storage.iterate(&prefix)? {
            let (key, _) = entry?;
            if key.len() != 2 * THING_IID_LEN + 4 {
                return Err(TesseraError::Internal("malformed role player record"));
            }
            let repetition = key[THING_IID_LEN + 3];
            let stored_player = ThingVertexId::from_bytes(&key[THING_IID_LEN + 4..])?;
            if stored_player == player {
                max = Some(max.map_or(repetition, |m| m.max(repetition)));
            }
        }
        match max {
            Some(u8::MAX) => Err(TesseraError::Internal("role player repetitions exhausted")),
            Some(m) => Ok(m + 1),
            None => Ok(0),
        }
    }

    /// Attribute instances owned by a thing, buffered writes included.
    pub fn has_of(&self, owner: ThingVertexId) -> Result<Vec<ThingVertexId>> {
        let mut owned: Vec<ThingVertexId> = self
            .inner
            .read()
            .has
            .get(&owner)
            .cloned()
            .unwrap_or_default();
        let mut prefix = Vec::with_capacity(THING_IID_LEN + 1);
        prefix.extend_from_slice(&owner.bytes());
        prefix.push(EdgeKind::HasInstance.infix());
        for entry in self.storage.iterate(&prefix)? {
            let (key, _) = entry?;
            if key.len() != 2 * THING_IID_LEN + 1 {
                return Err(TesseraError::Internal("malformed has record"));
            }
            let attribute = ThingVertexId::from_bytes(&key[THING_IID_LEN + 1..])?;
            if !owned.contains(&attribute) {
                owned.push(attribute);
            }
        }
        Ok(owned)
    }

    pub fn attribute_value(&self, id: ThingVertexId) -> Result<Option<Value>> {
        if let Some(value) = self.inner.read().things.get(&id) {
            return Ok(value.clone());
        }
        match self.storage.get(&id.bytes())? {
            Some(record) if !record.is_empty() => Ok(Some(Value::decode(&record)?)),
            _ => Ok(None),
        }
    }

    /// Lazy iteration over one type's instances: this transaction's buffered
    /// creations first, then the storage scan.
    pub fn instances_of(&self, type_: TypeVertexId) -> Result<InstanceIter> {
        let kind = type_
            .kind()
            .instance_kind()
            .ok_or(TesseraError::Internal("type kind without instances"))?;
        let buffered: Vec<ThingVertexId> = self
            .inner
            .read()
            .things
            .keys()
            .filter(|id| id.kind() == kind && id.type_id().ok() == Some(type_))
            .copied()
            .collect();
        let prefix = ThingVertexId::instance_prefix(kind, type_.id());
        let scan = self.storage.iterate(&prefix)?;
        let seen = buffered_set(&buffered);
        Ok(InstanceIter {
            buffered: buffered.into_iter(),
            seen,
            scan,
        })
    }

    pub fn has_instances(&self, type_: TypeVertexId) -> Result<bool> {
        Ok(self.instances_of(type_)?.next().transpose()?.is_some())
    }

    /// Things created by this transaction, for commit-time validation.
    pub fn buffered_things(&self) -> Vec<ThingVertexId> {
        self.inner.read().things.keys().copied().collect()
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

fn buffered_set(buffered: &[ThingVertexId]) -> rustc_hash::FxHashSet<ThingVertexId> {
    buffered.iter().copied().collect()
}

/// Yields instance iids; storage keys that are edge records under the same
/// prefix are skipped by length.
pub struct InstanceIter {
    buffered: std::vec::IntoIter<ThingVertexId>,
    seen: rustc_hash::FxHashSet<ThingVertexId>,
    scan: TxIterator,
}

impl Iterator for InstanceIter {
    type Item = Result<ThingVertexId>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(id) = self.buffered.next() {
            return Some(Ok(id));
        }
        loop {
            let (key, _) = match self.scan.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };
            if key.len() != THING_IID_LEN {
                continue;
            }
            match ThingVertexId::from_bytes(&key) {
                Ok(id) if self.seen.contains(&id) => continue,
                Ok(id) => return Some(Ok(id)),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
