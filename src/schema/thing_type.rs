//! Schema type lattice operations.
//!
//! Types are handles over the schema graph; there is no handle class
//! hierarchy, operations dispatch on the vertex kind. Root types are
//! ordinary vertices with a root flag, and every mutation on them fails.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::error::{Result, TesseraError};
use crate::graph::data_graph::{DataGraph, InstanceIter};
use crate::graph::encoding::{EdgeKind, ThingVertexId, TypeVertexId, ValueType, VertexKind};
use crate::graph::schema_graph::SchemaGraph;

/// Type-level API of one transaction.
#[derive(Clone)]
pub struct TypeManager {
    schema: Arc<SchemaGraph>,
    data: Arc<DataGraph>,
}

impl TypeManager {
    pub(crate) fn new(schema: Arc<SchemaGraph>, data: Arc<DataGraph>) -> Self {
        TypeManager { schema, data }
    }

    fn handle(&self, vertex: TypeVertexId) -> ThingType {
        ThingType {
            schema: Arc::clone(&self.schema),
            data: Arc::clone(&self.data),
            vertex,
        }
    }

    pub fn get_type(&self, label: &str) -> Result<Option<ThingType>> {
        Ok(self.schema.get(label)?.map(|vertex| self.handle(vertex)))
    }

    fn required(&self, label: &str) -> Result<ThingType> {
        self.get_type(label)?
            .ok_or(TesseraError::Internal("root type missing"))
    }

    pub fn root_thing_type(&self) -> Result<ThingType> {
        self.required("thing")
    }

    pub fn root_entity_type(&self) -> Result<ThingType> {
        self.required("entity")
    }

    pub fn root_attribute_type(&self) -> Result<ThingType> {
        self.required("attribute")
    }

    pub fn root_relation_type(&self) -> Result<ThingType> {
        self.required("relation")
    }

    pub fn root_role_type(&self) -> Result<ThingType> {
        self.required("role")
    }

    fn put_type(&self, label: &str, kind: VertexKind, root: &str) -> Result<ThingType> {
        if let Some(existing) = self.get_type(label)? {
            if existing.kind() != kind {
                return Err(TesseraError::IllegalCast {
                    from: existing.kind().name(),
                    to: kind.name(),
                });
            }
            return Ok(existing);
        }
        let root = self.required(root)?;
        let vertex = self.schema.create(label, kind)?;
        self.schema.put_edge(vertex, EdgeKind::Sub, root.vertex)?;
        Ok(self.handle(vertex))
    }

    pub fn put_entity_type(&self, label: &str) -> Result<ThingType> {
        self.put_type(label, VertexKind::EntityType, "entity")
    }

    pub fn put_relation_type(&self, label: &str) -> Result<ThingType> {
        self.put_type(label, VertexKind::RelationType, "relation")
    }

    pub fn put_attribute_type(&self, label: &str, value_type: ValueType) -> Result<ThingType> {
        let attribute = self.put_type(label, VertexKind::AttributeType, "attribute")?;
        match attribute.value_type()? {
            None => self.schema.set_value_type(attribute.vertex, value_type)?,
            Some(existing) if existing == value_type => {}
            Some(existing) => {
                return Err(TesseraError::TypeWrite(format!(
                    "attribute type '{label}' already has value type {}",
                    existing.name()
                )))
            }
        }
        Ok(attribute)
    }

    /// Recursively validates every type below the thing root.
    pub fn validate_types(&self) -> Result<()> {
        for type_ in self.root_thing_type()?.subs() {
            type_?.validate()?;
        }
        Ok(())
    }

    /// Key cardinality over things created by this transaction: exactly one
    /// owned instance of each visible key attribute type.
    pub fn validate_things(&self) -> Result<()> {
        for thing in self.data.buffered_things() {
            let type_ = self.handle(thing.type_id()?);
            let owned = self.data.has_of(thing)?;
            for key in type_.keys() {
                let key = key?;
                let mut count = 0usize;
                for attribute in &owned {
                    if self.is_instance_of(*attribute, key.vertex)? {
                        count += 1;
                    }
                }
                if count != 1 {
                    return Err(TesseraError::ThingValidation(format!(
                        "instance of '{}' owns {} instances of key attribute '{}'",
                        type_.label()?,
                        count,
                        key.label()?
                    )));
                }
            }
        }
        Ok(())
    }

    fn is_instance_of(&self, thing: ThingVertexId, type_: TypeVertexId) -> Result<bool> {
        let mut current = Some(thing.type_id()?);
        while let Some(level) = current {
            if level == type_ {
                return Ok(true);
            }
            current = self.schema.sup(level)?;
        }
        Ok(false)
    }
}

/// A handle on one schema type vertex.
#[derive(Clone)]
pub struct ThingType {
    schema: Arc<SchemaGraph>,
    data: Arc<DataGraph>,
    vertex: TypeVertexId,
}

impl PartialEq for ThingType {
    fn eq(&self, other: &Self) -> bool {
        self.vertex == other.vertex
    }
}

impl Eq for ThingType {}

impl fmt::Debug for ThingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ThingType").field(&self.vertex).finish()
    }
}

impl ThingType {
    fn handle(&self, vertex: TypeVertexId) -> ThingType {
        ThingType {
            schema: Arc::clone(&self.schema),
            data: Arc::clone(&self.data),
            vertex,
        }
    }

    pub fn vertex(&self) -> TypeVertexId {
        self.vertex
    }

    pub fn kind(&self) -> VertexKind {
        self.vertex.kind()
    }

    pub fn label(&self) -> Result<String> {
        self.schema.label(self.vertex)
    }

    pub fn is_root(&self) -> Result<bool> {
        self.schema.is_root(self.vertex)
    }

    pub fn is_abstract(&self) -> Result<bool> {
        self.schema.is_abstract(self.vertex)
    }

    pub fn value_type(&self) -> Result<Option<ValueType>> {
        self.schema.value_type(self.vertex)
    }

    fn guard_root(&self) -> Result<()> {
        if self.is_root()? {
            return Err(TesseraError::InvalidRootTypeMutation);
        }
        Ok(())
    }

    fn expect_kind(other: &ThingType, kind: VertexKind) -> Result<()> {
        if other.kind() != kind {
            return Err(TesseraError::IllegalCast {
                from: other.kind().name(),
                to: kind.name(),
            });
        }
        Ok(())
    }

    pub fn set_label(&self, label: &str) -> Result<()> {
        self.guard_root()?;
        self.schema.set_label(self.vertex, label)
    }

    pub fn set_abstract(&self, is_abstract: bool) -> Result<()> {
        self.guard_root()?;
        self.schema.set_abstract(self.vertex, is_abstract)
    }

    pub fn sup(&self) -> Result<Option<ThingType>> {
        Ok(self.schema.sup(self.vertex)?.map(|vertex| self.handle(vertex)))
    }

    /// The chain self → root, inclusive.
    pub fn sups(&self) -> Result<Vec<ThingType>> {
        Ok(self
            .sups_ids()?
            .into_iter()
            .map(|vertex| self.handle(vertex))
            .collect())
    }

    fn sups_ids(&self) -> Result<Vec<TypeVertexId>> {
        let mut chain = Vec::new();
        let mut seen = FxHashSet::default();
        let mut current = Some(self.vertex);
        while let Some(vertex) = current {
            if !seen.insert(vertex) {
                return Err(TesseraError::Internal("cycle in sub chain"));
            }
            chain.push(vertex);
            current = self.schema.sup(vertex)?;
        }
        Ok(chain)
    }

    pub fn set_sup(&self, parent: &ThingType) -> Result<()> {
        self.guard_root()?;
        if parent.kind() != self.kind() {
            return Err(TesseraError::IllegalCast {
                from: parent.kind().name(),
                to: self.kind().name(),
            });
        }
        if parent.sups_ids()?.contains(&self.vertex) {
            return Err(TesseraError::TypeWrite(format!(
                "'{}' cannot subtype its own subtype '{}'",
                self.label()?,
                parent.label()?
            )));
        }
        self.schema.set_sup(self.vertex, parent.vertex)
    }

    /// The subtree rooted at self, inclusive, depth-first.
    pub fn subs(&self) -> SubtypesIter {
        let mut seen = FxHashSet::default();
        seen.insert(self.vertex);
        SubtypesIter {
            schema: Arc::clone(&self.schema),
            data: Arc::clone(&self.data),
            stack: vec![self.vertex],
            seen,
            failed: false,
        }
    }

    /// Every instance of the subtree rooted at self.
    pub fn instances(&self) -> InstancesIter {
        InstancesIter {
            data: Arc::clone(&self.data),
            subs: self.subs(),
            current: None,
        }
    }

    fn visible(&self, kinds: &'static [EdgeKind]) -> VisibleTypes {
        VisibleTypes {
            schema: Arc::clone(&self.schema),
            data: Arc::clone(&self.data),
            kinds,
            current: Some(self.vertex),
            queue: VecDeque::new(),
            overridden: FxHashSet::default(),
            failed: false,
        }
    }

    /// Visible keys: declared first, then inherited ones not overridden at
    /// any level below their declaration.
    pub fn keys(&self) -> VisibleTypes {
        self.visible(&[EdgeKind::Key])
    }

    /// Visible attributes over the union of KEY and HAS edges.
    pub fn attributes(&self) -> VisibleTypes {
        self.visible(&[EdgeKind::Key, EdgeKind::Has])
    }

    /// Visible role types this type can play.
    pub fn plays_roles(&self) -> VisibleTypes {
        self.visible(&[EdgeKind::Plays])
    }

    pub fn keys_with_value_type(&self, value_type: ValueType) -> ValueFiltered {
        ValueFiltered {
            inner: self.keys(),
            value_type,
        }
    }

    pub fn attributes_with_value_type(&self, value_type: ValueType) -> ValueFiltered {
        ValueFiltered {
            inner: self.attributes(),
            value_type,
        }
    }

    fn declared_targets(&self, kinds: &[EdgeKind]) -> Result<Vec<TypeVertexId>> {
        let mut targets = Vec::new();
        for kind in kinds {
            for edge in self.schema.outs(self.vertex, *kind)? {
                targets.push(edge.to);
            }
        }
        Ok(targets)
    }

    pub fn key(&self, attribute: &ThingType) -> Result<()> {
        self.guard_root()?;
        Self::expect_kind(attribute, VertexKind::AttributeType)?;
        let value_type = attribute.value_type()?;
        if !value_type.is_some_and(ValueType::is_keyable) {
            return Err(TesseraError::InvalidKeyValueType {
                label: attribute.label()?,
                value_type: value_type.map_or("none".to_string(), |v| v.name().to_string()),
            });
        }
        if self
            .schema
            .out_edge(self.vertex, EdgeKind::Key, attribute.vertex)?
            .is_some()
        {
            return Ok(());
        }
        if self
            .schema
            .out_edge(self.vertex, EdgeKind::Has, attribute.vertex)?
            .is_some()
        {
            return Err(TesseraError::TypeWrite(format!(
                "'{}' is already used as an attribute",
                attribute.label()?
            )));
        }
        if let Some(sup) = self.sup()? {
            if stream_contains(sup.attributes(), attribute)? {
                return Err(TesseraError::TypeWrite(format!(
                    "'{}' is already inherited or overridden",
                    attribute.label()?
                )));
            }
        }
        self.schema
            .put_edge(self.vertex, EdgeKind::Key, attribute.vertex)
    }

    pub fn key_with_overridden(&self, attribute: &ThingType, overridden: &ThingType) -> Result<()> {
        self.key(attribute)?;
        let sup = self
            .sup()?
            .ok_or(TesseraError::Internal("non-root type without supertype"))?;
        let overridable = collect_matching(sup.attributes(), attribute.value_type()?)?;
        let not_overridable = self.declared_targets(&[EdgeKind::Key, EdgeKind::Has])?;
        self.install_override(EdgeKind::Key, attribute, overridden, overridable, not_overridable)
    }

    pub fn unkey(&self, attribute: &ThingType) -> Result<()> {
        self.guard_root()?;
        Self::expect_kind(attribute, VertexKind::AttributeType)?;
        self.schema
            .delete_edge(self.vertex, EdgeKind::Key, attribute.vertex)
    }

    pub fn has(&self, attribute: &ThingType) -> Result<()> {
        self.guard_root()?;
        Self::expect_kind(attribute, VertexKind::AttributeType)?;
        if self
            .schema
            .out_edge(self.vertex, EdgeKind::Has, attribute.vertex)?
            .is_some()
        {
            return Ok(());
        }
        if self
            .schema
            .out_edge(self.vertex, EdgeKind::Key, attribute.vertex)?
            .is_some()
        {
            return Err(TesseraError::TypeWrite(format!(
                "'{}' is already used as a key",
                attribute.label()?
            )));
        }
        if let Some(sup) = self.sup()? {
            if stream_contains(sup.attributes(), attribute)? {
                return Err(TesseraError::TypeWrite(format!(
                    "'{}' is already inherited or overridden",
                    attribute.label()?
                )));
            }
        }
        self.schema
            .put_edge(self.vertex, EdgeKind::Has, attribute.vertex)
    }

    pub fn has_with_overridden(&self, attribute: &ThingType, overridden: &ThingType) -> Result<()> {
        self.has(attribute)?;
        let sup = self
            .sup()?
            .ok_or(TesseraError::Internal("non-root type without supertype"))?;
        let overridable = collect_matching(sup.attributes(), attribute.value_type()?)?;
        // Inherited keys stay mandatory: a HAS override may not shadow them.
        let mut not_overridable = collect_ids(sup.keys())?;
        not_overridable.extend(self.declared_targets(&[EdgeKind::Key, EdgeKind::Has])?);
        self.install_override(EdgeKind::Has, attribute, overridden, overridable, not_overridable)
    }

    pub fn unhas(&self, attribute: &ThingType) -> Result<()> {
        self.guard_root()?;
        Self::expect_kind(attribute, VertexKind::AttributeType)?;
        self.schema
            .delete_edge(self.vertex, EdgeKind::Has, attribute.vertex)
    }

    pub fn plays(&self, role: &ThingType) -> Result<()> {
        self.guard_root()?;
        Self::expect_kind(role, VertexKind::RoleType)?;
        if self
            .schema
            .out_edge(self.vertex, EdgeKind::Plays, role.vertex)?
            .is_some()
        {
            return Ok(());
        }
        if let Some(sup) = self.sup()? {
            if stream_contains(sup.plays_roles(), role)? {
                return Err(TesseraError::TypeWrite(format!(
                    "'{}' is already inherited or overridden",
                    role.label()?
                )));
            }
        }
        self.schema
            .put_edge(self.vertex, EdgeKind::Plays, role.vertex)
    }

    pub fn plays_with_overridden(&self, role: &ThingType, overridden: &ThingType) -> Result<()> {
        self.plays(role)?;
        let sup = self
            .sup()?
            .ok_or(TesseraError::Internal("non-root type without supertype"))?;
        let overridable = collect_ids(sup.plays_roles())?;
        let not_overridable = self.declared_targets(&[EdgeKind::Plays])?;
        self.install_override(EdgeKind::Plays, role, overridden, overridable, not_overridable)
    }

    pub fn unplay(&self, role: &ThingType) -> Result<()> {
        self.guard_root()?;
        Self::expect_kind(role, VertexKind::RoleType)?;
        self.schema
            .delete_edge(self.vertex, EdgeKind::Plays, role.vertex)
    }

    fn install_override(
        &self,
        edge_kind: EdgeKind,
        member: &ThingType,
        overridden: &ThingType,
        overridable: Vec<TypeVertexId>,
        not_overridable: Vec<TypeVertexId>,
    ) -> Result<()> {
        if !member.sups_ids()?.contains(&overridden.vertex) {
            return Err(TesseraError::InvalidOverrideNotSupertype {
                label: member.label()?,
                overridden: overridden.label()?,
            });
        }
        if not_overridable.contains(&overridden.vertex)
            || !overridable.contains(&overridden.vertex)
        {
            return Err(TesseraError::InvalidOverrideNotAvailable {
                label: member.label()?,
                overridden: overridden.label()?,
            });
        }
        self.schema
            .set_override(self.vertex, edge_kind, member.vertex, Some(overridden.vertex))
    }

    /// Declares a role type scoped to this relation type.
    pub fn relates(&self, role: &str) -> Result<ThingType> {
        self.guard_root()?;
        if self.kind() != VertexKind::RelationType {
            return Err(TesseraError::IllegalCast {
                from: self.kind().name(),
                to: VertexKind::RelationType.name(),
            });
        }
        let scoped = format!("{}:{role}", self.label()?);
        if let Some(existing) = self.schema.get(&scoped)? {
            let handle = self.handle(existing);
            Self::expect_kind(&handle, VertexKind::RoleType)?;
            self.schema
                .put_edge(self.vertex, EdgeKind::Relates, existing)?;
            return Ok(handle);
        }
        let role_root = self
            .schema
            .get("role")?
            .ok_or(TesseraError::Internal("root type missing"))?;
        let vertex = self.schema.create(&scoped, VertexKind::RoleType)?;
        self.schema.put_edge(vertex, EdgeKind::Sub, role_root)?;
        self.schema.put_edge(self.vertex, EdgeKind::Relates, vertex)?;
        Ok(self.handle(vertex))
    }

    pub fn role_types(&self) -> Result<Vec<ThingType>> {
        Ok(self
            .schema
            .outs(self.vertex, EdgeKind::Relates)?
            .into_iter()
            .map(|edge| self.handle(edge.to))
            .collect())
    }

    /// Deletion requires an empty subtree: no proper subtypes, no instances.
    pub fn delete(&self) -> Result<()> {
        self.guard_root()?;
        for sub in self.subs() {
            if sub?.vertex != self.vertex {
                return Err(TesseraError::TypeWrite(format!(
                    "'{}' has subtypes",
                    self.label()?
                )));
            }
        }
        if self.instances().next().transpose()?.is_some() {
            return Err(TesseraError::TypeWrite(format!(
                "'{}' has instances",
                self.label()?
            )));
        }
        self.schema.delete_vertex(self.vertex)
    }

    /// No-op on roots.
    pub fn validate(&self) -> Result<()> {
        if self.is_root()? {
            return Ok(());
        }
        let label = self.label()?;
        let chain = self.sups_ids()?;
        let first_root = chain
            .iter()
            .skip(1)
            .find_map(|vertex| match self.schema.is_root(*vertex) {
                Ok(true) => Some(Ok(*vertex)),
                Ok(false) => None,
                Err(e) => Some(Err(e)),
            })
            .transpose()?;
        match first_root {
            Some(root) if root.kind() == self.kind() => {}
            _ => {
                return Err(TesseraError::TypeValidation(format!(
                    "'{label}' does not terminate at its kind root"
                )))
            }
        }
        if self.kind() == VertexKind::AttributeType
            && !self.is_abstract()?
            && self.value_type()?.is_none()
        {
            return Err(TesseraError::TypeValidation(format!(
                "non-abstract attribute type '{label}' has no value type"
            )));
        }
        for edge_kind in [EdgeKind::Key, EdgeKind::Has, EdgeKind::Plays] {
            for edge in self.schema.outs(self.vertex, edge_kind)? {
                if let Some(overridden) = edge.overridden {
                    let member = self.handle(edge.to);
                    if !member.sups_ids()?.contains(&overridden) {
                        return Err(TesseraError::TypeValidation(format!(
                            "override on '{label}' no longer names a supertype"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn stream_contains(types: VisibleTypes, target: &ThingType) -> Result<bool> {
    for type_ in types {
        if type_? == *target {
            return Ok(true);
        }
    }
    Ok(false)
}

fn collect_ids(types: VisibleTypes) -> Result<Vec<TypeVertexId>> {
    types.map(|t| t.map(|t| t.vertex)).collect()
}

fn collect_matching(
    types: VisibleTypes,
    value_type: Option<ValueType>,
) -> Result<Vec<TypeVertexId>> {
    let mut out = Vec::new();
    for type_ in types {
        let type_ = type_?;
        if type_.value_type()? == value_type {
            out.push(type_.vertex);
        }
    }
    Ok(out)
}

/// Lazy visible-set walk: yields the declared targets of each level from
/// self up to the root, skipping targets overridden at any lower level.
pub struct VisibleTypes {
    schema: Arc<SchemaGraph>,
    data: Arc<DataGraph>,
    kinds: &'static [EdgeKind],
    current: Option<TypeVertexId>,
    queue: VecDeque<TypeVertexId>,
    overridden: FxHashSet<TypeVertexId>,
    failed: bool,
}

impl Iterator for VisibleTypes {
    type Item = Result<ThingType>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(vertex) = self.queue.pop_front() {
                return Some(Ok(ThingType {
                    schema: Arc::clone(&self.schema),
                    data: Arc::clone(&self.data),
                    vertex,
                }));
            }
            let level = self.current?;
            let advanced = (|| -> Result<()> {
                for kind in self.kinds {
                    for edge in self.schema.outs(level, *kind)? {
                        if !self.overridden.contains(&edge.to) {
                            self.queue.push_back(edge.to);
                        }
                    }
                }
                // Overrides declared here shadow strictly higher levels.
                for kind in self.kinds {
                    for edge in self.schema.outs(level, *kind)? {
                        if let Some(overridden) = edge.overridden {
                            self.overridden.insert(overridden);
                        }
                    }
                }
                self.current = self.schema.sup(level)?;
                Ok(())
            })();
            if let Err(e) = advanced {
                self.failed = true;
                return Some(Err(e));
            }
        }
    }
}

/// Visible-set walk filtered to one value type.
pub struct ValueFiltered {
    inner: VisibleTypes,
    value_type: ValueType,
}

impl Iterator for ValueFiltered {
    type Item = Result<ThingType>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let type_ = match self.inner.next()? {
                Ok(t) => t,
                Err(e) => return Some(Err(e)),
            };
            match type_.value_type() {
                Ok(Some(vt)) if vt == self.value_type => return Some(Ok(type_)),
                Ok(_) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Depth-first walk of a subtree in the lattice, inclusive of its root.
pub struct SubtypesIter {
    schema: Arc<SchemaGraph>,
    data: Arc<DataGraph>,
    stack: Vec<TypeVertexId>,
    seen: FxHashSet<TypeVertexId>,
    failed: bool,
}

impl Iterator for SubtypesIter {
    type Item = Result<ThingType>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let vertex = self.stack.pop()?;
        match self.schema.ins(vertex, EdgeKind::Sub) {
            Ok(children) => {
                for child in children {
                    if self.seen.insert(child) {
                        self.stack.push(child);
                    }
                }
                Some(Ok(ThingType {
                    schema: Arc::clone(&self.schema),
                    data: Arc::clone(&self.data),
                    vertex,
                }))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Instances across a subtree, one per-type storage scan at a time.
pub struct InstancesIter {
    data: Arc<DataGraph>,
    subs: SubtypesIter,
    current: Option<InstanceIter>,
}

impl Iterator for InstancesIter {
    type Item = Result<ThingVertexId>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(instances) = &mut self.current {
                if let Some(item) = instances.next() {
                    return Some(item);
                }
                self.current = None;
            }
            let type_ = match self.subs.next()? {
                Ok(t) => t,
                Err(e) => return Some(Err(e)),
            };
            if type_.kind().instance_kind().is_none() {
                continue;
            }
            match self.data.instances_of(type_.vertex) {
                Ok(instances) => self.current = Some(instances),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
