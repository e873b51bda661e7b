//! Query structure: the planner's input graph.
//!
//! An arena-owned multigraph. Vertices live in a vector and are looked up
//! through an identifier index; edges live in a parallel vector and
//! adjacency lists hold indices, so the vertex/edge mutual references of
//! the query graph never form ownership cycles. Self-edges are recorded
//! only on their endpoint's loop list.

use std::collections::BTreeSet;
use std::fmt;

use rustc_hash::FxHashMap;

use crate::error::{Result, TesseraError};
use crate::graph::encoding::{EdgeKind, ValueType};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identifier {
    Variable(String),
    Anonymous(u16),
}

impl Identifier {
    pub fn variable(name: impl Into<String>) -> Self {
        Identifier::Variable(name.into())
    }

    pub fn anonymous(id: u16) -> Self {
        Identifier::Anonymous(id)
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, Identifier::Variable(_))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Variable(name) => write!(f, "${name}"),
            Identifier::Anonymous(id) => write!(f, "_{id}"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StructureVertexKind {
    Thing,
    Type,
}

/// Comparison carried by a predicate edge between two thing vertices.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Predicate {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    Contains,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Annotation {
    Key,
    Unique,
}

/// Property bag of a thing variable.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ThingProperties {
    pub iid: Option<Vec<u8>>,
    pub types: BTreeSet<String>,
    pub predicates: Vec<Predicate>,
}

/// Property bag of a type variable.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TypeProperties {
    pub labels: BTreeSet<String>,
    pub is_abstract: bool,
    pub value_types: BTreeSet<ValueType>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum VertexProperties {
    Thing(ThingProperties),
    Type(TypeProperties),
}

impl VertexProperties {
    pub fn as_thing_mut(&mut self) -> Result<&mut ThingProperties> {
        match self {
            VertexProperties::Thing(props) => Ok(props),
            VertexProperties::Type(_) => Err(TesseraError::IllegalCast {
                from: "type properties",
                to: "thing properties",
            }),
        }
    }

    pub fn as_type_mut(&mut self) -> Result<&mut TypeProperties> {
        match self {
            VertexProperties::Type(props) => Ok(props),
            VertexProperties::Thing(_) => Err(TesseraError::IllegalCast {
                from: "thing properties",
                to: "type properties",
            }),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StructureVertex {
    id: Identifier,
    kind: StructureVertexKind,
    out: Vec<usize>,
    ins: Vec<usize>,
    loops: Vec<usize>,
}

impl StructureVertex {
    pub fn id(&self) -> &Identifier {
        &self.id
    }

    pub fn kind(&self) -> StructureVertexKind {
        self.kind
    }

    /// Indices of outgoing edges; self-edges appear only in `loops`.
    pub fn out(&self) -> &[usize] {
        &self.out
    }

    pub fn ins(&self) -> &[usize] {
        &self.ins
    }

    pub fn loops(&self) -> &[usize] {
        &self.loops
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum StructureEdgeVariant {
    Equal,
    Predicate(Predicate),
    Native {
        kind: EdgeKind,
        transitive: bool,
        annotations: BTreeSet<Annotation>,
    },
    RolePlayer {
        role_types: BTreeSet<String>,
        repetition: u32,
        annotations: BTreeSet<Annotation>,
    },
}

#[derive(Clone, Debug)]
pub struct StructureEdge {
    from: usize,
    to: usize,
    variant: StructureEdgeVariant,
}

impl StructureEdge {
    pub fn from(&self) -> usize {
        self.from
    }

    pub fn to(&self) -> usize {
        self.to
    }

    pub fn variant(&self) -> &StructureEdgeVariant {
        &self.variant
    }
}

#[derive(Clone, Debug, Default)]
pub struct Structure {
    vertices: Vec<StructureVertex>,
    index: FxHashMap<Identifier, usize>,
    edges: Vec<StructureEdge>,
    properties: FxHashMap<Identifier, VertexProperties>,
}

impl Structure {
    pub fn new() -> Self {
        Structure::default()
    }

    /// Get-or-create a thing vertex; re-creating the identifier as a type
    /// vertex is rejected.
    pub fn thing_vertex(&mut self, id: Identifier) -> Result<usize> {
        self.vertex_of_kind(id, StructureVertexKind::Thing)
    }

    pub fn type_vertex(&mut self, id: Identifier) -> Result<usize> {
        self.vertex_of_kind(id, StructureVertexKind::Type)
    }

    fn vertex_of_kind(&mut self, id: Identifier, kind: StructureVertexKind) -> Result<usize> {
        if let Some(&existing) = self.index.get(&id) {
            if self.vertices[existing].kind != kind {
                return Err(TesseraError::IllegalCast {
                    from: match self.vertices[existing].kind {
                        StructureVertexKind::Thing => "thing vertex",
                        StructureVertexKind::Type => "type vertex",
                    },
                    to: match kind {
                        StructureVertexKind::Thing => "thing vertex",
                        StructureVertexKind::Type => "type vertex",
                    },
                });
            }
            return Ok(existing);
        }
        let index = self.vertices.len();
        if id.is_variable() {
            let props = match kind {
                StructureVertexKind::Thing => {
                    VertexProperties::Thing(ThingProperties::default())
                }
                StructureVertexKind::Type => VertexProperties::Type(TypeProperties::default()),
            };
            self.properties.insert(id.clone(), props);
        }
        self.index.insert(id.clone(), index);
        self.vertices.push(StructureVertex {
            id,
            kind,
            out: Vec::new(),
            ins: Vec::new(),
            loops: Vec::new(),
        });
        Ok(index)
    }

    pub fn vertex(&self, id: &Identifier) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn vertices(&self) -> &[StructureVertex] {
        &self.vertices
    }

    pub fn edges(&self) -> &[StructureEdge] {
        &self.edges
    }

    pub fn properties(&self, id: &Identifier) -> Option<&VertexProperties> {
        self.properties.get(id)
    }

    /// Property bag of a variable vertex, for the query compiler to fill.
    pub fn properties_mut(&mut self, id: &Identifier) -> Option<&mut VertexProperties> {
        self.properties.get_mut(id)
    }

    pub fn equal_edge(&mut self, from: usize, to: usize) {
        self.record_edge(from, to, StructureEdgeVariant::Equal);
    }

    pub fn predicate_edge(&mut self, from: usize, to: usize, predicate: Predicate) {
        self.record_edge(from, to, StructureEdgeVariant::Predicate(predicate));
    }

    pub fn native_edge(
        &mut self,
        from: usize,
        to: usize,
        kind: EdgeKind,
        transitive: bool,
        annotations: BTreeSet<Annotation>,
    ) {
        self.record_edge(
            from,
            to,
            StructureEdgeVariant::Native {
                kind,
                transitive,
                annotations,
            },
        );
    }

    pub fn role_player(
        &mut self,
        from: usize,
        to: usize,
        role_types: BTreeSet<String>,
        repetition: u32,
    ) {
        self.record_edge(
            from,
            to,
            StructureEdgeVariant::RolePlayer {
                role_types,
                repetition,
                annotations: BTreeSet::new(),
            },
        );
    }

    fn record_edge(&mut self, from: usize, to: usize, variant: StructureEdgeVariant) {
        debug_assert!(from < self.vertices.len() && to < self.vertices.len());
        let index = self.edges.len();
        self.edges.push(StructureEdge { from, to, variant });
        if from == to {
            self.vertices[from].loops.push(index);
        } else {
            self.vertices[from].out.push(index);
            self.vertices[to].ins.push(index);
        }
    }

    /// Weakly-connected-component decomposition.
    ///
    /// With a non-empty seed list, the first output structure absorbs every
    /// component reachable from any seed, in seed order, even when no edge
    /// links those components. Remaining components come out one structure
    /// each, in vertex insertion order. Every vertex and edge of the input
    /// lands in exactly one output.
    pub fn split_disjoint(&self, force_connect: &[Identifier]) -> Vec<Structure> {
        let mut unvisited_vertices = vec![true; self.vertices.len()];
        let mut unvisited_edges = vec![true; self.edges.len()];
        let mut outputs = Vec::new();
        if !force_connect.is_empty() {
            let mut seeded = Structure::new();
            for id in force_connect {
                if let Some(&vertex) = self.index.get(id) {
                    self.absorb_component(
                        vertex,
                        &mut seeded,
                        &mut unvisited_vertices,
                        &mut unvisited_edges,
                    );
                }
            }
            outputs.push(seeded);
        }
        for vertex in 0..self.vertices.len() {
            if unvisited_vertices[vertex] {
                let mut output = Structure::new();
                self.absorb_component(
                    vertex,
                    &mut output,
                    &mut unvisited_vertices,
                    &mut unvisited_edges,
                );
                outputs.push(output);
            }
        }
        outputs
    }

    fn absorb_component(
        &self,
        seed: usize,
        output: &mut Structure,
        unvisited_vertices: &mut [bool],
        unvisited_edges: &mut [bool],
    ) {
        if !unvisited_vertices[seed] {
            return;
        }
        unvisited_vertices[seed] = false;
        let mut vertex_order = vec![seed];
        let mut edge_order = Vec::new();
        let mut stack = vec![seed];
        while let Some(vertex) = stack.pop() {
            let state = &self.vertices[vertex];
            for edge in state
                .out
                .iter()
                .chain(state.ins.iter())
                .chain(state.loops.iter())
            {
                if !unvisited_edges[*edge] {
                    continue;
                }
                unvisited_edges[*edge] = false;
                edge_order.push(*edge);
                let endpoints = &self.edges[*edge];
                let other = if endpoints.from == vertex {
                    endpoints.to
                } else {
                    endpoints.from
                };
                if unvisited_vertices[other] {
                    unvisited_vertices[other] = false;
                    vertex_order.push(other);
                    stack.push(other);
                }
            }
        }
        for vertex in &vertex_order {
            let state = &self.vertices[*vertex];
            let copied = output
                .vertex_of_kind(state.id.clone(), state.kind)
                .expect("fresh identifier in output structure");
            debug_assert_eq!(output.vertices[copied].kind, state.kind);
            if let Some(props) = self.properties.get(&state.id) {
                output.properties.insert(state.id.clone(), props.clone());
            }
        }
        for edge in edge_order {
            let StructureEdge { from, to, variant } = &self.edges[edge];
            let from = output.index[&self.vertices[*from].id];
            let to = output.index[&self.vertices[*to].id];
            output.record_edge(from, to, variant.clone());
        }
    }
}

impl PartialEq for Structure {
    fn eq(&self, other: &Self) -> bool {
        if self.vertices.len() != other.vertices.len()
            || self.edges.len() != other.edges.len()
            || self.properties != other.properties
        {
            return false;
        }
        for vertex in &self.vertices {
            match other.index.get(&vertex.id) {
                Some(&theirs) if other.vertices[theirs].kind == vertex.kind => {}
                _ => return false,
            }
        }
        // Edges are a multiset keyed by endpoint identifiers and variant.
        let mut used = vec![false; other.edges.len()];
        'outer: for edge in &self.edges {
            let from = &self.vertices[edge.from].id;
            let to = &self.vertices[edge.to].id;
            for (candidate, theirs) in other.edges.iter().enumerate() {
                if used[candidate] {
                    continue;
                }
                if &other.vertices[theirs.from].id == from
                    && &other.vertices[theirs.to].id == to
                    && theirs.variant == edge.variant
                {
                    used[candidate] = true;
                    continue 'outer;
                }
            }
            return false;
        }
        true
    }
}
