mod cache;
mod structure;

pub use cache::TraversalCache;
pub use structure::{
    Annotation, Identifier, Predicate, Structure, StructureEdge, StructureEdgeVariant,
    StructureVertex, StructureVertexKind, ThingProperties, TypeProperties, VertexProperties,
};
