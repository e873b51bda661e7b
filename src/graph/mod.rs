pub mod data_graph;
pub mod encoding;
pub mod keygen;
pub mod schema_graph;

pub use data_graph::{DataGraph, InstanceIter};
pub use encoding::{EdgeKind, ThingVertexId, TypeVertexId, Value, ValueType, VertexKind};
pub use keygen::{DataKeyGenerator, SchemaKeyGenerator};
pub use schema_graph::{SchemaGraph, TypeEdge};
