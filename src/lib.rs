#![forbid(unsafe_code)]

//! A strongly-typed knowledge-graph database core: optimistic transactions
//! over an ordered key-value store, a schema type lattice with override
//! semantics, and a traversal query structure with connected-component
//! partitioning.

pub mod db;
pub mod error;
pub mod graph;
pub mod kv;
pub mod schema;
pub mod traversal;

pub use crate::db::{
    Database, DatabaseOptions, Session, SessionKind, Transaction, TransactionOptions,
    TransactionType,
};
pub use crate::error::{Result, TesseraError};
pub use crate::graph::{Value, ValueType};
pub use crate::schema::{ThingType, TypeManager};
pub use crate::traversal::{Identifier, Structure};
