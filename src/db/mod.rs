mod database;
mod options;
mod session;
mod transaction;

pub use database::Database;
pub use options::{
    DatabaseOptions, TransactionOptions, TransactionType, SCHEMA_GRAPH_STORAGE_REFRESH_RATE,
};
pub use session::{Session, SessionKind};
pub use transaction::{Cache, Transaction, TxIterator, TxStorage};
