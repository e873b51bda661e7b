/// Signals between data commits before the cached schema storage rolls its
/// snapshot forward.
pub const SCHEMA_GRAPH_STORAGE_REFRESH_RATE: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    Read,
    Write,
}

impl TransactionType {
    pub fn is_read(self) -> bool {
        self == TransactionType::Read
    }

    pub fn is_write(self) -> bool {
        self == TransactionType::Write
    }

    pub fn name(self) -> &'static str {
        match self {
            TransactionType::Read => "read",
            TransactionType::Write => "write",
        }
    }
}

/// Per-transaction options. `explain`, `parallel`, `infer` and
/// `trace_inference` are inputs to the reasoner and planner; the core stores
/// them without acting on them.
#[derive(Debug, Clone)]
pub struct TransactionOptions {
    pub schema_refresh_rate: u32,
    pub explain: bool,
    pub parallel: bool,
    pub infer: bool,
    pub trace_inference: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        TransactionOptions {
            schema_refresh_rate: SCHEMA_GRAPH_STORAGE_REFRESH_RATE,
            explain: false,
            parallel: true,
            infer: false,
            trace_inference: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub schema_refresh_rate: u32,
    pub traversal_cache_capacity: usize,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        DatabaseOptions {
            schema_refresh_rate: SCHEMA_GRAPH_STORAGE_REFRESH_RATE,
            traversal_cache_capacity: 256,
        }
    }
}
