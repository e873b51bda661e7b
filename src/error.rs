use thiserror::Error;

pub type Result<T> = std::result::Result<T, TesseraError>;

#[derive(Debug, Error)]
pub enum TesseraError {
    #[error("transaction closed")]
    TransactionClosed,
    #[error("illegal commit on a read transaction")]
    IllegalCommit,
    #[error("schema transactions may not modify data")]
    SessionSchemaViolation,
    #[error("data transactions may not modify schema")]
    SessionDataViolation,
    #[error("illegal cast from {from} to {to}")]
    IllegalCast {
        from: &'static str,
        to: &'static str,
    },
    #[error("attribute type '{label}' with value type {value_type} cannot be a key")]
    InvalidKeyValueType { label: String, value_type: String },
    #[error("'{label}' cannot override '{overridden}': not a supertype")]
    InvalidOverrideNotSupertype { label: String, overridden: String },
    #[error("'{label}' cannot override '{overridden}': not available for override")]
    InvalidOverrideNotAvailable { label: String, overridden: String },
    #[error("root types cannot be mutated")]
    InvalidRootTypeMutation,
    #[error("invalid type write: {0}")]
    TypeWrite(String),
    #[error("type validation failed: {0}")]
    TypeValidation(String),
    #[error("thing validation failed: {0}")]
    ThingValidation(String),
    #[error("storage failure: {0}")]
    StorageFailure(String),
    #[error("internal invariant violated: {0}")]
    Internal(&'static str),
}

impl TesseraError {
    /// Stable surface name of the error category.
    pub fn code(&self) -> &'static str {
        match self {
            TesseraError::TransactionClosed => "TRANSACTION_CLOSED",
            TesseraError::IllegalCommit => "ILLEGAL_COMMIT",
            TesseraError::SessionSchemaViolation => "SESSION_SCHEMA_VIOLATION",
            TesseraError::SessionDataViolation => "SESSION_DATA_VIOLATION",
            TesseraError::IllegalCast { .. } => "ILLEGAL_CAST",
            TesseraError::InvalidKeyValueType { .. } => "INVALID_KEY_VALUE_TYPE",
            TesseraError::InvalidOverrideNotSupertype { .. } => "INVALID_OVERRIDE_NOT_SUPERTYPE",
            TesseraError::InvalidOverrideNotAvailable { .. } => "INVALID_OVERRIDE_NOT_AVAILABLE",
            TesseraError::InvalidRootTypeMutation => "INVALID_ROOT_TYPE_MUTATION",
            TesseraError::TypeWrite(_) => "TYPE_WRITE",
            TesseraError::TypeValidation(_) => "TYPE_VALIDATION",
            TesseraError::ThingValidation(_) => "THING_VALIDATION",
            TesseraError::StorageFailure(_) => "STORAGE_FAILURE",
            TesseraError::Internal(_) => "INTERNAL",
        }
    }
}
