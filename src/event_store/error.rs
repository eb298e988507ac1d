//! Event Store Errors
//!
//! Error types for store operations.

use uuid::Uuid;

/// PostgreSQL `lock_not_available`, raised when `lock_timeout` elapses
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Errors that can occur in the event store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Aggregate row does not exist
    #[error("Aggregate not found: {aggregate_type} {id}")]
    AggregateNotFound { aggregate_type: String, id: Uuid },

    /// Row lock could not be acquired before the store's timeout
    #[error("Lock timeout on aggregate {0}")]
    LockTimeout(Uuid),

    /// Savepoint or transaction state misuse
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored row does not have the expected shape
    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

impl StoreError {
    /// Check if this error is a lock timeout
    pub fn is_lock_timeout(&self) -> bool {
        match self {
            StoreError::LockTimeout(_) => true,
            StoreError::Database(sqlx::Error::Database(db)) => {
                db.code().as_deref() == Some(LOCK_NOT_AVAILABLE)
            }
            _ => false,
        }
    }

    /// Check if this error means the aggregate row is missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::AggregateNotFound { .. })
    }
}
