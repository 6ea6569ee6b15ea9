//! Error types for the storage clients.

use thiserror::Error;

/// Errors surfaced by the KV, relational, and document-store clients.
#[derive(Debug, Error)]
pub enum StoreError {
    /// KV store operation failed
    #[error("KV store error: {0}")]
    Kv(#[from] redis::RedisError),

    /// Relational store operation failed
    #[error("relational store error: {0}")]
    Database(#[from] sqlx::Error),

    /// Document store request failed
    #[error("document store request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Document store rejected the request
    #[error("document store returned {status}: {body}")]
    DocumentStore { status: u16, body: String },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True when the underlying failure means the relational schema is
    /// missing a column or table the engine requires. Callers treat this as
    /// terminal rather than retryable.
    #[must_use]
    pub fn is_schema_mismatch(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::ColumnNotFound(_)) => true,
            // 42703 = undefined_column, 42P01 = undefined_table
            Self::Database(sqlx::Error::Database(db)) => {
                matches!(db.code().as_deref(), Some("42703") | Some("42P01"))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_column_is_a_schema_mismatch() {
        let err = StoreError::from(sqlx::Error::ColumnNotFound("next_repeat_at".to_string()));
        assert!(err.is_schema_mismatch());
    }

    #[test]
    fn pool_failures_are_not_schema_mismatches() {
        let err = StoreError::from(sqlx::Error::PoolTimedOut);
        assert!(!err.is_schema_mismatch());
    }
}
