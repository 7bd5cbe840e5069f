//! Execution-layer error values.
//!
//! Build-stage problems never show up here: a malformed filter, operator or
//! output column is dropped while the statement is assembled, so stale links
//! keep producing a (possibly wider) result instead of an error page.

use thiserror::Error;

use crate::db::driver::DriverError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A generated statement failed. The SQL travels with the error so a
    /// caller can render it next to the backend's message.
    #[error("{source} in {sql:?}")]
    Query { sql: String, source: DriverError },

    /// Schema introspection failed before any statement was assembled.
    #[error("introspection failed: {source}")]
    Introspection { source: DriverError },

    /// A batched mutation failed and the transaction was rolled back whole.
    #[error("batch rolled back: {source}")]
    Transaction { source: DriverError },
}

impl EngineError {
    pub fn introspection(source: DriverError) -> EngineError {
        EngineError::Introspection { source }
    }

    pub fn transaction(source: DriverError) -> EngineError {
        EngineError::Transaction { source }
    }

    /// Backend-native error code, when the backend reported one.
    pub fn code(&self) -> &str {
        match self {
            EngineError::Query { source, .. }
            | EngineError::Introspection { source }
            | EngineError::Transaction { source } => &source.code,
        }
    }
}
