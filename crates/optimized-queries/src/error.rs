//! Error types for the optimized query pipeline
//!
//! Errors are grouped by the stage that raised them so the execution
//! controller can decide between falling back and propagating:
//! compilation and configuration problems always reach the caller, while
//! execution failures may be recovered by safe mode.

use thiserror::Error;

/// Result type alias for optimized query operations
pub type QueryResult<T> = Result<T, QueryError>;

/// Top-level error returned by the fluent query surface
#[derive(Error, Debug, Clone)]
pub enum QueryError {
    /// The plan asks for something the compiler cannot honour
    #[error("Compilation error: {0}")]
    Compile(#[from] CompileError),

    /// The database rejected or aborted a statement
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// The cache layer failed (only surfaced by explicit cache operations)
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// A row could not be turned into the requested output shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid optimizer configuration
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// `find` or `first_or_fail` matched nothing
    #[error("Record not found in table '{0}'")]
    NotFound(String),
}

impl QueryError {
    /// Whether safe mode is allowed to recover from this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, QueryError::Execution(_))
    }

    /// Whether this is a statement timeout reported by the driver
    pub fn is_timeout(&self) -> bool {
        matches!(self, QueryError::Execution(ExecutionError::Timeout(_)))
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::Decode(err.to_string())
    }
}

impl From<sqlx::Error> for QueryError {
    fn from(err: sqlx::Error) -> Self {
        QueryError::Execution(ExecutionError::from(err))
    }
}

/// Errors raised while turning a plan into SQL
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// The entity declares no relation with this name
    #[error("Relation '{relation}' is not defined on '{entity}'")]
    UnknownRelation { entity: String, relation: String },

    /// A relation points at an entity type that was never registered
    #[error("Entity '{0}' is not registered")]
    UnknownEntity(String),

    /// A dotted relation path could not be split into relation and column
    #[error("Malformed nested relation path '{0}'")]
    MalformedNestedPath(String),

    /// A table, column or alias name contains characters that are never valid
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// An aggregate was requested without a column
    #[error("Invalid aggregate on relation '{relation}': {reason}")]
    InvalidAggregate { relation: String, reason: String },

    /// Raw SQL whose placeholders do not match its bindings
    #[error("Raw SQL has {expected} placeholders but {actual} bindings")]
    BindingMismatch { expected: usize, actual: usize },
}

/// Errors raised by the database driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// SQL error reported by the database
    #[error("Database error: {0}")]
    Database(String),

    /// The session statement timeout fired
    #[error("Statement timed out: {0}")]
    Timeout(String),

    /// Pool exhausted or connection lost
    #[error("Connection error: {0}")]
    Connection(String),
}

impl From<sqlx::Error> for ExecutionError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                ExecutionError::Connection(err.to_string())
            }
            sqlx::Error::Database(db_err) => {
                // 57014: query_canceled (PostgreSQL), 3024: max execution time exceeded (MySQL)
                let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
                if code == "57014" || code == "3024" {
                    ExecutionError::Timeout(db_err.message().to_string())
                } else {
                    ExecutionError::Database(db_err.message().to_string())
                }
            }
            _ => ExecutionError::Database(err.to_string()),
        }
    }
}

/// Errors raised by the cache tiers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {field}: expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl ConfigError {
    pub fn validation_failed(message: impl Into<String>) -> Self {
        ConfigError::ValidationFailed(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_execution_errors_are_recoverable() {
        let exec = QueryError::from(ExecutionError::Database("no such column".into()));
        assert!(exec.is_recoverable());

        let compile = QueryError::from(CompileError::UnknownRelation {
            entity: "Article".into(),
            relation: "tags".into(),
        });
        assert!(!compile.is_recoverable());
        assert!(!QueryError::Decode("bad".into()).is_recoverable());
    }

    #[test]
    fn test_timeout_detection() {
        let err = QueryError::from(ExecutionError::Timeout("canceling statement".into()));
        assert!(err.is_timeout());
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        let err = CompileError::UnknownRelation {
            entity: "Article".into(),
            relation: "tags".into(),
        };
        assert_eq!(err.to_string(), "Relation 'tags' is not defined on 'Article'");
        assert_eq!(
            QueryError::NotFound("articles".into()).to_string(),
            "Record not found in table 'articles'"
        );
    }
}
