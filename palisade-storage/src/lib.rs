//! # Palisade Storage
//!
//! Durable state for the Palisade DR engine:
//!
//! - [`object_store`]: the storage backend adapter that holds backup
//!   artifacts and computes their checksums
//! - [`store`]: the metadata store for jobs, executions, links, snapshots,
//!   failover events and recovery tests, with an in-memory implementation
//!   and a PostgreSQL implementation using row-level security for
//!   multi-tenancy
//! - [`compliance`]: a read-only view over that history

pub mod circuit_breaker;
pub mod compliance;
pub mod memory;
pub mod metrics;
pub mod migrations;
pub mod object_store;
pub mod postgres;
pub mod store;

// Re-export commonly used types
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
pub use compliance::{ComplianceSummary, ComplianceView};
pub use memory::MemoryStore;
pub use object_store::{
    checksum, validate_key, FsObjectStore, GuardedObjectStore, MemoryObjectStore, ObjectStore,
};
pub use palisade_core::TenantId;
pub use postgres::{PoolConfig, PostgresStore};
pub use store::{FailoverClaim, MetadataStore};

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for storage operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Write against a record that no longer accepts it (finalized or terminal)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Tenant isolation violation: {0}")]
    TenantViolation(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Object store unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Connection pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Circuit breaker is open, rejecting operation")]
    CircuitOpen,
}

impl Error {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Unavailable(_)
                | Error::PoolExhausted(_)
                | Error::ConnectionFailed(_)
                | Error::Database(sqlx::Error::PoolTimedOut)
                | Error::Database(sqlx::Error::Io(_))
        )
    }
}
