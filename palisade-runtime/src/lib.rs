//! # Palisade Runtime
//!
//! The DR engine proper: backup scheduling and execution, replication
//! topology, health monitoring, the failover state machine and recovery
//! testing. Components talk to the outside world only through the
//! collaborator traits in [`collaborators`] and to persistent state only
//! through [`palisade_storage::MetadataStore`] and
//! [`palisade_storage::ObjectStore`].

pub mod backup;
pub mod collaborators;
pub mod concurrency;
pub mod config_registry;
pub mod engine;
pub mod failover;
pub mod health;
pub mod metrics;
pub mod recovery;
pub mod replication;
pub mod retention;
pub mod retry;
pub mod state_machine;

// Re-export commonly used types
pub use backup::BackupService;
pub use collaborators::{
    AlertSeverity, BackupSource, CollaboratorError, ConnectionRouter, MetricsSource, Notifier,
    RecoveryEnvironment, RegionControl, ReplicationFeed,
};
pub use config_registry::{ConfigLease, ConfigRegistry};
pub use engine::{Engine, EngineSettings, EngineTask};
pub use failover::{FailoverOrchestrator, FailoverRequest, FailoverSettings};
pub use health::HealthMonitor;
pub use recovery::{DrillRig, RecoveryTestRunner, TestRequest};
pub use replication::ReplicationManager;
pub use retention::{RetentionSweeper, SweepReport};
pub use retry::{RetryPolicy, RetryStrategy};
pub use state_machine::FailoverStateMachine;

use palisade_core::{DrScope, RegionId};
use std::time::Duration;
use tracing::error;
use uuid::Uuid;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for runtime operations
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// Rejected at call time; nothing was changed
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Tenant violation: {0}")]
    TenantViolation(String),

    #[error("Failover {event_id} already in progress for region {region}")]
    FailoverInProgress { region: RegionId, event_id: Uuid },

    #[error("Replication lag {lag:?} on link {link_id} is not below {threshold:?}")]
    LagTooHigh {
        link_id: Uuid,
        lag: Duration,
        threshold: Duration,
    },

    #[error("DR configuration for {0} is referenced by an in-flight operation")]
    ConfigurationInUse(DrScope),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<palisade_core::Error> for Error {
    fn from(e: palisade_core::Error) -> Self {
        match e {
            palisade_core::Error::InvalidState(msg) => Error::InvalidState(msg),
            other => Error::Configuration(other.to_string()),
        }
    }
}

/// Map storage errors to runtime errors, preserving what callers branch on:
/// - NotFound → NotFound
/// - TenantViolation → TenantViolation
/// - InvalidState → InvalidState
/// - AlreadyExists, ValidationError, InvalidKey → Configuration
/// - unreachable backends (I/O, open circuit, pool/connection) → StorageUnavailable
/// - everything else → Internal
pub(crate) fn map_storage_error(e: palisade_storage::Error, context: &str) -> Error {
    use palisade_storage::Error as StorageError;

    match e {
        StorageError::NotFound(msg) => Error::NotFound(msg),
        StorageError::TenantViolation(msg) => {
            error!(error = %msg, context = %context, "Tenant isolation violation");
            Error::TenantViolation(msg)
        }
        StorageError::InvalidState(msg) => Error::InvalidState(msg),
        StorageError::AlreadyExists(msg)
        | StorageError::ValidationError(msg)
        | StorageError::InvalidKey(msg) => Error::Configuration(msg),
        e @ (StorageError::Io(_)
        | StorageError::Unavailable(_)
        | StorageError::CircuitOpen
        | StorageError::PoolExhausted(_)
        | StorageError::ConnectionFailed(_)) => {
            let err_msg = format!("{}: {}", context, e);
            error!(error = %err_msg, "Storage unavailable");
            Error::StorageUnavailable(err_msg)
        }
        e => {
            let err_msg = format!("{}: {}", context, e);
            error!(error = %err_msg, "Storage error");
            Error::Internal(err_msg)
        }
    }
}
