//! # Palisade Core
//!
//! Domain model for the Palisade disaster-recovery engine: per-scope DR
//! targets, backup jobs and their executions, replication links, health
//! snapshots, failover events and recovery tests.
//!
//! Nothing in this crate performs I/O. Persistence lives in
//! `palisade-storage` and orchestration in `palisade-runtime`.

pub mod backup;
pub mod config;
pub mod failover;
pub mod health;
pub mod recovery;
pub mod region;
pub mod replication;
pub mod schedule;
pub mod tenant;

// Re-export commonly used types
pub use backup::{
    ArtifactSummary, BackupExecution, BackupJob, BackupJobSpec, BackupScope, BackupType,
    ExecutionStatus, JobStatistics, RetentionPolicy, VerificationState,
};
pub use config::{DrConfiguration, ReplicationMode, ReplicationPolicy};
pub use failover::{FailoverEvent, FailoverState, RollbackRecord, StateTransition, TriggerType};
pub use health::{
    Assessment, CriticalSignal, HealthInputs, HealthSnapshot, HealthThresholds, ResourceSaturation,
    Severity,
};
pub use recovery::{
    Environment, RecoveryPoint, RecoveryTest, ScenarioType, TestMeasurements, TestStatus,
};
pub use region::RegionId;
pub use replication::{LinkState, ReplicationLink};
pub use schedule::{CronSchedule, ScheduleError};
pub use tenant::{DrScope, TenantId};

/// Result type for domain operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for domain validation
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Convert a chrono interval into a std duration, clamping negative spans to zero.
pub fn non_negative(delta: chrono::Duration) -> std::time::Duration {
    delta.to_std().unwrap_or_default()
}
