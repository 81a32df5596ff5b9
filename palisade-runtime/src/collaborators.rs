//! Contracts for the systems the engine drives but does not implement
//!
//! Production implementations live in the worker (HTTP control plane);
//! tests use the fakes in `palisade-tests`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use palisade_core::{BackupScope, Environment, ReplicationMode, RegionId, ResourceSaturation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Failure reported by a collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    /// Worth retrying (timeouts, 5xx, dropped connections)
    #[error("transient failure: {0}")]
    Transient(String),

    /// The collaborator or the region it fronts cannot be reached
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The request was refused and will not succeed on retry
    #[error("rejected: {0}")]
    Rejected(String),
}

impl CollaboratorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CollaboratorError::Transient(_))
    }
}

pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

/// Redirects client traffic to a region
#[async_trait]
pub trait ConnectionRouter: Send + Sync {
    async fn update_target(&self, region: &RegionId) -> CollaboratorResult<()>;
}

/// Raw numbers sampled for one region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMetrics {
    pub active_connections: u64,
    pub saturation: ResourceSaturation,
}

#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn sample(&self, region: &RegionId) -> CollaboratorResult<RawMetrics>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        severity: AlertSeverity,
        message: &str,
        context: serde_json::Value,
    ) -> CollaboratorResult<()>;
}

/// Send a notification, logging instead of failing when delivery fails
pub(crate) async fn notify_best_effort(
    notifier: &Arc<dyn Notifier>,
    severity: AlertSeverity,
    message: &str,
    context: serde_json::Value,
) {
    if let Err(e) = notifier.notify(severity, message, context).await {
        warn!(
            severity = severity.as_str(),
            message = %message,
            error = %e,
            "Failed to deliver notification"
        );
    }
}

/// Control over a database region's write path and role
#[async_trait]
pub trait RegionControl: Send + Sync {
    /// Stop accepting new write connections
    async fn stop_writes(&self, region: &RegionId) -> CollaboratorResult<()>;

    async fn resume_writes(&self, region: &RegionId) -> CollaboratorResult<()>;

    /// Write transactions still in flight
    async fn in_flight_writes(&self, region: &RegionId) -> CollaboratorResult<u64>;

    /// Forcibly end remaining sessions. Returns how many were terminated.
    async fn terminate_connections(&self, region: &RegionId) -> CollaboratorResult<u64>;

    /// Convert a replica into a primary
    async fn promote(&self, region: &RegionId) -> CollaboratorResult<()>;

    /// Synthetic read/write check against a region
    async fn ping(&self, region: &RegionId) -> CollaboratorResult<()>;
}

/// Commit positions of a replication feed, as change timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPositions {
    /// Latest change committed on the primary
    pub primary_committed_at: DateTime<Utc>,
    /// Latest change applied on the replica
    pub replica_applied_at: DateTime<Utc>,
}

/// The storage engine's replication mechanism
#[async_trait]
pub trait ReplicationFeed: Send + Sync {
    /// Create a replication slot. Returns its name.
    async fn create_slot(
        &self,
        primary: &RegionId,
        replica: &RegionId,
        mode: ReplicationMode,
    ) -> CollaboratorResult<String>;

    async fn set_mode(&self, slot: &str, mode: ReplicationMode) -> CollaboratorResult<()>;

    async fn positions(&self, slot: &str) -> CollaboratorResult<FeedPositions>;
}

/// What to export for a backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExportRequest {
    Full,
    /// Changes after `since`
    Incremental { since: DateTime<Utc> },
    /// Write log after `since`, or the whole retained log
    LogArchive { since: Option<DateTime<Utc>> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedData {
    pub payload: Vec<u8>,
    pub row_count: u64,
    /// Timestamp of the latest change contained in the payload
    pub latest_change_at: DateTime<Utc>,
}

/// Produces backup payloads from the live database
#[async_trait]
pub trait BackupSource: Send + Sync {
    async fn export(
        &self,
        scope: &BackupScope,
        request: ExportRequest,
    ) -> CollaboratorResult<ExportedData>;
}

/// One artifact handed to a restore, in apply order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreArtifact {
    pub execution_id: uuid::Uuid,
    pub backup_type: palisade_core::BackupType,
    pub payload: Vec<u8>,
}

/// What a restore reports back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredDataset {
    /// Checksum of each artifact as applied, in apply order
    pub applied_checksums: Vec<String>,
    pub row_count: u64,
    /// Latest change present in the restored data
    pub latest_change_at: Option<DateTime<Utc>>,
}

/// Regions of a non-production topology used for failover drills
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrillTopology {
    pub primary: RegionId,
    /// Replica the drill promotes
    pub replica: RegionId,
    /// Second replica; without one the safety check has no fallback link
    pub fallback: Option<RegionId>,
}

/// Isolated, environment-scoped clones used by recovery tests
#[async_trait]
pub trait RecoveryEnvironment: Send + Sync {
    /// Restore `artifacts` into `environment`, replaying log archives up to
    /// `until` when given
    async fn restore(
        &self,
        environment: &Environment,
        artifacts: Vec<RestoreArtifact>,
        until: Option<DateTime<Utc>>,
    ) -> CollaboratorResult<RestoredDataset>;

    async fn drill_topology(&self, environment: &Environment) -> CollaboratorResult<DrillTopology>;
}
