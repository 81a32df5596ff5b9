//! Metadata store contract
//!
//! Each component owns writes to its own entity type; the store enforces the
//! record-level rules every implementation must share:
//!
//! - at most one `running` execution per backup job ([`MetadataStore::begin_execution`]);
//!   a claim older than the caller's staleness bound is failed and replaced
//! - at most one non-terminal failover per primary region
//!   ([`MetadataStore::try_begin_failover`])
//! - finalized executions, terminal failover events and finalized recovery
//!   tests reject further writes with [`Error::InvalidState`](crate::Error::InvalidState)

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use palisade_core::{
    BackupExecution, BackupJob, DrConfiguration, DrScope, FailoverEvent, HealthSnapshot,
    RecoveryTest, RegionId, ReplicationLink,
};
use uuid::Uuid;

/// Outcome of [`MetadataStore::try_begin_failover`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverClaim {
    /// The event was stored and is now the active failover for its region
    Claimed,
    /// Another failover is already active for the region
    Active(Uuid),
}

/// Failure recorded on a running execution reclaimed as stale
pub(crate) fn abandoned_reason(stale_before: DateTime<Utc>) -> String {
    format!("abandoned: no outcome recorded before {}", stale_before.to_rfc3339())
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    // ========== DR configuration ==========

    async fn put_configuration(&self, config: &DrConfiguration) -> Result<()>;

    /// Configuration stored for exactly `scope` (no fallback)
    async fn get_configuration(&self, scope: &DrScope) -> Result<Option<DrConfiguration>>;

    // ========== Backup jobs ==========

    async fn create_job(&self, job: &BackupJob) -> Result<()>;

    /// Persist `next_execution` and statistics. Definition fields are never
    /// rewritten.
    async fn update_job(&self, job: &BackupJob) -> Result<()>;

    async fn get_job(&self, id: Uuid) -> Result<BackupJob>;

    async fn list_jobs(&self) -> Result<Vec<BackupJob>>;

    // ========== Backup executions ==========

    /// Atomically store `execution` unless the job already has a running
    /// execution. Returns the id of the running execution and whether it is
    /// the one just inserted.
    ///
    /// A running execution started before `stale_before` no longer holds the
    /// job: it is finalized as failed and `execution` takes its place.
    async fn begin_execution(
        &self,
        execution: &BackupExecution,
        stale_before: DateTime<Utc>,
    ) -> Result<(Uuid, bool)>;

    /// Store the final state of a running execution
    async fn finalize_execution(&self, execution: &BackupExecution) -> Result<()>;

    /// Flag a completed execution as successfully restored by a recovery test
    async fn mark_recovery_tested(&self, id: Uuid) -> Result<()>;

    async fn get_execution(&self, id: Uuid) -> Result<BackupExecution>;

    async fn running_execution(&self, job_id: Uuid) -> Result<Option<BackupExecution>>;

    /// Executions of a job, oldest first
    async fn list_executions(&self, job_id: Uuid) -> Result<Vec<BackupExecution>>;

    async fn delete_execution(&self, id: Uuid) -> Result<()>;

    /// Failed executions across all jobs finalized at or after `since`
    async fn count_failed_executions_since(&self, since: DateTime<Utc>) -> Result<u32>;

    // ========== Replication links ==========

    async fn upsert_link(&self, link: &ReplicationLink) -> Result<()>;

    async fn get_link(&self, id: Uuid) -> Result<ReplicationLink>;

    /// Most recently established link for the pair, in any state
    async fn find_link(
        &self,
        primary: &RegionId,
        replica: &RegionId,
    ) -> Result<Option<ReplicationLink>>;

    async fn links_for_primary(&self, primary: &RegionId) -> Result<Vec<ReplicationLink>>;

    // ========== Health snapshots ==========

    async fn append_snapshot(&self, snapshot: &HealthSnapshot) -> Result<()>;

    async fn latest_snapshot(&self, primary: &RegionId) -> Result<Option<HealthSnapshot>>;

    /// Snapshots taken at or after `since`, oldest first
    async fn snapshots_since(
        &self,
        primary: &RegionId,
        since: DateTime<Utc>,
    ) -> Result<Vec<HealthSnapshot>>;

    /// Delete snapshots taken before `cutoff`. Returns how many were removed.
    async fn prune_snapshots(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    // ========== Failover events ==========

    /// Store `event` only if no non-terminal event exists for its source region
    async fn try_begin_failover(&self, event: &FailoverEvent) -> Result<FailoverClaim>;

    /// Persist the current state of a non-terminal event
    async fn record_failover(&self, event: &FailoverEvent) -> Result<()>;

    async fn get_failover(&self, id: Uuid) -> Result<FailoverEvent>;

    async fn active_failover(&self, source: &RegionId) -> Result<Option<FailoverEvent>>;

    /// Failover events, oldest first, optionally for one source region
    async fn list_failovers(&self, source: Option<&RegionId>) -> Result<Vec<FailoverEvent>>;

    // ========== Recovery tests ==========

    async fn create_test(&self, test: &RecoveryTest) -> Result<()>;

    /// Store the outcome of a scheduled test
    async fn record_test_result(&self, test: &RecoveryTest) -> Result<()>;

    async fn get_test(&self, id: Uuid) -> Result<RecoveryTest>;

    /// Scheduled tests whose time has come, earliest first
    async fn due_tests(&self, now: DateTime<Utc>) -> Result<Vec<RecoveryTest>>;

    async fn list_tests(&self) -> Result<Vec<RecoveryTest>>;

    /// Readiness check
    async fn health_check(&self) -> Result<()>;
}
