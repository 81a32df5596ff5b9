//! In-process fakes for the collaborator contracts
//!
//! Every fake records what it was asked to do and can be told to fail, so
//! tests can drive the engine down its error paths without a control plane.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use palisade_core::{
    BackupExecution, BackupJob, BackupScope, DrConfiguration, DrScope, Environment,
    ExecutionStatus, FailoverEvent, FailoverState, HealthSnapshot, RecoveryTest, RegionId,
    ReplicationLink, ReplicationMode, ResourceSaturation,
};
use palisade_runtime::collaborators::{
    AlertSeverity, BackupSource, CollaboratorError, CollaboratorResult, ConnectionRouter,
    DrillTopology, ExportRequest, ExportedData, FeedPositions, MetricsSource, Notifier,
    RawMetrics, RecoveryEnvironment, RegionControl, ReplicationFeed, RestoreArtifact,
    RestoredDataset,
};
use palisade_storage::{FailoverClaim, MemoryObjectStore, MemoryStore, MetadataStore, ObjectStore};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn unavailable(what: impl std::fmt::Display) -> CollaboratorError {
    CollaboratorError::Unavailable(format!("{} (injected)", what))
}

/// Region control operations a test can make fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionOp {
    StopWrites,
    ResumeWrites,
    InFlightWrites,
    TerminateConnections,
    Promote,
    Ping,
}

impl RegionOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionOp::StopWrites => "stop_writes",
            RegionOp::ResumeWrites => "resume_writes",
            RegionOp::InFlightWrites => "in_flight_writes",
            RegionOp::TerminateConnections => "terminate_connections",
            RegionOp::Promote => "promote",
            RegionOp::Ping => "ping",
        }
    }
}

/// Fake database regions. Calls are recorded as `"<op>:<region>"`.
#[derive(Default)]
pub struct FakeRegionControl {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashSet<(RegionOp, String)>>,
    in_flight: Mutex<HashMap<String, u64>>,
    promote_delay: Mutex<Option<Duration>>,
}

impl FakeRegionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `op` against `region` fail as unavailable
    pub fn fail(&self, op: RegionOp, region: &RegionId) {
        locked(&self.failures).insert((op, region.as_str().to_string()));
    }

    pub fn heal(&self, op: RegionOp, region: &RegionId) {
        locked(&self.failures).remove(&(op, region.as_str().to_string()));
    }

    /// Writes reported in flight until changed
    pub fn set_in_flight(&self, region: &RegionId, count: u64) {
        locked(&self.in_flight).insert(region.as_str().to_string(), count);
    }

    /// Hold every promotion for `delay` before answering
    pub fn delay_promotion(&self, delay: Duration) {
        *locked(&self.promote_delay) = Some(delay);
    }

    pub fn calls(&self) -> Vec<String> {
        locked(&self.calls).clone()
    }

    pub fn was_called(&self, op: RegionOp, region: &RegionId) -> bool {
        let expected = format!("{}:{}", op.as_str(), region);
        locked(&self.calls).iter().any(|call| *call == expected)
    }

    fn record(&self, op: RegionOp, region: &RegionId) -> CollaboratorResult<()> {
        locked(&self.calls).push(format!("{}:{}", op.as_str(), region));
        if locked(&self.failures).contains(&(op, region.as_str().to_string())) {
            return Err(unavailable(format!("{} on {}", op.as_str(), region)));
        }
        Ok(())
    }
}

#[async_trait]
impl RegionControl for FakeRegionControl {
    async fn stop_writes(&self, region: &RegionId) -> CollaboratorResult<()> {
        self.record(RegionOp::StopWrites, region)
    }

    async fn resume_writes(&self, region: &RegionId) -> CollaboratorResult<()> {
        self.record(RegionOp::ResumeWrites, region)
    }

    async fn in_flight_writes(&self, region: &RegionId) -> CollaboratorResult<u64> {
        self.record(RegionOp::InFlightWrites, region)?;
        Ok(locked(&self.in_flight)
            .get(region.as_str())
            .copied()
            .unwrap_or(0))
    }

    async fn terminate_connections(&self, region: &RegionId) -> CollaboratorResult<u64> {
        self.record(RegionOp::TerminateConnections, region)?;
        Ok(locked(&self.in_flight)
            .insert(region.as_str().to_string(), 0)
            .unwrap_or(0))
    }

    async fn promote(&self, region: &RegionId) -> CollaboratorResult<()> {
        let delay = *locked(&self.promote_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.record(RegionOp::Promote, region)
    }

    async fn ping(&self, region: &RegionId) -> CollaboratorResult<()> {
        self.record(RegionOp::Ping, region)
    }
}

/// Fake traffic router remembering every target it was pointed at
#[derive(Default)]
pub struct FakeRouter {
    targets: Mutex<Vec<RegionId>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make routing to `region` fail
    pub fn fail_routing_to(&self, region: &RegionId) {
        locked(&self.failing).insert(region.as_str().to_string());
    }

    /// Successful routing changes, oldest first
    pub fn targets(&self) -> Vec<RegionId> {
        locked(&self.targets).clone()
    }
}

#[async_trait]
impl ConnectionRouter for FakeRouter {
    async fn update_target(&self, region: &RegionId) -> CollaboratorResult<()> {
        if locked(&self.failing).contains(region.as_str()) {
            return Err(unavailable(format!("routing to {}", region)));
        }
        locked(&self.targets).push(region.clone());
        Ok(())
    }
}

/// Fake metrics with per-region saturation; unknown regions report 20%
#[derive(Default)]
pub struct FakeMetrics {
    samples: Mutex<HashMap<String, RawMetrics>>,
}

impl FakeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_saturation(&self, region: &RegionId, percent: f64) {
        locked(&self.samples).insert(
            region.as_str().to_string(),
            RawMetrics {
                active_connections: 25,
                saturation: ResourceSaturation::uniform(percent),
            },
        );
    }
}

#[async_trait]
impl MetricsSource for FakeMetrics {
    async fn sample(&self, region: &RegionId) -> CollaboratorResult<RawMetrics> {
        Ok(locked(&self.samples)
            .get(region.as_str())
            .cloned()
            .unwrap_or(RawMetrics {
                active_connections: 25,
                saturation: ResourceSaturation::uniform(20.0),
            }))
    }
}

/// A delivered notification
#[derive(Debug, Clone)]
pub struct Notification {
    pub severity: AlertSeverity,
    pub message: String,
    pub context: Value,
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Notification> {
        locked(&self.sent).clone()
    }

    pub fn with_severity(&self, severity: AlertSeverity) -> Vec<Notification> {
        locked(&self.sent)
            .iter()
            .filter(|n| n.severity == severity)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        locked(&self.sent).clear();
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        severity: AlertSeverity,
        message: &str,
        context: Value,
    ) -> CollaboratorResult<()> {
        locked(&self.sent).push(Notification {
            severity,
            message: message.to_string(),
            context,
        });
        Ok(())
    }
}

/// Fake replication feed. Each slot reports a settable lag; new slots start
/// fully caught up.
#[derive(Default)]
pub struct FakeFeed {
    lags: Mutex<HashMap<String, Duration>>,
    modes: Mutex<HashMap<String, ReplicationMode>>,
    broken: Mutex<HashSet<String>>,
}

impl FakeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot name the feed hands out for a region pair
    pub fn slot_name(primary: &RegionId, replica: &RegionId) -> String {
        format!("{}_{}", primary, replica).replace('-', "_")
    }

    pub fn set_lag(&self, primary: &RegionId, replica: &RegionId, lag: Duration) {
        locked(&self.lags).insert(Self::slot_name(primary, replica), lag);
    }

    /// Positions of the pair's slot can no longer be read
    pub fn break_slot(&self, primary: &RegionId, replica: &RegionId) {
        locked(&self.broken).insert(Self::slot_name(primary, replica));
    }

    pub fn mode(&self, slot: &str) -> Option<ReplicationMode> {
        locked(&self.modes).get(slot).copied()
    }
}

#[async_trait]
impl ReplicationFeed for FakeFeed {
    async fn create_slot(
        &self,
        primary: &RegionId,
        replica: &RegionId,
        mode: ReplicationMode,
    ) -> CollaboratorResult<String> {
        let slot = Self::slot_name(primary, replica);
        locked(&self.lags).entry(slot.clone()).or_insert(Duration::ZERO);
        locked(&self.modes).insert(slot.clone(), mode);
        Ok(slot)
    }

    async fn set_mode(&self, slot: &str, mode: ReplicationMode) -> CollaboratorResult<()> {
        locked(&self.modes).insert(slot.to_string(), mode);
        Ok(())
    }

    async fn positions(&self, slot: &str) -> CollaboratorResult<FeedPositions> {
        if locked(&self.broken).contains(slot) {
            return Err(unavailable(format!("slot {}", slot)));
        }
        let lag = locked(&self.lags)
            .get(slot)
            .copied()
            .ok_or_else(|| CollaboratorError::Rejected(format!("unknown slot {}", slot)))?;
        let committed = Utc::now();
        let behind = chrono::Duration::from_std(lag)
            .map_err(|e| CollaboratorError::Rejected(e.to_string()))?;
        Ok(FeedPositions {
            primary_committed_at: committed,
            replica_applied_at: committed - behind,
        })
    }
}

/// Fake database contents, as a list of change timestamps (one row each)
pub struct FakeBackupSource {
    changes: Mutex<Vec<DateTime<Utc>>>,
    failing: AtomicBool,
    export_delay: Mutex<Option<Duration>>,
    requests: Mutex<Vec<ExportRequest>>,
}

impl Default for FakeBackupSource {
    fn default() -> Self {
        Self {
            changes: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            export_delay: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl FakeBackupSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_change(&self, at: DateTime<Utc>) {
        locked(&self.changes).push(at);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Hold every export for `delay` before answering
    pub fn delay_exports(&self, delay: Duration) {
        *locked(&self.export_delay) = Some(delay);
    }

    pub fn requests(&self) -> Vec<ExportRequest> {
        locked(&self.requests).clone()
    }
}

#[async_trait]
impl BackupSource for FakeBackupSource {
    async fn export(
        &self,
        _scope: &BackupScope,
        request: ExportRequest,
    ) -> CollaboratorResult<ExportedData> {
        locked(&self.requests).push(request);
        let delay = *locked(&self.export_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Rejected("export failed (injected)".into()));
        }

        let (kind, since) = match request {
            ExportRequest::Full => ("full", None),
            ExportRequest::Incremental { since } => ("incremental", Some(since)),
            ExportRequest::LogArchive { since } => ("log_archive", since),
        };
        let mut selected: Vec<DateTime<Utc>> = locked(&self.changes)
            .iter()
            .copied()
            .filter(|at| since.map(|s| *at > s).unwrap_or(true))
            .collect();
        selected.sort();

        let latest_change_at = selected
            .last()
            .copied()
            .or(since)
            .unwrap_or_else(Utc::now);
        let payload = json!({
            "kind": kind,
            "changes": selected.iter().map(|at| at.to_rfc3339()).collect::<Vec<_>>(),
        });
        Ok(ExportedData {
            payload: payload.to_string().into_bytes(),
            row_count: selected.len() as u64,
            latest_change_at,
        })
    }
}

/// Decode the change list of a payload produced by [`FakeBackupSource`]
pub fn decode_changes(payload: &[u8]) -> Option<Vec<DateTime<Utc>>> {
    let value: Value = serde_json::from_slice(payload).ok()?;
    value["changes"]
        .as_array()?
        .iter()
        .map(|at| {
            at.as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|at| at.with_timezone(&Utc))
        })
        .collect()
}

/// Fake restore target. Replays [`FakeBackupSource`] payloads, deduplicating
/// changes, and stops at `until` when given.
#[derive(Default)]
pub struct FakeEnvironment {
    topology: Mutex<Option<DrillTopology>>,
    failing: AtomicBool,
    /// Overrides the latest change a restore reports
    reported_latest_change: Mutex<Option<DateTime<Utc>>>,
    restores: Mutex<Vec<(Environment, usize, Option<DateTime<Utc>>)>>,
}

impl FakeEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_drill_topology(
        &self,
        primary: RegionId,
        replica: RegionId,
        fallback: Option<RegionId>,
    ) {
        *locked(&self.topology) = Some(DrillTopology {
            primary,
            replica,
            fallback,
        });
    }

    /// Make every restore report `at` as its latest change, whatever it
    /// actually applied
    pub fn report_latest_change(&self, at: DateTime<Utc>) {
        *locked(&self.reported_latest_change) = Some(at);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// `(environment, artifact count, until)` of every restore, oldest first
    pub fn restores(&self) -> Vec<(Environment, usize, Option<DateTime<Utc>>)> {
        locked(&self.restores).clone()
    }
}

#[async_trait]
impl RecoveryEnvironment for FakeEnvironment {
    async fn restore(
        &self,
        environment: &Environment,
        artifacts: Vec<RestoreArtifact>,
        until: Option<DateTime<Utc>>,
    ) -> CollaboratorResult<RestoredDataset> {
        locked(&self.restores).push((environment.clone(), artifacts.len(), until));
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Rejected("restore failed (injected)".into()));
        }

        let mut applied = BTreeSet::new();
        let mut applied_checksums = Vec::with_capacity(artifacts.len());
        for artifact in &artifacts {
            let changes = decode_changes(&artifact.payload).ok_or_else(|| {
                CollaboratorError::Rejected(format!(
                    "artifact of execution {} is not a readable backup",
                    artifact.execution_id
                ))
            })?;
            applied.extend(
                changes
                    .into_iter()
                    .filter(|at| until.map(|u| *at <= u).unwrap_or(true)),
            );
            applied_checksums.push(palisade_storage::checksum(&artifact.payload));
        }

        let latest_change_at =
            (*locked(&self.reported_latest_change)).or_else(|| applied.iter().next_back().copied());
        Ok(RestoredDataset {
            applied_checksums,
            row_count: applied.len() as u64,
            latest_change_at,
        })
    }

    async fn drill_topology(&self, environment: &Environment) -> CollaboratorResult<DrillTopology> {
        locked(&self.topology).clone().ok_or_else(|| {
            CollaboratorError::Rejected(format!("no drill topology for {}", environment))
        })
    }
}

/// In-memory object store that can be switched to unreachable
#[derive(Default)]
pub struct SwitchableObjectStore {
    inner: MemoryObjectStore,
    unreachable: AtomicBool,
}

impl SwitchableObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryObjectStore {
        &self.inner
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn check(&self) -> palisade_storage::Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(palisade_storage::Error::Unavailable(
                "object store unreachable (injected)".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for SwitchableObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> palisade_storage::Result<String> {
        self.check()?;
        self.inner.put(key, bytes).await
    }

    async fn get(&self, key: &str) -> palisade_storage::Result<Vec<u8>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> palisade_storage::Result<Vec<u8>> {
        self.check()?;
        self.inner.get_range(key, range).await
    }

    async fn delete(&self, key: &str) -> palisade_storage::Result<()> {
        self.check()?;
        self.inner.delete(key).await
    }
}

/// In-memory metadata store whose failover and execution writes can be made
/// to fail by the state being written
#[derive(Default)]
pub struct SwitchableStore {
    inner: MemoryStore,
    /// Failover states whose writes fail, with how many more times
    failing_transitions: Mutex<HashMap<FailoverState, u32>>,
    failing_finalizes: Mutex<HashSet<ExecutionStatus>>,
}

impl SwitchableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Fail every write of a failover event in `state` until healed
    pub fn fail_failover_state(&self, state: FailoverState) {
        locked(&self.failing_transitions).insert(state, u32::MAX);
    }

    /// Fail the next `times` writes of a failover event in `state`
    pub fn fail_failover_state_times(&self, state: FailoverState, times: u32) {
        locked(&self.failing_transitions).insert(state, times);
    }

    pub fn heal_failover_state(&self, state: FailoverState) {
        locked(&self.failing_transitions).remove(&state);
    }

    /// Fail every finalize that would store `status` until healed
    pub fn fail_finalize(&self, status: ExecutionStatus) {
        locked(&self.failing_finalizes).insert(status);
    }

    pub fn heal_finalize(&self, status: ExecutionStatus) {
        locked(&self.failing_finalizes).remove(&status);
    }

    fn injected(what: String) -> palisade_storage::Error {
        palisade_storage::Error::Unavailable(format!("{} (injected)", what))
    }

    fn check_transition(&self, event: &FailoverEvent) -> palisade_storage::Result<()> {
        let mut failing = locked(&self.failing_transitions);
        let Some(remaining) = failing.get_mut(&event.state) else {
            return Ok(());
        };
        if *remaining == 0 {
            return Ok(());
        }
        *remaining = remaining.saturating_sub(1);
        Err(Self::injected(format!("write of failover {} in {}", event.id, event.state)))
    }
}

#[async_trait]
impl MetadataStore for SwitchableStore {
    async fn put_configuration(&self, config: &DrConfiguration) -> palisade_storage::Result<()> {
        self.inner.put_configuration(config).await
    }

    async fn get_configuration(
        &self,
        scope: &DrScope,
    ) -> palisade_storage::Result<Option<DrConfiguration>> {
        self.inner.get_configuration(scope).await
    }

    async fn create_job(&self, job: &BackupJob) -> palisade_storage::Result<()> {
        self.inner.create_job(job).await
    }

    async fn update_job(&self, job: &BackupJob) -> palisade_storage::Result<()> {
        self.inner.update_job(job).await
    }

    async fn get_job(&self, id: Uuid) -> palisade_storage::Result<BackupJob> {
        self.inner.get_job(id).await
    }

    async fn list_jobs(&self) -> palisade_storage::Result<Vec<BackupJob>> {
        self.inner.list_jobs().await
    }

    async fn begin_execution(
        &self,
        execution: &BackupExecution,
        stale_before: DateTime<Utc>,
    ) -> palisade_storage::Result<(Uuid, bool)> {
        self.inner.begin_execution(execution, stale_before).await
    }

    async fn finalize_execution(
        &self,
        execution: &BackupExecution,
    ) -> palisade_storage::Result<()> {
        if locked(&self.failing_finalizes).contains(&execution.status) {
            return Err(Self::injected(format!(
                "finalize of execution {} as {}",
                execution.id,
                execution.status.as_str()
            )));
        }
        self.inner.finalize_execution(execution).await
    }

    async fn mark_recovery_tested(&self, id: Uuid) -> palisade_storage::Result<()> {
        self.inner.mark_recovery_tested(id).await
    }

    async fn get_execution(&self, id: Uuid) -> palisade_storage::Result<BackupExecution> {
        self.inner.get_execution(id).await
    }

    async fn running_execution(
        &self,
        job_id: Uuid,
    ) -> palisade_storage::Result<Option<BackupExecution>> {
        self.inner.running_execution(job_id).await
    }

    async fn list_executions(
        &self,
        job_id: Uuid,
    ) -> palisade_storage::Result<Vec<BackupExecution>> {
        self.inner.list_executions(job_id).await
    }

    async fn delete_execution(&self, id: Uuid) -> palisade_storage::Result<()> {
        self.inner.delete_execution(id).await
    }

    async fn count_failed_executions_since(
        &self,
        since: DateTime<Utc>,
    ) -> palisade_storage::Result<u32> {
        self.inner.count_failed_executions_since(since).await
    }

    async fn upsert_link(&self, link: &ReplicationLink) -> palisade_storage::Result<()> {
        self.inner.upsert_link(link).await
    }

    async fn get_link(&self, id: Uuid) -> palisade_storage::Result<ReplicationLink> {
        self.inner.get_link(id).await
    }

    async fn find_link(
        &self,
        primary: &RegionId,
        replica: &RegionId,
    ) -> palisade_storage::Result<Option<ReplicationLink>> {
        self.inner.find_link(primary, replica).await
    }

    async fn links_for_primary(
        &self,
        primary: &RegionId,
    ) -> palisade_storage::Result<Vec<ReplicationLink>> {
        self.inner.links_for_primary(primary).await
    }

    async fn append_snapshot(&self, snapshot: &HealthSnapshot) -> palisade_storage::Result<()> {
        self.inner.append_snapshot(snapshot).await
    }

    async fn latest_snapshot(
        &self,
        primary: &RegionId,
    ) -> palisade_storage::Result<Option<HealthSnapshot>> {
        self.inner.latest_snapshot(primary).await
    }

    async fn snapshots_since(
        &self,
        primary: &RegionId,
        since: DateTime<Utc>,
    ) -> palisade_storage::Result<Vec<HealthSnapshot>> {
        self.inner.snapshots_since(primary, since).await
    }

    async fn prune_snapshots(&self, cutoff: DateTime<Utc>) -> palisade_storage::Result<u64> {
        self.inner.prune_snapshots(cutoff).await
    }

    async fn try_begin_failover(
        &self,
        event: &FailoverEvent,
    ) -> palisade_storage::Result<FailoverClaim> {
        self.check_transition(event)?;
        self.inner.try_begin_failover(event).await
    }

    async fn record_failover(&self, event: &FailoverEvent) -> palisade_storage::Result<()> {
        self.check_transition(event)?;
        self.inner.record_failover(event).await
    }

    async fn get_failover(&self, id: Uuid) -> palisade_storage::Result<FailoverEvent> {
        self.inner.get_failover(id).await
    }

    async fn active_failover(
        &self,
        source: &RegionId,
    ) -> palisade_storage::Result<Option<FailoverEvent>> {
        self.inner.active_failover(source).await
    }

    async fn list_failovers(
        &self,
        source: Option<&RegionId>,
    ) -> palisade_storage::Result<Vec<FailoverEvent>> {
        self.inner.list_failovers(source).await
    }

    async fn create_test(&self, test: &RecoveryTest) -> palisade_storage::Result<()> {
        self.inner.create_test(test).await
    }

    async fn record_test_result(&self, test: &RecoveryTest) -> palisade_storage::Result<()> {
        self.inner.record_test_result(test).await
    }

    async fn get_test(&self, id: Uuid) -> palisade_storage::Result<RecoveryTest> {
        self.inner.get_test(id).await
    }

    async fn due_tests(&self, now: DateTime<Utc>) -> palisade_storage::Result<Vec<RecoveryTest>> {
        self.inner.due_tests(now).await
    }

    async fn list_tests(&self) -> palisade_storage::Result<Vec<RecoveryTest>> {
        self.inner.list_tests().await
    }

    async fn health_check(&self) -> palisade_storage::Result<()> {
        self.inner.health_check().await
    }
}
