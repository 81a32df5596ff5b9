//! Failover orchestrator
//!
//! Runs one [`FailoverEvent`] per primary region through the
//! [`FailoverStateMachine`]. The store's atomic claim enforces a single
//! active failover per region. Every transition is persisted before the next
//! step starts.
//!
//! `Promoting` is the point of no return: before it an event can be aborted
//! or cancelled with production state restored; from it on, the orchestrator
//! either completes or makes exactly one rollback attempt.

use crate::collaborators::{
    notify_best_effort, AlertSeverity, CollaboratorResult, ConnectionRouter, Notifier,
    RegionControl,
};
use crate::config_registry::{ConfigLease, ConfigRegistry};
use crate::metrics::{FAILOVER_DURATION_SECONDS, FAILOVER_TRANSITIONS_TOTAL};
use crate::replication::ReplicationManager;
use crate::state_machine::FailoverStateMachine;
use crate::{map_storage_error, Error, Result};
use chrono::Utc;
use dashmap::DashMap;
use palisade_core::{
    DrScope, FailoverEvent, FailoverState, HealthSnapshot, RegionId, RollbackRecord, TriggerType,
};
use palisade_storage::{Error as StorageError, FailoverClaim, MetadataStore};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Attempts at storing the terminal state of an interrupted failover
const SETTLE_ATTEMPTS: u32 = 5;
const SETTLE_BACKOFF: Duration = Duration::from_millis(50);

/// Bounds for every wait in the failover path
#[derive(Debug, Clone)]
pub struct FailoverSettings {
    /// Largest replica lag the safety check accepts (inclusive)
    pub safety_lag_bound: Duration,
    /// How long the safety check polls for acceptable lag
    pub safety_check_timeout: Duration,
    pub safety_poll_interval: Duration,
    /// How long in-flight writes may finish before sessions are terminated
    pub drain_grace: Duration,
    pub drain_poll_interval: Duration,
    /// Upper bound on promote, reroute, verify and each rollback step
    pub step_timeout: Duration,
}

impl Default for FailoverSettings {
    fn default() -> Self {
        Self {
            safety_lag_bound: Duration::from_secs(30),
            safety_check_timeout: Duration::from_secs(60),
            safety_poll_interval: Duration::from_secs(5),
            drain_grace: Duration::from_secs(30),
            drain_poll_interval: Duration::from_secs(1),
            step_timeout: Duration::from_secs(120),
        }
    }
}

/// A request to fail over `source`
#[derive(Debug, Clone)]
pub struct FailoverRequest {
    pub source: RegionId,
    /// Replica to promote. When absent the active replica with the lowest
    /// lag is chosen.
    pub target: Option<RegionId>,
    pub trigger: TriggerType,
    pub initiated_by: String,
    pub reason: Option<String>,
    pub override_safety_checks: bool,
    pub health_snapshot_id: Option<Uuid>,
}

impl FailoverRequest {
    /// Operator-initiated failover to a named replica
    pub fn manual(source: RegionId, target: RegionId, initiated_by: impl Into<String>) -> Self {
        Self {
            source,
            target: Some(target),
            trigger: TriggerType::Manual,
            initiated_by: initiated_by.into(),
            reason: None,
            override_safety_checks: false,
            health_snapshot_id: None,
        }
    }
}

/// Handle to a running failover; resolves to the terminal event
pub type FailoverHandle = JoinHandle<Result<FailoverEvent>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CancelState {
    Cancellable,
    CancelRequested,
    Committed,
}

/// Outcome of a pre-commit step
enum Gate {
    Pass,
    Abort(String),
}

#[derive(Clone)]
pub struct FailoverOrchestrator {
    store: Arc<dyn MetadataStore>,
    replication: ReplicationManager,
    control: Arc<dyn RegionControl>,
    router: Arc<dyn ConnectionRouter>,
    notifier: Arc<dyn Notifier>,
    registry: ConfigRegistry,
    scope: DrScope,
    settings: FailoverSettings,
    cancellations: Arc<DashMap<Uuid, CancelState>>,
}

impl FailoverOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn MetadataStore>,
        replication: ReplicationManager,
        control: Arc<dyn RegionControl>,
        router: Arc<dyn ConnectionRouter>,
        notifier: Arc<dyn Notifier>,
        registry: ConfigRegistry,
        scope: DrScope,
    ) -> Self {
        Self {
            store,
            replication,
            control,
            router,
            notifier,
            registry,
            scope,
            settings: FailoverSettings::default(),
            cancellations: Arc::new(DashMap::new()),
        }
    }

    pub fn with_settings(mut self, settings: FailoverSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &FailoverSettings {
        &self.settings
    }

    pub fn replication(&self) -> &ReplicationManager {
        &self.replication
    }

    /// Whether events are recorded in `store`
    pub(crate) fn shares_store(&self, store: &Arc<dyn MetadataStore>) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.store) as *const (), Arc::as_ptr(store) as *const ())
    }

    /// Claim the source region and start the failover in the background.
    ///
    /// # Errors
    ///
    /// - `FailoverInProgress` if the source already has an active failover
    /// - `Configuration` if no usable target replica exists
    #[instrument(
        skip(self, request),
        fields(source = %request.source, trigger = request.trigger.as_str())
    )]
    pub async fn start(&self, request: FailoverRequest) -> Result<(Uuid, FailoverHandle)> {
        let target = self.resolve_target(&request).await?;
        let (lease, _config) = self.registry.lease(&self.scope).await?;

        let mut event = FailoverEvent::new(
            request.source.clone(),
            target,
            request.trigger,
            request.initiated_by,
            Utc::now(),
        );
        event.reason = request.reason;
        event.override_safety_checks = request.override_safety_checks;
        event.health_snapshot_id = request.health_snapshot_id;

        let claim = self
            .store
            .try_begin_failover(&event)
            .await
            .map_err(|e| map_storage_error(e, "Failed to claim failover"))?;
        if let FailoverClaim::Active(event_id) = claim {
            return Err(Error::FailoverInProgress {
                region: request.source,
                event_id,
            });
        }

        let event_id = event.id;
        self.cancellations.insert(event_id, CancelState::Cancellable);
        info!(
            event_id = %event_id,
            target = %event.target_region,
            override_safety_checks = event.override_safety_checks,
            "Failover started"
        );

        let orchestrator = self.clone();
        let handle = tokio::spawn(async move { orchestrator.run(event, lease).await });
        Ok((event_id, handle))
    }

    /// Start a failover and wait for its terminal state
    pub async fn trigger(&self, request: FailoverRequest) -> Result<FailoverEvent> {
        let (_, handle) = self.start(request).await?;
        handle
            .await
            .map_err(|e| Error::Internal(format!("failover task failed: {}", e)))?
    }

    /// Request cancellation of a failover that has not reached `Promoting`.
    /// The event moves to `Aborted` at its next checkpoint.
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub async fn cancel(&self, event_id: Uuid) -> Result<()> {
        if let Some(mut state) = self.cancellations.get_mut(&event_id) {
            return match *state {
                CancelState::Cancellable | CancelState::CancelRequested => {
                    *state = CancelState::CancelRequested;
                    info!("Failover cancellation requested");
                    Ok(())
                }
                CancelState::Committed => Err(Error::InvalidState(format!(
                    "failover {} is past the point of no return",
                    event_id
                ))),
            };
        }

        let event = self.get_event(event_id).await?;
        if event.state.is_terminal() {
            Err(Error::InvalidState(format!(
                "failover {} already finished as {}",
                event_id, event.state
            )))
        } else {
            Err(Error::InvalidState(format!(
                "failover {} is not driven by this orchestrator",
                event_id
            )))
        }
    }

    pub async fn get_event(&self, event_id: Uuid) -> Result<FailoverEvent> {
        self.store
            .get_failover(event_id)
            .await
            .map_err(|e| map_storage_error(e, "Failed to load failover event"))
    }

    /// Apply automatic-trigger gating to a snapshot and start a failover when
    /// it recommends one. Returns `None` when nothing was started.
    #[instrument(skip(self, snapshot), fields(region = %snapshot.primary, snapshot_id = %snapshot.id))]
    pub async fn handle_snapshot(
        &self,
        snapshot: &HealthSnapshot,
    ) -> Result<Option<(Uuid, FailoverHandle)>> {
        if !snapshot.failover_recommended {
            return Ok(None);
        }

        let config = self.registry.effective(&self.scope).await?;
        if !config.auto_failover {
            info!("Failover recommended but automatic failover is disabled");
            return Ok(None);
        }
        if config.approval_required {
            notify_best_effort(
                &self.notifier,
                AlertSeverity::Critical,
                &format!(
                    "Failover recommended for region {}; operator approval required",
                    snapshot.primary
                ),
                json!({
                    "region": snapshot.primary.as_str(),
                    "snapshot_id": snapshot.id,
                    "signals": snapshot.signals,
                }),
            )
            .await;
            return Ok(None);
        }

        let request = FailoverRequest {
            source: snapshot.primary.clone(),
            target: None,
            trigger: TriggerType::Automatic,
            initiated_by: "health-monitor".to_string(),
            reason: Some(format!("critical signals: {:?}", snapshot.signals)),
            override_safety_checks: false,
            health_snapshot_id: Some(snapshot.id),
        };
        match self.start(request).await {
            Ok(started) => Ok(Some(started)),
            Err(Error::FailoverInProgress { event_id, .. }) => {
                info!(active_event = %event_id, "Failover already in progress");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Run [`handle_snapshot`](Self::handle_snapshot) on the latest committed snapshot
    pub async fn evaluate_latest(
        &self,
        primary: &RegionId,
    ) -> Result<Option<(Uuid, FailoverHandle)>> {
        let latest = self
            .store
            .latest_snapshot(primary)
            .await
            .map_err(|e| map_storage_error(e, "Failed to load latest snapshot"))?;
        match latest {
            Some(snapshot) => self.handle_snapshot(&snapshot).await,
            None => Ok(None),
        }
    }

    async fn resolve_target(&self, request: &FailoverRequest) -> Result<RegionId> {
        match &request.target {
            Some(target) => {
                if *target == request.source {
                    return Err(Error::Configuration(format!(
                        "cannot fail region {} over to itself",
                        target
                    )));
                }
                let link = self
                    .store
                    .find_link(&request.source, target)
                    .await
                    .map_err(|e| map_storage_error(e, "Failed to look up replication link"))?;
                match link {
                    Some(link) if link.is_active() => Ok(target.clone()),
                    _ => Err(Error::Configuration(format!(
                        "no active replication link {} -> {}",
                        request.source, target
                    ))),
                }
            }
            None => match self.replication.lowest_lag_replica(&request.source).await? {
                Some((link, _)) => Ok(link.replica),
                None => Err(Error::Configuration(format!(
                    "region {} has no measurable active replica",
                    request.source
                ))),
            },
        }
    }

    #[instrument(skip(self, event, _lease), fields(event_id = %event.id, source = %event.source_region, target = %event.target_region))]
    async fn run(&self, event: FailoverEvent, _lease: ConfigLease) -> Result<FailoverEvent> {
        let event_id = event.id;
        let started = Instant::now();
        let mut sm = FailoverStateMachine::new(event);

        let driven = self.drive(&mut sm).await;
        self.cancellations.remove(&event_id);

        if let Err(cause) = driven {
            error!(error = %cause, state = %sm.current_state(), "Failover interrupted");
            if let Err(e) = self.settle(&mut sm, &cause).await {
                notify_best_effort(
                    &self.notifier,
                    AlertSeverity::Critical,
                    &format!(
                        "Failover {} interrupted in state {}; manual resolution required",
                        event_id,
                        sm.current_state()
                    ),
                    json!({
                        "event_id": event_id,
                        "state": sm.current_state(),
                        "error": cause.to_string(),
                        "settle_error": e.to_string(),
                    }),
                )
                .await;
                return Err(e);
            }
        }

        let event = sm.into_event();
        if event.completed {
            self.finish_completed(&event).await;
        }

        FAILOVER_DURATION_SECONDS
            .with_label_values(&[event.state.as_str()])
            .observe(started.elapsed().as_secs_f64());
        info!(
            outcome = event.state.as_str(),
            completed = event.completed,
            duration_ms = started.elapsed().as_millis() as u64,
            "Failover finished"
        );
        Ok(event)
    }

    /// Bring an interrupted event to a stored terminal state so the region
    /// claim is released. Events stopped before promotion are aborted with
    /// writes resumed on the source.
    async fn settle(&self, sm: &mut FailoverStateMachine, cause: &Error) -> Result<()> {
        let state = sm.current_state();
        if matches!(
            state,
            FailoverState::Idle | FailoverState::SafetyCheck | FailoverState::Draining
        ) {
            if state == FailoverState::Draining {
                self.restore_writes(sm).await;
            }
            let reason = format!("interrupted: {}", cause);
            sm.event_mut().abort_reason = Some(reason.clone());
            sm.transition(FailoverState::Aborted, Some(reason), Utc::now())
                .map_err(Error::InvalidState)?;
        }
        if !sm.current_state().is_terminal() {
            return Err(Error::InvalidState(format!(
                "failover {} cannot settle from {}",
                sm.event().id,
                sm.current_state()
            )));
        }

        let mut delay = SETTLE_BACKOFF;
        let mut attempt = 1;
        loop {
            match self.store.record_failover(sm.event()).await {
                Ok(()) => {
                    warn!(state = %sm.current_state(), attempt, "Interrupted failover settled");
                    return Ok(());
                }
                Err(e @ (StorageError::InvalidState(_) | StorageError::NotFound(_))) => {
                    return Err(map_storage_error(e, "Failed to settle failover"));
                }
                Err(e) if attempt >= SETTLE_ATTEMPTS => {
                    return Err(map_storage_error(e, "Failed to settle failover"));
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Failed to store terminal failover state, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }

    async fn finish_completed(&self, event: &FailoverEvent) {
        let source = &event.source_region;
        let target = &event.target_region;
        if let Err(e) = self.replication.detach_links(source).await {
            warn!(error = %e, "Failed to detach links of former primary");
        }
        notify_best_effort(
            &self.notifier,
            AlertSeverity::Info,
            &format!("Failover {} -> {} completed", source, target),
            json!({ "event_id": event.id, "source": source.as_str(), "target": target.as_str() }),
        )
        .await;
    }

    async fn drive(&self, sm: &mut FailoverStateMachine) -> Result<()> {
        let event_id = sm.event().id;

        if self.cancel_requested(event_id) {
            return self.abort(sm, "cancelled by operator".into()).await;
        }

        self.advance(sm, FailoverState::SafetyCheck, None).await?;
        if let Gate::Abort(reason) = self.safety_check(sm).await? {
            return self.abort(sm, reason).await;
        }

        self.advance(sm, FailoverState::Draining, None).await?;
        if let Gate::Abort(reason) = self.drain(sm).await {
            return self.abort(sm, reason).await;
        }

        if !self.commit(event_id) {
            self.restore_writes(sm).await;
            return self.abort(sm, "cancelled by operator".into()).await;
        }

        let target = sm.event().target_region.clone();

        // Past this point a failed step or an unrecorded transition rolls back
        if let Err(e) = self.advance(sm, FailoverState::Promoting, None).await {
            return self.roll_back(sm, e.to_string()).await;
        }
        if let Err(reason) = self.bounded("promote", self.control.promote(&target)).await {
            return self.roll_back(sm, reason).await;
        }

        if let Err(e) = self.advance(sm, FailoverState::Rerouting, None).await {
            return self.roll_back(sm, e.to_string()).await;
        }
        if let Err(reason) = self.bounded("reroute", self.router.update_target(&target)).await {
            return self.roll_back(sm, reason).await;
        }

        if let Err(e) = self.advance(sm, FailoverState::Verifying, None).await {
            return self.roll_back(sm, e.to_string()).await;
        }
        if let Err(reason) = self.bounded("verify", self.control.ping(&target)).await {
            return self.roll_back(sm, reason).await;
        }

        self.advance(sm, FailoverState::Completed, None).await
    }

    /// Target lag within bound (polled until the timeout) and a healthy
    /// fallback link. Both are skipped when safety checks are overridden.
    async fn safety_check(&self, sm: &mut FailoverStateMachine) -> Result<Gate> {
        let event_id = sm.event().id;
        let source = sm.event().source_region.clone();
        let target = sm.event().target_region.clone();

        let target_link = self
            .store
            .find_link(&source, &target)
            .await
            .map_err(|e| map_storage_error(e, "Failed to look up replication link"))?
            .filter(|link| link.is_active());

        if sm.event().override_safety_checks {
            warn!("Safety checks overridden");
            if let Some(link) = target_link {
                sm.event_mut().target_lag = self.replication.current_lag(link.id).await.ok();
            }
            return Ok(Gate::Pass);
        }

        let Some(target_link) = target_link else {
            return Ok(Gate::Abort(format!(
                "no active replication link {} -> {}",
                source, target
            )));
        };

        let mut has_fallback = false;
        for link in self.replication.active_links(&source).await? {
            if link.id != target_link.id && self.replication.current_lag(link.id).await.is_ok() {
                has_fallback = true;
                break;
            }
        }
        if !has_fallback {
            return Ok(Gate::Abort(
                "no other healthy replication link available as fallback".into(),
            ));
        }

        let bound = self.settings.safety_lag_bound;
        let deadline = Instant::now() + self.settings.safety_check_timeout;
        let mut last_observed;
        loop {
            if self.cancel_requested(event_id) {
                return Ok(Gate::Abort("cancelled by operator".into()));
            }
            match self.replication.current_lag(target_link.id).await {
                Ok(lag) if lag <= bound => {
                    sm.event_mut().target_lag = Some(lag);
                    info!(lag_ms = lag.as_millis() as u64, "Safety check passed");
                    return Ok(Gate::Pass);
                }
                Ok(lag) => last_observed = format!("{:?}", lag),
                Err(e) => last_observed = e.to_string(),
            }
            if Instant::now() + self.settings.safety_poll_interval > deadline {
                return Ok(Gate::Abort(format!(
                    "target replica lag not within {:?} after {:?} (last: {})",
                    bound, self.settings.safety_check_timeout, last_observed
                )));
            }
            tokio::time::sleep(self.settings.safety_poll_interval).await;
        }
    }

    /// Stop writes on the source, wait out in-flight writes for the grace
    /// period, then terminate what is left
    async fn drain(&self, sm: &FailoverStateMachine) -> Gate {
        let event_id = sm.event().id;
        let source = sm.event().source_region.clone();
        let overridden = sm.event().override_safety_checks;

        if let Err(reason) = self.bounded("stop writes", self.control.stop_writes(&source)).await {
            if !overridden {
                self.restore_writes(sm).await;
                return Gate::Abort(reason);
            }
            warn!(error = %reason, "Continuing despite drain failure");
        }

        let deadline = Instant::now() + self.settings.drain_grace;
        loop {
            if self.cancel_requested(event_id) {
                self.restore_writes(sm).await;
                return Gate::Abort("cancelled by operator".into());
            }
            match self.control.in_flight_writes(&source).await {
                Ok(0) => return Gate::Pass,
                Ok(remaining) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    info!(remaining, "Waiting for in-flight writes");
                }
                Err(e) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    warn!(error = %e, "Could not read in-flight writes");
                }
            }
            tokio::time::sleep(self.settings.drain_poll_interval).await;
        }

        match self
            .bounded("terminate connections", self.control.terminate_connections(&source))
            .await
        {
            Ok(terminated) => {
                warn!(terminated, "Terminated sessions after drain grace period");
                Gate::Pass
            }
            Err(_) if overridden => Gate::Pass,
            Err(reason) => {
                self.restore_writes(sm).await;
                Gate::Abort(reason)
            }
        }
    }

    /// Atomically pass the point of no return unless cancellation was
    /// requested first
    fn commit(&self, event_id: Uuid) -> bool {
        match self.cancellations.get_mut(&event_id) {
            Some(state) if *state == CancelState::CancelRequested => false,
            Some(mut state) => {
                *state = CancelState::Committed;
                true
            }
            None => true,
        }
    }

    fn cancel_requested(&self, event_id: Uuid) -> bool {
        self.cancellations
            .get(&event_id)
            .map(|state| *state == CancelState::CancelRequested)
            .unwrap_or(false)
    }

    async fn restore_writes(&self, sm: &FailoverStateMachine) {
        let source = &sm.event().source_region;
        let resumed = self
            .bounded("resume writes", self.control.resume_writes(source))
            .await;
        if let Err(reason) = resumed {
            error!(error = %reason, "Failed to re-enable writes on original primary");
        }
    }

    async fn abort(&self, sm: &mut FailoverStateMachine, reason: String) -> Result<()> {
        warn!(reason = %reason, "Failover aborted");
        sm.event_mut().abort_reason = Some(reason.clone());
        self.advance(sm, FailoverState::Aborted, Some(reason)).await
    }

    /// Single rollback attempt: the original primary must answer a ping,
    /// become the routing target again and accept writes
    async fn roll_back(&self, sm: &mut FailoverStateMachine, reason: String) -> Result<()> {
        error!(reason = %reason, "Failover step failed, rolling back");
        sm.event_mut().failure = Some(reason.clone());
        match self.advance(sm, FailoverState::RollingBack, Some(reason)).await {
            Ok(()) => {}
            Err(e) if sm.current_state() == FailoverState::RollingBack => {
                warn!(error = %e, "Rollback start not recorded, rolling back anyway");
            }
            Err(e) => return Err(e),
        }

        let event_id = sm.event().id;
        let source = sm.event().source_region.clone();
        let started_at = Utc::now();
        let attempt = async {
            self.bounded("ping original primary", self.control.ping(&source))
                .await?;
            self.bounded("restore routing", self.router.update_target(&source))
                .await?;
            self.bounded("resume writes", self.control.resume_writes(&source))
                .await
        }
        .await;

        let successful = attempt.is_ok();
        sm.event_mut().rollback = Some(RollbackRecord {
            started_at,
            finished_at: Utc::now(),
            successful,
            error: attempt.as_ref().err().cloned(),
        });
        let recorded = self.advance(sm, FailoverState::RolledBack, None).await;

        let context = json!({
            "event_id": event_id,
            "source": source.as_str(),
            "target": sm.event().target_region.as_str(),
            "failure": sm.event().failure,
            "rollback_error": attempt.as_ref().err(),
        });
        if successful {
            notify_best_effort(
                &self.notifier,
                AlertSeverity::Warning,
                &format!("Failover {} rolled back to {}", event_id, source),
                context,
            )
            .await;
        } else {
            error!("Rollback failed; manual intervention required");
            notify_best_effort(
                &self.notifier,
                AlertSeverity::Critical,
                &format!(
                    "Failover {} rollback failed; region {} needs manual recovery",
                    event_id, source
                ),
                context,
            )
            .await;
        }
        recorded
    }

    async fn advance(
        &self,
        sm: &mut FailoverStateMachine,
        to: FailoverState,
        note: Option<String>,
    ) -> Result<()> {
        let from = sm.current_state();
        sm.transition(to, note, Utc::now()).map_err(Error::InvalidState)?;
        self.store
            .record_failover(sm.event())
            .await
            .map_err(|e| map_storage_error(e, "Failed to record failover transition"))?;

        FAILOVER_TRANSITIONS_TOTAL
            .with_label_values(&[from.as_str(), to.as_str()])
            .inc();
        info!(event_id = %sm.event().id, from = %from, to = %to, "Failover transition");
        Ok(())
    }

    async fn bounded<T>(
        &self,
        step: &str,
        call: impl Future<Output = CollaboratorResult<T>>,
    ) -> std::result::Result<T, String> {
        match tokio::time::timeout(self.settings.step_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(format!("{} failed: {}", step, e)),
            Err(_) => Err(format!(
                "{} timed out after {:?}",
                step, self.settings.step_timeout
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = FailoverSettings::default();
        assert_eq!(settings.drain_grace, Duration::from_secs(30));
        assert_eq!(settings.safety_check_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_manual_request() {
        let request = FailoverRequest::manual(
            RegionId::new("us-east").unwrap(),
            RegionId::new("us-west").unwrap(),
            "ops@example.com",
        );
        assert_eq!(request.trigger, TriggerType::Manual);
        assert!(!request.override_safety_checks);
        assert_eq!(request.target.unwrap().as_str(), "us-west");
    }
}
