//! Failover state machine driven end to end against fake regions

use palisade_core::{DrConfiguration, DrScope, FailoverState, TriggerType};
use palisade_runtime::{AlertSeverity, Error, FailoverRequest};
use palisade_storage::MetadataStore;
use palisade_tests::assertions::{
    assert_aborted_before_promotion, assert_notified, assert_not_notified, assert_path,
};
use palisade_tests::fixtures::{self, job, region};
use palisade_tests::mocks::RegionOp;
use palisade_tests::Harness;
use std::time::Duration;

use FailoverState::*;

const SECOND: Duration = Duration::from_secs(1);

#[tokio::test]
async fn manual_failover_completes() {
    let harness = Harness::new();
    harness.establish_default_topology().await;
    harness
        .feed
        .set_lag(&region::primary(), &region::replica(), 3 * SECOND);

    let event = harness
        .failover
        .trigger(fixtures::manual_failover())
        .await
        .unwrap();

    assert!(event.completed);
    assert_path(
        &event,
        &[Idle, SafetyCheck, Draining, Promoting, Rerouting, Verifying, Completed],
    );
    assert_eq!(event.target_lag, Some(3 * SECOND));
    assert!(event.finished_at.is_some());
    assert_eq!(harness.router.targets(), vec![region::replica()]);
    assert!(harness
        .control
        .was_called(RegionOp::StopWrites, &region::primary()));
    assert!(harness.control.was_called(RegionOp::Promote, &region::replica()));
    assert!(harness
        .control
        .was_called(RegionOp::Ping, &region::replica()));

    // The former primary no longer replicates anywhere
    assert!(harness
        .replication
        .active_links(&region::primary())
        .await
        .unwrap()
        .is_empty());

    let stored = harness.failover.get_event(event.id).await.unwrap();
    assert_eq!(stored, event);
    assert_notified(&harness.notifier, AlertSeverity::Info, "completed");
}

#[tokio::test]
async fn recommended_snapshot_fails_over_to_lowest_lag_replica() {
    let harness = Harness::new();
    let primary = region::primary();
    harness.establish_default_topology().await;
    harness
        .feed
        .set_lag(&primary, &region::replica(), 10 * SECOND);
    harness
        .feed
        .set_lag(&primary, &region::fallback(), 120 * SECOND);
    harness.metrics.set_saturation(&primary, 95.0);

    harness.source.set_failing(true);
    let job_id = harness.backups.schedule_job(job::full("orders")).await.unwrap();
    for _ in 0..3 {
        harness.run_backup(job_id, None).await;
    }

    let snapshot = harness.health.snapshot(&primary).await.unwrap();
    assert!(snapshot.failover_recommended);

    let (event_id, handle) = harness
        .failover
        .handle_snapshot(&snapshot)
        .await
        .unwrap()
        .expect("failover started");
    let event = handle.await.unwrap().unwrap();

    assert_eq!(event.id, event_id);
    assert!(event.completed, "{:?}", event.abort_reason);
    assert_eq!(event.trigger, TriggerType::Automatic);
    assert_eq!(event.target_region, region::replica());
    assert_eq!(event.health_snapshot_id, Some(snapshot.id));
    assert_eq!(event.target_lag, Some(10 * SECOND));
    assert_eq!(harness.router.targets(), vec![region::replica()]);
}

#[tokio::test]
async fn evaluate_latest_uses_the_committed_snapshot() {
    let harness = Harness::new();
    let primary = region::primary();
    harness.establish_default_topology().await;

    assert!(harness
        .failover
        .evaluate_latest(&primary)
        .await
        .unwrap()
        .is_none());

    harness.health.snapshot(&primary).await.unwrap();
    assert!(harness
        .failover
        .evaluate_latest(&primary)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn approval_required_blocks_automatic_failover() {
    let harness = Harness::new();
    let primary = region::primary();
    harness.establish_default_topology().await;

    let mut config = DrConfiguration::platform_default(DrScope::System);
    config.approval_required = true;
    harness.registry.put(&config).await.unwrap();

    let snapshot = recommended_snapshot(&harness).await;
    let started = harness.failover.handle_snapshot(&snapshot).await.unwrap();

    assert!(started.is_none());
    assert_notified(
        &harness.notifier,
        AlertSeverity::Critical,
        "operator approval required",
    );
    assert!(harness.store.active_failover(&primary).await.unwrap().is_none());
    assert!(harness.router.targets().is_empty());
}

#[tokio::test]
async fn disabled_auto_failover_ignores_recommendations() {
    let harness = Harness::new();
    harness.establish_default_topology().await;

    let mut config = DrConfiguration::platform_default(DrScope::System);
    config.auto_failover = false;
    harness.registry.put(&config).await.unwrap();

    let snapshot = recommended_snapshot(&harness).await;
    assert!(harness
        .failover
        .handle_snapshot(&snapshot)
        .await
        .unwrap()
        .is_none());
    assert!(harness.control.calls().is_empty());
}

#[tokio::test]
async fn promotion_failure_rolls_back_to_the_original_primary() {
    let harness = Harness::new();
    harness.establish_default_topology().await;
    harness.control.fail(RegionOp::Promote, &region::replica());

    let event = harness
        .failover
        .trigger(fixtures::manual_failover())
        .await
        .unwrap();

    assert!(!event.completed);
    assert_path(
        &event,
        &[Idle, SafetyCheck, Draining, Promoting, RollingBack, RolledBack],
    );
    assert_eq!(event.rollback_successful(), Some(true));
    assert!(event.failure.as_deref().unwrap().contains("promote failed"));

    // Traffic and writes are back on the source
    assert_eq!(harness.router.targets(), vec![region::primary()]);
    assert!(harness
        .control
        .was_called(RegionOp::ResumeWrites, &region::primary()));
    assert_notified(&harness.notifier, AlertSeverity::Warning, "rolled back");
    assert_not_notified(&harness.notifier, AlertSeverity::Critical);

    // Links stay in place after a rollback
    assert_eq!(
        harness
            .replication
            .active_links(&region::primary())
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn failed_verification_rolls_back_after_rerouting() {
    let harness = Harness::new();
    harness.establish_default_topology().await;
    harness
        .control
        .fail(RegionOp::Ping, &region::replica());

    let event = harness
        .failover
        .trigger(fixtures::manual_failover())
        .await
        .unwrap();

    assert_path(
        &event,
        &[
            Idle,
            SafetyCheck,
            Draining,
            Promoting,
            Rerouting,
            Verifying,
            RollingBack,
            RolledBack,
        ],
    );
    assert_eq!(event.rollback_successful(), Some(true));
    assert_eq!(
        harness.router.targets(),
        vec![region::replica(), region::primary()]
    );
}

#[tokio::test]
async fn unreachable_source_makes_rollback_fail_loudly() {
    let harness = Harness::new();
    harness.establish_default_topology().await;
    harness.control.fail(RegionOp::Promote, &region::replica());
    harness
        .control
        .fail(RegionOp::Ping, &region::primary());

    let event = harness
        .failover
        .trigger(fixtures::manual_failover())
        .await
        .unwrap();

    assert_eq!(event.state, RolledBack);
    assert!(!event.completed);
    let rollback = event.rollback.clone().unwrap();
    assert!(!rollback.successful);
    assert!(rollback.error.unwrap().contains("ping original primary"));

    // Routing was never touched
    assert!(harness.router.targets().is_empty());
    assert_notified(&harness.notifier, AlertSeverity::Critical, "rollback failed");
}

#[tokio::test]
async fn unrecorded_promotion_rolls_back_and_frees_the_region() {
    let harness = Harness::new();
    harness.establish_default_topology().await;
    harness.store.fail_failover_state(Promoting);

    let event = harness
        .failover
        .trigger(fixtures::manual_failover())
        .await
        .unwrap();

    assert_path(
        &event,
        &[Idle, SafetyCheck, Draining, Promoting, RollingBack, RolledBack],
    );
    assert_eq!(event.rollback_successful(), Some(true));
    assert!(event.failure.as_deref().unwrap().contains("injected"));

    // Nothing was promoted and writes are back on the source
    assert!(!harness.control.was_called(RegionOp::Promote, &region::replica()));
    assert!(harness
        .control
        .was_called(RegionOp::ResumeWrites, &region::primary()));
    assert_eq!(harness.router.targets(), vec![region::primary()]);

    let stored = harness.failover.get_event(event.id).await.unwrap();
    assert_eq!(stored.state, RolledBack);
    assert!(harness
        .store
        .active_failover(&region::primary())
        .await
        .unwrap()
        .is_none());

    harness.store.heal_failover_state(Promoting);
    let retry = harness
        .failover
        .trigger(fixtures::manual_failover())
        .await
        .unwrap();
    assert!(retry.completed, "{:?}", retry.failure);
}

#[tokio::test]
async fn unrecorded_reroute_restores_routing_to_the_source() {
    let harness = Harness::new();
    harness.establish_default_topology().await;
    harness.store.fail_failover_state(Rerouting);

    let event = harness
        .failover
        .trigger(fixtures::manual_failover())
        .await
        .unwrap();

    assert_path(
        &event,
        &[Idle, SafetyCheck, Draining, Promoting, Rerouting, RollingBack, RolledBack],
    );
    assert_eq!(event.rollback_successful(), Some(true));
    assert!(harness.control.was_called(RegionOp::Promote, &region::replica()));
    assert_eq!(harness.router.targets(), vec![region::primary()]);
    assert!(harness
        .control
        .was_called(RegionOp::ResumeWrites, &region::primary()));

    let stored = harness.failover.get_event(event.id).await.unwrap();
    assert_eq!(stored.state, RolledBack);

    harness.store.heal_failover_state(Rerouting);
    let retry = harness
        .failover
        .trigger(fixtures::manual_failover())
        .await
        .unwrap();
    assert!(retry.completed, "{:?}", retry.failure);
}

#[tokio::test]
async fn terminal_state_is_stored_after_transient_write_failures() {
    let harness = Harness::new();
    harness.establish_default_topology().await;
    harness.control.fail(RegionOp::Promote, &region::replica());
    harness.store.fail_failover_state_times(RolledBack, 2);

    let event = harness
        .failover
        .trigger(fixtures::manual_failover())
        .await
        .unwrap();

    assert_eq!(event.state, RolledBack);
    let stored = harness.failover.get_event(event.id).await.unwrap();
    assert_eq!(stored, event);
}

#[tokio::test]
async fn interrupted_drain_is_aborted_with_writes_restored() {
    let harness = Harness::new();
    harness.establish_default_topology().await;
    harness.store.fail_failover_state(Draining);

    let event = harness
        .failover
        .trigger(fixtures::manual_failover())
        .await
        .unwrap();

    assert_aborted_before_promotion(&event);
    assert!(event
        .abort_reason
        .as_deref()
        .unwrap()
        .starts_with("interrupted"));
    assert!(harness
        .control
        .was_called(RegionOp::ResumeWrites, &region::primary()));
    assert_eq!(
        harness.failover.get_event(event.id).await.unwrap().state,
        Aborted
    );
}

#[tokio::test]
async fn unsettled_failover_is_reported_for_manual_resolution() {
    let harness = Harness::new();
    harness.establish_default_topology().await;
    harness.store.fail_failover_state(Draining);
    harness.store.fail_failover_state(Aborted);

    let err = harness
        .failover
        .trigger(fixtures::manual_failover())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::StorageUnavailable(_)), "{err:?}");
    assert_notified(
        &harness.notifier,
        AlertSeverity::Critical,
        "manual resolution required",
    );
}

#[tokio::test]
async fn missing_fallback_link_aborts_before_touching_production() {
    let harness = Harness::new();
    harness
        .replication
        .establish_link(
            &region::primary(),
            &region::replica(),
            palisade_core::ReplicationMode::Async,
        )
        .await
        .unwrap();

    let event = harness
        .failover
        .trigger(fixtures::manual_failover())
        .await
        .unwrap();

    assert_aborted_before_promotion(&event);
    assert!(event.abort_reason.as_deref().unwrap().contains("fallback"));
    assert!(harness.control.calls().is_empty());
    assert!(harness.router.targets().is_empty());
}

#[tokio::test]
async fn unmeasurable_fallback_does_not_count() {
    let harness = Harness::new();
    harness.establish_default_topology().await;
    harness
        .feed
        .break_slot(&region::primary(), &region::fallback());

    let event = harness
        .failover
        .trigger(fixtures::manual_failover())
        .await
        .unwrap();
    assert_aborted_before_promotion(&event);
}

#[tokio::test]
async fn overridden_safety_checks_skip_lag_and_fallback() {
    let harness = Harness::new();
    harness
        .replication
        .establish_link(
            &region::primary(),
            &region::replica(),
            palisade_core::ReplicationMode::Async,
        )
        .await
        .unwrap();
    harness
        .feed
        .set_lag(&region::primary(), &region::replica(), 600 * SECOND);
    harness
        .control
        .fail(RegionOp::StopWrites, &region::primary());

    let mut request = fixtures::manual_failover();
    request.override_safety_checks = true;
    let event = harness.failover.trigger(request).await.unwrap();

    assert!(event.completed);
    assert!(event.override_safety_checks);
    assert_eq!(event.target_lag, Some(600 * SECOND));
}

#[tokio::test]
async fn stop_writes_failure_aborts_and_restores_writes() {
    let harness = Harness::new();
    harness.establish_default_topology().await;
    harness
        .control
        .fail(RegionOp::StopWrites, &region::primary());

    let event = harness
        .failover
        .trigger(fixtures::manual_failover())
        .await
        .unwrap();

    assert_aborted_before_promotion(&event);
    assert_path(&event, &[Idle, SafetyCheck, Draining, Aborted]);
    assert!(harness
        .control
        .was_called(RegionOp::ResumeWrites, &region::primary()));
    assert!(!harness.control.was_called(RegionOp::Promote, &region::replica()));
}

#[tokio::test]
async fn lingering_writes_are_terminated_after_grace() {
    let harness = Harness::new();
    harness.establish_default_topology().await;
    harness.control.set_in_flight(&region::primary(), 4);

    let event = harness
        .failover
        .trigger(fixtures::manual_failover())
        .await
        .unwrap();

    assert!(event.completed);
    assert!(harness
        .control
        .was_called(RegionOp::TerminateConnections, &region::primary()));
}

#[tokio::test]
async fn cancel_during_drain_aborts_and_restores_writes() {
    let mut settings = fixtures::fast_failover_settings();
    settings.drain_grace = Duration::from_secs(10);
    let harness = Harness::builder().with_failover_settings(settings).build();
    harness.establish_default_topology().await;
    harness.control.set_in_flight(&region::primary(), 5);

    let (event_id, handle) = harness
        .failover
        .start(fixtures::manual_failover())
        .await
        .unwrap();
    harness.wait_for_state(event_id, Draining).await;

    harness.failover.cancel(event_id).await.unwrap();
    let event = handle.await.unwrap().unwrap();

    assert_aborted_before_promotion(&event);
    assert_eq!(event.abort_reason.as_deref(), Some("cancelled by operator"));
    assert!(harness
        .control
        .was_called(RegionOp::ResumeWrites, &region::primary()));
    assert!(!harness
        .control
        .was_called(RegionOp::TerminateConnections, &region::primary()));
}

#[tokio::test]
async fn cancel_after_promotion_is_refused() {
    let harness = Harness::new();
    harness.establish_default_topology().await;
    harness.control.delay_promotion(Duration::from_millis(300));

    let (event_id, handle) = harness
        .failover
        .start(fixtures::manual_failover())
        .await
        .unwrap();
    harness.wait_for_state(event_id, Promoting).await;

    let err = harness.failover.cancel(event_id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)), "{err:?}");

    let event = handle.await.unwrap().unwrap();
    assert!(event.completed);
}

#[tokio::test]
async fn cancel_of_finished_or_unknown_failover_is_rejected() {
    let harness = Harness::new();
    harness.establish_default_topology().await;
    let event = harness
        .failover
        .trigger(fixtures::manual_failover())
        .await
        .unwrap();

    let err = harness.failover.cancel(event.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)), "{err:?}");

    let err = harness
        .failover
        .cancel(uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "{err:?}");
}

#[tokio::test]
async fn invalid_targets_are_rejected_up_front() {
    let harness = Harness::new();
    harness.establish_default_topology().await;

    let to_self = FailoverRequest::manual(region::primary(), region::primary(), "oncall");
    let err = harness.failover.start(to_self).await.unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "{err:?}");

    let unlinked = FailoverRequest::manual(region::primary(), region::named("ap-south"), "oncall");
    let err = harness.failover.start(unlinked).await.unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "{err:?}");

    assert!(harness
        .store
        .list_failovers(Some(&region::primary()))
        .await
        .unwrap()
        .is_empty());
}

/// Snapshot with lag, saturation and backup failure signals all raised
async fn recommended_snapshot(harness: &Harness) -> palisade_core::HealthSnapshot {
    let primary = region::primary();
    harness
        .feed
        .set_lag(&primary, &region::fallback(), 120 * SECOND);
    harness.metrics.set_saturation(&primary, 95.0);
    harness.source.set_failing(true);
    let job_id = harness.backups.schedule_job(job::full("orders")).await.unwrap();
    for _ in 0..3 {
        harness.run_backup(job_id, None).await;
    }
    let snapshot = harness.health.snapshot(&primary).await.unwrap();
    assert!(snapshot.failover_recommended);
    harness.notifier.clear();
    snapshot
}
