//! Cross-cutting guarantees: one failover per region, one running execution
//! per job, the inclusive lag bound, configuration leases and retention

use chrono::{Duration as ChronoDuration, Utc};
use palisade_core::{DrConfiguration, DrScope, FailoverState, ReplicationMode, ScenarioType};
use palisade_runtime::Error;
use palisade_storage::{MetadataStore, ObjectStore};
use palisade_tests::assertions::{assert_aborted_before_promotion, assert_test_passed};
use palisade_tests::fixtures::{self, job, region};
use palisade_tests::mocks::{FakeFeed, RegionOp};
use palisade_tests::Harness;
use std::collections::HashSet;
use std::time::Duration;

mod failover_exclusivity {
    use super::*;

    #[tokio::test]
    async fn second_failover_for_a_region_is_refused_while_one_runs() {
        let harness = Harness::new();
        harness.establish_default_topology().await;
        harness.control.delay_promotion(Duration::from_millis(300));

        let (first_id, handle) = harness
            .failover
            .start(fixtures::manual_failover())
            .await
            .unwrap();

        let mut second = fixtures::manual_failover();
        second.target = Some(region::fallback());
        let err = harness.failover.start(second).await.unwrap_err();
        match err {
            Error::FailoverInProgress {
                region: busy,
                event_id,
            } => {
                assert_eq!(busy, region::primary());
                assert_eq!(event_id, first_id);
            }
            other => panic!("expected FailoverInProgress, got {other:?}"),
        }

        let event = handle.await.unwrap().unwrap();
        assert!(event.completed);
        assert_eq!(
            harness
                .store
                .list_failovers(Some(&region::primary()))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn concurrent_starts_claim_the_region_once() {
        let harness = Harness::new();
        harness.establish_default_topology().await;
        harness.control.delay_promotion(Duration::from_millis(200));

        let (a, b) = tokio::join!(
            harness.failover.start(fixtures::manual_failover()),
            harness.failover.start(fixtures::manual_failover()),
        );
        let started: Vec<_> = [a, b].into_iter().filter_map(Result::ok).collect();
        assert_eq!(started.len(), 1);

        for (_, handle) in started {
            handle.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn region_can_fail_over_again_after_a_terminal_event() {
        let harness = Harness::new();
        harness.establish_default_topology().await;
        harness.control.fail(RegionOp::Promote, &region::replica());

        let first = harness
            .failover
            .trigger(fixtures::manual_failover())
            .await
            .unwrap();
        assert_eq!(first.state, FailoverState::RolledBack);

        harness.control.heal(RegionOp::Promote, &region::replica());
        let second = harness
            .failover
            .trigger(fixtures::manual_failover())
            .await
            .unwrap();
        assert!(second.completed);
    }
}

mod safety_lag_bound {
    use super::*;

    async fn failover_with_target_lag(lag: Duration) -> palisade_core::FailoverEvent {
        let harness = Harness::new();
        harness.establish_default_topology().await;
        harness
            .feed
            .set_lag(&region::primary(), &region::replica(), lag);
        harness
            .failover
            .trigger(fixtures::manual_failover())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn lag_at_the_bound_passes() {
        let event = failover_with_target_lag(Duration::from_secs(30)).await;
        assert!(event.completed, "{:?}", event.abort_reason);
        assert_eq!(event.target_lag, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn lag_just_over_the_bound_aborts() {
        let event =
            failover_with_target_lag(Duration::from_secs(30) + Duration::from_micros(1)).await;
        assert_aborted_before_promotion(&event);
        assert!(event
            .abort_reason
            .as_deref()
            .unwrap()
            .contains("target replica lag"));
    }

    #[tokio::test]
    async fn lag_recovering_within_the_timeout_passes() {
        let mut settings = fixtures::fast_failover_settings();
        settings.safety_check_timeout = Duration::from_secs(2);
        let harness = Harness::builder().with_failover_settings(settings).build();
        harness.establish_default_topology().await;
        harness
            .feed
            .set_lag(&region::primary(), &region::replica(), Duration::from_secs(45));

        let (event_id, handle) = harness
            .failover
            .start(fixtures::manual_failover())
            .await
            .unwrap();
        harness
            .wait_for_state(event_id, FailoverState::SafetyCheck)
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        harness
            .feed
            .set_lag(&region::primary(), &region::replica(), Duration::from_secs(5));

        let event = handle.await.unwrap().unwrap();
        assert!(event.completed, "{:?}", event.abort_reason);
        assert_eq!(event.target_lag, Some(Duration::from_secs(5)));
    }
}

mod configuration_leases {
    use super::*;

    #[tokio::test]
    async fn configuration_cannot_change_under_a_running_failover() {
        let harness = Harness::new();
        harness.establish_default_topology().await;
        harness.control.delay_promotion(Duration::from_millis(300));

        let (_, handle) = harness
            .failover
            .start(fixtures::manual_failover())
            .await
            .unwrap();
        assert_eq!(harness.registry.active_leases(&DrScope::System), 1);

        let config = DrConfiguration::platform_default(DrScope::System);
        let err = harness.registry.put(&config).await.unwrap_err();
        assert!(matches!(err, Error::ConfigurationInUse(_)), "{err:?}");

        handle.await.unwrap().unwrap();
        assert_eq!(harness.registry.active_leases(&DrScope::System), 0);
        harness.registry.put(&config).await.unwrap();
    }

    #[tokio::test]
    async fn invalid_configuration_is_rejected() {
        let harness = Harness::new();
        let mut config = DrConfiguration::platform_default(DrScope::System);
        config.rpo_minutes = 0;

        let err = harness.registry.put(&config).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)), "{err:?}");
    }
}

mod execution_exclusivity {
    use super::*;

    #[tokio::test]
    async fn concurrent_execute_now_calls_share_one_execution() {
        let harness = Harness::new();
        harness.source.record_change(Utc::now());
        harness.source.delay_exports(Duration::from_millis(200));
        let job_id = harness.backups.schedule_job(job::full("orders")).await.unwrap();

        let (a, b, c) = tokio::join!(
            harness.backups.execute_now(job_id, None),
            harness.backups.execute_now(job_id, None),
            harness.backups.execute_now(job_id, None),
        );
        let ids: HashSet<_> = [a, b, c].into_iter().map(Result::unwrap).collect();
        assert_eq!(ids.len(), 1);

        let execution_id = *ids.iter().next().unwrap();
        harness.wait_for_execution(execution_id).await;
        assert_eq!(harness.store.list_executions(job_id).await.unwrap().len(), 1);
        assert_eq!(harness.source.requests().len(), 1);
    }
}

mod replication_links {
    use super::*;

    #[tokio::test]
    async fn establishing_an_active_pair_twice_returns_the_same_link() {
        let harness = Harness::new();
        let (first, _) = harness.establish_default_topology().await;
        let (again, _) = harness.establish_default_topology().await;
        assert_eq!(first, again);
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
    async fn region_cannot_replicate_to_itself() {
        let harness = Harness::new();
        let err = harness
            .replication
            .establish_link(&region::primary(), &region::primary(), ReplicationMode::Async)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)), "{err:?}");
    }

    #[tokio::test]
    async fn switch_to_sync_requires_low_lag() {
        let harness = Harness::new();
        let (link_id, _) = harness.establish_default_topology().await;
        let slot = FakeFeed::slot_name(&region::primary(), &region::replica());

        harness
            .feed
            .set_lag(&region::primary(), &region::replica(), Duration::from_secs(5));
        let err = harness
            .replication
            .reconfigure(link_id, ReplicationMode::Sync)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LagTooHigh { .. }), "{err:?}");
        assert_eq!(harness.feed.mode(&slot), Some(ReplicationMode::Async));

        harness
            .feed
            .set_lag(&region::primary(), &region::replica(), Duration::from_millis(500));
        harness
            .replication
            .reconfigure(link_id, ReplicationMode::Sync)
            .await
            .unwrap();
        assert_eq!(harness.feed.mode(&slot), Some(ReplicationMode::Sync));
        assert_eq!(
            harness.replication.get_link(link_id).await.unwrap().mode,
            ReplicationMode::Sync
        );
    }

    #[tokio::test]
    async fn lowest_lag_replica_skips_unmeasurable_links() {
        let harness = Harness::new();
        harness.establish_default_topology().await;
        harness
            .feed
            .set_lag(&region::primary(), &region::fallback(), Duration::from_secs(50));
        harness.feed.break_slot(&region::primary(), &region::replica());

        let (link, lag) = harness
            .replication
            .lowest_lag_replica(&region::primary())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(link.replica, region::fallback());
        assert_eq!(lag, Duration::from_secs(50));
    }
}

mod retention {
    use super::*;

    #[tokio::test]
    async fn sweep_keeps_latest_full_and_recovery_tested_backups() {
        let harness = Harness::new();
        harness.source.record_change(Utc::now());
        let job_id = harness.backups.schedule_job(job::full("orders")).await.unwrap();

        let tested = harness.run_backup(job_id, None).await;
        let test_id = harness
            .recovery
            .schedule_test(fixtures::recovery_test(
                ScenarioType::BackupRestore,
                Some(job_id),
            ))
            .await
            .unwrap();
        assert_test_passed(&harness.recovery.run_test(test_id).await.unwrap());

        let untested = harness.run_backup(job_id, None).await;
        let latest = harness.run_backup(job_id, None).await;

        // Past retention (30 days), inside the recovery-tested grace (another 30)
        let report = harness
            .retention
            .sweep(Utc::now() + ChronoDuration::days(31))
            .await
            .unwrap();
        assert_eq!(report.examined, 3);
        assert_eq!(report.deleted, 1);
        assert!(harness.backups.execution_status(untested.id).await.is_err());
        assert!(harness
            .objects
            .get(untested.artifact_key.as_deref().unwrap())
            .await
            .is_err());

        let report = harness
            .retention
            .sweep(Utc::now() + ChronoDuration::days(61))
            .await
            .unwrap();
        assert_eq!(report.deleted, 1);
        assert!(harness.backups.execution_status(tested.id).await.is_err());
        assert!(harness.backups.execution_status(latest.id).await.is_ok());
    }

    #[tokio::test]
    async fn artifact_delete_failure_keeps_the_record() {
        let harness = Harness::new();
        harness.source.record_change(Utc::now());
        let job_id = harness.backups.schedule_job(job::full("orders")).await.unwrap();
        let old = harness.run_backup(job_id, None).await;
        harness.run_backup(job_id, None).await;

        harness.objects.set_unreachable(true);
        let report = harness
            .retention
            .sweep(Utc::now() + ChronoDuration::days(31))
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.deleted, 0);
        assert!(harness.backups.execution_status(old.id).await.is_ok());
    }
}
