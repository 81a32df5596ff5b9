//! Backup scheduling and execution through the real service, in-memory
//! storage and a fake backup source

use chrono::{Duration as ChronoDuration, Utc};
use palisade_core::{BackupType, ExecutionStatus, VerificationState};
use palisade_runtime::collaborators::ExportRequest;
use palisade_runtime::AlertSeverity;
use palisade_storage::{MetadataStore, ObjectStore};
use palisade_tests::assertions::assert_notified;
use palisade_tests::fixtures::job;
use palisade_tests::builders::WAIT_LIMIT;
use palisade_tests::Harness;
use std::collections::HashSet;
use std::time::Duration;

#[tokio::test]
async fn three_scheduled_runs_store_three_verified_artifacts() {
    let harness = Harness::new();
    let job_id = harness.backups.schedule_job(job::full("orders")).await.unwrap();

    for _ in 0..3 {
        harness.source.record_change(Utc::now());
        let due = harness
            .backups
            .get_job(job_id)
            .await
            .unwrap()
            .next_execution
            .expect("hourly job has a next run");
        let started = harness.backups.tick(due).await.unwrap();
        assert_eq!(started.len(), 1);
    }

    let executions = harness.store.list_executions(job_id).await.unwrap();
    assert_eq!(executions.len(), 3);

    let mut checksums = HashSet::new();
    for execution in &executions {
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.verification, VerificationState::Verified);

        let key = execution.artifact_key.as_deref().unwrap();
        let stored = harness.objects.get(key).await.unwrap();
        let checksum = execution.checksum.clone().unwrap();
        assert_eq!(palisade_storage::checksum(&stored), checksum);
        assert_eq!(stored.len() as u64, execution.size_bytes);
        checksums.insert(checksum);
    }
    assert_eq!(checksums.len(), 3, "each run stores a distinct artifact");
    assert_eq!(harness.objects.inner().len().await, 3);

    let job = harness.backups.get_job(job_id).await.unwrap();
    assert_eq!(job.statistics.total_runs, 3);
    assert_eq!(job.statistics.successful_runs, 3);
    assert_eq!(job.statistics.consecutive_failures, 0);
}

#[tokio::test]
async fn tick_before_next_run_starts_nothing() {
    let harness = Harness::new();
    let job_id = harness.backups.schedule_job(job::full("orders")).await.unwrap();
    let due = harness
        .backups
        .get_job(job_id)
        .await
        .unwrap()
        .next_execution
        .unwrap();

    let started = harness
        .backups
        .tick(due - ChronoDuration::seconds(1))
        .await
        .unwrap();
    assert!(started.is_empty());
    assert!(harness.store.list_executions(job_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn reissued_tick_for_the_same_instant_runs_once() {
    let harness = Harness::new();
    harness.source.record_change(Utc::now());
    let job_id = harness.backups.schedule_job(job::full("orders")).await.unwrap();
    let due = harness
        .backups
        .get_job(job_id)
        .await
        .unwrap()
        .next_execution
        .unwrap();

    assert_eq!(harness.backups.tick(due).await.unwrap().len(), 1);
    assert!(harness.backups.tick(due).await.unwrap().is_empty());
    assert_eq!(harness.store.list_executions(job_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn incremental_builds_on_the_previous_backup() {
    let harness = Harness::new();
    let start = Utc::now() - ChronoDuration::minutes(30);
    harness.source.record_change(start);
    harness.source.record_change(start + ChronoDuration::minutes(5));
    let job_id = harness
        .backups
        .schedule_job(job::incremental("orders"))
        .await
        .unwrap();

    let first = harness.run_backup(job_id, None).await;
    assert_eq!(
        first.backup_type,
        BackupType::Full,
        "first incremental without a base is taken as full"
    );
    assert_eq!(first.row_count, 2);
    assert_eq!(first.covers_until, Some(start + ChronoDuration::minutes(5)));

    harness.source.record_change(start + ChronoDuration::minutes(10));
    let second = harness.run_backup(job_id, None).await;
    assert_eq!(second.status, ExecutionStatus::Completed);
    assert_eq!(second.backup_type, BackupType::Incremental);
    assert_eq!(second.base_execution_id, Some(first.id));
    assert_eq!(second.covers_from, first.covers_until);
    assert_eq!(second.row_count, 1);

    assert_eq!(
        harness.source.requests(),
        vec![
            ExportRequest::Full,
            ExportRequest::Incremental {
                since: start + ChronoDuration::minutes(5)
            },
        ]
    );
}

#[tokio::test]
async fn log_archives_continue_from_the_last_archive() {
    let harness = Harness::new();
    let start = Utc::now() - ChronoDuration::minutes(30);
    harness.source.record_change(start);
    let job_id = harness
        .backups
        .schedule_job(job::log_archive("wal"))
        .await
        .unwrap();

    let first = harness.run_backup(job_id, None).await;
    assert_eq!(first.backup_type, BackupType::LogArchive);
    assert_eq!(first.covers_from, None);

    harness.source.record_change(start + ChronoDuration::minutes(1));
    let second = harness.run_backup(job_id, None).await;
    assert_eq!(second.covers_from, Some(start));
    assert_eq!(second.row_count, 1);
    assert_eq!(
        harness.source.requests().last(),
        Some(&ExportRequest::LogArchive { since: Some(start) })
    );
}

#[tokio::test]
async fn type_override_takes_a_full_backup_of_an_incremental_job() {
    let harness = Harness::new();
    harness.source.record_change(Utc::now());
    let job_id = harness
        .backups
        .schedule_job(job::incremental("orders"))
        .await
        .unwrap();
    harness.run_backup(job_id, None).await;

    let forced = harness.run_backup(job_id, Some(BackupType::Full)).await;
    assert_eq!(forced.backup_type, BackupType::Full);
    assert_eq!(forced.base_execution_id, None);
}

#[tokio::test]
async fn execute_now_returns_the_in_flight_execution() {
    let harness = Harness::new();
    harness.source.record_change(Utc::now());
    harness.source.delay_exports(Duration::from_millis(200));
    let job_id = harness.backups.schedule_job(job::full("orders")).await.unwrap();

    let first = harness.backups.execute_now(job_id, None).await.unwrap();
    let second = harness.backups.execute_now(job_id, None).await.unwrap();
    assert_eq!(first, second);

    let finished = harness.wait_for_execution(first).await;
    assert_eq!(finished.status, ExecutionStatus::Completed);

    let third = harness.backups.execute_now(job_id, None).await.unwrap();
    assert_ne!(third, first, "a finished execution is not reused");
    harness.wait_for_execution(third).await;
    assert_eq!(harness.source.requests().len(), 2);
}

#[tokio::test]
async fn unrecorded_outcome_is_stored_as_a_failure() {
    let harness = Harness::new();
    harness.source.record_change(Utc::now());
    harness.store.fail_finalize(ExecutionStatus::Completed);
    let job_id = harness.backups.schedule_job(job::full("orders")).await.unwrap();

    let execution = harness.run_backup(job_id, None).await;
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution
        .error_message
        .as_deref()
        .unwrap()
        .contains("outcome could not be recorded"));

    // The job is not left locked by the failed write
    harness.store.heal_finalize(ExecutionStatus::Completed);
    let next = harness.run_backup(job_id, None).await;
    assert_ne!(next.id, execution.id);
    assert!(next.is_successful());
}

#[tokio::test]
async fn execution_left_running_is_replaced_once_stale() {
    let harness = Harness::builder()
        .with_stale_execution_after(Duration::from_secs(1))
        .build();
    harness.source.record_change(Utc::now());
    harness.store.fail_finalize(ExecutionStatus::Completed);
    harness.store.fail_finalize(ExecutionStatus::Failed);
    let job_id = harness.backups.schedule_job(job::full("orders")).await.unwrap();

    let stuck = harness.backups.execute_now(job_id, None).await.unwrap();
    assert_eq!(harness.backups.execute_now(job_id, None).await.unwrap(), stuck);

    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while harness.backups.get_job(job_id).await.unwrap().statistics.total_runs == 0 {
        assert!(tokio::time::Instant::now() < deadline, "run never finished");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let still_running = harness.backups.execution_status(stuck).await.unwrap();
    assert_eq!(still_running.status, ExecutionStatus::Running);

    tokio::time::sleep(Duration::from_secs(1)).await;
    harness.store.heal_finalize(ExecutionStatus::Completed);
    harness.store.heal_finalize(ExecutionStatus::Failed);

    let next = harness.run_backup(job_id, None).await;
    assert_ne!(next.id, stuck);
    assert!(next.is_successful());

    let abandoned = harness.backups.execution_status(stuck).await.unwrap();
    assert_eq!(abandoned.status, ExecutionStatus::Failed);
    assert!(abandoned.error_message.unwrap().starts_with("abandoned"));
}

#[tokio::test]
async fn execute_now_on_unknown_job_is_not_found() {
    let harness = Harness::new();
    let err = harness
        .backups
        .execute_now(uuid::Uuid::new_v4(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, palisade_runtime::Error::NotFound(_)), "{err:?}");
}

#[tokio::test]
async fn failed_exports_are_recorded_and_alert_once_at_threshold() {
    let harness = Harness::new();
    harness.source.set_failing(true);
    let job_id = harness.backups.schedule_job(job::full("orders")).await.unwrap();

    for _ in 0..4 {
        let execution = harness.run_backup(job_id, None).await;
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution
            .error_message
            .as_deref()
            .unwrap()
            .contains("export failed"));
        assert!(execution.artifact_key.is_none());
    }

    // Each failure is final; the next run is the retry
    assert_eq!(harness.source.requests().len(), 4);

    let job = harness.backups.get_job(job_id).await.unwrap();
    assert_eq!(job.statistics.consecutive_failures, 4);
    assert_eq!(job.statistics.failed_runs, 4);

    // The alert goes out after the statistics are stored
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_notified(&harness.notifier, AlertSeverity::Critical, "failed 3 times in a row");
    assert_eq!(
        harness.notifier.with_severity(AlertSeverity::Critical).len(),
        1
    );
    assert!(harness.objects.inner().is_empty().await);
}

#[tokio::test]
async fn success_resets_consecutive_failures() {
    let harness = Harness::new();
    harness.source.record_change(Utc::now());
    harness.source.set_failing(true);
    let job_id = harness.backups.schedule_job(job::full("orders")).await.unwrap();
    harness.run_backup(job_id, None).await;
    harness.run_backup(job_id, None).await;

    harness.source.set_failing(false);
    let execution = harness.run_backup(job_id, None).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);

    let job = harness.backups.get_job(job_id).await.unwrap();
    assert_eq!(job.statistics.consecutive_failures, 0);
    assert_eq!(job.statistics.failed_runs, 2);
    assert_eq!(job.statistics.last_size_bytes, Some(execution.size_bytes));
}

#[tokio::test]
async fn unreachable_object_store_fails_the_execution() {
    let harness = Harness::new();
    harness.source.record_change(Utc::now());
    harness.objects.set_unreachable(true);
    let job_id = harness.backups.schedule_job(job::full("orders")).await.unwrap();

    let execution = harness.run_backup(job_id, None).await;
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.checksum.is_none());
}

#[tokio::test]
async fn invalid_job_spec_is_rejected() {
    let harness = Harness::new();
    let mut spec = job::full("orders");
    spec.storage_target = "../outside".to_string();

    let err = harness.backups.schedule_job(spec).await.unwrap_err();
    assert!(
        matches!(err, palisade_runtime::Error::Configuration(_)),
        "{err:?}"
    );
    assert!(harness.store.list_jobs().await.unwrap().is_empty());
}
