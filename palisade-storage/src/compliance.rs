//! Read-only history for compliance reporting
//!
//! The compliance reporter computes its own scores; this view only exposes
//! the records it needs. It holds no write path into the store.

use crate::store::MetadataStore;
use crate::Result;
use chrono::{DateTime, Utc};
use palisade_core::{
    BackupExecution, ExecutionStatus, FailoverEvent, FailoverState, RecoveryTest, TestStatus,
};
use serde::Serialize;
use std::sync::Arc;

/// Aggregate counts over a reporting window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComplianceSummary {
    pub backups_completed: u64,
    pub backups_failed: u64,
    pub backups_recovery_tested: u64,
    pub failovers_completed: u64,
    pub failovers_rolled_back: u64,
    pub failovers_aborted: u64,
    /// Rollbacks that themselves failed and needed manual resolution
    pub failed_rollbacks: u64,
    pub recovery_tests_passed: u64,
    pub recovery_tests_failed: u64,
    pub latest_successful_backup: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct ComplianceView {
    store: Arc<dyn MetadataStore>,
}

impl ComplianceView {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    /// Executions of every job started at or after `since`, oldest first
    pub async fn backup_history(&self, since: DateTime<Utc>) -> Result<Vec<BackupExecution>> {
        let mut history = Vec::new();
        for job in self.store.list_jobs().await? {
            history.extend(
                self.store
                    .list_executions(job.id)
                    .await?
                    .into_iter()
                    .filter(|e| e.started_at >= since),
            );
        }
        history.sort_by_key(|e| e.started_at);
        Ok(history)
    }

    pub async fn failover_history(&self, since: DateTime<Utc>) -> Result<Vec<FailoverEvent>> {
        Ok(self
            .store
            .list_failovers(None)
            .await?
            .into_iter()
            .filter(|e| e.started_at >= since)
            .collect())
    }

    /// Recovery tests that ran at or after `since`
    pub async fn recovery_test_history(&self, since: DateTime<Utc>) -> Result<Vec<RecoveryTest>> {
        Ok(self
            .store
            .list_tests()
            .await?
            .into_iter()
            .filter(|t| t.executed_at.map(|at| at >= since).unwrap_or(false))
            .collect())
    }

    pub async fn summary(&self, since: DateTime<Utc>) -> Result<ComplianceSummary> {
        let mut summary = ComplianceSummary::default();

        for execution in self.backup_history(since).await? {
            match execution.status {
                ExecutionStatus::Completed => {
                    summary.backups_completed += 1;
                    if execution.recovery_tested {
                        summary.backups_recovery_tested += 1;
                    }
                    summary.latest_successful_backup =
                        summary.latest_successful_backup.max(execution.completed_at);
                }
                ExecutionStatus::Failed => summary.backups_failed += 1,
                ExecutionStatus::Running => {}
            }
        }

        for event in self.failover_history(since).await? {
            match event.state {
                FailoverState::Completed => summary.failovers_completed += 1,
                FailoverState::RolledBack => summary.failovers_rolled_back += 1,
                FailoverState::Aborted => summary.failovers_aborted += 1,
                _ => {}
            }
            if event.rollback_successful() == Some(false) {
                summary.failed_rollbacks += 1;
            }
        }

        for test in self.recovery_test_history(since).await? {
            match test.status {
                TestStatus::Passed => summary.recovery_tests_passed += 1,
                TestStatus::Failed => summary.recovery_tests_failed += 1,
                TestStatus::Scheduled => {}
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use palisade_core::{
        ArtifactSummary, BackupJob, BackupJobSpec, BackupScope, BackupType, CronSchedule,
        RetentionPolicy, VerificationState,
    };

    #[tokio::test]
    async fn test_summary_counts_outcomes() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let job = BackupJob::from_spec(
            BackupJobSpec {
                name: "nightly".into(),
                backup_type: BackupType::Full,
                schedule: CronSchedule::daily(),
                scope: BackupScope::default(),
                storage_target: "backups".into(),
                retention: RetentionPolicy::default(),
                concurrent: true,
            },
            now,
        )
        .unwrap();
        store.create_job(&job).await.unwrap();

        let mut ok = BackupExecution::start(job.id, BackupType::Full, now);
        store.begin_execution(&ok, now - chrono::Duration::hours(1)).await.unwrap();
        ok.complete(
            ArtifactSummary {
                key: "backups/1".into(),
                size_bytes: 4,
                checksum: "ab".into(),
                row_count: 2,
                covers_from: None,
                covers_until: now,
                verification: VerificationState::Verified,
            },
            now,
        )
        .unwrap();
        store.finalize_execution(&ok).await.unwrap();
        store.mark_recovery_tested(ok.id).await.unwrap();

        let mut failed = BackupExecution::start(job.id, BackupType::Full, now);
        store.begin_execution(&failed, now - chrono::Duration::hours(1)).await.unwrap();
        failed.fail("network", now).unwrap();
        store.finalize_execution(&failed).await.unwrap();

        let view = ComplianceView::new(store);
        let summary = view
            .summary(now - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(summary.backups_completed, 1);
        assert_eq!(summary.backups_failed, 1);
        assert_eq!(summary.backups_recovery_tested, 1);
        assert_eq!(summary.latest_successful_backup, Some(now));
        assert_eq!(summary.failovers_completed, 0);
    }
}
