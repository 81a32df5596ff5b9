//! Test data factories for Palisade types
//!
//! The default topology is one primary (`us-east`) replicating to two
//! replicas (`eu-west`, `us-west`).

use palisade_core::{
    BackupJobSpec, BackupScope, BackupType, CronSchedule, Environment, RegionId, RetentionPolicy,
    ScenarioType,
};
use palisade_runtime::{FailoverRequest, FailoverSettings, TestRequest};
use std::time::Duration;
use uuid::Uuid;

/// Region fixtures
pub mod region {
    use super::*;

    pub fn named(name: &str) -> RegionId {
        RegionId::new(name).expect("fixture region id is valid")
    }

    pub fn primary() -> RegionId {
        named("us-east")
    }

    /// Preferred replica
    pub fn replica() -> RegionId {
        named("eu-west")
    }

    /// Second replica, the fallback for the preferred one
    pub fn fallback() -> RegionId {
        named("us-west")
    }
}

/// Backup job spec fixtures
pub mod job {
    use super::*;

    pub fn spec(name: &str, backup_type: BackupType) -> BackupJobSpec {
        BackupJobSpec {
            name: name.to_string(),
            backup_type,
            schedule: CronSchedule::hourly(),
            scope: BackupScope::default(),
            storage_target: format!("backups/{}", name),
            retention: RetentionPolicy::default(),
            concurrent: true,
        }
    }

    pub fn full(name: &str) -> BackupJobSpec {
        spec(name, BackupType::Full)
    }

    pub fn incremental(name: &str) -> BackupJobSpec {
        spec(name, BackupType::Incremental)
    }

    pub fn log_archive(name: &str) -> BackupJobSpec {
        spec(name, BackupType::LogArchive)
    }

    /// Job that shares the serial lane with other non-concurrent jobs
    pub fn serial(name: &str) -> BackupJobSpec {
        let mut spec = full(name);
        spec.concurrent = false;
        spec
    }
}

pub fn staging() -> Environment {
    Environment::non_production("staging").expect("fixture environment is valid")
}

/// Operator failover of the default primary to the preferred replica
pub fn manual_failover() -> FailoverRequest {
    FailoverRequest::manual(region::primary(), region::replica(), "oncall@example.com")
}

/// Ad-hoc recovery test in staging
pub fn recovery_test(scenario: ScenarioType, backup_job_id: Option<Uuid>) -> TestRequest {
    TestRequest {
        scenario,
        environment: staging(),
        backup_job_id,
        cadence: None,
        scheduled_for: None,
    }
}

/// Failover bounds short enough for tests. The lag bound keeps its
/// production value.
pub fn fast_failover_settings() -> FailoverSettings {
    FailoverSettings {
        safety_lag_bound: Duration::from_secs(30),
        safety_check_timeout: Duration::from_millis(100),
        safety_poll_interval: Duration::from_millis(10),
        drain_grace: Duration::from_millis(100),
        drain_poll_interval: Duration::from_millis(10),
        step_timeout: Duration::from_secs(2),
    }
}
