//! Recovery tests (DR drills)

use crate::schedule::CronSchedule;
use crate::tenant::DrScope;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Point a point-in-time restore targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPoint {
    At(DateTime<Utc>),
    /// Relative to the moment the test runs; used by recurring drills
    Before(Duration),
}

impl RecoveryPoint {
    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            RecoveryPoint::At(at) => *at,
            RecoveryPoint::Before(ago) => {
                now - chrono::Duration::from_std(*ago).unwrap_or_else(|_| chrono::Duration::zero())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioType {
    /// Restore the latest backup chain and validate checksums
    BackupRestore,
    /// Run the failover orchestrator against a non-production topology
    Failover,
    /// Restore to a timestamp by replaying archived logs
    PointInTime { target: RecoveryPoint },
    /// All of the above against a production-like clone
    FullDisaster,
}

impl ScenarioType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioType::BackupRestore => "backup_restore",
            ScenarioType::Failover => "failover",
            ScenarioType::PointInTime { .. } => "point_in_time",
            ScenarioType::FullDisaster => "full_disaster",
        }
    }
}

/// Non-production environment a recovery test runs in.
///
/// Construction rejects production-looking names, so a test can never be
/// pointed at production data structures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Environment(String);

impl Environment {
    pub fn non_production(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let normalized = name.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(Error::Configuration("environment name cannot be empty".into()));
        }
        let is_production = normalized == "prod"
            || normalized == "production"
            || normalized.starts_with("prod-")
            || normalized.starts_with("prod_")
            || normalized.starts_with("production-")
            || normalized.starts_with("production_");
        if is_production {
            return Err(Error::Configuration(format!(
                "recovery tests cannot target production environment '{}'",
                name
            )));
        }
        Ok(Self(name.trim().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Environment {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::non_production(s)
    }
}

impl From<Environment> for String {
    fn from(env: Environment) -> Self {
        env.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Scheduled,
    Passed,
    Failed,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Scheduled => "scheduled",
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
        }
    }
}

/// Values measured by one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestMeasurements {
    pub actual_rto: Duration,
    pub actual_rpo: Duration,
    pub data_integrity_verified: bool,
    pub issues_found: Vec<String>,
}

/// A scheduled or ad-hoc DR exercise. Finalized once after it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryTest {
    pub id: Uuid,
    pub scope: DrScope,
    pub scenario: ScenarioType,
    pub environment: Environment,
    /// Backup job whose artifacts are restored
    pub backup_job_id: Option<Uuid>,
    pub cadence: Option<CronSchedule>,
    pub scheduled_for: DateTime<Utc>,
    pub expected_rto: Duration,
    pub expected_rpo: Duration,
    pub status: TestStatus,
    pub actual_rto: Option<Duration>,
    pub actual_rpo: Option<Duration>,
    pub data_integrity_verified: bool,
    pub passed: Option<bool>,
    pub issues_found: Vec<String>,
    pub remediation_required: bool,
    /// Test this one was scheduled as the next occurrence of
    pub previous_test_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl RecoveryTest {
    #[allow(clippy::too_many_arguments)]
    pub fn scheduled(
        scope: DrScope,
        scenario: ScenarioType,
        environment: Environment,
        backup_job_id: Option<Uuid>,
        cadence: Option<CronSchedule>,
        scheduled_for: DateTime<Utc>,
        expected_rto: Duration,
        expected_rpo: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope,
            scenario,
            environment,
            backup_job_id,
            cadence,
            scheduled_for,
            expected_rto,
            expected_rpo,
            status: TestStatus::Scheduled,
            actual_rto: None,
            actual_rpo: None,
            data_integrity_verified: false,
            passed: None,
            issues_found: Vec::new(),
            remediation_required: false,
            previous_test_id: None,
            created_at: Utc::now(),
            executed_at: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.status != TestStatus::Scheduled
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_finalized() && self.scheduled_for <= now
    }

    /// Pass requires both objectives met and verified data integrity
    pub fn evaluate(
        expected_rto: Duration,
        expected_rpo: Duration,
        measurements: &TestMeasurements,
    ) -> bool {
        measurements.actual_rto <= expected_rto
            && measurements.actual_rpo <= expected_rpo
            && measurements.data_integrity_verified
    }

    /// Record the outcome of a run. Fails if the test was already finalized.
    pub fn finalize(&mut self, measurements: TestMeasurements, now: DateTime<Utc>) -> Result<bool> {
        if self.is_finalized() {
            return Err(Error::InvalidState(format!(
                "recovery test {} already finalized",
                self.id
            )));
        }

        let passed = Self::evaluate(self.expected_rto, self.expected_rpo, &measurements);
        let mut issues = measurements.issues_found;
        if measurements.actual_rto > self.expected_rto {
            issues.push(format!(
                "RTO exceeded: {}s > {}s",
                measurements.actual_rto.as_secs(),
                self.expected_rto.as_secs()
            ));
        }
        if measurements.actual_rpo > self.expected_rpo {
            issues.push(format!(
                "RPO exceeded: {}s > {}s",
                measurements.actual_rpo.as_secs(),
                self.expected_rpo.as_secs()
            ));
        }

        self.actual_rto = Some(measurements.actual_rto);
        self.actual_rpo = Some(measurements.actual_rpo);
        self.data_integrity_verified = measurements.data_integrity_verified;
        self.passed = Some(passed);
        self.remediation_required = !passed;
        self.issues_found = issues;
        self.status = if passed {
            TestStatus::Passed
        } else {
            TestStatus::Failed
        };
        self.executed_at = Some(now);
        Ok(passed)
    }

    /// Next occurrence for a test with a cadence
    pub fn next_occurrence(&self, now: DateTime<Utc>) -> Option<Self> {
        let cadence = self.cadence.as_ref()?;
        let next_at = cadence.next_after(now)?;
        let mut next = Self::scheduled(
            self.scope.clone(),
            self.scenario.clone(),
            self.environment.clone(),
            self.backup_job_id,
            Some(cadence.clone()),
            next_at,
            self.expected_rto,
            self.expected_rpo,
        );
        next.previous_test_id = Some(self.id);
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_record() -> RecoveryTest {
        RecoveryTest::scheduled(
            DrScope::System,
            ScenarioType::BackupRestore,
            Environment::non_production("staging").unwrap(),
            None,
            Some(CronSchedule::daily()),
            Utc::now(),
            Duration::from_secs(3600),
            Duration::from_secs(900),
        )
    }

    fn measurements(rto: u64, rpo: u64, integrity: bool) -> TestMeasurements {
        TestMeasurements {
            actual_rto: Duration::from_secs(rto),
            actual_rpo: Duration::from_secs(rpo),
            data_integrity_verified: integrity,
            issues_found: vec![],
        }
    }

    #[test]
    fn test_environment_rejects_production() {
        for name in ["production", "PROD", "prod-eu", "production_clone", " "] {
            assert!(Environment::non_production(name).is_err(), "{name}");
        }
        assert!(Environment::non_production("staging").is_ok());
        assert!(Environment::non_production("dr-drill-01").is_ok());
        assert!(Environment::non_production("products-sandbox").is_ok());
    }

    #[test]
    fn test_pass_requires_all_criteria() {
        let rto = Duration::from_secs(60);
        let rpo = Duration::from_secs(60);
        assert!(RecoveryTest::evaluate(rto, rpo, &measurements(60, 60, true)));
        assert!(!RecoveryTest::evaluate(rto, rpo, &measurements(61, 10, true)));
        assert!(!RecoveryTest::evaluate(rto, rpo, &measurements(10, 61, true)));
        assert!(!RecoveryTest::evaluate(rto, rpo, &measurements(10, 10, false)));
    }

    #[test]
    fn test_finalize_once() {
        let mut test = test_record();
        assert!(test.finalize(measurements(10, 10, true), Utc::now()).unwrap());
        assert_eq!(test.status, TestStatus::Passed);
        assert!(!test.remediation_required);
        assert!(test.finalize(measurements(10, 10, true), Utc::now()).is_err());
    }

    #[test]
    fn test_failed_finalize_lists_exceeded_objectives() {
        let mut test = test_record();
        let passed = test
            .finalize(measurements(7200, 10, true), Utc::now())
            .unwrap();
        assert!(!passed);
        assert!(test.remediation_required);
        assert!(test.issues_found.iter().any(|i| i.starts_with("RTO exceeded")));
    }

    #[test]
    fn test_next_occurrence_links_back() {
        let test = test_record();
        let next = test.next_occurrence(Utc::now()).expect("cadence set");
        assert_eq!(next.previous_test_id, Some(test.id));
        assert_eq!(next.status, TestStatus::Scheduled);
        assert!(next.scheduled_for > test.scheduled_for);
    }

    #[test]
    fn test_recovery_point_resolution() {
        let now = Utc::now();
        let point = RecoveryPoint::Before(Duration::from_secs(600));
        assert_eq!(point.resolve(now), now - chrono::Duration::minutes(10));
        assert_eq!(RecoveryPoint::At(now).resolve(Utc::now()), now);
    }
}
