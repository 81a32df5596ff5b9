//! Health classification
//!
//! A [`HealthSnapshot`] is an immutable, point-in-time evaluation of one
//! primary region. Classification is a pure function of [`HealthInputs`] and
//! [`HealthThresholds`] so that the monitor, the orchestrator and tests all
//! agree on what a given set of numbers means.

use crate::region::RegionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Healthy,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Healthy => "healthy",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

/// Resource saturation in percent (0-100)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSaturation {
    pub disk: f64,
    pub cpu: f64,
    pub memory: f64,
}

impl ResourceSaturation {
    pub fn uniform(percent: f64) -> Self {
        Self {
            disk: percent,
            cpu: percent,
            memory: percent,
        }
    }

    pub fn max(&self) -> f64 {
        self.disk.max(self.cpu).max(self.memory)
    }
}

/// Independent indicators counted toward a failover recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalSignal {
    ReplicationLag,
    ResourceSaturation,
    BackupFailures,
}

/// Raw numbers a snapshot is computed from
#[derive(Debug, Clone, PartialEq)]
pub struct HealthInputs {
    pub active_connections: u64,
    /// Maximum lag across active links of the primary, if any exist
    pub max_replication_lag: Option<Duration>,
    pub saturation: ResourceSaturation,
    pub failed_backups_24h: u32,
    pub consecutive_backup_failures: u32,
}

/// Classification thresholds. Every bound is exclusive: a value must be
/// strictly above it to count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthThresholds {
    pub lag_warning: Duration,
    pub lag_critical: Duration,
    pub saturation_warning: f64,
    pub saturation_critical: f64,
    /// Consecutive (or 24h) backup failures treated as critical
    pub backup_failures_critical: u32,
    /// Lag above which replication counts as a failover signal
    pub failover_lag_signal: Duration,
    /// Number of simultaneous signals required to recommend failover
    pub failover_min_signals: usize,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            lag_warning: Duration::from_secs(60),
            lag_critical: Duration::from_secs(5 * 60),
            saturation_warning: 80.0,
            saturation_critical: 90.0,
            backup_failures_critical: 3,
            failover_lag_signal: Duration::from_secs(60),
            failover_min_signals: 3,
        }
    }
}

/// Outcome of classifying a set of inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub severity: Severity,
    pub signals: Vec<CriticalSignal>,
    pub failover_recommended: bool,
}

impl HealthThresholds {
    pub fn assess(&self, inputs: &HealthInputs) -> Assessment {
        let lag = inputs.max_replication_lag.unwrap_or_default();
        let saturation = inputs.saturation.max();
        let backups_failing = inputs.consecutive_backup_failures >= self.backup_failures_critical;

        let severity = if lag > self.lag_critical
            || saturation > self.saturation_critical
            || backups_failing
        {
            Severity::Critical
        } else if lag > self.lag_warning || saturation > self.saturation_warning {
            Severity::Warning
        } else {
            Severity::Healthy
        };

        let mut signals = Vec::with_capacity(3);
        if lag > self.failover_lag_signal {
            signals.push(CriticalSignal::ReplicationLag);
        }
        if saturation > self.saturation_critical {
            signals.push(CriticalSignal::ResourceSaturation);
        }
        if backups_failing || inputs.failed_backups_24h >= self.backup_failures_critical {
            signals.push(CriticalSignal::BackupFailures);
        }

        let failover_recommended = signals.len() >= self.failover_min_signals;

        Assessment {
            severity,
            signals,
            failover_recommended,
        }
    }
}

/// Immutable point-in-time health evaluation of a primary region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub id: Uuid,
    pub primary: RegionId,
    pub taken_at: DateTime<Utc>,
    pub active_connections: u64,
    pub max_replication_lag: Option<Duration>,
    pub saturation: ResourceSaturation,
    pub failed_backups_24h: u32,
    pub consecutive_backup_failures: u32,
    pub severity: Severity,
    pub signals: Vec<CriticalSignal>,
    pub failover_recommended: bool,
}

impl HealthSnapshot {
    pub fn evaluate(
        primary: RegionId,
        inputs: HealthInputs,
        thresholds: &HealthThresholds,
        taken_at: DateTime<Utc>,
    ) -> Self {
        let assessment = thresholds.assess(&inputs);
        Self {
            id: Uuid::new_v4(),
            primary,
            taken_at,
            active_connections: inputs.active_connections,
            max_replication_lag: inputs.max_replication_lag,
            saturation: inputs.saturation,
            failed_backups_24h: inputs.failed_backups_24h,
            consecutive_backup_failures: inputs.consecutive_backup_failures,
            severity: assessment.severity,
            signals: assessment.signals,
            failover_recommended: assessment.failover_recommended,
        }
    }
}
