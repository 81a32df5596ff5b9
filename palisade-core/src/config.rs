//! Per-scope disaster-recovery targets

use crate::schedule::CronSchedule;
use crate::tenant::DrScope;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Replication mode for primary → replica feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationMode {
    /// Writes are acknowledged only once the replica applied them
    Sync,
    /// Replica may lag; lag is monitored
    Async,
}

impl fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicationMode::Sync => f.write_str("sync"),
            ReplicationMode::Async => f.write_str("async"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationPolicy {
    pub mode: ReplicationMode,
    pub cross_region: bool,
}

/// DR targets for the system or a single tenant.
///
/// Immutable while an in-flight operation references it; the runtime's
/// configuration registry enforces that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrConfiguration {
    pub id: Uuid,
    pub scope: DrScope,
    pub rto_minutes: u32,
    pub rpo_minutes: u32,
    pub backup_frequency: CronSchedule,
    pub retention_days: u32,
    pub replication: ReplicationPolicy,
    pub auto_failover: bool,
    pub approval_required: bool,
    pub updated_at: DateTime<Utc>,
}

impl DrConfiguration {
    /// Platform defaults: RTO 4h, RPO 15min, a backup every 15 minutes,
    /// 30 days of retention and async cross-region replication.
    pub fn platform_default(scope: DrScope) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope,
            rto_minutes: 240,
            rpo_minutes: 15,
            backup_frequency: CronSchedule::parse("*/15 * * * *").expect("valid schedule"),
            retention_days: 30,
            replication: ReplicationPolicy {
                mode: ReplicationMode::Async,
                cross_region: true,
            },
            auto_failover: true,
            approval_required: false,
            updated_at: Utc::now(),
        }
    }

    pub fn rto(&self) -> Duration {
        Duration::from_secs(u64::from(self.rto_minutes) * 60)
    }

    pub fn rpo(&self) -> Duration {
        Duration::from_secs(u64::from(self.rpo_minutes) * 60)
    }

    /// Validate targets before the configuration is stored
    pub fn validate(&self) -> Result<()> {
        if self.rto_minutes == 0 {
            return Err(Error::Configuration("rto_minutes must be > 0".into()));
        }
        if self.rpo_minutes == 0 {
            return Err(Error::Configuration("rpo_minutes must be > 0".into()));
        }
        if self.rpo_minutes > self.rto_minutes {
            return Err(Error::Configuration(format!(
                "rpo_minutes ({}) cannot exceed rto_minutes ({})",
                self.rpo_minutes, self.rto_minutes
            )));
        }
        if self.retention_days == 0 {
            return Err(Error::Configuration("retention_days must be > 0".into()));
        }
        Ok(())
    }
}
