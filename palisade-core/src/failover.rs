//! Failover events

use crate::region::RegionId;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// State of a failover attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverState {
    Idle,
    SafetyCheck,
    Draining,
    /// Point of no return
    Promoting,
    Rerouting,
    Verifying,
    Completed,
    RollingBack,
    RolledBack,
    /// Stopped before promotion; production state left as it was
    Aborted,
}

impl FailoverState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FailoverState::Completed | FailoverState::RolledBack | FailoverState::Aborted
        )
    }

    /// States an administrator may still cancel from
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            FailoverState::Idle | FailoverState::SafetyCheck | FailoverState::Draining
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailoverState::Idle => "idle",
            FailoverState::SafetyCheck => "safety_check",
            FailoverState::Draining => "draining",
            FailoverState::Promoting => "promoting",
            FailoverState::Rerouting => "rerouting",
            FailoverState::Verifying => "verifying",
            FailoverState::Completed => "completed",
            FailoverState::RollingBack => "rolling_back",
            FailoverState::RolledBack => "rolled_back",
            FailoverState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for FailoverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for FailoverState {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        let state = match s {
            "idle" => FailoverState::Idle,
            "safety_check" => FailoverState::SafetyCheck,
            "draining" => FailoverState::Draining,
            "promoting" => FailoverState::Promoting,
            "rerouting" => FailoverState::Rerouting,
            "verifying" => FailoverState::Verifying,
            "completed" => FailoverState::Completed,
            "rolling_back" => FailoverState::RollingBack,
            "rolled_back" => FailoverState::RolledBack,
            "aborted" => FailoverState::Aborted,
            other => {
                return Err(Error::InvalidState(format!(
                    "Unknown failover state: {}",
                    other
                )))
            }
        };
        Ok(state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Raised from a health snapshot recommending failover
    Automatic,
    /// Break-glass operator trigger
    Manual,
    /// Scheduled switchover or recovery drill
    Planned,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Automatic => "automatic",
            TriggerType::Manual => "manual",
            TriggerType::Planned => "planned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: FailoverState,
    pub to: FailoverState,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub successful: bool,
    pub error: Option<String>,
}

/// One failover attempt for a primary region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverEvent {
    pub id: Uuid,
    pub source_region: RegionId,
    pub target_region: RegionId,
    pub trigger: TriggerType,
    pub initiated_by: String,
    pub reason: Option<String>,
    pub override_safety_checks: bool,
    /// Snapshot that recommended an automatic failover
    pub health_snapshot_id: Option<Uuid>,
    /// Replica lag measured when the safety check passed
    pub target_lag: Option<Duration>,
    pub state: FailoverState,
    pub transitions: Vec<StateTransition>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// True only when the target was promoted and verified
    pub completed: bool,
    pub abort_reason: Option<String>,
    pub failure: Option<String>,
    pub rollback: Option<RollbackRecord>,
}

impl FailoverEvent {
    pub fn new(
        source_region: RegionId,
        target_region: RegionId,
        trigger: TriggerType,
        initiated_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_region,
            target_region,
            trigger,
            initiated_by: initiated_by.into(),
            reason: None,
            override_safety_checks: false,
            health_snapshot_id: None,
            target_lag: None,
            state: FailoverState::Idle,
            transitions: Vec::new(),
            started_at: now,
            finished_at: None,
            completed: false,
            abort_reason: None,
            failure: None,
            rollback: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }

    pub fn rollback_successful(&self) -> Option<bool> {
        self.rollback.as_ref().map(|r| r.successful)
    }

    /// States visited, starting with `Idle`
    pub fn path(&self) -> Vec<FailoverState> {
        let mut path = vec![FailoverState::Idle];
        path.extend(self.transitions.iter().map(|t| t.to));
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        use FailoverState::*;
        for s in [Completed, RolledBack, Aborted] {
            assert!(s.is_terminal());
        }
        for s in [Idle, SafetyCheck, Draining, Promoting, Rerouting, Verifying, RollingBack] {
            assert!(!s.is_terminal());
        }
    }

    #[test]
    fn test_cancellable_only_before_promotion() {
        use FailoverState::*;
        assert!(Draining.is_cancellable());
        assert!(!Promoting.is_cancellable());
        assert!(!Verifying.is_cancellable());
    }

    #[test]
    fn test_state_string_conversion() {
        use FailoverState::*;
        for state in [
            Idle, SafetyCheck, Draining, Promoting, Rerouting, Verifying, Completed, RollingBack,
            RolledBack, Aborted,
        ] {
            let back = FailoverState::try_from(state.as_str()).expect("known state");
            assert_eq!(back, state);
        }
        assert!(FailoverState::try_from("exploded").is_err());
    }
}
