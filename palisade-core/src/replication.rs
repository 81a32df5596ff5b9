//! Replication links between regions

use crate::config::ReplicationMode;
use crate::region::RegionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Active,
    /// The feed was torn down (e.g. after the replica was promoted)
    Detached,
}

/// Directed primary → replica data feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationLink {
    pub id: Uuid,
    pub primary: RegionId,
    pub replica: RegionId,
    pub slot_name: String,
    pub mode: ReplicationMode,
    pub state: LinkState,
    pub last_lag: Option<Duration>,
    pub lag_measured_at: Option<DateTime<Utc>>,
    pub established_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReplicationLink {
    pub fn new(
        primary: RegionId,
        replica: RegionId,
        slot_name: String,
        mode: ReplicationMode,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            primary,
            replica,
            slot_name,
            mode,
            state: LinkState::Active,
            last_lag: None,
            lag_measured_at: None,
            established_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == LinkState::Active
    }

    pub fn record_lag(&mut self, lag: Duration, at: DateTime<Utc>) {
        self.last_lag = Some(lag);
        self.lag_measured_at = Some(at);
        self.updated_at = at;
    }
}
