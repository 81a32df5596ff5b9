//! Replication topology manager
//!
//! Owns [`ReplicationLink`] records. Lag is measured through the
//! [`ReplicationFeed`] and written back onto the link on every read.

use crate::collaborators::ReplicationFeed;
use crate::metrics::REPLICATION_LAG_SECONDS;
use crate::retry::{retry_transient, RetryPolicy};
use crate::{map_storage_error, Error, Result};
use chrono::Utc;
use palisade_core::{non_negative, LinkState, RegionId, ReplicationLink, ReplicationMode};
use palisade_storage::MetadataStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Default lag bound for switching a link from async to sync
pub const DEFAULT_SYNC_SWITCH_MAX_LAG: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct ReplicationManager {
    store: Arc<dyn MetadataStore>,
    feed: Arc<dyn ReplicationFeed>,
    retry: RetryPolicy,
    sync_switch_max_lag: Duration,
}

impl ReplicationManager {
    pub fn new(store: Arc<dyn MetadataStore>, feed: Arc<dyn ReplicationFeed>) -> Self {
        Self {
            store,
            feed,
            retry: RetryPolicy::default(),
            sync_switch_max_lag: DEFAULT_SYNC_SWITCH_MAX_LAG,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sync_switch_max_lag(mut self, max_lag: Duration) -> Self {
        self.sync_switch_max_lag = max_lag;
        self
    }

    /// Create a link, or return the existing one if the pair is already
    /// actively linked
    #[instrument(skip(self), fields(primary = %primary, replica = %replica, mode = %mode))]
    pub async fn establish_link(
        &self,
        primary: &RegionId,
        replica: &RegionId,
        mode: ReplicationMode,
    ) -> Result<Uuid> {
        if primary == replica {
            return Err(Error::Configuration(format!(
                "region {} cannot replicate to itself",
                primary
            )));
        }

        let existing = self
            .store
            .find_link(primary, replica)
            .await
            .map_err(|e| map_storage_error(e, "Failed to look up replication link"))?;
        if let Some(link) = existing.filter(ReplicationLink::is_active) {
            if link.mode != mode {
                warn!(
                    link_id = %link.id,
                    existing_mode = %link.mode,
                    "Link already active with a different mode; use reconfigure to change it"
                );
            }
            return Ok(link.id);
        }

        let slot_name = self.feed.create_slot(primary, replica, mode).await?;
        let link = ReplicationLink::new(
            primary.clone(),
            replica.clone(),
            slot_name,
            mode,
            Utc::now(),
        );
        self.store
            .upsert_link(&link)
            .await
            .map_err(|e| map_storage_error(e, "Failed to store replication link"))?;

        info!(link_id = %link.id, slot = %link.slot_name, "Replication link established");
        Ok(link.id)
    }

    /// Measure the link's lag now and record it
    #[instrument(skip(self), fields(link_id = %link_id))]
    pub async fn current_lag(&self, link_id: Uuid) -> Result<Duration> {
        let link = self.get_link(link_id).await?;
        self.measure(link).await.map(|(_, lag)| lag)
    }

    /// Change a link's mode. Async → sync requires lag below the configured bound.
    #[instrument(skip(self), fields(link_id = %link_id, mode = %mode))]
    pub async fn reconfigure(&self, link_id: Uuid, mode: ReplicationMode) -> Result<()> {
        let link = self.get_link(link_id).await?;
        if !link.is_active() {
            return Err(Error::InvalidState(format!(
                "replication link {} is detached",
                link_id
            )));
        }
        if link.mode == mode {
            return Ok(());
        }

        let mut link = if mode == ReplicationMode::Sync {
            let (link, lag) = self.measure(link).await?;
            if lag >= self.sync_switch_max_lag {
                return Err(Error::LagTooHigh {
                    link_id,
                    lag,
                    threshold: self.sync_switch_max_lag,
                });
            }
            link
        } else {
            link
        };

        self.feed.set_mode(&link.slot_name, mode).await?;
        link.mode = mode;
        link.updated_at = Utc::now();
        self.store
            .upsert_link(&link)
            .await
            .map_err(|e| map_storage_error(e, "Failed to store replication link"))?;

        info!("Replication link reconfigured");
        Ok(())
    }

    pub async fn get_link(&self, link_id: Uuid) -> Result<ReplicationLink> {
        self.store
            .get_link(link_id)
            .await
            .map_err(|e| map_storage_error(e, "Failed to load replication link"))
    }

    /// Active links whose primary is `primary`
    pub async fn active_links(&self, primary: &RegionId) -> Result<Vec<ReplicationLink>> {
        let links = self
            .store
            .links_for_primary(primary)
            .await
            .map_err(|e| map_storage_error(e, "Failed to list replication links"))?;
        Ok(links.into_iter().filter(ReplicationLink::is_active).collect())
    }

    /// Largest lag across the primary's active links. A link that cannot be
    /// measured contributes its last known lag.
    #[instrument(skip(self), fields(primary = %primary))]
    pub async fn max_lag_for_primary(&self, primary: &RegionId) -> Result<Option<Duration>> {
        let mut max: Option<Duration> = None;
        for link in self.active_links(primary).await? {
            let link_id = link.id;
            let fallback = link.last_lag;
            let lag = match self.measure(link).await {
                Ok((_, lag)) => Some(lag),
                Err(Error::Collaborator(e)) => {
                    warn!(link_id = %link_id, error = %e, "Lag unavailable, using last known value");
                    fallback
                }
                Err(e) => return Err(e),
            };
            max = max.max(lag);
        }
        Ok(max)
    }

    /// Active replica of `primary` with the lowest freshly measured lag.
    /// Links that cannot be measured are skipped.
    pub async fn lowest_lag_replica(
        &self,
        primary: &RegionId,
    ) -> Result<Option<(ReplicationLink, Duration)>> {
        let mut best: Option<(ReplicationLink, Duration)> = None;
        for link in self.active_links(primary).await? {
            let link_id = link.id;
            match self.measure(link).await {
                Ok((link, lag)) => {
                    if best.as_ref().map(|(_, b)| lag < *b).unwrap_or(true) {
                        best = Some((link, lag));
                    }
                }
                Err(Error::Collaborator(e)) => {
                    warn!(link_id = %link_id, error = %e, "Skipping replica with unmeasurable lag");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(best)
    }

    /// Detach every active link of a former primary
    #[instrument(skip(self), fields(primary = %primary))]
    pub async fn detach_links(&self, primary: &RegionId) -> Result<usize> {
        let links = self.active_links(primary).await?;
        let count = links.len();
        for mut link in links {
            link.state = LinkState::Detached;
            link.updated_at = Utc::now();
            self.store
                .upsert_link(&link)
                .await
                .map_err(|e| map_storage_error(e, "Failed to detach replication link"))?;
        }
        Ok(count)
    }

    async fn measure(&self, mut link: ReplicationLink) -> Result<(ReplicationLink, Duration)> {
        let positions = retry_transient(&self.retry, "replication.positions", || {
            self.feed.positions(&link.slot_name)
        })
        .await?;

        let lag = non_negative(positions.primary_committed_at - positions.replica_applied_at);
        link.record_lag(lag, Utc::now());
        self.store
            .upsert_link(&link)
            .await
            .map_err(|e| map_storage_error(e, "Failed to record replication lag"))?;

        REPLICATION_LAG_SECONDS
            .with_label_values(&[&format!("{}->{}", link.primary, link.replica)])
            .set(lag.as_secs_f64());
        Ok((link, lag))
    }
}
