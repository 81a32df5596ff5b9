//! PostgreSQL metadata store
//!
//! Records are stored as JSONB bodies alongside the columns used for lookups
//! and invariants. Every statement runs inside a transaction that first sets
//! `app.current_tenant`, so row-level security policies scope all reads and
//! writes to the tenant this store was constructed for.

use crate::store::{abandoned_reason, FailoverClaim, MetadataStore};
use crate::{Error, Result, TenantId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use palisade_core::{
    BackupExecution, BackupJob, DrConfiguration, DrScope, FailoverEvent, HealthSnapshot,
    RecoveryTest, RegionId, ReplicationLink,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Tenant whose rows hold the system-wide configuration
pub const SYSTEM_TENANT: &str = "system";

/// Attempts at an atomic claim when the conflicting row disappears between
/// the insert and the lookup
const CLAIM_ATTEMPTS: usize = 3;

/// Configuration for the PostgreSQL connection pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
    pub max_lifetime_secs: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_secs: 30,
            idle_timeout_secs: None,
            max_lifetime_secs: None,
        }
    }
}

/// PostgreSQL metadata store bound to one tenant
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    tenant: TenantId,
}

impl PostgresStore {
    pub async fn connect(database_url: &str, tenant: TenantId) -> Result<Self> {
        Self::with_pool_config(database_url, PoolConfig::default(), tenant).await
    }

    pub async fn with_pool_config(
        database_url: &str,
        config: PoolConfig,
        tenant: TenantId,
    ) -> Result<Self> {
        if config.min_connections == 0 {
            return Err(Error::ValidationError(
                "min_connections must be > 0".to_string(),
            ));
        }
        if config.max_connections == 0 || config.max_connections < config.min_connections {
            return Err(Error::ValidationError(
                "max_connections must be >= min_connections and > 0".to_string(),
            ));
        }

        let mut opts = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.acquire_timeout_secs));
        if let Some(idle) = config.idle_timeout_secs {
            opts = opts.idle_timeout(std::time::Duration::from_secs(idle));
        }
        if let Some(max_life) = config.max_lifetime_secs {
            opts = opts.max_lifetime(std::time::Duration::from_secs(max_life));
        }

        let pool = opts.connect(database_url).await?;
        Ok(Self::from_pool(pool, tenant))
    }

    pub fn from_pool(pool: PgPool, tenant: TenantId) -> Self {
        Self { pool, tenant }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Run `f` in a transaction with the tenant context set for RLS.
    ///
    /// Commits on success, rolls back on error, and logs operations slower
    /// than 100ms.
    async fn with_tenant_context<F, T>(&self, table: &'static str, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut Transaction<'_, Postgres>) -> BoxFuture<'c, Result<T>> + Send,
        T: Send,
    {
        let start = Instant::now();
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        sqlx::query("SELECT set_config('app.current_tenant', $1, true)")
            .bind(self.tenant.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;

        let result = match f(&mut tx).await {
            Ok(result) => {
                tx.commit().await.map_err(map_db_error)?;
                Ok(result)
            }
            Err(e) => {
                tx.rollback().await.map_err(map_db_error)?;
                Err(e)
            }
        };

        let elapsed = start.elapsed();
        if elapsed.as_millis() > 100 {
            warn!(
                tenant_id = %self.tenant.as_str(),
                table = table,
                duration_ms = elapsed.as_millis(),
                "Slow database operation detected"
            );
            crate::metrics::SLOW_METADATA_OPERATIONS
                .with_label_values(&[table])
                .inc();
        }

        result
    }

    fn check_scope(&self, scope: &DrScope) -> Result<()> {
        let allowed = match scope {
            DrScope::System => self.tenant.as_str() == SYSTEM_TENANT,
            DrScope::Tenant(tenant) => tenant == &self.tenant,
        };
        if allowed {
            Ok(())
        } else {
            Err(Error::TenantViolation(format!(
                "tenant {} cannot write configuration for {}",
                self.tenant, scope
            )))
        }
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    #[instrument(
        skip(self, config),
        fields(db.system = "postgresql", db.operation = "UPSERT", tenant_id = %self.tenant, scope = %config.scope)
    )]
    async fn put_configuration(&self, config: &DrConfiguration) -> Result<()> {
        self.check_scope(&config.scope)?;
        let config = config.clone();
        let tenant = self.tenant.as_str().to_string();

        self.with_tenant_context("dr_configurations", |tx| {
            Box::pin(async move {
                sqlx::query(
                    r#"
                    INSERT INTO dr_configurations (tenant_id, scope_key, body, updated_at)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (tenant_id, scope_key)
                    DO UPDATE SET body = EXCLUDED.body, updated_at = EXCLUDED.updated_at
                    "#,
                )
                .bind(&tenant)
                .bind(config.scope.key())
                .bind(Json(&config))
                .bind(config.updated_at)
                .execute(&mut **tx)
                .await
                .map_err(map_db_error)?;
                Ok(())
            })
        })
        .await
    }

    #[instrument(skip(self), fields(tenant_id = %self.tenant, scope = %scope))]
    async fn get_configuration(&self, scope: &DrScope) -> Result<Option<DrConfiguration>> {
        let key = scope.key();
        self.with_tenant_context("dr_configurations", |tx| {
            Box::pin(async move {
                let row = sqlx::query_scalar::<_, Json<DrConfiguration>>(
                    "SELECT body FROM dr_configurations WHERE scope_key = $1",
                )
                .bind(&key)
                .fetch_optional(&mut **tx)
                .await
                .map_err(map_db_error)?;
                Ok(row.map(|Json(config)| config))
            })
        })
        .await
    }

    #[instrument(
        skip(self, job),
        fields(db.system = "postgresql", db.operation = "INSERT", db.sql.table = "backup_jobs", tenant_id = %self.tenant, job_id = %job.id)
    )]
    async fn create_job(&self, job: &BackupJob) -> Result<()> {
        let job = job.clone();
        let tenant = self.tenant.as_str().to_string();

        self.with_tenant_context("backup_jobs", |tx| {
            Box::pin(async move {
                sqlx::query(
                    r#"
                    INSERT INTO backup_jobs (id, tenant_id, name, next_execution, body, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(job.id)
                .bind(&tenant)
                .bind(&job.name)
                .bind(job.next_execution)
                .bind(Json(&job))
                .bind(job.created_at)
                .execute(&mut **tx)
                .await
                .map_err(map_db_error)?;
                Ok(())
            })
        })
        .await
    }

    #[instrument(
        skip(self, job),
        fields(db.system = "postgresql", db.operation = "UPDATE", db.sql.table = "backup_jobs", tenant_id = %self.tenant, job_id = %job.id)
    )]
    async fn update_job(&self, job: &BackupJob) -> Result<()> {
        let id = job.id;
        let next_execution = job.next_execution;
        let statistics = job.statistics.clone();

        self.with_tenant_context("backup_jobs", |tx| {
            Box::pin(async move {
                let result = sqlx::query(
                    r#"
                    UPDATE backup_jobs
                    SET next_execution = $2,
                        body = jsonb_set(
                            jsonb_set(body, '{next_execution}', $3),
                            '{statistics}', $4
                        )
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(next_execution)
                .bind(Json(next_execution))
                .bind(Json(&statistics))
                .execute(&mut **tx)
                .await
                .map_err(map_db_error)?;

                if result.rows_affected() == 0 {
                    return Err(Error::NotFound(format!("Backup job {}", id)));
                }
                Ok(())
            })
        })
        .await
    }

    async fn get_job(&self, id: Uuid) -> Result<BackupJob> {
        self.with_tenant_context("backup_jobs", |tx| {
            Box::pin(async move {
                sqlx::query_scalar::<_, Json<BackupJob>>(
                    "SELECT body FROM backup_jobs WHERE id = $1",
                )
                .bind(id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(map_db_error)?
                .map(|Json(job)| job)
                .ok_or_else(|| Error::NotFound(format!("Backup job {}", id)))
            })
        })
        .await
    }

    #[instrument(skip(self), fields(tenant_id = %self.tenant))]
    async fn list_jobs(&self) -> Result<Vec<BackupJob>> {
        self.with_tenant_context("backup_jobs", |tx| {
            Box::pin(async move {
                let rows = sqlx::query_scalar::<_, Json<BackupJob>>(
                    "SELECT body FROM backup_jobs ORDER BY created_at",
                )
                .fetch_all(&mut **tx)
                .await
                .map_err(map_db_error)?;
                Ok(rows.into_iter().map(|Json(job)| job).collect())
            })
        })
        .await
    }

    /// Atomic claim backed by the `backup_executions_one_running` partial
    /// unique index: the insert is skipped if the job already has a running
    /// execution, in which case that execution's id is returned. A running
    /// execution started before `stale_before` is failed and replaced.
    #[instrument(
        skip(self, execution),
        fields(
            db.system = "postgresql",
            db.operation = "INSERT",
            db.sql.table = "backup_executions",
            tenant_id = %self.tenant,
            job_id = %execution.job_id,
            execution_id = %execution.id,
        )
    )]
    async fn begin_execution(
        &self,
        execution: &BackupExecution,
        stale_before: DateTime<Utc>,
    ) -> Result<(Uuid, bool)> {
        let execution = execution.clone();
        let tenant = self.tenant.as_str().to_string();

        self.with_tenant_context("backup_executions", |tx| {
            Box::pin(async move {
                let stale = sqlx::query_scalar::<_, Json<BackupExecution>>(
                    r#"
                    SELECT body FROM backup_executions
                    WHERE job_id = $1 AND status = 'running' AND started_at < $2
                    FOR UPDATE
                    "#,
                )
                .bind(execution.job_id)
                .bind(stale_before)
                .fetch_optional(&mut **tx)
                .await
                .map_err(map_db_error)?;

                if let Some(Json(mut abandoned)) = stale {
                    abandoned
                        .fail(abandoned_reason(stale_before), execution.started_at)
                        .map_err(|e| Error::Internal(e.to_string()))?;
                    sqlx::query(
                        r#"
                        UPDATE backup_executions
                        SET status = $2, completed_at = $3, body = $4
                        WHERE id = $1 AND status = 'running'
                        "#,
                    )
                    .bind(abandoned.id)
                    .bind(abandoned.status.as_str())
                    .bind(abandoned.completed_at)
                    .bind(Json(&abandoned))
                    .execute(&mut **tx)
                    .await
                    .map_err(map_db_error)?;
                    warn!(
                        execution_id = %abandoned.id,
                        started_at = %abandoned.started_at,
                        "Reclaimed stale running execution"
                    );
                }

                for _ in 0..CLAIM_ATTEMPTS {
                    let result = sqlx::query(
                        r#"
                        INSERT INTO backup_executions (
                            id, tenant_id, job_id, status, started_at, completed_at, body
                        )
                        VALUES ($1, $2, $3, $4, $5, $6, $7)
                        ON CONFLICT (job_id) WHERE status = 'running'
                        DO NOTHING
                        "#,
                    )
                    .bind(execution.id)
                    .bind(&tenant)
                    .bind(execution.job_id)
                    .bind(execution.status.as_str())
                    .bind(execution.started_at)
                    .bind(execution.completed_at)
                    .bind(Json(&execution))
                    .execute(&mut **tx)
                    .await
                    .map_err(map_db_error)?;

                    if result.rows_affected() > 0 {
                        info!(execution_id = %execution.id, "Created backup execution");
                        return Ok((execution.id, true));
                    }

                    let running = sqlx::query_scalar::<_, Uuid>(
                        "SELECT id FROM backup_executions WHERE job_id = $1 AND status = 'running'",
                    )
                    .bind(execution.job_id)
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(map_db_error)?;

                    if let Some(id) = running {
                        info!(running_execution_id = %id, "Job already has a running execution");
                        return Ok((id, false));
                    }
                }
                Err(Error::Internal(format!(
                    "could not claim job {} after {} attempts",
                    execution.job_id, CLAIM_ATTEMPTS
                )))
            })
        })
        .await
    }

    #[instrument(
        skip(self, execution),
        fields(
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.sql.table = "backup_executions",
            tenant_id = %self.tenant,
            execution_id = %execution.id,
            status = execution.status.as_str(),
        )
    )]
    async fn finalize_execution(&self, execution: &BackupExecution) -> Result<()> {
        if !execution.is_finalized() {
            return Err(Error::InvalidState(format!(
                "Backup execution {} is still running",
                execution.id
            )));
        }
        let execution = execution.clone();

        self.with_tenant_context("backup_executions", |tx| {
            Box::pin(async move {
                let result = sqlx::query(
                    r#"
                    UPDATE backup_executions
                    SET status = $2, completed_at = $3, body = $4
                    WHERE id = $1 AND status = 'running'
                    "#,
                )
                .bind(execution.id)
                .bind(execution.status.as_str())
                .bind(execution.completed_at)
                .bind(Json(&execution))
                .execute(&mut **tx)
                .await
                .map_err(map_db_error)?;

                if result.rows_affected() == 0 {
                    return Err(missing_or_final(
                        tx,
                        "SELECT status FROM backup_executions WHERE id = $1",
                        execution.id,
                        "Backup execution",
                    )
                    .await);
                }
                Ok(())
            })
        })
        .await
    }

    async fn mark_recovery_tested(&self, id: Uuid) -> Result<()> {
        self.with_tenant_context("backup_executions", |tx| {
            Box::pin(async move {
                let result = sqlx::query(
                    r#"
                    UPDATE backup_executions
                    SET body = jsonb_set(body, '{recovery_tested}', 'true'::jsonb)
                    WHERE id = $1 AND status = 'completed'
                    "#,
                )
                .bind(id)
                .execute(&mut **tx)
                .await
                .map_err(map_db_error)?;

                if result.rows_affected() == 0 {
                    return Err(missing_or_final(
                        tx,
                        "SELECT status FROM backup_executions WHERE id = $1",
                        id,
                        "Backup execution",
                    )
                    .await);
                }
                Ok(())
            })
        })
        .await
    }

    async fn get_execution(&self, id: Uuid) -> Result<BackupExecution> {
        self.with_tenant_context("backup_executions", |tx| {
            Box::pin(async move {
                sqlx::query_scalar::<_, Json<BackupExecution>>(
                    "SELECT body FROM backup_executions WHERE id = $1",
                )
                .bind(id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(map_db_error)?
                .map(|Json(execution)| execution)
                .ok_or_else(|| Error::NotFound(format!("Backup execution {}", id)))
            })
        })
        .await
    }

    async fn running_execution(&self, job_id: Uuid) -> Result<Option<BackupExecution>> {
        self.with_tenant_context("backup_executions", |tx| {
            Box::pin(async move {
                let row = sqlx::query_scalar::<_, Json<BackupExecution>>(
                    "SELECT body FROM backup_executions WHERE job_id = $1 AND status = 'running'",
                )
                .bind(job_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(map_db_error)?;
                Ok(row.map(|Json(execution)| execution))
            })
        })
        .await
    }

    #[instrument(skip(self), fields(tenant_id = %self.tenant, job_id = %job_id))]
    async fn list_executions(&self, job_id: Uuid) -> Result<Vec<BackupExecution>> {
        self.with_tenant_context("backup_executions", |tx| {
            Box::pin(async move {
                let rows = sqlx::query_scalar::<_, Json<BackupExecution>>(
                    "SELECT body FROM backup_executions WHERE job_id = $1 ORDER BY started_at",
                )
                .bind(job_id)
                .fetch_all(&mut **tx)
                .await
                .map_err(map_db_error)?;
                Ok(rows.into_iter().map(|Json(execution)| execution).collect())
            })
        })
        .await
    }

    async fn delete_execution(&self, id: Uuid) -> Result<()> {
        self.with_tenant_context("backup_executions", |tx| {
            Box::pin(async move {
                let result = sqlx::query("DELETE FROM backup_executions WHERE id = $1")
                    .bind(id)
                    .execute(&mut **tx)
                    .await
                    .map_err(map_db_error)?;
                if result.rows_affected() == 0 {
                    return Err(Error::NotFound(format!("Backup execution {}", id)));
                }
                Ok(())
            })
        })
        .await
    }

    async fn count_failed_executions_since(&self, since: DateTime<Utc>) -> Result<u32> {
        self.with_tenant_context("backup_executions", |tx| {
            Box::pin(async move {
                let count = sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM backup_executions WHERE status = 'failed' AND completed_at >= $1",
                )
                .bind(since)
                .fetch_one(&mut **tx)
                .await
                .map_err(map_db_error)?;
                Ok(u32::try_from(count).unwrap_or(u32::MAX))
            })
        })
        .await
    }

    #[instrument(skip(self, link), fields(tenant_id = %self.tenant, link_id = %link.id))]
    async fn upsert_link(&self, link: &ReplicationLink) -> Result<()> {
        let link = link.clone();
        let tenant = self.tenant.as_str().to_string();

        self.with_tenant_context("replication_links", |tx| {
            Box::pin(async move {
                sqlx::query(
                    r#"
                    INSERT INTO replication_links (
                        id, tenant_id, primary_region, replica_region, state, established_at, body
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ON CONFLICT (id)
                    DO UPDATE SET state = EXCLUDED.state, body = EXCLUDED.body
                    "#,
                )
                .bind(link.id)
                .bind(&tenant)
                .bind(link.primary.as_str())
                .bind(link.replica.as_str())
                .bind(if link.is_active() { "active" } else { "detached" })
                .bind(link.established_at)
                .bind(Json(&link))
                .execute(&mut **tx)
                .await
                .map_err(map_db_error)?;
                Ok(())
            })
        })
        .await
    }

    async fn get_link(&self, id: Uuid) -> Result<ReplicationLink> {
        self.with_tenant_context("replication_links", |tx| {
            Box::pin(async move {
                sqlx::query_scalar::<_, Json<ReplicationLink>>(
                    "SELECT body FROM replication_links WHERE id = $1",
                )
                .bind(id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(map_db_error)?
                .map(|Json(link)| link)
                .ok_or_else(|| Error::NotFound(format!("Replication link {}", id)))
            })
        })
        .await
    }

    async fn find_link(
        &self,
        primary: &RegionId,
        replica: &RegionId,
    ) -> Result<Option<ReplicationLink>> {
        let primary = primary.as_str().to_string();
        let replica = replica.as_str().to_string();

        self.with_tenant_context("replication_links", |tx| {
            Box::pin(async move {
                let row = sqlx::query_scalar::<_, Json<ReplicationLink>>(
                    r#"
                    SELECT body FROM replication_links
                    WHERE primary_region = $1 AND replica_region = $2
                    ORDER BY established_at DESC
                    LIMIT 1
                    "#,
                )
                .bind(&primary)
                .bind(&replica)
                .fetch_optional(&mut **tx)
                .await
                .map_err(map_db_error)?;
                Ok(row.map(|Json(link)| link))
            })
        })
        .await
    }

    async fn links_for_primary(&self, primary: &RegionId) -> Result<Vec<ReplicationLink>> {
        let primary = primary.as_str().to_string();

        self.with_tenant_context("replication_links", |tx| {
            Box::pin(async move {
                let rows = sqlx::query_scalar::<_, Json<ReplicationLink>>(
                    "SELECT body FROM replication_links WHERE primary_region = $1 ORDER BY established_at",
                )
                .bind(&primary)
                .fetch_all(&mut **tx)
                .await
                .map_err(map_db_error)?;
                Ok(rows.into_iter().map(|Json(link)| link).collect())
            })
        })
        .await
    }

    #[instrument(
        skip(self, snapshot),
        fields(tenant_id = %self.tenant, region = %snapshot.primary, severity = snapshot.severity.as_str())
    )]
    async fn append_snapshot(&self, snapshot: &HealthSnapshot) -> Result<()> {
        let snapshot = snapshot.clone();
        let tenant = self.tenant.as_str().to_string();

        self.with_tenant_context("health_snapshots", |tx| {
            Box::pin(async move {
                sqlx::query(
                    r#"
                    INSERT INTO health_snapshots (id, tenant_id, primary_region, taken_at, severity, body)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(snapshot.id)
                .bind(&tenant)
                .bind(snapshot.primary.as_str())
                .bind(snapshot.taken_at)
                .bind(snapshot.severity.as_str())
                .bind(Json(&snapshot))
                .execute(&mut **tx)
                .await
                .map_err(map_db_error)?;
                Ok(())
            })
        })
        .await
    }

    async fn latest_snapshot(&self, primary: &RegionId) -> Result<Option<HealthSnapshot>> {
        let primary = primary.as_str().to_string();

        self.with_tenant_context("health_snapshots", |tx| {
            Box::pin(async move {
                let row = sqlx::query_scalar::<_, Json<HealthSnapshot>>(
                    r#"
                    SELECT body FROM health_snapshots
                    WHERE primary_region = $1
                    ORDER BY taken_at DESC
                    LIMIT 1
                    "#,
                )
                .bind(&primary)
                .fetch_optional(&mut **tx)
                .await
                .map_err(map_db_error)?;
                Ok(row.map(|Json(snapshot)| snapshot))
            })
        })
        .await
    }

    async fn snapshots_since(
        &self,
        primary: &RegionId,
        since: DateTime<Utc>,
    ) -> Result<Vec<HealthSnapshot>> {
        let primary = primary.as_str().to_string();

        self.with_tenant_context("health_snapshots", |tx| {
            Box::pin(async move {
                let rows = sqlx::query_scalar::<_, Json<HealthSnapshot>>(
                    r#"
                    SELECT body FROM health_snapshots
                    WHERE primary_region = $1 AND taken_at >= $2
                    ORDER BY taken_at
                    "#,
                )
                .bind(&primary)
                .bind(since)
                .fetch_all(&mut **tx)
                .await
                .map_err(map_db_error)?;
                Ok(rows.into_iter().map(|Json(snapshot)| snapshot).collect())
            })
        })
        .await
    }

    #[instrument(skip(self), fields(tenant_id = %self.tenant))]
    async fn prune_snapshots(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.with_tenant_context("health_snapshots", |tx| {
            Box::pin(async move {
                let result = sqlx::query("DELETE FROM health_snapshots WHERE taken_at < $1")
                    .bind(cutoff)
                    .execute(&mut **tx)
                    .await
                    .map_err(map_db_error)?;
                Ok(result.rows_affected())
            })
        })
        .await
    }

    /// Atomic check-and-set backed by the `failover_events_one_active`
    /// partial unique index.
    #[instrument(
        skip(self, event),
        fields(
            db.system = "postgresql",
            db.operation = "INSERT",
            db.sql.table = "failover_events",
            tenant_id = %self.tenant,
            event_id = %event.id,
            region = %event.source_region,
        )
    )]
    async fn try_begin_failover(&self, event: &FailoverEvent) -> Result<FailoverClaim> {
        let event = event.clone();
        let tenant = self.tenant.as_str().to_string();

        self.with_tenant_context("failover_events", |tx| {
            Box::pin(async move {
                for _ in 0..CLAIM_ATTEMPTS {
                    let result = sqlx::query(
                        r#"
                        INSERT INTO failover_events (
                            id, tenant_id, source_region, state, terminal, started_at, body
                        )
                        VALUES ($1, $2, $3, $4, $5, $6, $7)
                        ON CONFLICT (tenant_id, source_region) WHERE NOT terminal
                        DO NOTHING
                        "#,
                    )
                    .bind(event.id)
                    .bind(&tenant)
                    .bind(event.source_region.as_str())
                    .bind(event.state.as_str())
                    .bind(event.state.is_terminal())
                    .bind(event.started_at)
                    .bind(Json(&event))
                    .execute(&mut **tx)
                    .await
                    .map_err(map_db_error)?;

                    if result.rows_affected() > 0 {
                        return Ok(FailoverClaim::Claimed);
                    }

                    let active = sqlx::query_scalar::<_, Uuid>(
                        "SELECT id FROM failover_events WHERE source_region = $1 AND NOT terminal",
                    )
                    .bind(event.source_region.as_str())
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(map_db_error)?;

                    if let Some(id) = active {
                        return Ok(FailoverClaim::Active(id));
                    }
                }
                Err(Error::Internal(format!(
                    "could not claim region {} after {} attempts",
                    event.source_region, CLAIM_ATTEMPTS
                )))
            })
        })
        .await
    }

    #[instrument(
        skip(self, event),
        fields(tenant_id = %self.tenant, event_id = %event.id, state = event.state.as_str())
    )]
    async fn record_failover(&self, event: &FailoverEvent) -> Result<()> {
        let event = event.clone();

        self.with_tenant_context("failover_events", |tx| {
            Box::pin(async move {
                let result = sqlx::query(
                    r#"
                    UPDATE failover_events
                    SET state = $2, terminal = $3, body = $4
                    WHERE id = $1 AND NOT terminal
                    "#,
                )
                .bind(event.id)
                .bind(event.state.as_str())
                .bind(event.state.is_terminal())
                .bind(Json(&event))
                .execute(&mut **tx)
                .await
                .map_err(map_db_error)?;

                if result.rows_affected() == 0 {
                    return Err(missing_or_final(
                        tx,
                        "SELECT state FROM failover_events WHERE id = $1",
                        event.id,
                        "Failover event",
                    )
                    .await);
                }
                Ok(())
            })
        })
        .await
    }

    async fn get_failover(&self, id: Uuid) -> Result<FailoverEvent> {
        self.with_tenant_context("failover_events", |tx| {
            Box::pin(async move {
                sqlx::query_scalar::<_, Json<FailoverEvent>>(
                    "SELECT body FROM failover_events WHERE id = $1",
                )
                .bind(id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(map_db_error)?
                .map(|Json(event)| event)
                .ok_or_else(|| Error::NotFound(format!("Failover event {}", id)))
            })
        })
        .await
    }

    async fn active_failover(&self, source: &RegionId) -> Result<Option<FailoverEvent>> {
        let source = source.as_str().to_string();

        self.with_tenant_context("failover_events", |tx| {
            Box::pin(async move {
                let row = sqlx::query_scalar::<_, Json<FailoverEvent>>(
                    "SELECT body FROM failover_events WHERE source_region = $1 AND NOT terminal",
                )
                .bind(&source)
                .fetch_optional(&mut **tx)
                .await
                .map_err(map_db_error)?;
                Ok(row.map(|Json(event)| event))
            })
        })
        .await
    }

    async fn list_failovers(&self, source: Option<&RegionId>) -> Result<Vec<FailoverEvent>> {
        let source = source.map(|s| s.as_str().to_string());

        self.with_tenant_context("failover_events", |tx| {
            Box::pin(async move {
                let rows = sqlx::query_scalar::<_, Json<FailoverEvent>>(
                    r#"
                    SELECT body FROM failover_events
                    WHERE ($1::TEXT IS NULL OR source_region = $1)
                    ORDER BY started_at
                    "#,
                )
                .bind(&source)
                .fetch_all(&mut **tx)
                .await
                .map_err(map_db_error)?;
                Ok(rows.into_iter().map(|Json(event)| event).collect())
            })
        })
        .await
    }

    #[instrument(skip(self, test), fields(tenant_id = %self.tenant, test_id = %test.id))]
    async fn create_test(&self, test: &RecoveryTest) -> Result<()> {
        let test = test.clone();
        let tenant = self.tenant.as_str().to_string();

        self.with_tenant_context("recovery_tests", |tx| {
            Box::pin(async move {
                sqlx::query(
                    r#"
                    INSERT INTO recovery_tests (id, tenant_id, status, scheduled_for, created_at, body)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(test.id)
                .bind(&tenant)
                .bind(test.status.as_str())
                .bind(test.scheduled_for)
                .bind(test.created_at)
                .bind(Json(&test))
                .execute(&mut **tx)
                .await
                .map_err(map_db_error)?;
                Ok(())
            })
        })
        .await
    }

    #[instrument(
        skip(self, test),
        fields(tenant_id = %self.tenant, test_id = %test.id, status = test.status.as_str())
    )]
    async fn record_test_result(&self, test: &RecoveryTest) -> Result<()> {
        let test = test.clone();

        self.with_tenant_context("recovery_tests", |tx| {
            Box::pin(async move {
                let result = sqlx::query(
                    r#"
                    UPDATE recovery_tests
                    SET status = $2, body = $3
                    WHERE id = $1 AND status = 'scheduled'
                    "#,
                )
                .bind(test.id)
                .bind(test.status.as_str())
                .bind(Json(&test))
                .execute(&mut **tx)
                .await
                .map_err(map_db_error)?;

                if result.rows_affected() == 0 {
                    return Err(missing_or_final(
                        tx,
                        "SELECT status FROM recovery_tests WHERE id = $1",
                        test.id,
                        "Recovery test",
                    )
                    .await);
                }
                Ok(())
            })
        })
        .await
    }

    async fn get_test(&self, id: Uuid) -> Result<RecoveryTest> {
        self.with_tenant_context("recovery_tests", |tx| {
            Box::pin(async move {
                sqlx::query_scalar::<_, Json<RecoveryTest>>(
                    "SELECT body FROM recovery_tests WHERE id = $1",
                )
                .bind(id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(map_db_error)?
                .map(|Json(test)| test)
                .ok_or_else(|| Error::NotFound(format!("Recovery test {}", id)))
            })
        })
        .await
    }

    async fn due_tests(&self, now: DateTime<Utc>) -> Result<Vec<RecoveryTest>> {
        self.with_tenant_context("recovery_tests", |tx| {
            Box::pin(async move {
                let rows = sqlx::query_scalar::<_, Json<RecoveryTest>>(
                    r#"
                    SELECT body FROM recovery_tests
                    WHERE status = 'scheduled' AND scheduled_for <= $1
                    ORDER BY scheduled_for
                    "#,
                )
                .bind(now)
                .fetch_all(&mut **tx)
                .await
                .map_err(map_db_error)?;
                Ok(rows.into_iter().map(|Json(test)| test).collect())
            })
        })
        .await
    }

    async fn list_tests(&self) -> Result<Vec<RecoveryTest>> {
        self.with_tenant_context("recovery_tests", |tx| {
            Box::pin(async move {
                let rows = sqlx::query_scalar::<_, Json<RecoveryTest>>(
                    "SELECT body FROM recovery_tests ORDER BY created_at",
                )
                .fetch_all(&mut **tx)
                .await
                .map_err(map_db_error)?;
                Ok(rows.into_iter().map(|Json(test)| test).collect())
            })
        })
        .await
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| ())
            .map_err(map_db_error)
    }
}

/// After a guarded update touched no rows: NotFound if the record does not
/// exist, otherwise InvalidState naming its current state.
async fn missing_or_final(
    tx: &mut Transaction<'_, Postgres>,
    status_query: &str,
    id: Uuid,
    entity: &str,
) -> Error {
    match sqlx::query_scalar::<_, String>(status_query)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
    {
        Ok(Some(status)) => Error::InvalidState(format!("{} {} is {}", entity, id, status)),
        Ok(None) => Error::NotFound(format!("{} {}", entity, id)),
        Err(e) => map_db_error(e),
    }
}

fn map_db_error(err: sqlx::Error) -> Error {
    match &err {
        sqlx::Error::PoolTimedOut => {
            error!(error = %err, "Connection pool timed out");
            return Error::PoolExhausted("Connection pool timed out".to_string());
        }
        sqlx::Error::PoolClosed => {
            error!(error = %err, "Connection pool closed");
            return Error::ConnectionFailed("Connection pool closed".to_string());
        }
        _ => {}
    }

    if let sqlx::Error::Database(db_err) = &err {
        if let Some(code) = db_err.code().as_deref() {
            match code {
                // unique_violation
                "23505" => {
                    warn!(error_code = code, message = db_err.message(), "Unique constraint violation");
                    return Error::AlreadyExists(db_err.message().to_string());
                }
                // foreign_key_violation
                "23503" => {
                    warn!(error_code = code, message = db_err.message(), "Foreign key violation");
                    return Error::NotFound(db_err.message().to_string());
                }
                // check_violation
                "23514" => {
                    warn!(error_code = code, message = db_err.message(), "CHECK constraint violation");
                    return Error::ValidationError(format!(
                        "Constraint violation: {}",
                        db_err.message()
                    ));
                }
                // insufficient_privilege: row-level security rejected the write
                "42501" => {
                    warn!(error_code = code, message = db_err.message(), "Row-level security violation");
                    return Error::TenantViolation(db_err.message().to_string());
                }
                // too_many_connections
                "53300" => {
                    error!(error_code = code, message = db_err.message(), "Database connection limit reached");
                    return Error::PoolExhausted(db_err.message().to_string());
                }
                "08006" | "08001" | "08003" | "08004" => {
                    error!(error_code = code, message = db_err.message(), "Database connection failed");
                    return Error::ConnectionFailed(db_err.message().to_string());
                }
                _ => {
                    error!(error_code = code, message = db_err.message(), "Unexpected database error");
                }
            }
        }
    }

    error!(error = %err, "Database error");
    Error::Database(err)
}
