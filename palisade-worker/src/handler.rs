//! HTTP handlers for the worker API
//!
//! Implements:
//! - GET /health - Liveness
//! - GET /ready - Readiness (metadata store reachable)
//! - GET /metrics - Prometheus text exposition
//! - POST /v1/failovers - Manual failover trigger
//! - GET /v1/failovers/:event_id - Failover event status
//! - POST /v1/failovers/:event_id/cancel - Cancel before promotion
//! - POST /v1/backups/:job_id/execute - Start a backup now
//! - GET /v1/executions/:execution_id - Backup execution status

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use palisade_core::{BackupExecution, BackupType, FailoverEvent, RegionId, TriggerType};
use palisade_runtime::{BackupService, Error as RuntimeError, FailoverOrchestrator, FailoverRequest};
use palisade_storage::MetadataStore;
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MetadataStore>,
    pub backups: BackupService,
    pub failover: FailoverOrchestrator,
}

/// Routes of the worker API
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/failovers", post(trigger_failover_handler))
        .route("/v1/failovers/:event_id", get(failover_status_handler))
        .route("/v1/failovers/:event_id/cancel", post(cancel_failover_handler))
        .route("/v1/backups/:job_id/execute", post(execute_backup_handler))
        .route("/v1/executions/:execution_id", get(execution_status_handler))
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: Option<String>,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }
}

/// Manual failover request body
#[derive(Debug, Deserialize)]
pub struct TriggerFailoverBody {
    pub source: RegionId,
    /// Lowest-lag active replica when omitted
    pub target: Option<RegionId>,
    pub initiated_by: String,
    pub reason: Option<String>,
    #[serde(default)]
    pub override_safety_checks: bool,
    /// `manual` (default) or `planned`
    #[serde(default)]
    pub planned: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExecuteBackupBody {
    pub backup_type: Option<BackupType>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub id: Uuid,
    pub status: String,
}

impl AcceptedResponse {
    fn accepted(id: Uuid) -> Self {
        Self {
            id,
            status: "accepted".to_string(),
        }
    }
}

/// Liveness endpoint
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

/// Readiness endpoint: 503 until the metadata store answers
pub async fn ready_handler(State(state): State<AppState>) -> Response {
    match state.store.health_check().await {
        Ok(()) => (StatusCode::OK, Json(HealthResponse::healthy())).into_response(),
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable".to_string(),
                    version: None,
                }),
            )
                .into_response()
        }
    }
}

pub async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

/// Start a failover and return its event id once the region is claimed.
/// The failover itself runs in the background.
pub async fn trigger_failover_handler(
    State(state): State<AppState>,
    Json(body): Json<TriggerFailoverBody>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    if body.initiated_by.trim().is_empty() {
        return Err(ApiError::BadRequest("initiated_by is required".to_string()));
    }

    let request = FailoverRequest {
        source: body.source,
        target: body.target,
        trigger: if body.planned {
            TriggerType::Planned
        } else {
            TriggerType::Manual
        },
        initiated_by: body.initiated_by,
        reason: body.reason,
        override_safety_checks: body.override_safety_checks,
        health_snapshot_id: None,
    };

    let (event_id, handle) = state.failover.start(request).await?;
    info!(event_id = %event_id, "Failover accepted");

    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(event)) => {
                info!(event_id = %event_id, state = %event.state, "Failover finished");
            }
            Ok(Err(e)) => {
                error!(event_id = %event_id, error = %e, "Failover failed");
            }
            Err(e) => {
                error!(event_id = %event_id, error = %e, "Failover task panicked");
            }
        }
    });

    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse::accepted(event_id))))
}

pub async fn failover_status_handler(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<FailoverEvent>, ApiError> {
    Ok(Json(state.failover.get_event(event_id).await?))
}

pub async fn cancel_failover_handler(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    state.failover.cancel(event_id).await?;
    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse::accepted(event_id))))
}

/// Start an execution of a job. Repeating the call while it runs returns the
/// same execution id.
pub async fn execute_backup_handler(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    body: Option<Json<ExecuteBackupBody>>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let type_override = body.and_then(|Json(b)| b.backup_type);
    let execution_id = state.backups.execute_now(job_id, type_override).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse::accepted(execution_id)),
    ))
}

pub async fn execution_status_handler(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> Result<Json<BackupExecution>, ApiError> {
    Ok(Json(state.backups.execution_status(execution_id).await?))
}

/// Error responses of the worker API
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Runtime(RuntimeError),
}

impl From<RuntimeError> for ApiError {
    fn from(e: RuntimeError) -> Self {
        ApiError::Runtime(e)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
}

fn status_for(e: &RuntimeError) -> (StatusCode, &'static str) {
    match e {
        RuntimeError::Configuration(_) => (StatusCode::BAD_REQUEST, "configuration"),
        RuntimeError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        RuntimeError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
        RuntimeError::TenantViolation(_) => (StatusCode::FORBIDDEN, "tenant_violation"),
        RuntimeError::FailoverInProgress { .. } => (StatusCode::CONFLICT, "failover_in_progress"),
        RuntimeError::LagTooHigh { .. } => (StatusCode::CONFLICT, "lag_too_high"),
        RuntimeError::ConfigurationInUse(_) => (StatusCode::CONFLICT, "configuration_in_use"),
        RuntimeError::StorageUnavailable(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable")
        }
        RuntimeError::Collaborator(_) => (StatusCode::BAD_GATEWAY, "collaborator"),
        RuntimeError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
        RuntimeError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Runtime(e) => {
                let (status, kind) = status_for(&e);
                if status.is_server_error() {
                    error!(error = %e, "Request failed");
                } else {
                    warn!(error = %e, "Request rejected");
                }
                (status, kind, e.to_string())
            }
        };

        (
            status,
            Json(ErrorBody {
                error: message,
                kind: kind.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_core::DrScope;

    #[test]
    fn test_error_status_mapping() {
        let region = RegionId::new("us-east").unwrap();
        let cases = [
            (
                RuntimeError::FailoverInProgress {
                    region,
                    event_id: Uuid::new_v4(),
                },
                StatusCode::CONFLICT,
            ),
            (RuntimeError::NotFound("job".into()), StatusCode::NOT_FOUND),
            (
                RuntimeError::ConfigurationInUse(DrScope::System),
                StatusCode::CONFLICT,
            ),
            (
                RuntimeError::StorageUnavailable("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                RuntimeError::Configuration("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError::Runtime(error).into_response().status(), expected);
        }
    }

    #[test]
    fn test_bad_request_response() {
        let response = ApiError::BadRequest("missing".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler().await;
        assert_eq!(response.0.status, "healthy");
        assert!(response.0.version.is_some());
    }
}
