//! HTTP adapters for the control plane
//!
//! One [`ControlPlaneClient`] implements every collaborator contract the
//! engine needs by calling a JSON API under a single base URL. Payloads of
//! exports and restores travel hex-encoded.
//!
//! [`ControlPlaneClient::for_environment`] derives a client whose region,
//! routing and replication calls go under `/v1/environments/{env}/`, so a
//! failover drill driven through it never touches production regions.
//!
//! Failures are classified for the runtime's retry rules:
//! - timeouts, dropped connections and 5xx responses → `Transient`
//! - connection refused / DNS failures, 503 → `Unavailable`
//! - other 4xx responses and undecodable bodies → `Rejected`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use palisade_core::{BackupScope, BackupType, Environment, RegionId, ReplicationMode};
use palisade_runtime::collaborators::{
    AlertSeverity, BackupSource, CollaboratorError, CollaboratorResult, ConnectionRouter,
    DrillTopology, ExportRequest, ExportedData, FeedPositions, MetricsSource, Notifier,
    RawMetrics, RecoveryEnvironment, RegionControl, ReplicationFeed, RestoreArtifact,
    RestoredDataset,
};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ControlPlaneClient {
    http: reqwest::Client,
    base_url: String,
    environment: Option<Environment>,
}

impl ControlPlaneClient {
    /// Build a client for `base_url` with a per-request timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            environment: None,
        }
    }

    /// Client for the same control plane, scoped to one non-production
    /// environment
    pub fn for_environment(&self, environment: &Environment) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            environment: Some(environment.clone()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn environment(&self) -> Option<&Environment> {
        self.environment.as_ref()
    }

    fn url(&self, path: &str) -> String {
        match &self.environment {
            Some(env) => {
                let rest = path.strip_prefix("/v1").unwrap_or(path);
                format!("{}/v1/environments/{}{}", self.base_url, env, rest)
            }
            None => format!("{}{}", self.base_url, path),
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> CollaboratorResult<reqwest::Response> {
        let url = self.url(path);
        let mut request = self.http.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            warn!(method = %method, path = %path, error = %e, "Control plane request failed");
            classify_transport(&e)
        })?;

        let status = response.status();
        if status.is_success() {
            debug!(method = %method, path = %path, status = status.as_u16(), "Control plane call succeeded");
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        warn!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            body = %body,
            "Control plane returned an error"
        );
        Err(classify_status(status, &body))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> CollaboratorResult<T> {
        let response = self.send(method, path, body).await?;
        response.json::<T>().await.map_err(|e| {
            CollaboratorError::Rejected(format!("undecodable response from {}: {}", path, e))
        })
    }

    async fn call_empty(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> CollaboratorResult<()> {
        self.send(method, path, body).await.map(|_| ())
    }
}

fn classify_transport(e: &reqwest::Error) -> CollaboratorError {
    if e.is_connect() {
        CollaboratorError::Unavailable(e.to_string())
    } else {
        CollaboratorError::Transient(e.to_string())
    }
}

fn classify_status(status: StatusCode, body: &str) -> CollaboratorError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body)
    };
    if status == StatusCode::SERVICE_UNAVAILABLE {
        CollaboratorError::Unavailable(message)
    } else if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        CollaboratorError::Transient(message)
    } else {
        CollaboratorError::Rejected(message)
    }
}

fn decode_payload(hex_payload: &str) -> CollaboratorResult<Vec<u8>> {
    hex::decode(hex_payload)
        .map_err(|e| CollaboratorError::Rejected(format!("payload is not valid hex: {}", e)))
}

#[derive(Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Deserialize)]
struct SlotResponse {
    slot: String,
}

#[derive(Deserialize)]
struct ExportResponse {
    payload: String,
    row_count: u64,
    latest_change_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct RestoreArtifactBody {
    execution_id: Uuid,
    backup_type: BackupType,
    payload: String,
}

#[derive(Deserialize)]
struct RestoreResponse {
    applied_checksums: Vec<String>,
    row_count: u64,
    latest_change_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct TopologyResponse {
    primary: RegionId,
    replica: RegionId,
    #[serde(default)]
    fallback: Option<RegionId>,
}

#[async_trait]
impl ConnectionRouter for ControlPlaneClient {
    #[instrument(skip_all, fields(region = %region))]
    async fn update_target(&self, region: &RegionId) -> CollaboratorResult<()> {
        self.call_empty(
            Method::PUT,
            "/v1/routing/target",
            Some(json!({ "region": region })),
        )
        .await
    }
}

#[async_trait]
impl MetricsSource for ControlPlaneClient {
    async fn sample(&self, region: &RegionId) -> CollaboratorResult<RawMetrics> {
        self.call(Method::GET, &format!("/v1/regions/{}/metrics", region), None)
            .await
    }
}

#[async_trait]
impl Notifier for ControlPlaneClient {
    async fn notify(
        &self,
        severity: AlertSeverity,
        message: &str,
        context: serde_json::Value,
    ) -> CollaboratorResult<()> {
        self.call_empty(
            Method::POST,
            "/v1/notifications",
            Some(json!({
                "severity": severity,
                "message": message,
                "context": context,
            })),
        )
        .await
    }
}

#[async_trait]
impl RegionControl for ControlPlaneClient {
    #[instrument(skip_all, fields(region = %region))]
    async fn stop_writes(&self, region: &RegionId) -> CollaboratorResult<()> {
        self.call_empty(Method::POST, &format!("/v1/regions/{}/writes/stop", region), None)
            .await
    }

    #[instrument(skip_all, fields(region = %region))]
    async fn resume_writes(&self, region: &RegionId) -> CollaboratorResult<()> {
        self.call_empty(Method::POST, &format!("/v1/regions/{}/writes/resume", region), None)
            .await
    }

    async fn in_flight_writes(&self, region: &RegionId) -> CollaboratorResult<u64> {
        let response: CountResponse = self
            .call(Method::GET, &format!("/v1/regions/{}/writes/in-flight", region), None)
            .await?;
        Ok(response.count)
    }

    #[instrument(skip_all, fields(region = %region))]
    async fn terminate_connections(&self, region: &RegionId) -> CollaboratorResult<u64> {
        let response: CountResponse = self
            .call(
                Method::POST,
                &format!("/v1/regions/{}/connections/terminate", region),
                None,
            )
            .await?;
        Ok(response.count)
    }

    #[instrument(skip_all, fields(region = %region))]
    async fn promote(&self, region: &RegionId) -> CollaboratorResult<()> {
        self.call_empty(Method::POST, &format!("/v1/regions/{}/promote", region), None)
            .await
    }

    async fn ping(&self, region: &RegionId) -> CollaboratorResult<()> {
        self.call_empty(Method::GET, &format!("/v1/regions/{}/ping", region), None)
            .await
    }
}

#[async_trait]
impl ReplicationFeed for ControlPlaneClient {
    #[instrument(skip_all, fields(primary = %primary, replica = %replica))]
    async fn create_slot(
        &self,
        primary: &RegionId,
        replica: &RegionId,
        mode: ReplicationMode,
    ) -> CollaboratorResult<String> {
        let response: SlotResponse = self
            .call(
                Method::POST,
                "/v1/replication/slots",
                Some(json!({ "primary": primary, "replica": replica, "mode": mode })),
            )
            .await?;
        Ok(response.slot)
    }

    async fn set_mode(&self, slot: &str, mode: ReplicationMode) -> CollaboratorResult<()> {
        self.call_empty(
            Method::PUT,
            &format!("/v1/replication/slots/{}/mode", slot),
            Some(json!({ "mode": mode })),
        )
        .await
    }

    async fn positions(&self, slot: &str) -> CollaboratorResult<FeedPositions> {
        self.call(
            Method::GET,
            &format!("/v1/replication/slots/{}/positions", slot),
            None,
        )
        .await
    }
}

#[async_trait]
impl BackupSource for ControlPlaneClient {
    #[instrument(skip(self, scope))]
    async fn export(
        &self,
        scope: &BackupScope,
        request: ExportRequest,
    ) -> CollaboratorResult<ExportedData> {
        let response: ExportResponse = self
            .call(
                Method::POST,
                "/v1/exports",
                Some(json!({ "scope": scope, "request": request })),
            )
            .await?;
        Ok(ExportedData {
            payload: decode_payload(&response.payload)?,
            row_count: response.row_count,
            latest_change_at: response.latest_change_at,
        })
    }
}

#[async_trait]
impl RecoveryEnvironment for ControlPlaneClient {
    #[instrument(skip_all, fields(environment = %environment, artifact_count = artifacts.len()))]
    async fn restore(
        &self,
        environment: &Environment,
        artifacts: Vec<RestoreArtifact>,
        until: Option<DateTime<Utc>>,
    ) -> CollaboratorResult<RestoredDataset> {
        let artifacts: Vec<RestoreArtifactBody> = artifacts
            .into_iter()
            .map(|a| RestoreArtifactBody {
                execution_id: a.execution_id,
                backup_type: a.backup_type,
                payload: hex::encode(a.payload),
            })
            .collect();
        let response: RestoreResponse = self
            .call(
                Method::POST,
                &format!("/v1/environments/{}/restore", environment),
                Some(json!({ "artifacts": artifacts, "until": until })),
            )
            .await?;
        Ok(RestoredDataset {
            applied_checksums: response.applied_checksums,
            row_count: response.row_count,
            latest_change_at: response.latest_change_at,
        })
    }

    async fn drill_topology(&self, environment: &Environment) -> CollaboratorResult<DrillTopology> {
        let response: TopologyResponse = self
            .call(
                Method::GET,
                &format!("/v1/environments/{}/drill-topology", environment),
                None,
            )
            .await?;
        Ok(DrillTopology {
            primary: response.primary,
            replica: response.replica,
            fallback: response.fallback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, "maintenance"),
            CollaboratorError::Unavailable(msg) if msg.contains("maintenance")
        ));
        assert!(matches!(
            classify_status(StatusCode::CONFLICT, "already primary"),
            CollaboratorError::Rejected(_)
        ));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = ControlPlaneClient::with_client(reqwest::Client::new(), "http://cp:9000/");
        assert_eq!(client.base_url(), "http://cp:9000");
    }

    #[test]
    fn test_environment_scoped_urls() {
        let client = ControlPlaneClient::with_client(reqwest::Client::new(), "http://cp:9000");
        assert_eq!(
            client.url("/v1/regions/us-east/promote"),
            "http://cp:9000/v1/regions/us-east/promote"
        );

        let staging = client.for_environment(&Environment::non_production("staging").unwrap());
        assert_eq!(staging.environment().map(Environment::as_str), Some("staging"));
        assert_eq!(
            staging.url("/v1/regions/us-east/promote"),
            "http://cp:9000/v1/environments/staging/regions/us-east/promote"
        );
        assert_eq!(
            staging.url("/v1/routing/target"),
            "http://cp:9000/v1/environments/staging/routing/target"
        );
        assert_eq!(client.environment(), None);
    }

    #[test]
    fn test_decode_payload_rejects_non_hex() {
        assert_eq!(decode_payload("00ff").unwrap(), vec![0x00, 0xff]);
        assert!(matches!(
            decode_payload("zz"),
            Err(CollaboratorError::Rejected(_))
        ));
    }
}
