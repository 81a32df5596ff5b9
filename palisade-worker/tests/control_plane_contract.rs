//! Contract tests for the control-plane HTTP adapters
//!
//! Each test pins the request an adapter sends and how it reads the reply,
//! including the error classification the runtime's retry rules rely on.

use chrono::{TimeZone, Utc};
use palisade_core::{BackupScope, BackupType, Environment, RegionId, ReplicationMode};
use palisade_runtime::collaborators::{
    AlertSeverity, BackupSource, CollaboratorError, ConnectionRouter, ExportRequest,
    MetricsSource, Notifier, RecoveryEnvironment, RegionControl, ReplicationFeed,
    RestoreArtifact,
};
use palisade_worker::control_plane::ControlPlaneClient;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn region(name: &str) -> RegionId {
    RegionId::new(name).unwrap()
}

fn client(server: &MockServer) -> ControlPlaneClient {
    ControlPlaneClient::new(server.uri(), Duration::from_secs(5)).unwrap()
}

mod routing_contract {
    use super::*;

    #[tokio::test]
    async fn update_target_puts_region() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/routing/target"))
            .and(body_json(json!({ "region": "eu-west" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .update_target(&region("eu-west"))
            .await
            .unwrap();
    }
}

mod region_contract {
    use super::*;

    #[tokio::test]
    async fn metrics_sample_is_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/regions/us-east/metrics"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "active_connections": 42,
                "saturation": { "disk": 50.0, "cpu": 91.5, "memory": 10.0 }
            })))
            .mount(&server)
            .await;

        let metrics = client(&server).sample(&region("us-east")).await.unwrap();
        assert_eq!(metrics.active_connections, 42);
        assert_eq!(metrics.saturation.cpu, 91.5);
    }

    #[tokio::test]
    async fn in_flight_and_terminate_return_counts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/regions/us-east/writes/in-flight"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "count": 3 })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/regions/us-east/connections/terminate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "count": 7 })))
            .mount(&server)
            .await;

        let client = client(&server);
        assert_eq!(client.in_flight_writes(&region("us-east")).await.unwrap(), 3);
        assert_eq!(
            client.terminate_connections(&region("us-east")).await.unwrap(),
            7
        );
    }

    #[tokio::test]
    async fn write_path_and_promotion_calls() {
        let server = MockServer::start().await;
        for endpoint in [
            "/v1/regions/us-east/writes/stop",
            "/v1/regions/us-east/writes/resume",
            "/v1/regions/eu-west/promote",
        ] {
            Mock::given(method("POST"))
                .and(path(endpoint))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/v1/regions/eu-west/ping"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        client.stop_writes(&region("us-east")).await.unwrap();
        client.resume_writes(&region("us-east")).await.unwrap();
        client.promote(&region("eu-west")).await.unwrap();
        client.ping(&region("eu-west")).await.unwrap();
    }
}

mod error_contract {
    use super::*;

    async fn promote_with_status(status: u16) -> CollaboratorError {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/regions/eu-west/promote"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;
        client(&server)
            .promote(&region("eu-west"))
            .await
            .unwrap_err()
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        assert!(promote_with_status(500).await.is_transient());
        assert!(promote_with_status(502).await.is_transient());
    }

    #[tokio::test]
    async fn service_unavailable_is_unavailable() {
        assert!(matches!(
            promote_with_status(503).await,
            CollaboratorError::Unavailable(_)
        ));
    }

    #[tokio::test]
    async fn client_errors_are_rejected() {
        let err = promote_with_status(409).await;
        assert!(matches!(&err, CollaboratorError::Rejected(msg) if msg.contains("nope")));
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/regions/us-east/writes/in-flight"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client(&server)
            .in_flight_writes(&region("us-east"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Rejected(_)));
    }

    #[tokio::test]
    async fn refused_connection_is_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            ControlPlaneClient::new(format!("http://{}", addr), Duration::from_secs(2)).unwrap();
        let err = client.ping(&region("us-east")).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Unavailable(_)), "{err:?}");
    }

    #[tokio::test]
    async fn slow_response_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/regions/us-east/ping"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let client = ControlPlaneClient::new(server.uri(), Duration::from_millis(100)).unwrap();
        let err = client.ping(&region("us-east")).await.unwrap_err();
        assert!(err.is_transient(), "{err:?}");
    }
}

mod replication_contract {
    use super::*;

    #[tokio::test]
    async fn create_slot_and_read_positions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/replication/slots"))
            .and(body_json(json!({
                "primary": "us-east",
                "replica": "eu-west",
                "mode": "async"
            })))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({ "slot": "us_east_eu_west" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/replication/slots/us_east_eu_west/positions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "primary_committed_at": "2026-01-01T00:00:10Z",
                "replica_applied_at": "2026-01-01T00:00:07Z"
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let slot = client
            .create_slot(
                &region("us-east"),
                &region("eu-west"),
                ReplicationMode::Async,
            )
            .await
            .unwrap();
        assert_eq!(slot, "us_east_eu_west");

        let positions = client.positions(&slot).await.unwrap();
        assert_eq!(
            positions.primary_committed_at - positions.replica_applied_at,
            chrono::Duration::seconds(3)
        );
    }

    #[tokio::test]
    async fn set_mode_puts_mode() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/replication/slots/s1/mode"))
            .and(body_json(json!({ "mode": "sync" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .set_mode("s1", ReplicationMode::Sync)
            .await
            .unwrap();
    }
}

mod backup_contract {
    use super::*;

    #[tokio::test]
    async fn export_decodes_hex_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/exports"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "payload": hex::encode(b"rows"),
                "row_count": 4,
                "latest_change_at": "2026-03-01T12:00:00Z"
            })))
            .mount(&server)
            .await;

        let exported = client(&server)
            .export(&BackupScope::default(), ExportRequest::Full)
            .await
            .unwrap();
        assert_eq!(exported.payload, b"rows");
        assert_eq!(exported.row_count, 4);
        assert_eq!(
            exported.latest_change_at,
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn restore_sends_hex_artifacts() {
        let server = MockServer::start().await;
        let execution_id = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/v1/environments/staging/restore"))
            .and(body_json(json!({
                "artifacts": [{
                    "execution_id": execution_id,
                    "backup_type": "full",
                    "payload": hex::encode(b"base"),
                }],
                "until": null
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "applied_checksums": ["abc"],
                "row_count": 10,
                "latest_change_at": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let restored = client(&server)
            .restore(
                &Environment::non_production("staging").unwrap(),
                vec![RestoreArtifact {
                    execution_id,
                    backup_type: BackupType::Full,
                    payload: b"base".to_vec(),
                }],
                None,
            )
            .await
            .unwrap();
        assert_eq!(restored.applied_checksums, vec!["abc".to_string()]);
        assert_eq!(restored.row_count, 10);
        assert_eq!(restored.latest_change_at, None);
    }

    #[tokio::test]
    async fn notify_posts_severity_and_context() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/notifications"))
            .and(body_json(json!({
                "severity": "critical",
                "message": "region down",
                "context": { "region": "us-east" }
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .notify(
                AlertSeverity::Critical,
                "region down",
                json!({ "region": "us-east" }),
            )
            .await
            .unwrap();
    }
}

mod drill_contract {
    use super::*;

    fn staging() -> Environment {
        Environment::non_production("staging").unwrap()
    }

    #[tokio::test]
    async fn topology_includes_the_optional_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/environments/staging/drill-topology"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "primary": "stg-east",
                "replica": "stg-west",
                "fallback": "stg-central"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/environments/qa/drill-topology"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "primary": "qa-east",
                "replica": "qa-west"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let topology = client(&server).drill_topology(&staging()).await.unwrap();
        assert_eq!(topology.primary, region("stg-east"));
        assert_eq!(topology.replica, region("stg-west"));
        assert_eq!(topology.fallback, Some(region("stg-central")));

        let qa = Environment::non_production("qa").unwrap();
        let topology = client(&server).drill_topology(&qa).await.unwrap();
        assert_eq!(topology.fallback, None);
    }

    #[tokio::test]
    async fn scoped_client_calls_environment_paths() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/environments/staging/regions/stg-west/promote"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/environments/staging/routing/target"))
            .and(body_json(json!({ "region": "stg-west" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/regions/stg-west/promote"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/routing/target"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let scoped = client(&server).for_environment(&staging());
        scoped.promote(&region("stg-west")).await.unwrap();
        scoped.update_target(&region("stg-west")).await.unwrap();
    }
}
