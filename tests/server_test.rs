//! Integration tests for the fleet telemetry HTTP server

#[cfg(feature = "server")]
mod server_tests {
    use fleet_telemetry::server::{run, ServerConfig};
    use fleet_telemetry::Engine;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    async fn start() -> (SocketAddr, tokio::sync::oneshot::Sender<()>, Arc<Engine>) {
        let engine = Arc::new(Engine::with_defaults().unwrap());
        let config = ServerConfig::new(0, engine.clone());

        let (addr, shutdown_tx) = run(config).await.expect("Failed to start server");

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;
        (addr, shutdown_tx, engine)
    }

    fn sample_events() -> serde_json::Value {
        serde_json::json!([
            {
                "entity_id": "R1",
                "feature_code": "operational_state",
                "raw_value": "true",
                "timestamp": "2024-05-01T08:00:10Z"
            },
            {
                "entity_id": "R1",
                "feature_code": "battery_level",
                "raw_value": "90",
                "timestamp": "2024-05-01T08:00:00Z"
            },
            {
                "entity_id": "R1",
                "feature_code": "operational_state",
                "raw_value": "false",
                "timestamp": "2024-05-01T08:00:25Z"
            },
            {
                "entity_id": "R1",
                "feature_code": "battery_temp",
                "raw_value": "24",
                "timestamp": "2024-05-01T08:00:25Z"
            },
            {
                "entity_id": "S1",
                "feature_code": "station_occupied",
                "raw_value": "true",
                "timestamp": "2024-05-01T08:00:05Z"
            },
            {
                "entity_id": "S1",
                "feature_code": "humidity",
                "raw_value": "55",
                "timestamp": "2024-05-01T08:00:05Z"
            }
        ])
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (addr, shutdown_tx, _engine) = start().await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .expect("Failed to send request");

        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());
        assert_eq!(body["events_retained"], 0);
        assert_eq!(body["events_evicted"], 0);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_ingest_then_query() {
        let (addr, shutdown_tx, engine) = start().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://{}/ingest", addr))
            .json(&sample_events())
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());
        let ingested: serde_json::Value = response.json().await.unwrap();
        assert_eq!(ingested["applied"], 5);
        assert_eq!(ingested["skipped"], 1);
        assert_eq!(engine.event_count(), 5);

        let snapshot: serde_json::Value = client
            .get(format!("http://{}/snapshot", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(
            snapshot["entities"]["R1"]["features"]["battery_level"]["value"],
            90.0
        );

        let summary: serde_json::Value = client
            .get(format!("http://{}/summary", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(summary["units"], 1);
        assert_eq!(summary["stations_occupied"], 1);

        let uptime: serde_json::Value = client
            .get(format!("http://{}/uptime", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(uptime[0]["entity_id"], "R1");
        assert_eq!(uptime[0]["total_operational_secs"], 15.0);

        let series: serde_json::Value = client
            .get(format!("http://{}/series/battery_level", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(series["feature"], "battery_level");
        assert_eq!(series["points"][0]["label"], "08:00");
        assert_eq!(series["points"][0]["mean_value"], 90.0);

        let temps: serde_json::Value = client
            .get(format!(
                "http://{}/temperatures?start=2024-05-01T08:00:00Z&end=2024-05-01T08:01:00Z",
                addr
            ))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(temps[0]["mean"], 24.0);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_series_rejects_unknown_and_boolean_features() {
        let (addr, shutdown_tx, _engine) = start().await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!("http://{}/series/humidity", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["code"], "UNKNOWN_FEATURE");

        let response = client
            .get(format!("http://{}/series/charge_state", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let _ = shutdown_tx.send(());
    }
}
