use crate::batch::Batch;
use crate::destination::Destination;
use crate::error::DeliveryError;
use crate::transcode::transcode_line;
use crate::window::TimeWindow;
use async_trait::async_trait;
use eventseed_clickhouse::ClickHouseClient;
use eventseed_config::DESTINATION_CLICKHOUSE;
use serde_json::Value;
use tracing::{info, warn};

/// Writes batches as flat rows into a ClickHouse table.
pub struct ColumnarRowSink {
    client: ClickHouseClient,
}

impl ColumnarRowSink {
    pub fn new(client: ClickHouseClient) -> Self {
        Self { client }
    }

    fn rows(&self, batch: &Batch) -> Vec<Value> {
        let mut rows = Vec::with_capacity(batch.len());
        for record in &batch.records {
            match transcode_line(&record.line) {
                Ok(row) => rows.push(row),
                Err(exc) => warn!("skipping record that cannot be transcoded: {}", exc),
            }
        }
        rows
    }
}

#[async_trait]
impl Destination for ColumnarRowSink {
    fn id(&self) -> &str {
        DESTINATION_CLICKHOUSE
    }

    async fn prepare(&self, _window: &TimeWindow) -> Result<(), DeliveryError> {
        self.client
            .ping()
            .await
            .map_err(|exc| DeliveryError::new(self.id(), format!("{exc:#}")))?;
        let statements = self
            .client
            .ensure_schema()
            .await
            .map_err(|exc| DeliveryError::new(self.id(), format!("{exc:#}")))?;
        info!(
            "clickhouse schema ready for {}.{} ({} statements)",
            self.client.config().database,
            self.client.config().table,
            statements
        );
        Ok(())
    }

    async fn send(&self, batch: &Batch) -> Result<(), DeliveryError> {
        let rows = self.rows(batch);
        self.client
            .insert_json_rows(&rows)
            .await
            .map_err(|exc| DeliveryError::new(self.id(), format!("{exc:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchRecord;
    use axum::{
        body::Bytes,
        extract::{Query, State},
        http::StatusCode,
        routing::post,
        Router,
    };
    use eventseed_config::ClickHouseConfig;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorded {
        queries: Mutex<Vec<String>>,
        bodies: Mutex<Vec<String>>,
    }

    fn clickhouse_config(url: String) -> ClickHouseConfig {
        ClickHouseConfig {
            url,
            database: "eventseed".to_string(),
            table: "analytics".to_string(),
            username: "default".to_string(),
            password: String::new(),
            timeout_seconds: 5.0,
            async_insert: false,
            wait_for_async_insert: false,
        }
    }

    async fn spawn_mock_server() -> (String, Arc<Recorded>) {
        async fn handler(
            State(recorded): State<Arc<Recorded>>,
            Query(params): Query<HashMap<String, String>>,
            body: Bytes,
        ) -> (StatusCode, String) {
            let query = params.get("query").cloned().unwrap_or_default();
            recorded.queries.lock().expect("query lock").push(query.clone());
            if query == "SELECT 1" {
                let reply = if params.get("database").map(String::as_str) == Some("system") {
                    "1\n"
                } else {
                    "0\n"
                };
                return (StatusCode::OK, reply.to_string());
            }
            let body = String::from_utf8_lossy(&body).to_string();
            let rejected = body.contains("\"event_type\":\"rejected\"");
            recorded.bodies.lock().expect("body lock").push(body);

            if rejected {
                return (
                    StatusCode::BAD_REQUEST,
                    "Code: 27. DB::Exception: Cannot parse input".to_string(),
                );
            }
            (StatusCode::OK, String::new())
        }

        let recorded = Arc::new(Recorded::default());
        let app = Router::new()
            .route("/", post(handler))
            .with_state(recorded.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");

        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        (format!("http://{}", addr), recorded)
    }

    fn sink(url: String) -> ColumnarRowSink {
        ColumnarRowSink::new(ClickHouseClient::new(clickhouse_config(url)).expect("client"))
    }

    fn record(line: &str) -> BatchRecord {
        BatchRecord {
            line: line.to_string(),
            timestamp_ms: 0,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn prepare_pings_then_runs_bundled_schema() {
        let (url, recorded) = spawn_mock_server().await;
        sink(url)
            .prepare(&TimeWindow::new(0, 7))
            .await
            .expect("prepare");

        let queries = recorded.queries.lock().expect("query lock").clone();
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0], "SELECT 1");
        assert!(queries[1].starts_with("CREATE DATABASE IF NOT EXISTS `eventseed`"));
        assert!(queries[2].contains("CREATE TABLE IF NOT EXISTS `eventseed`.`analytics`"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_server_fails_prepare_before_schema() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        drop(listener);

        let err = sink(format!("http://{addr}"))
            .prepare(&TimeWindow::new(0, 7))
            .await
            .expect_err("nothing is listening");
        assert_eq!(err.destination, "clickhouse");
        assert!(err.message.contains("clickhouse request failed"), "{}", err.message);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn send_inserts_rows_and_skips_unparseable_lines() {
        let (url, recorded) = spawn_mock_server().await;
        let batch = Batch {
            records: vec![
                record(r#"{"event_type":"pageView","event_timestamp":5,"attributes":{"session":"a"}}"#),
                record("{not json"),
                record(r#"{"event_type":"_session.start","event_timestamp":6}"#),
            ],
        };
        sink(url).send(&batch).await.expect("send");

        let queries = recorded.queries.lock().expect("query lock").clone();
        assert_eq!(
            queries,
            vec!["INSERT INTO `eventseed`.`analytics` FORMAT JSONEachRow"]
        );

        let bodies = recorded.bodies.lock().expect("body lock").clone();
        let rows: Vec<Value> = bodies[0]
            .lines()
            .map(|line| serde_json::from_str(line).expect("json row"))
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["session_id"], "a");
        assert_eq!(rows[1]["event_type"], "_session.start");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_insert_surfaces_server_text() {
        let (url, _recorded) = spawn_mock_server().await;
        let batch = Batch {
            records: vec![record(r#"{"event_type":"rejected"}"#)],
        };
        let err = sink(url).send(&batch).await.expect_err("insert must fail");
        assert_eq!(err.destination, "clickhouse");
        assert!(err.message.contains("Cannot parse input"));
    }
}
