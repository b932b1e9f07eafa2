use anyhow::{anyhow, bail, Context, Result};
use eventseed_config::ClickHouseConfig;
use reqwest::{
    header::{CONTENT_LENGTH, CONTENT_TYPE},
    Client, Url,
};
use serde_json::Value;
use std::time::Duration;

const ANALYTICS_SCHEMA: &str = include_str!("../sql/analytics.sql");

#[derive(Clone)]
pub struct ClickHouseClient {
    cfg: ClickHouseConfig,
    http: Client,
}

impl ClickHouseClient {
    pub fn new(cfg: ClickHouseConfig) -> Result<Self> {
        let timeout = Duration::try_from_secs_f64(cfg.timeout_seconds)
            .ok()
            .filter(|timeout| !timeout.is_zero())
            .ok_or_else(|| anyhow!("invalid ClickHouse timeout: {}s", cfg.timeout_seconds))?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to construct reqwest client")?;

        Ok(Self { cfg, http })
    }

    pub fn config(&self) -> &ClickHouseConfig {
        &self.cfg
    }

    fn base_url(&self) -> Result<Url> {
        Url::parse(&self.cfg.url).context("invalid ClickHouse URL")
    }

    pub async fn request_text(
        &self,
        query: &str,
        body: Option<Vec<u8>>,
        database: Option<&str>,
        async_insert: bool,
    ) -> Result<String> {
        let mut url = self.base_url()?;
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("query", query);
            if let Some(database) = database {
                qp.append_pair("database", database);
            }
            if async_insert && self.cfg.async_insert {
                qp.append_pair("async_insert", "1");
                if self.cfg.wait_for_async_insert {
                    qp.append_pair("wait_for_async_insert", "1");
                }
            }
        }

        // ClickHouse HTTP treats GET as readonly, so use POST for both reads and writes.
        let payload = body.unwrap_or_default();
        let payload_len = payload.len();

        let mut req = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            // Some ClickHouse builds require an explicit Content-Length on POST.
            .header(CONTENT_LENGTH, payload_len)
            .body(payload);

        if !self.cfg.username.is_empty() {
            req = req.basic_auth(self.cfg.username.clone(), Some(self.cfg.password.clone()));
        }

        let response = req.send().await.context("clickhouse request failed")?;
        let status = response.status();
        let text = response.text().await.with_context(|| {
            format!(
                "failed to read clickhouse response body (status {})",
                status
            )
        })?;

        if !status.is_success() {
            return Err(anyhow!("clickhouse returned {}: {}", status, text));
        }

        Ok(text)
    }

    pub async fn ping(&self) -> Result<()> {
        let response = self
            .request_text("SELECT 1", None, Some("system"), false)
            .await?;
        if response.trim() == "1" {
            Ok(())
        } else {
            Err(anyhow!("unexpected ping response: {}", response.trim()))
        }
    }

    /// Writes `rows` into the configured analytics table as one JSONEachRow request.
    pub async fn insert_json_rows(&self, rows: &[Value]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut payload = Vec::<u8>::new();
        for row in rows {
            let line = serde_json::to_vec(row).context("failed to encode JSON row")?;
            payload.extend_from_slice(&line);
            payload.push(b'\n');
        }

        let query = format!(
            "INSERT INTO {}.{} FORMAT JSONEachRow",
            escape_identifier(&self.cfg.database),
            escape_identifier(&self.cfg.table)
        );
        self.request_text(&query, Some(payload), None, true).await?;
        Ok(())
    }

    /// Creates the database and the date-partitioned analytics table if missing.
    pub async fn ensure_schema(&self) -> Result<usize> {
        let sql = materialize_schema_sql(ANALYTICS_SCHEMA, &self.cfg.database, &self.cfg.table)?;
        let statements = split_sql_statements(&sql);
        for statement in &statements {
            self.request_text(statement, None, None, false)
                .await
                .with_context(|| {
                    format!(
                        "failed schema statement: {}",
                        truncate_for_error(statement)
                    )
                })?;
        }
        Ok(statements.len())
    }
}

/// Returns the bundled schema with the configured database and table names filled in.
pub fn schema_sql(cfg: &ClickHouseConfig) -> Result<String> {
    materialize_schema_sql(ANALYTICS_SCHEMA, &cfg.database, &cfg.table)
}

fn truncate_for_error(statement: &str) -> String {
    const LIMIT: usize = 240;
    let compact = statement.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.len() <= LIMIT {
        compact
    } else {
        format!("{}...", &compact[..LIMIT])
    }
}

fn validate_identifier(identifier: &str) -> Result<()> {
    if identifier.is_empty() {
        bail!("identifier must not be empty");
    }

    let ok = identifier
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !ok {
        bail!("identifier contains unsupported characters: {identifier}");
    }

    Ok(())
}

fn materialize_schema_sql(sql: &str, database: &str, table: &str) -> Result<String> {
    validate_identifier(database)?;
    validate_identifier(table)?;

    Ok(sql
        .replace("{database}", &escape_identifier(database))
        .replace("{table}", &escape_identifier(table)))
}

fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_single_quote = false;
    let mut prev = '\0';

    for line in sql.lines() {
        if line.trim_start().starts_with("--") {
            continue;
        }

        let chars: Vec<char> = line.chars().collect();
        let mut idx = 0;
        while idx < chars.len() {
            let ch = chars[idx];
            if ch == '\'' {
                if in_single_quote && idx + 1 < chars.len() && chars[idx + 1] == '\'' {
                    current.push(ch);
                    current.push(chars[idx + 1]);
                    prev = chars[idx + 1];
                    idx += 2;
                    continue;
                }
                if prev != '\\' {
                    in_single_quote = !in_single_quote;
                }
            }

            if ch == ';' && !in_single_quote {
                let statement = current.trim();
                if !statement.is_empty() {
                    statements.push(statement.to_string());
                }
                current.clear();
                prev = '\0';
                idx += 1;
                continue;
            }

            current.push(ch);
            prev = ch;
            idx += 1;
        }

        current.push('\n');
    }

    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }

    statements
}

fn escape_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Bytes,
        extract::{Query, State},
        http::{HeaderMap, StatusCode},
        routing::post,
        Router,
    };
    use eventseed_config::ClickHouseConfig;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorded {
        queries: Mutex<Vec<String>>,
        bodies: Mutex<Vec<String>>,
    }

    fn test_clickhouse_config(url: String) -> ClickHouseConfig {
        ClickHouseConfig {
            url,
            database: "eventseed".to_string(),
            table: "analytics".to_string(),
            username: "default".to_string(),
            password: String::new(),
            timeout_seconds: 5.0,
            async_insert: true,
            wait_for_async_insert: true,
        }
    }

    async fn spawn_mock_server() -> (String, Arc<Recorded>) {
        async fn handler(
            State(recorded): State<Arc<Recorded>>,
            Query(params): Query<HashMap<String, String>>,
            headers: HeaderMap,
            body: Bytes,
        ) -> (StatusCode, String) {
            if headers.get("content-length").is_none() {
                return (
                    StatusCode::LENGTH_REQUIRED,
                    "missing content-length".to_string(),
                );
            }

            let query = params.get("query").cloned().unwrap_or_default();
            recorded.queries.lock().expect("query lock").push(query.clone());
            recorded
                .bodies
                .lock()
                .expect("body lock")
                .push(String::from_utf8_lossy(&body).to_string());

            if query.contains("FAIL") {
                return (StatusCode::INTERNAL_SERVER_ERROR, "boom".to_string());
            }

            (StatusCode::OK, "1\n".to_string())
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

    fn spawn_truncated_body_server() -> String {
        use std::io::{Read, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").expect("bind raw listener");
        let addr = listener.local_addr().expect("raw listener addr");

        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut request = [0_u8; 4096];
                let _ = stream.read(&mut request);

                let response = concat!(
                    "HTTP/1.1 200 OK\r\n",
                    "Content-Type: text/plain; charset=utf-8\r\n",
                    "Content-Length: 20\r\n",
                    "Connection: close\r\n",
                    "\r\n",
                    "short",
                );
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.flush();
            }
        });

        format!("http://{}", addr)
    }

    #[test]
    fn sql_split_handles_multiple_statements() {
        let sql = "CREATE TABLE a (x String);\nINSERT INTO a VALUES ('a;b');\n";
        let out = split_sql_statements(sql);
        assert_eq!(out.len(), 2);
        assert!(out[0].starts_with("CREATE TABLE"));
        assert!(out[1].contains("'a;b'"));
    }

    #[test]
    fn sql_split_skips_comment_lines() {
        let sql = "-- leading comment\nSELECT 1;\n-- trailing\n";
        assert_eq!(split_sql_statements(sql), vec!["SELECT 1".to_string()]);
    }

    #[test]
    fn bundled_schema_materializes_database_and_table() {
        let sql = materialize_schema_sql(ANALYTICS_SCHEMA, "demo_db", "events_flat")
            .expect("should materialize");
        assert!(sql.contains("CREATE DATABASE IF NOT EXISTS `demo_db`"));
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS `demo_db`.`events_flat`"));
        assert!(!sql.contains("{database}"));
        assert_eq!(split_sql_statements(&sql).len(), 2);
    }

    #[test]
    fn identifier_validation_rejects_invalid() {
        assert!(validate_identifier("eventseed_01").is_ok());
        assert!(validate_identifier("eventseed-db").is_err());
        assert!(materialize_schema_sql(ANALYTICS_SCHEMA, "ok", "bad table").is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn insert_json_rows_posts_one_json_each_row_request() {
        let (base_url, recorded) = spawn_mock_server().await;
        let client = ClickHouseClient::new(test_clickhouse_config(base_url)).expect("new client");

        client
            .insert_json_rows(&[json!({"event_type": "pageView"}), json!({"event_type": "click"})])
            .await
            .expect("insert");

        let queries = recorded.queries.lock().expect("query lock").clone();
        assert_eq!(
            queries,
            vec!["INSERT INTO `eventseed`.`analytics` FORMAT JSONEachRow".to_string()]
        );
        let bodies = recorded.bodies.lock().expect("body lock").clone();
        assert_eq!(
            bodies[0],
            "{\"event_type\":\"pageView\"}\n{\"event_type\":\"click\"}\n"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn insert_json_rows_skips_empty_batches() {
        let (base_url, recorded) = spawn_mock_server().await;
        let client = ClickHouseClient::new(test_clickhouse_config(base_url)).expect("new client");

        client.insert_json_rows(&[]).await.expect("noop insert");
        assert!(recorded.queries.lock().expect("query lock").is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ensure_schema_runs_every_bundled_statement() {
        let (base_url, recorded) = spawn_mock_server().await;
        let client = ClickHouseClient::new(test_clickhouse_config(base_url)).expect("new client");

        let executed = client.ensure_schema().await.expect("schema");
        assert_eq!(executed, 2);

        let queries = recorded.queries.lock().expect("query lock").clone();
        assert!(queries[0].starts_with("CREATE DATABASE IF NOT EXISTS `eventseed`"));
        assert!(queries[1].contains("PARTITION BY toYYYYMMDD"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ping_accepts_one() {
        let (base_url, _) = spawn_mock_server().await;
        let client = ClickHouseClient::new(test_clickhouse_config(base_url)).expect("new client");
        client.ping().await.expect("ping");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn request_text_includes_status_and_body_on_http_failure() {
        let (base_url, _) = spawn_mock_server().await;
        let client = ClickHouseClient::new(test_clickhouse_config(base_url)).expect("new client");

        let err = client
            .request_text("SELECT FAIL", None, None, false)
            .await
            .expect_err("expected HTTP failure");

        let msg = err.to_string();
        assert!(msg.contains("clickhouse returned"));
        assert!(msg.contains("500"));
        assert!(msg.contains("boom"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn request_text_propagates_response_body_read_errors() {
        let base_url = spawn_truncated_body_server();
        let client = ClickHouseClient::new(test_clickhouse_config(base_url)).expect("new client");

        let err = client
            .request_text("SELECT 1", None, None, false)
            .await
            .expect_err("expected response body read failure");

        let msg = err.to_string();
        assert!(msg.contains("failed to read clickhouse response body"));
    }
}
