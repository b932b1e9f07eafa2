use anyhow::{anyhow, Context, Result};
use eventseed_config::ElasticConfig;
use reqwest::{
    header::{CONTENT_LENGTH, CONTENT_TYPE},
    Client, Method, StatusCode, Url,
};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const MAPPING: &str = include_str!("../mappings/mapping.json");
const MAPPING_6: &str = include_str!("../mappings/mapping-6.json");

#[derive(Clone)]
pub struct ElasticClient {
    cfg: ElasticConfig,
    http: Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexCreation {
    Created,
    AlreadyExists,
}

#[derive(Deserialize)]
struct RootInfo {
    version: VersionInfo,
}

#[derive(Deserialize)]
struct VersionInfo {
    number: String,
}

impl ElasticClient {
    pub fn new(cfg: ElasticConfig) -> Result<Self> {
        let timeout = Duration::try_from_secs_f64(cfg.timeout_seconds)
            .ok()
            .filter(|timeout| !timeout.is_zero())
            .ok_or_else(|| anyhow!("invalid Elasticsearch timeout: {}s", cfg.timeout_seconds))?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to construct reqwest client")?;

        Ok(Self { cfg, http })
    }

    pub fn config(&self) -> &ElasticConfig {
        &self.cfg
    }

    fn url_for(&self, path: &str) -> Result<Url> {
        let base = self.cfg.url.trim_end_matches('/');
        Url::parse(&format!("{}/{}", base, path.trim_start_matches('/')))
            .context("invalid Elasticsearch URL")
    }

    /// Sends one request and returns the status with the full response body.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<(&'static str, Vec<u8>)>,
    ) -> Result<(StatusCode, String)> {
        let url = self.url_for(path)?;
        let mut req = self.http.request(method, url);

        if let Some((content_type, payload)) = body {
            req = req
                .header(CONTENT_TYPE, content_type)
                .header(CONTENT_LENGTH, payload.len())
                .body(payload);
        }

        if !self.cfg.username.is_empty() {
            req = req.basic_auth(self.cfg.username.clone(), Some(self.cfg.password.clone()));
        }

        let response = req.send().await.context("elasticsearch request failed")?;
        let status = response.status();
        let text = response.text().await.with_context(|| {
            format!(
                "failed to read elasticsearch response body (status {})",
                status
            )
        })?;

        Ok((status, text))
    }

    pub async fn major_version(&self) -> Result<u32> {
        let (status, text) = self.request(Method::GET, "/", None).await?;
        if !status.is_success() {
            return Err(anyhow!("elasticsearch returned {}: {}", status, text));
        }

        let info: RootInfo = serde_json::from_str(&text)
            .with_context(|| format!("invalid elasticsearch info response: {}", text))?;
        parse_major_version(&info.version.number)
    }

    pub async fn create_index(&self, name: &str, mapping: &str) -> Result<IndexCreation> {
        let (status, text) = self
            .request(
                Method::PUT,
                name,
                Some(("application/json", mapping.as_bytes().to_vec())),
            )
            .await?;

        if status.is_success() {
            return Ok(IndexCreation::Created);
        }

        if is_already_exists(status, &text) {
            return Ok(IndexCreation::AlreadyExists);
        }

        Err(anyhow!(
            "elasticsearch returned {} creating index {}: {}",
            status,
            name,
            text
        ))
    }

    /// Posts an NDJSON bulk body. Item-level failures reported with `"errors":true`
    /// are surfaced as errors carrying the response text.
    pub async fn bulk(&self, body: String) -> Result<String> {
        let (status, text) = self
            .request(
                Method::POST,
                "_bulk",
                Some(("application/x-ndjson", body.into_bytes())),
            )
            .await?;

        if !status.is_success() {
            return Err(anyhow!("elasticsearch returned {}: {}", status, text));
        }

        if bulk_reported_errors(&text) {
            return Err(anyhow!("elasticsearch bulk request had item errors: {}", text));
        }

        Ok(text)
    }
}

/// Picks the configured mapping file if set, otherwise the bundled mapping for the
/// server's major version.
pub fn load_mapping(path: Option<&str>, major_version: u32) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read index mapping {}", path)),
        None => Ok(bundled_mapping(major_version).to_string()),
    }
}

pub fn bundled_mapping(major_version: u32) -> &'static str {
    if major_version >= 7 {
        MAPPING
    } else {
        MAPPING_6
    }
}

fn parse_major_version(number: &str) -> Result<u32> {
    number
        .split('.')
        .next()
        .and_then(|major| major.trim().parse::<u32>().ok())
        .ok_or_else(|| anyhow!("unparseable elasticsearch version: {}", number))
}

fn is_already_exists(status: StatusCode, text: &str) -> bool {
    (status == StatusCode::BAD_REQUEST || status == StatusCode::CONFLICT)
        && text.contains("resource_already_exists_exception")
}

fn bulk_reported_errors(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|value| value.get("errors").and_then(Value::as_bool))
        .unwrap_or(false)
}
