use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DESTINATION_ELASTICSEARCH: &str = "elasticsearch";
pub const DESTINATION_CLICKHOUSE: &str = "clickhouse";

/// Longest replay window accepted anywhere an import is configured.
pub const MAX_TIME_RANGE_DAYS: u32 = 366;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    #[serde(default = "default_source_path")]
    pub path: String,
    #[serde(default = "default_placeholder_origin")]
    pub placeholder_origin: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_tenant_id")]
    pub blog_id: String,
    #[serde(default = "default_tenant_id")]
    pub network_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportConfig {
    #[serde(default = "default_time_range_days")]
    pub time_range_days: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_sleep_seconds")]
    pub sleep_seconds: f64,
    #[serde(default = "default_destination")]
    pub destination: String,
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DemoConfig {
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElasticConfig {
    #[serde(default = "default_es_url")]
    pub url: String,
    #[serde(default = "default_index_prefix")]
    pub index_prefix: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_es_timeout_seconds")]
    pub timeout_seconds: f64,
    #[serde(default)]
    pub mapping_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClickHouseConfig {
    #[serde(default = "default_ch_url")]
    pub url: String,
    #[serde(default = "default_ch_database")]
    pub database: String,
    #[serde(default = "default_ch_table")]
    pub table: String,
    #[serde(default = "default_ch_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    #[serde(default = "default_true")]
    pub async_insert: bool,
    #[serde(default = "default_true")]
    pub wait_for_async_insert: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub demo: DemoConfig,
    #[serde(default)]
    pub elasticsearch: ElasticConfig,
    #[serde(default)]
    pub clickhouse: ClickHouseConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: default_source_path(),
            placeholder_origin: default_placeholder_origin(),
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            blog_id: default_tenant_id(),
            network_id: default_tenant_id(),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            time_range_days: default_time_range_days(),
            batch_size: default_batch_size(),
            sleep_seconds: default_sleep_seconds(),
            destination: default_destination(),
            rng_seed: None,
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            catalog_path: default_catalog_path(),
        }
    }
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            url: default_es_url(),
            index_prefix: default_index_prefix(),
            username: String::new(),
            password: String::new(),
            timeout_seconds: default_es_timeout_seconds(),
            mapping_path: None,
        }
    }
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: default_ch_url(),
            database: default_ch_database(),
            table: default_ch_table(),
            username: default_ch_username(),
            password: String::new(),
            timeout_seconds: default_timeout_seconds(),
            async_insert: true,
            wait_for_async_insert: true,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            site: SiteConfig::default(),
            import: ImportConfig::default(),
            demo: DemoConfig::default(),
            elasticsearch: ElasticConfig::default(),
            clickhouse: ClickHouseConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

fn default_source_path() -> String {
    "data/events.log".to_string()
}

fn default_placeholder_origin() -> String {
    "https://altis-dev.altis.dev".to_string()
}

fn default_base_url() -> String {
    "http://localhost".to_string()
}

fn default_tenant_id() -> String {
    "1".to_string()
}

fn default_time_range_days() -> u32 {
    7
}

fn default_batch_size() -> usize {
    400
}

fn default_sleep_seconds() -> f64 {
    5.0
}

fn default_destination() -> String {
    DESTINATION_ELASTICSEARCH.to_string()
}

fn default_catalog_path() -> String {
    "~/.eventseed/demo-catalog.json".to_string()
}

fn default_es_url() -> String {
    "http://127.0.0.1:9200".to_string()
}

fn default_index_prefix() -> String {
    "analytics".to_string()
}

fn default_es_timeout_seconds() -> f64 {
    60.0
}

fn default_ch_url() -> String {
    "http://127.0.0.1:8123".to_string()
}

fn default_ch_database() -> String {
    "eventseed".to_string()
}

fn default_ch_table() -> String {
    "analytics".to_string()
}

fn default_ch_username() -> String {
    "default".to_string()
}

fn default_timeout_seconds() -> f64 {
    30.0
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8090
}

fn default_true() -> bool {
    true
}

pub fn expand_path(path: &str) -> String {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{}", home.to_string_lossy(), stripped);
        }
    }
    path.to_string()
}

fn home_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".eventseed").join("config.toml"))
}

fn repo_default_config_path() -> PathBuf {
    PathBuf::from("config/eventseed.toml")
}

fn resolve_config_path_with_overrides(
    raw_path: Option<PathBuf>,
    env_keys: &[&str],
    home_path: Option<PathBuf>,
    repo_default: PathBuf,
) -> PathBuf {
    if let Some(path) = raw_path {
        return path;
    }

    for key in env_keys {
        if let Ok(value) = std::env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return PathBuf::from(trimmed);
            }
        }
    }

    if let Some(path) = home_path {
        if path.exists() {
            return path;
        }
    }

    repo_default
}

pub fn resolve_config_path(raw_path: Option<PathBuf>) -> PathBuf {
    resolve_config_path_with_overrides(
        raw_path,
        &["EVENTSEED_CONFIG"],
        home_config_path(),
        repo_default_config_path(),
    )
}

fn normalize_config(mut cfg: AppConfig) -> AppConfig {
    cfg.source.path = expand_path(&cfg.source.path);
    cfg.demo.catalog_path = expand_path(&cfg.demo.catalog_path);
    cfg.elasticsearch.mapping_path = cfg
        .elasticsearch
        .mapping_path
        .as_deref()
        .map(expand_path);
    cfg.site.base_url = cfg.site.base_url.trim_end_matches('/').to_string();
    cfg.elasticsearch.url = cfg.elasticsearch.url.trim_end_matches('/').to_string();
    cfg
}

fn validate_config(cfg: &AppConfig) -> Result<()> {
    if cfg.import.time_range_days == 0 || cfg.import.time_range_days > MAX_TIME_RANGE_DAYS {
        bail!("import.time_range_days must be between 1 and {MAX_TIME_RANGE_DAYS}");
    }
    if cfg.import.batch_size == 0 {
        bail!("import.batch_size must be at least 1");
    }
    if !cfg.import.sleep_seconds.is_finite() || cfg.import.sleep_seconds < 0.0 {
        bail!("import.sleep_seconds must be a non-negative number");
    }
    for (name, timeout) in [
        ("elasticsearch", cfg.elasticsearch.timeout_seconds),
        ("clickhouse", cfg.clickhouse.timeout_seconds),
    ] {
        if !timeout.is_finite() || timeout <= 0.0 {
            bail!("{name}.timeout_seconds must be a positive number of seconds");
        }
    }
    Ok(())
}

pub fn parse_config(content: &str) -> Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(content).context("failed to parse TOML config")?;
    validate_config(&cfg)?;
    Ok(normalize_config(cfg))
}

/// Loads the config at `path`, falling back to defaults when the file does not exist.
pub fn load_config_or_default(path: impl AsRef<Path>) -> Result<AppConfig> {
    if path.as_ref().exists() {
        load_config(path)
    } else {
        Ok(normalize_config(AppConfig::default()))
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read config {}", path.as_ref().display()))?;
    parse_config(&content)
}
