//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/insight.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [tenant]
//! default_id = "tenant-123"        # falls back to $DEFAULT_TENANT_ID
//!
//! [sources.readwise]
//! secret_env = "READWISE_WEBHOOK_SECRET"
//!
//! [queue]
//! visibility_timeout_secs = 30
//! batch_size = 10
//!
//! [worker]
//! poll_interval_ms = 1000
//! record_timeout_secs = 30          # must not exceed visibility_timeout_secs
//!
//! [enrich]
//! provider = "disabled"            # disabled | static | http
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub tenant: TenantConfig,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub enrich: EnrichConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TenantConfig {
    /// Tenant every authorized webhook is attributed to.
    #[serde(default)]
    pub default_id: Option<String>,
}

/// Where a provider's shared webhook secret comes from.
///
/// At most one of the three fields may be set. With none set the secret is
/// read from `<SOURCE>_WEBHOOK_SECRET`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourceConfig {
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub secret_env: Option<String>,
    #[serde(default)]
    pub secret_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: default_visibility_timeout_secs(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_visibility_timeout_secs() -> u64 {
    30
}
fn default_batch_size() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_record_timeout_secs")]
    pub record_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            record_timeout_secs: default_record_timeout_secs(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_record_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Tags appended by the `static` provider.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            url: None,
            tags: Vec::new(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    10
}

impl EnrichConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Longest an `http` enrichment call can take: every attempt timing out
    /// plus the backoff between attempts.
    pub fn worst_case_secs(&self) -> u64 {
        let attempts = u64::from(self.max_retries) + 1;
        let backoff: u64 = (1..=self.max_retries)
            .map(|attempt| 1u64 << (attempt - 1).min(5))
            .sum();
        attempts * self.timeout_secs + backoff
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Reject configurations the server or worker cannot run with.
pub fn validate(config: &Config) -> Result<()> {
    if config.queue.batch_size == 0 {
        bail!("queue.batch_size must be >= 1");
    }
    if config.queue.visibility_timeout_secs == 0 {
        bail!("queue.visibility_timeout_secs must be > 0");
    }
    if config.worker.record_timeout_secs == 0 {
        bail!("worker.record_timeout_secs must be > 0");
    }
    if config.enrich.timeout_secs == 0 {
        bail!("enrich.timeout_secs must be > 0");
    }
    // The lease is renewed before each record; it must outlive the record's
    // deadline or another worker can lease the message mid-processing.
    if config.queue.visibility_timeout_secs < config.worker.record_timeout_secs {
        bail!(
            "queue.visibility_timeout_secs ({}) must be >= worker.record_timeout_secs ({})",
            config.queue.visibility_timeout_secs,
            config.worker.record_timeout_secs
        );
    }

    for (name, source) in &config.sources {
        let configured = [
            source.secret.is_some(),
            source.secret_env.is_some(),
            source.secret_file.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();
        if configured > 1 {
            bail!(
                "sources.{}: set at most one of secret, secret_env, secret_file",
                name
            );
        }
    }

    match config.enrich.provider.as_str() {
        "disabled" | "static" => {}
        "http" => {
            if config.enrich.url.as_deref().map_or(true, |u| u.trim().is_empty()) {
                bail!("enrich.url must be specified when provider is 'http'");
            }
        }
        other => bail!(
            "Unknown enrich provider: '{}'. Must be disabled, static, or http.",
            other
        ),
    }

    Ok(())
}
