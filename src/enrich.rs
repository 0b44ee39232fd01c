//! Enricher construction and the HTTP enrichment client.
//!
//! # Providers
//!
//! | `[enrich].provider` | Enricher |
//! |---------------------|----------|
//! | `disabled` | none; insights are stored as received |
//! | `static` | [`StaticTagEnricher`] with `[enrich].tags` |
//! | `http` | [`HttpEnricher`] posting to `[enrich].url` |
//!
//! # Retry
//!
//! The HTTP client retries transient failures with exponential backoff:
//! - HTTP 429 and 5xx → retry
//! - other 4xx → fail immediately
//! - network errors → retry

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use insight_core::enrich::{Enricher, StaticTagEnricher};
use insight_core::models::Insight;

use crate::config::EnrichConfig;

/// Build the configured enricher, or `None` when enrichment is disabled.
pub fn create_enricher(config: &EnrichConfig) -> Result<Option<Arc<dyn Enricher>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "static" => Ok(Some(Arc::new(StaticTagEnricher::new(config.tags.clone())))),
        "http" => Ok(Some(Arc::new(HttpEnricher::new(config)?))),
        other => bail!("Unknown enrich provider: {}", other),
    }
}

/// Fields an enrichment service may return. Absent fields are left as-is.
#[derive(Debug, Deserialize)]
struct EnrichResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    note: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

pub struct HttpEnricher {
    client: reqwest::Client,
    url: String,
    max_retries: u32,
}

impl HttpEnricher {
    pub fn new(config: &EnrichConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow!("enrich.url required"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url,
            max_retries: config.max_retries,
        })
    }

    async fn call(&self, insight: &Insight) -> Result<EnrichResponse> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            match self.client.post(&self.url).json(insight).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        warn!(%status, attempt, "enrich request failed, retrying");
                        last_err = Some(anyhow!("enrich API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("enrich API error {}: {}", status, body_text);
                }
                Err(e) => {
                    warn!(error = %e, attempt, "enrich request failed, retrying");
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("enrichment failed after retries")))
    }
}

#[async_trait]
impl Enricher for HttpEnricher {
    async fn enrich(&self, insight: &Insight) -> Result<Insight> {
        let response = self.call(insight).await?;
        Ok(merge(insight, response))
    }
}

fn merge(insight: &Insight, response: EnrichResponse) -> Insight {
    let mut out = insight.clone();
    if let Some(text) = response.text.filter(|t| !t.trim().is_empty()) {
        out.text = text.trim().to_string();
    }
    if let Some(note) = response.note {
        let note = note.trim();
        out.note = (!note.is_empty()).then(|| note.to_string());
    }
    if let Some(tags) = response.tags {
        out.tags = tags;
    }
    out
}
