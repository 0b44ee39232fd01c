//! Tenant authorization for inbound webhooks.
//!
//! Every webhook names its provider (`source`) and presents a shared
//! secret. [`TenantAuthorizer::authorize`] checks the secret against the one
//! configured for that source and, on success, attributes the call to the
//! default tenant.
//!
//! Secrets are resolved lazily by [`SecretResolver`], once per source for
//! the life of the process. The first resolution wins, including a failed
//! one: a missing environment variable is not re-read on later calls, so a
//! misconfigured deployment fails the same way until it is restarted.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use insight_core::error::IngestError;

use crate::config::{Config, SourceConfig};

/// Why a configured secret could not be produced.
#[derive(Debug, Clone, Error)]
pub enum SecretError {
    #[error("environment variable {0} is not set")]
    EnvMissing(String),

    #[error("failed to read secret file {path}: {reason}")]
    File { path: String, reason: String },

    #[error("secret for source {0} is blank")]
    Blank(String),
}

#[derive(Debug, Clone)]
enum SecretSource {
    Literal(String),
    Env(String),
    File(PathBuf),
}

impl SecretSource {
    fn from_config(name: &str, cfg: &SourceConfig) -> Self {
        if let Some(secret) = &cfg.secret {
            SecretSource::Literal(secret.clone())
        } else if let Some(path) = &cfg.secret_file {
            SecretSource::File(path.clone())
        } else {
            let var = cfg
                .secret_env
                .clone()
                .unwrap_or_else(|| default_secret_env(name));
            SecretSource::Env(var)
        }
    }
}

/// `readwise` → `READWISE_WEBHOOK_SECRET`, `provider-x` → `PROVIDER_X_WEBHOOK_SECRET`.
pub fn default_secret_env(source: &str) -> String {
    format!("{}_WEBHOOK_SECRET", source.to_uppercase().replace('-', "_"))
}

struct SecretSlot {
    source: SecretSource,
    cell: OnceCell<Result<String, SecretError>>,
}

/// Memoizing, single-flight resolver of per-source webhook secrets.
pub struct SecretResolver {
    slots: HashMap<String, SecretSlot>,
    resolutions: AtomicUsize,
}

impl SecretResolver {
    pub fn from_sources(sources: &BTreeMap<String, SourceConfig>) -> Self {
        let slots = sources
            .iter()
            .map(|(name, cfg)| {
                (
                    name.clone(),
                    SecretSlot {
                        source: SecretSource::from_config(name, cfg),
                        cell: OnceCell::new(),
                    },
                )
            })
            .collect();
        Self {
            slots,
            resolutions: AtomicUsize::new(0),
        }
    }

    /// Configured source names, sorted.
    pub fn sources(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.slots.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// How many times a secret has actually been loaded. Cached reads do not
    /// count.
    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }

    /// Resolve the secret for `source`, or `None` when the source is not
    /// configured at all.
    ///
    /// Concurrent first callers wait on the same resolution.
    pub async fn resolve(&self, source: &str) -> Option<Result<&str, SecretError>> {
        let slot = self.slots.get(source)?;
        let resolved = slot
            .cell
            .get_or_init(|| async {
                self.resolutions.fetch_add(1, Ordering::SeqCst);
                load_secret(source, &slot.source).await
            })
            .await;
        Some(resolved.as_ref().map(String::as_str).map_err(|e| e.clone()))
    }
}

async fn load_secret(name: &str, source: &SecretSource) -> Result<String, SecretError> {
    let raw = match source {
        SecretSource::Literal(secret) => secret.clone(),
        SecretSource::Env(var) => {
            std::env::var(var).map_err(|_| SecretError::EnvMissing(var.clone()))?
        }
        SecretSource::File(path) => {
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| SecretError::File {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?
        }
    };
    let secret = raw.trim().to_string();
    if secret.is_empty() {
        return Err(SecretError::Blank(name.to_string()));
    }
    debug!(source = name, "resolved webhook secret");
    Ok(secret)
}

/// The identity a successfully authorized webhook is processed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: String,
    pub source: String,
}

pub struct TenantAuthorizer {
    default_tenant: Option<String>,
    resolver: Arc<SecretResolver>,
}

impl TenantAuthorizer {
    pub fn new(default_tenant: Option<String>, resolver: Arc<SecretResolver>) -> Self {
        Self {
            default_tenant,
            resolver,
        }
    }

    /// Build from `[tenant]` and `[sources]`, falling back to
    /// `$DEFAULT_TENANT_ID` when no default tenant is configured.
    pub fn from_config(config: &Config) -> Self {
        let default_tenant = config
            .tenant
            .default_id
            .clone()
            .or_else(|| std::env::var("DEFAULT_TENANT_ID").ok());
        Self::new(
            default_tenant,
            Arc::new(SecretResolver::from_sources(&config.sources)),
        )
    }

    pub fn resolver(&self) -> &Arc<SecretResolver> {
        &self.resolver
    }

    /// Check `presented` against the secret configured for `source`.
    pub async fn authorize(
        &self,
        source: &str,
        presented: Option<&str>,
    ) -> Result<TenantContext, IngestError> {
        let tenant_id = match self.default_tenant.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => {
                return Err(IngestError::ServerMisconfigured(
                    "default tenant id not set".to_string(),
                ))
            }
        };

        let expected = match self.resolver.resolve(source).await {
            None => {
                return Err(IngestError::Unauthorized(format!(
                    "unsupported source: {}",
                    source
                )))
            }
            Some(Err(e)) => {
                warn!(source, error = %e, "webhook secret unavailable");
                return Err(IngestError::ServerMisconfigured(e.to_string()));
            }
            Some(Ok(secret)) => secret,
        };

        let presented = presented.map(str::trim).unwrap_or_default();
        if presented.is_empty() || !secrets_match(expected, presented) {
            return Err(IngestError::Unauthorized("invalid secret".to_string()));
        }

        Ok(TenantContext {
            tenant_id,
            source: source.to_string(),
        })
    }
}

/// Compare digests so neither content nor length leaks through timing.
fn secrets_match(expected: &str, presented: &str) -> bool {
    let expected = Sha256::digest(expected.as_bytes());
    let presented = Sha256::digest(presented.as_bytes());
    expected.as_slice().ct_eq(presented.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources(entries: &[(&str, SourceConfig)]) -> BTreeMap<String, SourceConfig> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn literal(secret: &str) -> SourceConfig {
        SourceConfig {
            secret: Some(secret.to_string()),
            ..Default::default()
        }
    }

    fn authorizer(default_tenant: Option<&str>, cfg: &[(&str, SourceConfig)]) -> TenantAuthorizer {
        TenantAuthorizer::new(
            default_tenant.map(str::to_string),
            Arc::new(SecretResolver::from_sources(&sources(cfg))),
        )
    }

    #[test]
    fn test_default_secret_env_name() {
        assert_eq!(default_secret_env("readwise"), "READWISE_WEBHOOK_SECRET");
        assert_eq!(default_secret_env("provider-x"), "PROVIDER_X_WEBHOOK_SECRET");
    }

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("s3cr3t", "s3cr3t"));
        assert!(!secrets_match("s3cr3t", "s3cr3"));
        assert!(!secrets_match("s3cr3t", "S3CR3T"));
    }

    #[tokio::test]
    async fn test_correct_secret_resolves_default_tenant() {
        let auth = authorizer(Some("tenant-123"), &[("readwise", literal("s3cr3t"))]);
        let ctx = auth.authorize("readwise", Some(" s3cr3t ")).await.unwrap();
        assert_eq!(ctx.tenant_id, "tenant-123");
        assert_eq!(ctx.source, "readwise");
    }

    #[tokio::test]
    async fn test_wrong_or_missing_secret_unauthorized() {
        let auth = authorizer(Some("tenant-123"), &[("readwise", literal("s3cr3t"))]);
        for presented in [Some("wrong"), Some("   "), None] {
            let err = auth.authorize("readwise", presented).await.unwrap_err();
            assert!(matches!(err, IngestError::Unauthorized(_)), "{presented:?}");
        }
    }

    #[tokio::test]
    async fn test_unknown_source_unauthorized() {
        let auth = authorizer(Some("tenant-123"), &[("readwise", literal("s3cr3t"))]);
        let err = auth.authorize("other", Some("s3cr3t")).await.unwrap_err();
        assert!(matches!(err, IngestError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_blank_default_tenant_misconfigured() {
        let auth = authorizer(Some("  "), &[("readwise", literal("s3cr3t"))]);
        let err = auth.authorize("readwise", Some("s3cr3t")).await.unwrap_err();
        assert!(matches!(err, IngestError::ServerMisconfigured(_)));

        let auth = authorizer(None, &[("readwise", literal("s3cr3t"))]);
        assert!(auth.authorize("readwise", Some("s3cr3t")).await.is_err());
    }

    #[tokio::test]
    async fn test_unset_secret_env_misconfigured_and_cached() {
        let cfg = SourceConfig {
            secret_env: Some("INSIGHT_TEST_UNSET_SECRET_93c1".to_string()),
            ..Default::default()
        };
        let auth = authorizer(Some("tenant-123"), &[("readwise", cfg)]);
        for presented in [None, Some("s3cr3t"), Some("wrong")] {
            let err = auth.authorize("readwise", presented).await.unwrap_err();
            assert!(matches!(err, IngestError::ServerMisconfigured(_)));
        }
        assert_eq!(auth.resolver().resolutions(), 1);
    }

    #[tokio::test]
    async fn test_blank_literal_misconfigured() {
        let auth = authorizer(Some("tenant-123"), &[("readwise", literal("  "))]);
        let err = auth.authorize("readwise", Some("x")).await.unwrap_err();
        assert!(matches!(err, IngestError::ServerMisconfigured(_)));
    }

    #[tokio::test]
    async fn test_secret_file_trimmed() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("readwise.secret");
        std::fs::write(&path, "s3cr3t\n").unwrap();
        let cfg = SourceConfig {
            secret_file: Some(path),
            ..Default::default()
        };
        let auth = authorizer(Some("tenant-123"), &[("readwise", cfg)]);
        assert!(auth.authorize("readwise", Some("s3cr3t")).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_resolves_once() {
        let auth = Arc::new(authorizer(
            Some("tenant-123"),
            &[("readwise", literal("s3cr3t"))],
        ));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let auth = auth.clone();
            handles.push(tokio::spawn(async move {
                auth.authorize("readwise", Some("s3cr3t")).await
            }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }
        assert_eq!(auth.resolver().resolutions(), 1);
    }
}
