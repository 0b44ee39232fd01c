//! Error taxonomy for the ingestion pipeline.
//!
//! Two families of errors exist:
//!
//! - **Boundary errors** ([`IngestError`]) are resolved at the HTTP edge and
//!   never reach the queue. Each maps to a coarse machine-readable tag.
//! - **Worker errors** ([`ProcessError`], [`DeliveryError`]) carry an explicit
//!   [`Classification`] that the delivery consumer inspects exactly once to
//!   decide between dropping and redelivering a message.
//!
//! Port implementations (queue, store, enricher) return `anyhow::Error`; the
//! processor wraps those as transient.

use thiserror::Error;

/// Errors surfaced to the webhook boundary before anything is enqueued.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Malformed or incomplete input. Never retried; a 4xx-equivalent.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Secret wrong or source unsupported. Never retried.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Required configuration missing. Operator-actionable 5xx-equivalent.
    #[error("server misconfigured: {0}")]
    ServerMisconfigured(String),
}

impl IngestError {
    /// Machine-readable tag safe to expose in a response body.
    pub fn tag(&self) -> &'static str {
        match self {
            IngestError::InvalidPayload(_) => "invalid_payload",
            IngestError::Unauthorized(_) => "unauthorized",
            IngestError::ServerMisconfigured(_) => "server_misconfigured",
        }
    }
}

/// Whether a failed message may succeed if delivered again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Retrying can never help: drop the message.
    Permanent,
    /// A dependency failed: leave the message for redelivery.
    Transient,
}

/// Failures of [`InsightProcessor::process`](crate::process::InsightProcessor::process).
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("missing idempotency key")]
    MissingIdempotencyKey,

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("store error: {0:#}")]
    Store(#[source] anyhow::Error),

    #[error("enrich error: {0:#}")]
    Enrich(#[source] anyhow::Error),

    /// The processing deadline elapsed before the pipeline finished.
    #[error("processing cancelled: {0}")]
    Cancelled(String),
}

impl ProcessError {
    /// Validation-shaped errors are permanent; everything else is transient.
    pub fn classification(&self) -> Classification {
        match self {
            ProcessError::MissingIdempotencyKey | ProcessError::InvalidEvent(_) => {
                Classification::Permanent
            }
            ProcessError::Store(_) | ProcessError::Enrich(_) | ProcessError::Cancelled(_) => {
                Classification::Transient
            }
        }
    }
}

/// Problems with a received queue message itself. Always permanent: the
/// same bytes will fail the same way on every redelivery.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid message body: {0}")]
    InvalidBody(String),

    #[error("missing message attribute {0}")]
    MissingAttribute(&'static str),

    #[error("{attribute} mismatch: body={body:?} attr={attr:?}")]
    AttributeDrift {
        attribute: &'static str,
        body: String,
        attr: String,
    },

    #[error("idempotency_key mismatch: attr={attr:?} derived={derived:?}")]
    UnderivableKey { attr: String, derived: String },
}

impl DeliveryError {
    pub fn classification(&self) -> Classification {
        Classification::Permanent
    }
}
