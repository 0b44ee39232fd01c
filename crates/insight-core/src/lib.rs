//! # Insight Core
//!
//! Runtime-agnostic logic for Insight Ingest: domain models, the idempotency
//! key deriver, payload normalization, the queue/store/enricher ports, and
//! the publish → deliver → persist pipeline built on top of them.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Concrete
//! adapters (SQLite queue and store, HTTP enricher, axum boundary) live in
//! the `insight-ingest` app crate.
//!
//! ## Pipeline
//!
//! ```text
//! payload ─▶ normalize ─▶ IngestPublisher ─▶ MessageQueue
//!                              │ derive_key
//!                              ▼
//!             DeliveryConsumer ─▶ InsightProcessor ─▶ InsightStore
//!                                        │ (first insert only)
//!                                        ▼
//!                                    Enricher ─▶ InsightStore::update
//! ```

pub mod delivery;
pub mod enrich;
pub mod error;
pub mod idempotency;
pub mod models;
pub mod normalize;
pub mod process;
pub mod publish;
pub mod queue;
pub mod store;
