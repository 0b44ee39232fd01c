//! # Insight Ingest
//!
//! Idempotent ingestion of highlight webhooks.
//!
//! A provider posts a highlight to the webhook server. The server checks the
//! shared secret, normalizes the payload, derives its idempotency key, and
//! enqueues it. A worker leases messages from the queue and persists each
//! logical event exactly once as an insight, optionally enriching it first.
//! The queue may deliver a message any number of times; the store's
//! conditional insert keeps the result unique.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │ Provider │──▶│ HTTP server  │──▶│ SQLite queue │──▶│  Worker  │
//! │ webhook  │   │ auth+normal. │   │ (leases)     │   │ dedup    │
//! └──────────┘   └──────────────┘   └──────────────┘   └────┬─────┘
//!                                                           │
//!                                         ┌─────────────────┤
//!                                         ▼                 ▼
//!                                   ┌──────────┐      ┌──────────┐
//!                                   │ Enricher │      │ insights │
//!                                   │ (opt.)   │      │ (SQLite) │
//!                                   └──────────┘      └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! insight init                       # create database
//! insight serve                      # accept webhooks
//! insight work                       # persist queued events
//! insight queue depth                # inspect backlog
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`tenant`] | Secret resolution and tenant authorization |
//! | [`server`] | Webhook HTTP server |
//! | [`sqlite_queue`] | Durable at-least-once queue |
//! | [`sqlite_store`] | Dedup insight store |
//! | [`enrich`] | Enricher construction and HTTP client |
//! | [`worker`] | Queue polling worker |
//! | [`deliver`] | Local single-message delivery |
//!
//! Domain types and the pipeline itself live in [`insight_core`].

pub mod config;
pub mod db;
pub mod deliver;
pub mod enrich;
pub mod logging;
pub mod migrate;
pub mod server;
pub mod shutdown;
pub mod sqlite_queue;
pub mod sqlite_store;
pub mod tenant;
pub mod worker;

pub use insight_core;
