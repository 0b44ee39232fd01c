//! Queue worker: leases batches from [`SqliteQueue`] and hands each message
//! to the [`DeliveryConsumer`].
//!
//! Messages in a batch are handled one by one and each gets its own
//! disposition: acknowledged and dropped messages are deleted, redelivered
//! ones are released for another attempt. One bad record never holds back
//! the rest of its batch.
//!
//! The batch is leased once, and each message's lease is renewed for
//! `[queue].visibility_timeout_secs` right before it is handled, so the lease
//! always outlives the record deadline.
//!
//! Every record runs under `[worker].record_timeout_secs`. When the deadline
//! elapses the processing future is dropped and the message is released.
//! Each store call is a single statement, so an abandoned record leaves at
//! most a completed insert behind, which a redelivery sees as a duplicate.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, info, info_span, warn, Instrument};

use insight_core::delivery::{outcome_for, DeliveryConsumer, Outcome};
use insight_core::error::ProcessError;
use insight_core::process::InsightProcessor;
use insight_core::queue::{ReceivedMessage, ATTR_IDEMPOTENCY_KEY, ATTR_TENANT_ID};

use crate::config::Config;
use crate::db;
use crate::enrich::create_enricher;
use crate::migrate;
use crate::shutdown::shutdown_signal;
use crate::sqlite_queue::SqliteQueue;
use crate::sqlite_store::SqliteInsightStore;

/// Tally of one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub dropped: usize,
    pub redelivered: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Acknowledged { inserted: true } => self.inserted += 1,
            Outcome::Acknowledged { inserted: false } => self.duplicates += 1,
            Outcome::Dropped { .. } => self.dropped += 1,
            Outcome::Redeliver { .. } => self.redelivered += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.inserted + self.duplicates + self.dropped + self.redelivered
    }
}

pub struct Worker {
    queue: Arc<SqliteQueue>,
    consumer: DeliveryConsumer,
    batch_size: usize,
    visibility: Duration,
    record_timeout: Duration,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(config: &Config, queue: Arc<SqliteQueue>, consumer: DeliveryConsumer) -> Self {
        Self {
            queue,
            consumer,
            batch_size: config.queue.batch_size,
            visibility: Duration::from_secs(config.queue.visibility_timeout_secs),
            record_timeout: Duration::from_secs(config.worker.record_timeout_secs),
            poll_interval: Duration::from_millis(config.worker.poll_interval_ms),
        }
    }

    /// Override the per-record deadline.
    pub fn with_record_timeout(mut self, timeout: Duration) -> Self {
        self.record_timeout = timeout;
        self
    }

    /// Lease one batch and settle every message in it.
    pub async fn run_batch(&self) -> Result<BatchReport> {
        let messages = self.queue.receive(self.batch_size, self.visibility).await?;
        let mut report = BatchReport::default();

        for msg in &messages {
            if let Err(e) = self.queue.extend_lease(&msg.message_id, self.visibility).await {
                warn!(message_id = %msg.message_id, error = %e, "failed to renew lease");
            }
            let outcome = self.handle(msg).await;
            report.record(&outcome);
            if let Err(e) = self.settle(msg, &outcome).await {
                // The lease expires on its own; the message comes back later.
                error!(message_id = %msg.message_id, error = %e, "failed to settle message");
            }
        }

        if report.total() > 0 {
            info!(
                inserted = report.inserted,
                duplicates = report.duplicates,
                dropped = report.dropped,
                redelivered = report.redelivered,
                "batch processed"
            );
        }
        Ok(report)
    }

    async fn handle(&self, msg: &ReceivedMessage) -> Outcome {
        let span = info_span!(
            "delivery",
            message_id = %msg.message_id,
            receive_count = msg.receive_count,
            tenant_id = msg.attribute(ATTR_TENANT_ID).unwrap_or_default(),
            idempotency_key = msg.attribute(ATTR_IDEMPOTENCY_KEY).unwrap_or_default(),
        );

        async {
            let outcome =
                match tokio::time::timeout(self.record_timeout, self.consumer.handle(msg)).await {
                    Ok(outcome) => outcome,
                    Err(_) => outcome_for(Err(ProcessError::Cancelled(format!(
                        "record deadline of {:?} elapsed",
                        self.record_timeout
                    )))),
                };

            match &outcome {
                Outcome::Acknowledged { inserted } => {
                    info!(inserted = *inserted, "message processed")
                }
                Outcome::Dropped { reason } => warn!(%reason, "message dropped"),
                Outcome::Redeliver { reason } => warn!(%reason, "message will be redelivered"),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn settle(&self, msg: &ReceivedMessage, outcome: &Outcome) -> Result<()> {
        if outcome.is_terminal() {
            self.queue.ack(&msg.message_id).await
        } else {
            self.queue.release(&msg.message_id).await
        }
    }

    /// Poll until the queue is empty or no progress is possible.
    ///
    /// Released messages become visible again immediately, so a run that
    /// only redelivers stops instead of spinning.
    pub async fn drain(&self) -> Result<BatchReport> {
        let mut total = BatchReport::default();
        loop {
            let report = self.run_batch().await?;
            total.inserted += report.inserted;
            total.duplicates += report.duplicates;
            total.dropped += report.dropped;
            total.redelivered += report.redelivered;
            if report.total() == 0 || report.redelivered == report.total() {
                return Ok(total);
            }
        }
    }

    /// Poll forever, stopping between batches on Ctrl-C.
    pub async fn run(&self) -> Result<()> {
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        info!(
            batch_size = self.batch_size,
            record_timeout_secs = self.record_timeout.as_secs(),
            "worker started"
        );

        loop {
            let report = match self.run_batch().await {
                Ok(report) => report,
                Err(e) => {
                    error!(error = %e, "failed to receive batch");
                    BatchReport::default()
                }
            };

            // Back off when nothing progressed, including batches that only
            // released messages back to the queue.
            let idle = if report.redelivered == report.total() {
                self.poll_interval
            } else {
                Duration::ZERO
            };

            tokio::select! {
                _ = &mut shutdown => {
                    info!("worker stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(idle) => {
                    debug!("polling queue");
                }
            }
        }
    }
}

/// Wire the SQLite queue, SQLite store, and configured enricher together.
pub async fn build_worker(config: &Config) -> Result<Worker> {
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    let queue = Arc::new(SqliteQueue::new(pool.clone()));
    let store = Arc::new(SqliteInsightStore::new(pool));
    let enricher = create_enricher(&config.enrich)?;
    if config.enrich.provider == "http"
        && config.enrich.worst_case_secs() > config.worker.record_timeout_secs
    {
        warn!(
            worst_case_secs = config.enrich.worst_case_secs(),
            record_timeout_secs = config.worker.record_timeout_secs,
            "enrichment retries can outlast the record deadline; slow records will be redelivered unenriched"
        );
    }
    let processor = Arc::new(InsightProcessor::new(store, enricher));
    Ok(Worker::new(config, queue, DeliveryConsumer::new(processor)))
}

/// Entry point for `insight work`.
pub async fn run_worker(config: &Config, once: bool) -> Result<()> {
    let worker = build_worker(config).await?;
    if once {
        let report = worker.drain().await?;
        println!(
            "inserted={} duplicates={} dropped={} redelivered={}",
            report.inserted, report.duplicates, report.dropped, report.redelivered
        );
        return Ok(());
    }
    worker.run().await
}
