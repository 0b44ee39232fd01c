//! # Insight Ingest CLI (`insight`)
//!
//! ## Usage
//!
//! ```bash
//! insight --config ./config/insight.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `insight init` | Create the SQLite database and run schema migrations |
//! | `insight serve` | Start the webhook HTTP server |
//! | `insight work` | Run the queue worker until Ctrl-C |
//! | `insight work --once` | Drain the queue and exit |
//! | `insight deliver <body.json>` | Process one message body locally |
//! | `insight queue depth` | Print the number of queued messages |
//! | `insight get <key> --tenant-id <id>` | Print a stored insight as JSON |
//! | `insight unenriched` | List insights still awaiting enrichment |

use anyhow::bail;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use insight_core::delivery::Outcome;
use insight_core::store::InsightStore;
use insight_ingest::sqlite_queue::SqliteQueue;
use insight_ingest::sqlite_store::SqliteInsightStore;
use insight_ingest::{config, db, deliver, logging, migrate, server, sqlite_store, worker};

/// Insight Ingest CLI: idempotent highlight-webhook ingestion.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "insight",
    about = "Insight Ingest: authorize, enqueue, and persist highlight webhooks exactly once",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/insight.toml")]
    config: PathBuf,

    /// Log output format: `pretty` or `json`.
    #[arg(long, global = true, default_value = "pretty")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the `insights` and
    /// `queue_messages` tables. Safe to run repeatedly.
    Init,

    /// Start the webhook server.
    ///
    /// Binds to `[server].bind` and accepts `POST /webhooks/{source}`.
    Serve,

    /// Run the queue worker.
    Work {
        /// Drain the queue once and exit instead of polling forever.
        #[arg(long)]
        once: bool,
    },

    /// Process one message body against the configured store.
    ///
    /// Behaves like a single queue delivery: the body is decoded,
    /// cross-checked against the attributes, and persisted. Useful for
    /// replaying a message by hand.
    Deliver {
        /// Path to a JSON file holding the message body.
        body: PathBuf,

        /// `tenant_id` attribute (defaults to the body's tenantId).
        #[arg(long)]
        tenant_id: Option<String>,

        /// `idempotency_key` attribute (defaults to the body's idempotencyKey).
        #[arg(long)]
        idempotency_key: Option<String>,
    },

    /// Inspect the queue.
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Print one stored insight as JSON.
    Get {
        /// Idempotency key.
        key: String,

        #[arg(long)]
        tenant_id: String,
    },

    /// List insights whose enrichment update never landed.
    ///
    /// A redelivery after a successful insert is treated as a duplicate and
    /// is not enriched again; these records need out-of-band repair. Fails
    /// when enrichment is disabled.
    Unenriched {
        /// Maximum number of insights to list.
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Print the number of queued messages, leased or not.
    Depth,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_format);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Work { once } => {
            worker::run_worker(&cfg, once).await?;
        }
        Commands::Deliver {
            body,
            tenant_id,
            idempotency_key,
        } => match deliver::run_deliver(&cfg, &body, tenant_id, idempotency_key).await? {
            Outcome::Acknowledged { inserted: true } => println!("inserted"),
            Outcome::Acknowledged { inserted: false } => println!("duplicate"),
            Outcome::Dropped { reason } => bail!("dropped: {}", reason),
            Outcome::Redeliver { reason } => bail!("transient failure: {}", reason),
        },
        Commands::Queue { action } => match action {
            QueueAction::Depth => {
                let queue = SqliteQueue::new(db::connect(&cfg).await?);
                println!("{}", queue.depth().await?);
            }
        },
        Commands::Get { key, tenant_id } => {
            let store = SqliteInsightStore::new(db::connect(&cfg).await?);
            match store.get(&tenant_id, &key).await? {
                Some(insight) => println!("{}", serde_json::to_string_pretty(&insight)?),
                None => bail!("no insight for tenant {} with key {}", tenant_id, key),
            }
        }
        Commands::Unenriched { limit } => {
            for insight in sqlite_store::run_unenriched(&cfg, limit).await? {
                println!(
                    "{}\t{}\t{}",
                    insight.tenant_id, insight.idempotency_key, insight.created_at
                );
            }
        }
    }

    Ok(())
}
