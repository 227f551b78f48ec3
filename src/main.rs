//! queue_ledger - transaction processing worker
//!
//! Consumes transaction messages from the durable queue, applies them to the
//! account ledger under row locks, and keeps the audit trail in step.

use std::sync::Arc;

use queue_ledger::handlers::ProcessTransactionHandler;
use queue_ledger::jobs::{JobScheduler, JobSchedulerConfig};
use queue_ledger::ledger::PgLedgerStore;
use queue_ledger::messaging::{ConsumerConfig, PgQueue, QueueTransport, TransactionConsumer};
use queue_ledger::transaction_log::{PgAuditStore, TransactionLogService};
use queue_ledger::{db, Config};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "queue_ledger=debug".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    init_tracing();

    // Load configuration
    let config = Config::from_env()?;

    tracing::info!(environment = %config.environment, "Starting queue_ledger worker");
    tracing::info!("Connecting to database...");

    let pool = db::connect(&config).await?;

    // Verify database schema
    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    let transport: Arc<dyn QueueTransport> =
        Arc::new(PgQueue::new(pool.clone(), config.queue_poll_interval));
    transport.declare_queue(&config.queue_name).await?;

    let logs = TransactionLogService::new(Arc::new(PgAuditStore::new(pool.clone())));
    let ledger = Arc::new(PgLedgerStore::new(pool.clone(), config.lock_timeout));
    let handler = ProcessTransactionHandler::new(ledger, logs.clone(), config.minimum_reserve);

    let shutdown = CancellationToken::new();

    let scheduler = JobScheduler::with_config(
        transport.clone(),
        logs.clone(),
        JobSchedulerConfig {
            queue_name: config.queue_name.clone(),
            visibility_timeout: config.queue_visibility_timeout,
            stale_after: config.stale_in_progress_after,
            ..JobSchedulerConfig::default()
        },
    )
    .start(shutdown.clone());

    let concurrency = config.worker_concurrency.max(1);
    let mut consumers = Vec::with_capacity(concurrency);
    for index in 0..concurrency {
        let mut consumer_config = ConsumerConfig::new(
            config.queue_name.clone(),
            format!("{}-{}", config.consumer_tag, index),
        );
        consumer_config.max_redeliveries = config.max_redeliveries;

        let consumer =
            TransactionConsumer::new(transport.clone(), handler.clone(), logs.clone(), consumer_config);
        consumers.push(consumer.start(shutdown.clone()));
    }

    tracing::info!(
        queue = %config.queue_name,
        consumers = concurrency,
        "Waiting for transaction messages"
    );

    shutdown_signal().await;
    shutdown.cancel();

    // Let in-flight deliveries settle
    for consumer in consumers {
        if let Err(e) = consumer.await {
            tracing::error!(error = %e, "Consumer task failed");
        }
    }
    if let Err(e) = scheduler.await {
        tracing::error!(error = %e, "Job scheduler task failed");
    }

    // Cleanup
    tracing::info!("Worker shutting down...");
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
