//! Scheduled Jobs
//!
//! Background jobs for periodic maintenance of the pipeline.
//! These jobs return expired deliveries to the queue and surface audit
//! records stuck IN_PROGRESS.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::domain::TransactionLog;
use crate::messaging::{QueueTransport, TransportError};
use crate::transaction_log::{AuditStoreError, TransactionLogService};

/// Upper bound on stale records reported per run
const STALE_REPORT_LIMIT: i64 = 100;

// =========================================================================
// Expired Delivery Requeue Job
// =========================================================================

/// Return deliveries whose consumer never settled them to the queue.
/// Covers consumers that crashed or lost their connection mid-message.
pub async fn requeue_expired_deliveries(
    transport: &dyn QueueTransport,
    queue: &str,
    visibility_timeout: Duration,
) -> Result<u64, JobError> {
    let requeued = transport.requeue_expired(queue, visibility_timeout).await?;

    if requeued > 0 {
        tracing::warn!(
            queue = %queue,
            requeued = requeued,
            "Requeued expired deliveries"
        );
    }

    Ok(requeued)
}

// =========================================================================
// Stale IN_PROGRESS Report Job
// =========================================================================

/// Find audit records IN_PROGRESS for longer than `older_than`.
///
/// Each is either still queued, or was committed to the ledger by a worker
/// that died before marking it COMPLETED. They are reported, never changed.
pub async fn report_stale_in_progress(
    logs: &TransactionLogService,
    older_than: Duration,
) -> Result<Vec<TransactionLog>, JobError> {
    let age = chrono::Duration::from_std(older_than)
        .unwrap_or_else(|_| chrono::Duration::days(36_500));
    let cutoff = Utc::now() - age;

    let stale = logs
        .find_stale_in_progress(cutoff, STALE_REPORT_LIMIT)
        .await?;

    for log in &stale {
        tracing::warn!(
            transaction_id = %log.transaction_id,
            account_id = log.from_account_id,
            retry_count = log.retry_count,
            since = %log.timestamp,
            "Transaction stuck IN_PROGRESS"
        );
    }

    Ok(stale)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    pub queue_name: String,
    /// Unsettled deliveries older than this are requeued
    pub visibility_timeout: Duration,
    /// IN_PROGRESS records older than this are reported
    pub stale_after: Duration,
    /// Interval for delivery requeue (default: 30 seconds)
    pub requeue_interval: Duration,
    /// Interval for the stale record report (default: 5 minutes)
    pub stale_report_interval: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            queue_name: "transactions".to_string(),
            visibility_timeout: Duration::from_secs(300),
            stale_after: Duration::from_secs(900),
            requeue_interval: Duration::from_secs(30),
            stale_report_interval: Duration::from_secs(300),
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    transport: Arc<dyn QueueTransport>,
    logs: TransactionLogService,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    /// Create a new job scheduler
    pub fn new(transport: Arc<dyn QueueTransport>, logs: TransactionLogService) -> Self {
        Self::with_config(transport, logs, JobSchedulerConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(
        transport: Arc<dyn QueueTransport>,
        logs: TransactionLogService,
        config: JobSchedulerConfig,
    ) -> Self {
        Self {
            transport,
            logs,
            config,
        }
    }

    /// Start the job scheduler in the background until `shutdown` fires
    pub fn start(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    /// Run the scheduler loop
    async fn run(&self, shutdown: CancellationToken) {
        tracing::info!("Job scheduler started");

        let mut requeue_interval = interval(self.config.requeue_interval);
        let mut stale_interval = interval(self.config.stale_report_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = requeue_interval.tick() => {
                    if let Err(e) = requeue_expired_deliveries(
                        self.transport.as_ref(),
                        &self.config.queue_name,
                        self.config.visibility_timeout,
                    )
                    .await
                    {
                        tracing::error!(error = %e, "Delivery requeue failed");
                    }
                }
                _ = stale_interval.tick() => {
                    if let Err(e) = report_stale_in_progress(&self.logs, self.config.stale_after).await {
                        tracing::error!(error = %e, "Stale transaction report failed");
                    }
                }
            }
        }

        tracing::info!("Job scheduler stopped");
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match requeue_expired_deliveries(
            self.transport.as_ref(),
            &self.config.queue_name,
            self.config.visibility_timeout,
        )
        .await
        {
            Ok(count) => report.deliveries_requeued = count,
            Err(e) => report.errors.push(format!("Delivery requeue: {}", e)),
        }

        match report_stale_in_progress(&self.logs, self.config.stale_after).await {
            Ok(stale) => {
                report.stale_in_progress = stale.into_iter().map(|log| log.transaction_id).collect()
            }
            Err(e) => report.errors.push(format!("Stale report: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub deliveries_requeued: u64,
    pub stale_in_progress: Vec<String>,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Audit store error: {0}")]
    Audit(#[from] AuditStoreError),
}

// =========================================================================
// Tests
// =========================================================================
