//! PostgreSQL audit store
//!
//! Records live in `transaction_logs`; the extension map is stored as JSONB.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{classify, SqlFailure};
use crate::domain::{HistoryFilter, Metadata, Pagination, TransactionLog, TransactionStatus};

use super::{AuditStore, AuditStoreError};

type LogRow = (
    Uuid,
    String,
    i64,
    i64,
    Decimal,
    String,
    String,
    String,
    String,
    Option<serde_json::Value>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    i64,
    i32,
);

const LOG_COLUMNS: &str = "id, transaction_id, from_account_id, to_account_id, amount, currency, \
     transaction_type, status, memo, metadata, timestamp, processed_at, initiated_by, retry_count";

fn log_from_row(row: LogRow) -> Result<TransactionLog, AuditStoreError> {
    let (
        id,
        transaction_id,
        from_account_id,
        to_account_id,
        amount,
        currency,
        transaction_type,
        status,
        memo,
        metadata,
        timestamp,
        processed_at,
        initiated_by,
        retry_count,
    ) = row;

    let metadata: Option<Metadata> = metadata.map(serde_json::from_value).transpose()?;

    Ok(TransactionLog {
        id,
        transaction_id,
        from_account_id,
        to_account_id,
        amount,
        currency,
        transaction_type: transaction_type
            .parse()
            .map_err(|e: crate::domain::DomainError| AuditStoreError::InvalidRow(e.to_string()))?,
        status: status.parse().map_err(AuditStoreError::InvalidRow)?,
        memo,
        metadata,
        timestamp,
        processed_at,
        initiated_by,
        retry_count,
    })
}

/// Audit store backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn insert(&self, log: &TransactionLog) -> Result<(), AuditStoreError> {
        let metadata = log.metadata.as_ref().map(serde_json::to_value).transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO transaction_logs (
                id, transaction_id, from_account_id, to_account_id, amount, currency,
                transaction_type, status, memo, metadata, timestamp, processed_at,
                initiated_by, retry_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(log.id)
        .bind(&log.transaction_id)
        .bind(log.from_account_id)
        .bind(log.to_account_id)
        .bind(log.amount)
        .bind(&log.currency)
        .bind(log.transaction_type.as_str())
        .bind(log.status.as_str())
        .bind(&log.memo)
        .bind(metadata)
        .bind(log.timestamp)
        .bind(log.processed_at)
        .bind(log.initiated_by)
        .bind(log.retry_count)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if classify(&e) == SqlFailure::UniqueViolation => {
                Err(AuditStoreError::Duplicate(log.transaction_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<TransactionLog>, AuditStoreError> {
        let sql = format!(
            "SELECT {} FROM transaction_logs WHERE transaction_id = $1",
            LOG_COLUMNS
        );

        let row: Option<LogRow> = sqlx::query_as(&sql)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(log_from_row).transpose()
    }

    async fn set_status(
        &self,
        transaction_id: &str,
        status: TransactionStatus,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<(), AuditStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE transaction_logs
            SET status = $2, processed_at = COALESCE($3, processed_at)
            WHERE transaction_id = $1
            "#,
        )
        .bind(transaction_id)
        .bind(status.as_str())
        .bind(processed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AuditStoreError::NotFound(transaction_id.to_string()));
        }

        Ok(())
    }

    async fn increment_retry_count(&self, transaction_id: &str) -> Result<i32, AuditStoreError> {
        let count: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE transaction_logs
            SET retry_count = retry_count + 1
            WHERE transaction_id = $1
            RETURNING retry_count
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        count.ok_or_else(|| AuditStoreError::NotFound(transaction_id.to_string()))
    }

    async fn history(
        &self,
        account_id: i64,
        filter: &HistoryFilter,
        page: Pagination,
    ) -> Result<(Vec<TransactionLog>, i64), AuditStoreError> {
        const FILTER: &str = r#"
            WHERE (from_account_id = $1 OR to_account_id = $1)
              AND ($2::timestamptz IS NULL OR timestamp >= $2)
              AND ($3::timestamptz IS NULL OR timestamp < $3)
              AND ($4::text IS NULL OR status = $4)
        "#;

        let from = filter.from_timestamp();
        let until = filter.until_timestamp();
        let status = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM transaction_logs {}", FILTER))
            .bind(account_id)
            .bind(from)
            .bind(until)
            .bind(status)
            .fetch_one(&self.pool)
            .await?;

        let sql = format!(
            "SELECT {} FROM transaction_logs {} ORDER BY timestamp DESC LIMIT $5 OFFSET $6",
            LOG_COLUMNS, FILTER
        );

        let rows: Vec<LogRow> = sqlx::query_as(&sql)
            .bind(account_id)
            .bind(from)
            .bind(until)
            .bind(status)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .into_iter()
            .map(log_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((items, total))
    }

    async fn find_by_status_before(
        &self,
        status: TransactionStatus,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TransactionLog>, AuditStoreError> {
        let sql = format!(
            r#"
            SELECT {} FROM transaction_logs
            WHERE status = $1 AND timestamp < $2
            ORDER BY timestamp ASC
            LIMIT $3
            "#,
            LOG_COLUMNS
        );

        let rows: Vec<LogRow> = sqlx::query_as(&sql)
            .bind(status.as_str())
            .bind(older_than)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(log_from_row).collect()
    }
}
