//! PostgreSQL ledger store
//!
//! Accounts live in the `accounts` table. Row locks are taken with
//! `SELECT ... FOR UPDATE` under a per-transaction `lock_timeout`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;

use crate::domain::Account;

use super::{AccountLookup, LedgerError, LedgerStore, LedgerTransaction};

type AccountRow = (
    i64,
    String,
    String,
    String,
    Decimal,
    String,
    String,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
);

const ACCOUNT_COLUMNS: &str = "id, account_number, first_name, last_name, balance, currency, \
     account_type, account_status, created_at, updated_at";

fn account_from_row(row: AccountRow) -> Result<Account, LedgerError> {
    let (
        id,
        account_number,
        first_name,
        last_name,
        balance,
        currency,
        account_type,
        account_status,
        created_at,
        updated_at,
    ) = row;

    Ok(Account {
        id,
        account_number,
        first_name,
        last_name,
        balance,
        currency,
        account_type: account_type.parse().map_err(LedgerError::InvalidRow)?,
        account_status: account_status.parse().map_err(LedgerError::InvalidRow)?,
        created_at,
        updated_at,
    })
}

/// Ledger store backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Insert an account row and return it with its generated id.
    /// Account creation belongs to the account service; this exists for
    /// seeding and load generation.
    pub async fn create_account(&self, account: &Account) -> Result<Account, LedgerError> {
        let sql = format!(
            r#"
            INSERT INTO accounts (
                account_number, first_name, last_name, balance, currency,
                account_type, account_status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        );

        let row: AccountRow = sqlx::query_as(&sql)
            .bind(&account.account_number)
            .bind(&account.first_name)
            .bind(&account.last_name)
            .bind(account.balance)
            .bind(&account.currency)
            .bind(account.account_type.as_str())
            .bind(account.account_status.as_str())
            .fetch_one(&self.pool)
            .await?;

        account_from_row(row)
    }
}

#[async_trait]
impl AccountLookup for PgLedgerStore {
    async fn get_by_account_number(&self, account_number: &str) -> Result<Account, LedgerError> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE account_number = $1",
            ACCOUNT_COLUMNS
        );

        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(account_number)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => account_from_row(row),
            None => Err(LedgerError::AccountNotFound(account_number.to_string())),
        }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, LedgerError> {
        let mut tx = self.pool.begin().await?;

        // SET does not take bind parameters; the value is a plain integer.
        let statement = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis());
        sqlx::query(&statement).execute(&mut *tx).await?;

        Ok(Box::new(PgLedgerTransaction { tx }))
    }
}

/// Open PostgreSQL transaction. `sqlx` rolls it back when dropped.
struct PgLedgerTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PgLedgerTransaction {
    async fn lock_account(&mut self, account_number: &str) -> Result<Account, LedgerError> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE account_number = $1 FOR UPDATE",
            ACCOUNT_COLUMNS
        );

        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(account_number)
            .fetch_optional(&mut *self.tx)
            .await?;

        match row {
            Some(row) => account_from_row(row),
            None => Err(LedgerError::AccountNotFound(account_number.to_string())),
        }
    }

    async fn update_balance(&mut self, account_id: i64, new_balance: Decimal) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(new_balance)
        .bind(account_id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NoRowsUpdated(account_id));
        }

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
