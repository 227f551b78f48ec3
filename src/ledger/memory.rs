//! In-memory ledger store
//!
//! Each account sits behind its own `tokio::sync::Mutex`; holding the owned
//! guard is the row lock. Committed state is mirrored into a snapshot map so
//! plain lookups never wait on a lock holder, as with a non-locking SELECT.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::Account;

use super::{AccountLookup, LedgerError, LedgerStore, LedgerTransaction};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Accounts {
    rows: HashMap<String, Arc<AsyncMutex<Account>>>,
    committed: HashMap<String, Account>,
}

/// Ledger store kept in process memory
#[derive(Clone)]
pub struct InMemoryLedger {
    accounts: Arc<Mutex<Accounts>>,
    next_id: Arc<AtomicI64>,
    lock_timeout: Duration,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            accounts: Arc::new(Mutex::new(Accounts::default())),
            next_id: Arc::new(AtomicI64::new(1)),
            lock_timeout,
        }
    }

    /// Insert an account, assigning it the next id
    pub fn insert(&self, mut account: Account) -> Account {
        account.id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        accounts.committed.insert(account.account_number.clone(), account.clone());
        accounts.rows.insert(
            account.account_number.clone(),
            Arc::new(AsyncMutex::new(account.clone())),
        );

        account
    }

    /// Last committed balance of an account
    pub fn balance_of(&self, account_number: &str) -> Option<Decimal> {
        let accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        accounts.committed.get(account_number).map(|a| a.balance)
    }

    fn row(&self, account_number: &str) -> Option<Arc<AsyncMutex<Account>>> {
        let accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        accounts.rows.get(account_number).cloned()
    }

    fn publish_committed(&self, account: &Account) {
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        accounts
            .committed
            .insert(account.account_number.clone(), account.clone());
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountLookup for InMemoryLedger {
    async fn get_by_account_number(&self, account_number: &str) -> Result<Account, LedgerError> {
        let accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        accounts
            .committed
            .get(account_number)
            .cloned()
            .ok_or_else(|| LedgerError::AccountNotFound(account_number.to_string()))
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, LedgerError> {
        Ok(Box::new(InMemoryTransaction {
            ledger: self.clone(),
            held: Vec::new(),
        }))
    }
}

struct HeldRow {
    guard: OwnedMutexGuard<Account>,
    pending_balance: Option<Decimal>,
}

struct InMemoryTransaction {
    ledger: InMemoryLedger,
    held: Vec<HeldRow>,
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn lock_account(&mut self, account_number: &str) -> Result<Account, LedgerError> {
        if let Some(row) = self
            .held
            .iter()
            .find(|row| row.guard.account_number == account_number)
        {
            let mut account = (*row.guard).clone();
            if let Some(balance) = row.pending_balance {
                account.balance = balance;
            }
            return Ok(account);
        }

        let row = self
            .ledger
            .row(account_number)
            .ok_or_else(|| LedgerError::AccountNotFound(account_number.to_string()))?;

        let guard = tokio::time::timeout(self.ledger.lock_timeout, row.lock_owned())
            .await
            .map_err(|_| {
                LedgerError::LockTimeout(format!(
                    "account {} still locked after {:?}",
                    account_number, self.ledger.lock_timeout
                ))
            })?;

        let account = (*guard).clone();
        self.held.push(HeldRow {
            guard,
            pending_balance: None,
        });

        Ok(account)
    }

    async fn update_balance(&mut self, account_id: i64, new_balance: Decimal) -> Result<(), LedgerError> {
        let row = self
            .held
            .iter_mut()
            .find(|row| row.guard.id == account_id)
            .ok_or(LedgerError::NoRowsUpdated(account_id))?;

        row.pending_balance = Some(new_balance);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let InMemoryTransaction { ledger, held } = *self;

        for mut row in held {
            if let Some(balance) = row.pending_balance.take() {
                row.guard.balance = balance;
                row.guard.updated_at = Utc::now();
            }
            ledger.publish_committed(&row.guard);
            // Dropping the guard releases the row lock.
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        Ok(())
    }
}
