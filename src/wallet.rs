//! User wallets
//!
//! Each account sits behind its own mutex, so every debit/credit for one user
//! is a single serialized read-modify-write while unrelated accounts proceed in
//! parallel. Every successful mutation appends exactly one audit entry.

use crate::errors::{EngineError, EngineResult};
use crate::games::{Amount, UserId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Deposit,
    Debit,
    Credit,
}

/// Audit row written with every balance change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub seq: u64,
    pub kind: EntryKind,
    pub amount: Amount,
    pub balance_after: Amount,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Account {
    balance: Amount,
    entries: Vec<LedgerEntry>,
}

impl Account {
    fn record(&mut self, kind: EntryKind, amount: Amount, reason: &str, reference: Option<&str>) {
        let seq = self.entries.len() as u64 + 1;
        self.entries.push(LedgerEntry {
            seq,
            kind,
            amount,
            balance_after: self.balance,
            reason: reason.to_string(),
            reference: reference.map(str::to_string),
            at: Utc::now(),
        });
    }
}

/// Thread-safe set of user accounts
#[derive(Default)]
pub struct WalletLedger {
    accounts: DashMap<UserId, Arc<Mutex<Account>>>,
}

impl WalletLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an account funded with `initial_balance`. An existing account is left untouched.
    pub fn open_account(&self, user_id: &str, initial_balance: Amount) -> EngineResult<Amount> {
        let account = self
            .accounts
            .entry(user_id.to_string())
            .or_insert_with(|| {
                let mut account = Account {
                    balance: initial_balance,
                    entries: Vec::new(),
                };
                if initial_balance > 0 {
                    account.record(EntryKind::Deposit, initial_balance, "opening_balance", None);
                }
                Arc::new(Mutex::new(account))
            })
            .clone();
        let balance = account.lock()?.balance;
        Ok(balance)
    }

    // The shard guard is released before the account mutex is taken.
    fn account(&self, user_id: &str) -> EngineResult<Arc<Mutex<Account>>> {
        self.accounts
            .get(user_id)
            .map(|a| Arc::clone(a.value()))
            .ok_or_else(|| EngineError::not_found(format!("wallet account {}", user_id)))
    }

    /// Remove `amount`; fails without side effects if the balance is short
    pub fn debit(
        &self,
        user_id: &str,
        amount: Amount,
        reason: &str,
        reference: Option<&str>,
    ) -> EngineResult<Amount> {
        if amount == 0 {
            return Err(EngineError::validation("debit amount must be positive"));
        }
        let account = self.account(user_id)?;
        let mut account = account.lock()?;
        if account.balance < amount {
            return Err(EngineError::InsufficientBalance {
                user_id: user_id.to_string(),
                required: amount,
                available: account.balance,
            });
        }
        account.balance -= amount;
        account.record(EntryKind::Debit, amount, reason, reference);
        debug!(user_id, amount, balance = account.balance, reason, "wallet debit");
        Ok(account.balance)
    }

    /// Add `amount`; zero is a no-op without an audit entry
    pub fn credit(
        &self,
        user_id: &str,
        amount: Amount,
        reason: &str,
        reference: Option<&str>,
    ) -> EngineResult<Amount> {
        let account = self.account(user_id)?;
        let mut account = account.lock()?;
        if amount == 0 {
            return Ok(account.balance);
        }
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or_else(|| EngineError::internal(format!("balance overflow for {}", user_id)))?;
        account.record(EntryKind::Credit, amount, reason, reference);
        debug!(user_id, amount, balance = account.balance, reason, "wallet credit");
        Ok(account.balance)
    }

    /// External top-up, e.g. a verified deposit
    pub fn deposit(&self, user_id: &str, amount: Amount, reference: Option<&str>) -> EngineResult<Amount> {
        let account = self.account(user_id)?;
        let mut account = account.lock()?;
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or_else(|| EngineError::internal(format!("balance overflow for {}", user_id)))?;
        account.record(EntryKind::Deposit, amount, "deposit", reference);
        Ok(account.balance)
    }

    pub fn balance(&self, user_id: &str) -> EngineResult<Amount> {
        let account = self.account(user_id)?;
        let balance = account.lock()?.balance;
        Ok(balance)
    }

    pub fn entries(&self, user_id: &str) -> EngineResult<Vec<LedgerEntry>> {
        let account = self.account(user_id)?;
        let entries = account.lock()?.entries.clone();
        Ok(entries)
    }
}
