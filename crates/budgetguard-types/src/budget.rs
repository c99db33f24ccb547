//! Day-bucketed budget accounting types.
//!
//! All spend accounting is bucketed by `(connection, UTC calendar day)`.
//! Crossing midnight UTC starts a fresh bucket with the full allowance,
//! regardless of what was spent the day before.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ConnectionId;

/// A UTC calendar day used as the accounting bucket. Displays as `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct BudgetDate(pub NaiveDate);

impl BudgetDate {
    /// The budget day an instant falls into.
    #[must_use]
    pub fn from_instant(instant: DateTime<Utc>) -> Self {
        Self(instant.date_naive())
    }

    /// Build from a calendar date. Returns `None` for impossible dates.
    #[must_use]
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }
}

impl fmt::Display for BudgetDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for BudgetDate {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").map(Self)
    }
}

/// The unit of budget locking and accounting: one connection on one day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct BucketKey {
    pub connection_id: ConnectionId,
    pub budget_date: BudgetDate,
}

impl BucketKey {
    #[must_use]
    pub fn new(connection_id: ConnectionId, budget_date: BudgetDate) -> Self {
        Self {
            connection_id,
            budget_date,
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.connection_id, self.budget_date)
    }
}

/// Consumption of one bucket at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketUsage {
    /// Sum of committed spend booked against the bucket.
    pub confirmed_spend: u64,
    /// Sum of amounts held by PENDING/PROCESSING reservations.
    pub active_held: u64,
}

impl BucketUsage {
    /// Everything counted against the budget: confirmed plus held.
    #[must_use]
    pub fn total_committed(&self) -> u64 {
        self.confirmed_spend.saturating_add(self.active_held)
    }

    /// What remains of `daily_budget`, floored at zero.
    #[must_use]
    pub fn available_under(&self, daily_budget: u64) -> u64 {
        daily_budget.saturating_sub(self.total_committed())
    }
}

/// One row of the daily ledger: confirmed spend for a bucket.
///
/// `confirmed_spend` only ever grows. Rows are created lazily by the first
/// commit that lands in the bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub connection_id: ConnectionId,
    pub budget_date: BudgetDate,
    pub confirmed_spend: u64,
    pub last_updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// A zero-spend row for `key`.
    #[must_use]
    pub fn new(key: &BucketKey, now: DateTime<Utc>) -> Self {
        Self {
            connection_id: key.connection_id.clone(),
            budget_date: key.budget_date,
            confirmed_spend: 0,
            last_updated_at: now,
        }
    }

    /// Book `amount_sats` of confirmed spend.
    pub fn credit(&mut self, amount_sats: u64, now: DateTime<Utc>) {
        self.confirmed_spend = self.confirmed_spend.saturating_add(amount_sats);
        self.last_updated_at = now;
    }

    #[must_use]
    pub fn key(&self) -> BucketKey {
        BucketKey::new(self.connection_id.clone(), self.budget_date)
    }
}

/// A connection as seen through the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub connection_id: ConnectionId,
    /// Daily allowance in sats. `None` means unlimited.
    pub daily_budget: Option<u64>,
}

impl Connection {
    #[must_use]
    pub fn limited(connection_id: impl Into<String>, daily_budget: u64) -> Self {
        Self {
            connection_id: ConnectionId::new(connection_id),
            daily_budget: Some(daily_budget),
        }
    }

    #[must_use]
    pub fn unlimited(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: ConnectionId::new(connection_id),
            daily_budget: None,
        }
    }
}

/// Snapshot of a budget-limited connection's standing for one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub connection_id: ConnectionId,
    pub budget_date: BudgetDate,
    pub daily_budget: u64,
    pub confirmed_spend: u64,
    pub active_held: u64,
    pub available: u64,
}

impl BudgetStatus {
    #[must_use]
    pub fn new(key: &BucketKey, daily_budget: u64, usage: BucketUsage) -> Self {
        Self {
            connection_id: key.connection_id.clone(),
            budget_date: key.budget_date,
            daily_budget,
            confirmed_spend: usage.confirmed_spend,
            active_held: usage.active_held,
            available: usage.available_under(daily_budget),
        }
    }
}
