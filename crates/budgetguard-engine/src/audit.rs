//! Budget invariant checker.
//!
//! Invariant for every connection and day:
//! ```text
//! confirmed_spend + Σ active holds ≤ daily_budget
//! ```
//!
//! The engine never admits a hold that breaks it, so a violation means
//! either a caller committed more than it held, the budget was lowered
//! below what was already spent, or something wrote to the store behind
//! the engine's back. All three deserve an alert.

use budgetguard_types::{BucketKey, BucketUsage, BudgetError, Result};

use crate::{registry::ConnectionRegistry, store::BudgetStore};

/// Checks one bucket against its connection's current budget.
pub struct BudgetAuditor<'a> {
    registry: &'a dyn ConnectionRegistry,
    store: &'a dyn BudgetStore,
}

impl<'a> BudgetAuditor<'a> {
    #[must_use]
    pub fn new(registry: &'a dyn ConnectionRegistry, store: &'a dyn BudgetStore) -> Self {
        Self { registry, store }
    }

    /// Verify the invariant for `key`, returning the usage that was checked.
    ///
    /// Unlimited connections always pass.
    ///
    /// # Errors
    /// - [`BudgetError::ConnectionNotFound`] if the registry does not know the connection
    /// - [`BudgetError::InvariantViolation`] if usage exceeds the budget
    pub fn verify(&self, key: &BucketKey) -> Result<BucketUsage> {
        let connection = self
            .registry
            .lookup(&key.connection_id)
            .ok_or_else(|| BudgetError::ConnectionNotFound(key.connection_id.clone()))?;
        let usage = self.store.bucket_usage(key)?;

        if let Some(budget) = connection.daily_budget {
            if usage.total_committed() > budget {
                tracing::error!(
                    bucket = %key,
                    confirmed = usage.confirmed_spend,
                    held = usage.active_held,
                    budget,
                    "Budget invariant violated"
                );
                return Err(BudgetError::InvariantViolation {
                    reason: format!(
                        "{key}: confirmed {} + held {} > budget {budget}",
                        usage.confirmed_spend, usage.active_held
                    ),
                });
            }
        }
        Ok(usage)
    }
}
