//! Results of an admission decision.

use serde::{Deserialize, Serialize};

use crate::ReservationId;

/// Outcome of asking the engine to hold budget for a spend.
///
/// Running out of budget is an expected business outcome, so it is a
/// variant here rather than an error. The caller must deny the payment
/// and should not retry the same amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationOutcome {
    /// The hold was created.
    Reserved {
        reservation_id: ReservationId,
        amount_sats: u64,
        /// Budget left for the day after this hold.
        remaining_budget: u64,
    },
    /// The spend does not fit in what is left of today's budget.
    InsufficientBudget { requested: u64, available: u64 },
    /// The connection has no daily limit; nothing is tracked.
    Unlimited,
}

impl ReservationOutcome {
    /// Whether the payment may proceed.
    #[must_use]
    pub fn is_permitted(&self) -> bool {
        !matches!(self, Self::InsufficientBudget { .. })
    }

    /// The hold to commit or release afterwards, if one was created.
    #[must_use]
    pub fn reservation_id(&self) -> Option<ReservationId> {
        match self {
            Self::Reserved { reservation_id, .. } => Some(*reservation_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permitted_outcomes() {
        let id = ReservationId::new();
        let reserved = ReservationOutcome::Reserved {
            reservation_id: id,
            amount_sats: 200,
            remaining_budget: 800,
        };
        assert!(reserved.is_permitted());
        assert_eq!(reserved.reservation_id(), Some(id));

        assert!(ReservationOutcome::Unlimited.is_permitted());
        assert_eq!(ReservationOutcome::Unlimited.reservation_id(), None);

        let denied = ReservationOutcome::InsufficientBudget {
            requested: 900,
            available: 800,
        };
        assert!(!denied.is_permitted());
        assert_eq!(denied.reservation_id(), None);
    }
}
