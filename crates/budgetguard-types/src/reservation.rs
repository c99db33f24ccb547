//! # Reservation: a time-bounded hold on a connection's daily budget
//!
//! A `Reservation` is created when the engine admits a spend and lives until
//! the caller commits or releases it, or the sweeper expires it.
//!
//! ## State Machine
//!
//! ```text
//!             create                 timeout sweep
//!    ──────▶ PENDING ───────────────────────────────▶ EXPIRED
//!               │
//!               ▼
//!          PROCESSING ─────────────timeout sweep────▶ EXPIRED
//!               │
//!      ┌────────┴────────┐
//!      │ success          │ failure/cancel
//!      ▼                  ▼
//!  COMMITTED          RELEASED
//! ```
//!
//! PENDING may also be committed or released directly. COMMITTED, RELEASED
//! and EXPIRED are terminal: once a reservation reaches one of them, every
//! later resolution is a no-op.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BucketKey, BudgetDate, ConnectionId, RequestId, ReservationId};

/// The lifecycle state of a Reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Hold created, payment not yet started.
    Pending,
    /// Payment execution in progress.
    Processing,
    /// Payment settled; the spend was booked in the ledger.
    Committed,
    /// Payment failed or was cancelled; hold returned.
    Released,
    /// Hold abandoned past its deadline and reclaimed by the sweeper.
    Expired,
}

impl ReservationStatus {
    /// PENDING and PROCESSING count against the budget.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Can a reservation in this state move to `target`?
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (
                Self::Pending,
                Self::Processing | Self::Committed | Self::Released | Self::Expired
            ) | (
                Self::Processing,
                Self::Committed | Self::Released | Self::Expired
            )
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Processing => write!(f, "PROCESSING"),
            Self::Committed => write!(f, "COMMITTED"),
            Self::Released => write!(f, "RELEASED"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// A terminal outcome requested for an active reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Book the spend. `actual_sats` overrides the held amount when the
    /// settled amount differed from the quote.
    Commit { actual_sats: Option<u64> },
    /// Return the hold without booking anything.
    Release,
    /// Reclaim an abandoned hold.
    Expire,
}

impl Resolution {
    #[must_use]
    pub fn target(&self) -> ReservationStatus {
        match self {
            Self::Commit { .. } => ReservationStatus::Committed,
            Self::Release => ReservationStatus::Released,
            Self::Expire => ReservationStatus::Expired,
        }
    }
}

/// What applying a [`Resolution`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The reservation moved to `status`. A commit carries the amount that
    /// must be added to the ledger.
    Applied {
        status: ReservationStatus,
        ledger_credit: Option<u64>,
    },
    /// The reservation was already terminal; nothing changed.
    AlreadyTerminal(ReservationStatus),
}

impl Transition {
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// A hold against one connection's budget for one payment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub connection_id: ConnectionId,
    pub request_id: RequestId,
    /// Amount held, in sats. An upper bound on what the payment may book.
    pub amount_sats: u64,
    pub status: ReservationStatus,
    /// The bucket this hold counts against; commits always book here.
    pub budget_date: BudgetDate,
    /// Amount booked in the ledger when committed.
    pub committed_sats: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// A fresh PENDING hold created at `now`.
    #[must_use]
    pub fn pending(
        key: &BucketKey,
        request_id: RequestId,
        amount_sats: u64,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            connection_id: key.connection_id.clone(),
            request_id,
            amount_sats,
            status: ReservationStatus::Pending,
            budget_date: key.budget_date,
            committed_sats: None,
            created_at: now,
            expires_at,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn bucket_key(&self) -> BucketKey {
        BucketKey::new(self.connection_id.clone(), self.budget_date)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// `true` once `expires_at` lies strictly before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Move PENDING → PROCESSING. Returns `false` (and changes nothing)
    /// from any other state.
    pub fn start_processing(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != ReservationStatus::Pending {
            return false;
        }
        self.status = ReservationStatus::Processing;
        self.updated_at = now;
        true
    }

    /// Apply a terminal resolution if the reservation is still active.
    pub fn resolve(&mut self, resolution: Resolution, now: DateTime<Utc>) -> Transition {
        let target = resolution.target();
        if !self.status.can_transition_to(target) {
            return Transition::AlreadyTerminal(self.status);
        }

        let ledger_credit = match resolution {
            Resolution::Commit { actual_sats } => Some(actual_sats.unwrap_or(self.amount_sats)),
            Resolution::Release | Resolution::Expire => None,
        };

        self.status = target;
        self.committed_sats = ledger_credit;
        self.updated_at = now;
        Transition::Applied {
            status: target,
            ledger_credit,
        }
    }
}
