//! Persistence for reservations and the daily ledger.
//!
//! The store owns two collections:
//! - `reservations`: keyed by [`ReservationId`], with a secondary index of
//!   active holds per bucket for the budget sum and the expiry scan
//! - `daily_ledger`: one [`LedgerEntry`] per `(connection, day)`
//!
//! Only the engine writes to a store. Terminal transitions go through
//! [`BudgetStore::apply`], which re-checks that the reservation is still
//! active and books any ledger credit in the same atomic unit.

mod memory;
mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

use budgetguard_types::{
    BucketKey, BucketUsage, LedgerEntry, Reservation, ReservationId, Resolution, Result,
    Transition,
};
use chrono::{DateTime, Utc};

/// Storage backend for the reservation engine.
///
/// Reads of a bucket followed by a write to it are only consistent when the
/// caller serialises them; the engine does so with [`crate::BucketLocks`].
pub trait BudgetStore: Send + Sync {
    /// Confirmed spend and active holds for one bucket.
    fn bucket_usage(&self, key: &BucketKey) -> Result<BucketUsage>;

    /// Persist a freshly created (active) reservation.
    fn insert_reservation(&self, reservation: &Reservation) -> Result<()>;

    fn reservation(&self, id: &ReservationId) -> Result<Option<Reservation>>;

    /// Atomically apply `resolution` if the reservation is still active,
    /// crediting the ledger for commits. `None` when the ID is unknown.
    fn apply(
        &self,
        id: &ReservationId,
        resolution: Resolution,
        now: DateTime<Utc>,
    ) -> Result<Option<(Reservation, Transition)>>;

    /// Atomically move PENDING → PROCESSING; any other state is returned
    /// unchanged. `None` when the ID is unknown.
    fn mark_processing(&self, id: &ReservationId, now: DateTime<Utc>)
    -> Result<Option<Reservation>>;

    /// Active reservations whose deadline lies before `now`.
    fn expired_candidates(&self, now: DateTime<Utc>) -> Result<Vec<(ReservationId, BucketKey)>>;

    fn ledger_entry(&self, key: &BucketKey) -> Result<Option<LedgerEntry>>;
}
