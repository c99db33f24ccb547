//! In-memory store. State is lost on restart; intended for tests and for
//! hosts that keep their own durable copy.

use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard},
};

use budgetguard_types::{
    BucketKey, BucketUsage, BudgetError, LedgerEntry, Reservation, ReservationId, Resolution,
    Result, Transition,
};
use chrono::{DateTime, Utc};

use super::BudgetStore;

#[derive(Debug, Default)]
struct MemoryState {
    /// `ReservationId → Reservation`, terminal rows included.
    reservations: HashMap<ReservationId, Reservation>,
    /// `BucketKey → active reservation IDs`
    active: HashMap<BucketKey, HashSet<ReservationId>>,
    /// `BucketKey → LedgerEntry`
    ledger: HashMap<BucketKey, LedgerEntry>,
}

impl MemoryState {
    fn drop_active(&mut self, key: &BucketKey, id: &ReservationId) {
        if let Some(ids) = self.active.get_mut(key) {
            ids.remove(id);
            if ids.is_empty() {
                self.active.remove(key);
            }
        }
    }
}

/// All collections behind a single mutex, so every method is atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| BudgetError::Internal("memory store mutex poisoned".into()))
    }

    /// Number of reservations stored, terminal ones included.
    pub fn reservation_count(&self) -> Result<usize> {
        Ok(self.lock()?.reservations.len())
    }
}

impl BudgetStore for MemoryStore {
    fn bucket_usage(&self, key: &BucketKey) -> Result<BucketUsage> {
        let state = self.lock()?;
        let confirmed_spend = state.ledger.get(key).map_or(0, |e| e.confirmed_spend);
        let active_held = state
            .active
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|id| state.reservations.get(id))
            .fold(0u64, |sum, r| sum.saturating_add(r.amount_sats));
        Ok(BucketUsage {
            confirmed_spend,
            active_held,
        })
    }

    fn insert_reservation(&self, reservation: &Reservation) -> Result<()> {
        let mut state = self.lock()?;
        if state.reservations.contains_key(&reservation.id) {
            return Err(BudgetError::Internal(format!(
                "reservation {} already stored",
                reservation.id
            )));
        }
        if reservation.is_active() {
            state
                .active
                .entry(reservation.bucket_key())
                .or_default()
                .insert(reservation.id);
        }
        state
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(())
    }

    fn reservation(&self, id: &ReservationId) -> Result<Option<Reservation>> {
        Ok(self.lock()?.reservations.get(id).cloned())
    }

    fn apply(
        &self,
        id: &ReservationId,
        resolution: Resolution,
        now: DateTime<Utc>,
    ) -> Result<Option<(Reservation, Transition)>> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        let Some(reservation) = state.reservations.get_mut(id) else {
            return Ok(None);
        };
        let transition = reservation.resolve(resolution, now);
        let updated = reservation.clone();

        if let Transition::Applied { ledger_credit, .. } = transition {
            let key = updated.bucket_key();
            state.drop_active(&key, id);
            if let Some(credit) = ledger_credit {
                state
                    .ledger
                    .entry(key)
                    .or_insert_with_key(|k| LedgerEntry::new(k, now))
                    .credit(credit, now);
            }
        }

        Ok(Some((updated, transition)))
    }

    fn mark_processing(
        &self,
        id: &ReservationId,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>> {
        let mut state = self.lock()?;
        Ok(state.reservations.get_mut(id).map(|reservation| {
            reservation.start_processing(now);
            reservation.clone()
        }))
    }

    fn expired_candidates(&self, now: DateTime<Utc>) -> Result<Vec<(ReservationId, BucketKey)>> {
        let state = self.lock()?;
        Ok(state
            .active
            .iter()
            .flat_map(|(key, ids)| ids.iter().map(move |id| (key, id)))
            .filter_map(|(key, id)| {
                let reservation = state.reservations.get(id)?;
                reservation
                    .is_expired_at(now)
                    .then(|| (*id, key.clone()))
            })
            .collect())
    }

    fn ledger_entry(&self, key: &BucketKey) -> Result<Option<LedgerEntry>> {
        Ok(self.lock()?.ledger.get(key).cloned())
    }
}
