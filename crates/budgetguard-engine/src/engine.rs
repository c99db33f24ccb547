//! The budget reservation engine.
//!
//! Lifecycle of one payment:
//! 1. `reserve_budget` → hold the amount against today's bucket (PENDING)
//! 2. `begin_processing` → optional, marks the payment as in flight
//! 3. `commit_reservation` → payment settled, spend booked in the ledger
//! 4. `release_reservation` → payment failed, hold returned
//!
//! Holds nobody resolves are reclaimed by `cleanup_expired_reservations`.

use std::sync::Arc;

use budgetguard_types::{
    BucketKey, BucketUsage, BudgetDate, BudgetError, BudgetStatus, Clock, ConnectionId,
    EngineConfig, LedgerEntry, RequestId, Reservation, ReservationId, ReservationOutcome,
    Resolution, Result, SystemClock, Transition,
};
use chrono::{DateTime, Utc};

use crate::{
    audit::BudgetAuditor, locks::BucketLocks, registry::ConnectionRegistry, store::BudgetStore,
};

/// Admission control for spends against per-connection daily budgets.
///
/// Safe to share across threads (`Arc<BudgetEngine>`). All mutations of a
/// `(connection, day)` bucket are serialised through [`BucketLocks`];
/// unrelated buckets proceed in parallel.
pub struct BudgetEngine {
    registry: Arc<dyn ConnectionRegistry>,
    store: Arc<dyn BudgetStore>,
    clock: Arc<dyn Clock>,
    locks: BucketLocks,
    config: EngineConfig,
}

impl BudgetEngine {
    /// Create an engine on the wall clock.
    ///
    /// # Errors
    /// Returns [`BudgetError::Configuration`] if `config` does not validate.
    pub fn new(
        registry: Arc<dyn ConnectionRegistry>,
        store: Arc<dyn BudgetStore>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            store,
            clock: Arc::new(SystemClock),
            locks: BucketLocks::new(),
            config,
        })
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current instant according to the engine's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Number of buckets with a live lock. Shrinks after each sweep.
    #[must_use]
    pub fn tracked_buckets(&self) -> usize {
        self.locks.len()
    }

    // =================================================================
    // Admission
    // =================================================================

    /// Try to hold `amount_sats` against the connection's budget for today.
    ///
    /// The read of confirmed spend and active holds, the availability check
    /// and the insert of the new hold all run under the bucket lock, so two
    /// concurrent calls can never both claim the same remaining budget.
    ///
    /// # Errors
    /// - [`BudgetError::InvalidAmount`] / [`BudgetError::InvalidTimeout`] on bad input
    /// - [`BudgetError::ConnectionNotFound`] if the registry does not know the connection
    pub fn reserve_budget(
        &self,
        connection_id: &ConnectionId,
        amount_sats: u64,
        request_id: RequestId,
        timeout_ms: u64,
    ) -> Result<ReservationOutcome> {
        self.config.check_amount(amount_sats)?;
        self.config.check_timeout(timeout_ms)?;
        let invalid_timeout = || BudgetError::InvalidTimeout {
            timeout_ms,
            max_ms: self.config.max_timeout_ms,
        };
        let ttl = chrono::Duration::try_milliseconds(
            i64::try_from(timeout_ms).map_err(|_| invalid_timeout())?,
        )
        .ok_or_else(invalid_timeout)?;

        let connection = self
            .registry
            .lookup(connection_id)
            .ok_or_else(|| BudgetError::ConnectionNotFound(connection_id.clone()))?;
        let Some(daily_budget) = connection.daily_budget else {
            tracing::debug!(connection = %connection_id, amount_sats, "Unlimited connection, not tracked");
            return Ok(ReservationOutcome::Unlimited);
        };

        let now = self.clock.now();
        let expires_at = now.checked_add_signed(ttl).ok_or_else(invalid_timeout)?;
        let key = BucketKey::new(connection_id.clone(), BudgetDate::from_instant(now));

        self.locks.with_lock(&key, || {
            let usage = self.store.bucket_usage(&key)?;
            let available = usage.available_under(daily_budget);

            if amount_sats > available {
                tracing::warn!(
                    bucket = %key,
                    request = %request_id,
                    requested = amount_sats,
                    available,
                    "Insufficient budget"
                );
                return Ok(ReservationOutcome::InsufficientBudget {
                    requested: amount_sats,
                    available,
                });
            }

            let reservation = Reservation::pending(&key, request_id, amount_sats, now, expires_at);
            self.store.insert_reservation(&reservation)?;

            let remaining_budget = available - amount_sats;
            tracing::info!(
                reservation = %reservation.id,
                bucket = %key,
                request = %reservation.request_id,
                amount_sats,
                remaining_budget,
                expires_at = %reservation.expires_at,
                "Budget reserved"
            );
            Ok(ReservationOutcome::Reserved {
                reservation_id: reservation.id,
                amount_sats,
                remaining_budget,
            })
        })
    }

    /// [`reserve_budget`](Self::reserve_budget) with the configured default timeout.
    pub fn reserve_budget_default(
        &self,
        connection_id: &ConnectionId,
        amount_sats: u64,
        request_id: RequestId,
    ) -> Result<ReservationOutcome> {
        self.reserve_budget(
            connection_id,
            amount_sats,
            request_id,
            self.config.default_timeout_ms,
        )
    }

    // =================================================================
    // Transitions
    // =================================================================

    /// Mark a PENDING reservation as PROCESSING. The hold still counts
    /// against the budget and still expires. Any other state is left as is.
    ///
    /// # Errors
    /// Returns [`BudgetError::ReservationNotFound`] for an unknown ID.
    pub fn begin_processing(&self, reservation_id: ReservationId) -> Result<Reservation> {
        let key = self.load(reservation_id)?.bucket_key();
        self.locks.with_lock(&key, || {
            let reservation = self
                .store
                .mark_processing(&reservation_id, self.clock.now())?
                .ok_or(BudgetError::ReservationNotFound(reservation_id))?;
            tracing::debug!(reservation = %reservation_id, status = %reservation.status, "Processing started");
            Ok(reservation)
        })
    }

    /// Book the spend for an active reservation.
    ///
    /// `actual_amount_sats` overrides the held amount when the settled
    /// amount differs from the quote. The spend lands in the reservation's
    /// own budget day, even if the commit arrives after midnight. Committing
    /// a reservation that is already terminal is a no-op, whatever the
    /// actual amount.
    ///
    /// # Errors
    /// - [`BudgetError::ReservationNotFound`] for an unknown ID
    /// - [`BudgetError::InvalidAmount`] if the reservation is still active and
    ///   the actual amount is out of range
    pub fn commit_reservation(
        &self,
        reservation_id: ReservationId,
        actual_amount_sats: Option<u64>,
    ) -> Result<()> {
        self.resolve(
            reservation_id,
            Resolution::Commit {
                actual_sats: actual_amount_sats,
            },
        )
        .map(|_| ())
    }

    /// Return an active reservation's hold without booking anything.
    /// Releasing a terminal reservation is a no-op.
    ///
    /// # Errors
    /// Returns [`BudgetError::ReservationNotFound`] for an unknown ID.
    pub fn release_reservation(&self, reservation_id: ReservationId) -> Result<()> {
        self.resolve(reservation_id, Resolution::Release).map(|_| ())
    }

    /// Expire every active reservation whose deadline lies before `now`.
    /// Returns how many were expired.
    ///
    /// Each row is re-checked under its bucket lock, so a reservation that
    /// was committed or released while the sweep was running stays as it is.
    pub fn cleanup_expired_reservations(&self, now: DateTime<Utc>) -> Result<usize> {
        let candidates = self.store.expired_candidates(now)?;
        let mut expired = 0;

        for (reservation_id, key) in candidates {
            let outcome = self
                .locks
                .with_lock(&key, || self.store.apply(&reservation_id, Resolution::Expire, now))?;
            if let Some((reservation, Transition::Applied { .. })) = outcome {
                expired += 1;
                tracing::debug!(
                    reservation = %reservation_id,
                    bucket = %key,
                    amount_sats = reservation.amount_sats,
                    "Reservation expired"
                );
            }
        }

        let pruned = self.locks.prune();
        if expired > 0 {
            tracing::info!(expired, pruned_locks = pruned, "Expired abandoned reservations");
        }
        Ok(expired)
    }

    fn resolve(&self, reservation_id: ReservationId, resolution: Resolution) -> Result<Transition> {
        let reservation = self.load(reservation_id)?;
        if reservation.status.is_terminal() {
            tracing::debug!(
                reservation = %reservation_id,
                status = %reservation.status,
                requested = %resolution.target(),
                "Reservation already terminal, ignoring"
            );
            return Ok(Transition::AlreadyTerminal(reservation.status));
        }
        if let Resolution::Commit {
            actual_sats: Some(actual),
        } = resolution
        {
            self.config.check_amount(actual)?;
        }

        let key = reservation.bucket_key();
        self.locks.with_lock(&key, || {
            let (updated, transition) = self
                .store
                .apply(&reservation_id, resolution, self.clock.now())?
                .ok_or(BudgetError::ReservationNotFound(reservation_id))?;

            match transition {
                Transition::Applied {
                    status,
                    ledger_credit,
                } => tracing::info!(
                    reservation = %reservation_id,
                    bucket = %key,
                    status = %status,
                    held = updated.amount_sats,
                    booked = ?ledger_credit,
                    "Reservation resolved"
                ),
                Transition::AlreadyTerminal(status) => tracing::debug!(
                    reservation = %reservation_id,
                    status = %status,
                    "Reservation became terminal concurrently, ignoring"
                ),
            }
            Ok(transition)
        })
    }

    fn load(&self, reservation_id: ReservationId) -> Result<Reservation> {
        self.store
            .reservation(&reservation_id)?
            .ok_or(BudgetError::ReservationNotFound(reservation_id))
    }

    // =================================================================
    // Queries
    // =================================================================

    pub fn reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>> {
        self.store.reservation(&reservation_id)
    }

    pub fn ledger_entry(
        &self,
        connection_id: &ConnectionId,
        budget_date: BudgetDate,
    ) -> Result<Option<LedgerEntry>> {
        self.store
            .ledger_entry(&BucketKey::new(connection_id.clone(), budget_date))
    }

    /// Today's standing for a connection. `None` for unlimited connections.
    ///
    /// # Errors
    /// Returns [`BudgetError::ConnectionNotFound`] for an unknown connection.
    pub fn budget_status(&self, connection_id: &ConnectionId) -> Result<Option<BudgetStatus>> {
        let connection = self
            .registry
            .lookup(connection_id)
            .ok_or_else(|| BudgetError::ConnectionNotFound(connection_id.clone()))?;
        let Some(daily_budget) = connection.daily_budget else {
            return Ok(None);
        };

        let key = BucketKey::new(
            connection_id.clone(),
            BudgetDate::from_instant(self.clock.now()),
        );
        let usage = self.locks.with_lock(&key, || self.store.bucket_usage(&key))?;
        Ok(Some(BudgetStatus::new(&key, daily_budget, usage)))
    }

    /// Check the budget invariant for one bucket under its lock.
    ///
    /// # Errors
    /// Returns [`BudgetError::InvariantViolation`] if the bucket is over budget.
    pub fn audit_bucket(&self, key: &BucketKey) -> Result<BucketUsage> {
        self.locks.with_lock(key, || {
            BudgetAuditor::new(self.registry.as_ref(), self.store.as_ref()).verify(key)
        })
    }
}

#[cfg(test)]
mod tests {
    use budgetguard_types::{Connection, ManualClock, ReservationStatus};
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::{registry::StaticRegistry, store::MemoryStore};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 31, 12, 0, 0).unwrap()
    }

    fn setup(budget: Option<u64>) -> (BudgetEngine, Arc<ManualClock>, ConnectionId) {
        let connection = match budget {
            Some(b) => Connection::limited("app", b),
            None => Connection::unlimited("app"),
        };
        let id = connection.connection_id.clone();
        let registry = Arc::new(StaticRegistry::with_connections([connection]));
        let clock = Arc::new(ManualClock::new(start()));
        let engine = BudgetEngine::new(registry, Arc::new(MemoryStore::new()), EngineConfig::default())
            .unwrap()
            .with_clock(clock.clone());
        (engine, clock, id)
    }

    fn reserved_id(outcome: ReservationOutcome) -> ReservationId {
        outcome.reservation_id().expect("expected Reserved")
    }

    #[test]
    fn rejects_invalid_config() {
        let config = EngineConfig {
            sweep_interval_ms: 0,
            ..EngineConfig::default()
        };
        let result = BudgetEngine::new(
            Arc::new(StaticRegistry::new()),
            Arc::new(MemoryStore::new()),
            config,
        );
        assert!(matches!(result, Err(BudgetError::Configuration(_))));
    }

    #[test]
    fn reserve_sets_deadline_from_timeout() {
        let (engine, _, conn) = setup(Some(1000));
        let id = reserved_id(
            engine
                .reserve_budget(&conn, 100, RequestId::from("r"), 5_000)
                .unwrap(),
        );
        let r = engine.reservation(id).unwrap().unwrap();
        assert_eq!(r.created_at, start());
        assert_eq!(r.expires_at, start() + Duration::seconds(5));
        assert_eq!(r.request_id, RequestId::from("r"));
    }

    #[test]
    fn default_timeout_applies() {
        let (engine, _, conn) = setup(Some(1000));
        let id = reserved_id(
            engine
                .reserve_budget_default(&conn, 1, RequestId::from("r"))
                .unwrap(),
        );
        let r = engine.reservation(id).unwrap().unwrap();
        assert_eq!(r.expires_at - r.created_at, Duration::seconds(60));
    }

    #[test]
    fn input_validation_fails_fast() {
        let (engine, _, conn) = setup(Some(1000));
        assert!(matches!(
            engine.reserve_budget(&conn, 10, RequestId::from("r"), 0),
            Err(BudgetError::InvalidTimeout { .. })
        ));
        assert!(matches!(
            engine.reserve_budget(&conn, u64::MAX, RequestId::from("r"), 1000),
            Err(BudgetError::InvalidAmount { .. })
        ));
        assert_eq!(engine.budget_status(&conn).unwrap().unwrap().active_held, 0);
    }

    #[test]
    fn zero_amount_is_admitted() {
        let (engine, _, conn) = setup(Some(0));
        let outcome = engine
            .reserve_budget(&conn, 0, RequestId::from("r"), 1000)
            .unwrap();
        assert!(matches!(
            outcome,
            ReservationOutcome::Reserved {
                remaining_budget: 0,
                ..
            }
        ));
    }

    #[test]
    fn unknown_connection_is_an_error() {
        let (engine, _, _) = setup(Some(1000));
        let ghost = ConnectionId::from("ghost");
        assert!(matches!(
            engine.reserve_budget(&ghost, 1, RequestId::from("r"), 1000),
            Err(BudgetError::ConnectionNotFound(id)) if id == ghost
        ));
        assert!(matches!(
            engine.budget_status(&ghost),
            Err(BudgetError::ConnectionNotFound(_))
        ));
    }

    #[test]
    fn unknown_reservation_is_an_error() {
        let (engine, _, _) = setup(Some(1000));
        let id = ReservationId::new();
        assert!(matches!(
            engine.commit_reservation(id, None),
            Err(BudgetError::ReservationNotFound(_))
        ));
        assert!(matches!(
            engine.release_reservation(id),
            Err(BudgetError::ReservationNotFound(_))
        ));
        assert!(matches!(
            engine.begin_processing(id),
            Err(BudgetError::ReservationNotFound(_))
        ));
    }

    #[test]
    fn commit_rejects_out_of_range_actual() {
        let (engine, _, conn) = setup(Some(1000));
        let id = reserved_id(
            engine
                .reserve_budget(&conn, 10, RequestId::from("r"), 1000)
                .unwrap(),
        );
        assert!(matches!(
            engine.commit_reservation(id, Some(u64::MAX)),
            Err(BudgetError::InvalidAmount { .. })
        ));
        assert_eq!(
            engine.reservation(id).unwrap().unwrap().status,
            ReservationStatus::Pending
        );
    }

    #[test]
    fn late_commit_ignores_out_of_range_actual() {
        let (engine, _, conn) = setup(Some(1000));
        let id = reserved_id(
            engine
                .reserve_budget(&conn, 10, RequestId::from("r"), 1000)
                .unwrap(),
        );
        engine.release_reservation(id).unwrap();

        engine.commit_reservation(id, Some(u64::MAX)).unwrap();
        assert_eq!(
            engine.reservation(id).unwrap().unwrap().status,
            ReservationStatus::Released
        );
        assert!(
            engine
                .ledger_entry(&conn, BudgetDate::from_instant(start()))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn deadline_past_representable_time_is_rejected() {
        let (engine, clock, conn) = setup(Some(1000));
        clock.set(DateTime::<Utc>::MAX_UTC - Duration::seconds(1));

        assert!(matches!(
            engine.reserve_budget(&conn, 1, RequestId::from("r"), 60_000),
            Err(BudgetError::InvalidTimeout {
                timeout_ms: 60_000,
                ..
            })
        ));

        // The bucket lock is still usable afterwards.
        clock.set(start());
        assert!(
            engine
                .reserve_budget(&conn, 1, RequestId::from("r"), 60_000)
                .unwrap()
                .is_permitted()
        );
    }

    #[test]
    fn begin_processing_then_commit() {
        let (engine, _, conn) = setup(Some(1000));
        let id = reserved_id(
            engine
                .reserve_budget(&conn, 300, RequestId::from("r"), 1000)
                .unwrap(),
        );

        let r = engine.begin_processing(id).unwrap();
        assert_eq!(r.status, ReservationStatus::Processing);
        let status = engine.budget_status(&conn).unwrap().unwrap();
        assert_eq!(status.active_held, 300);
        assert_eq!(status.available, 700);

        engine.commit_reservation(id, None).unwrap();
        let status = engine.budget_status(&conn).unwrap().unwrap();
        assert_eq!(status.confirmed_spend, 300);
        assert_eq!(status.active_held, 0);
        assert_eq!(status.available, 700);

        // Terminal reservations stay terminal.
        let r = engine.begin_processing(id).unwrap();
        assert_eq!(r.status, ReservationStatus::Committed);
    }

    #[test]
    fn commit_after_midnight_books_original_day() {
        let (engine, clock, conn) = setup(Some(1000));
        clock.set(Utc.with_ymd_and_hms(2025, 1, 31, 23, 59, 59).unwrap());
        let id = reserved_id(
            engine
                .reserve_budget(&conn, 400, RequestId::from("r"), 60_000)
                .unwrap(),
        );

        clock.advance(Duration::seconds(2));
        engine.commit_reservation(id, None).unwrap();

        let jan31 = BudgetDate::from_ymd(2025, 1, 31).unwrap();
        let feb1 = BudgetDate::from_ymd(2025, 2, 1).unwrap();
        assert_eq!(
            engine.ledger_entry(&conn, jan31).unwrap().unwrap().confirmed_spend,
            400
        );
        assert!(engine.ledger_entry(&conn, feb1).unwrap().is_none());

        // The new day starts with the full allowance.
        let status = engine.budget_status(&conn).unwrap().unwrap();
        assert_eq!(status.budget_date, feb1);
        assert_eq!(status.available, 1000);
    }

    #[test]
    fn sweep_prunes_idle_locks() {
        let (engine, clock, conn) = setup(Some(1000));
        engine
            .reserve_budget(&conn, 10, RequestId::from("r"), 1000)
            .unwrap();
        assert_eq!(engine.tracked_buckets(), 1);

        clock.advance(Duration::seconds(5));
        let expired = engine.cleanup_expired_reservations(engine.now()).unwrap();
        assert_eq!(expired, 1);
        assert_eq!(engine.tracked_buckets(), 0);
    }

    #[test]
    fn unlimited_status_is_none() {
        let (engine, _, conn) = setup(None);
        assert!(engine.budget_status(&conn).unwrap().is_none());
    }
}
