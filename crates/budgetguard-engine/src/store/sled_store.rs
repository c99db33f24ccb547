//! Durable store on top of sled.
//!
//! Layout (values are JSON):
//!
//! | tree           | key                                   | value          |
//! |----------------|---------------------------------------|----------------|
//! | `reservations` | reservation UUID bytes                | `Reservation`  |
//! | `active_holds` | `hex(connection):YYYY-MM-DD:rsv:uuid` | `ActiveHold`   |
//! | `daily_ledger` | `hex(connection):YYYY-MM-DD`          | `LedgerEntry`  |
//!
//! Connection IDs are hex-encoded so arbitrary bytes in them can never
//! collide with the `:` separator used for prefix scans.

use std::path::Path;

use budgetguard_types::{
    BucketKey, BucketUsage, BudgetDate, BudgetError, ConnectionId, LedgerEntry, Reservation,
    ReservationId, Resolution, Result, Transition,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sled::{
    Db, Transactional, Tree,
    transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionError},
};

use super::BudgetStore;

const TREE_RESERVATIONS: &str = "reservations";
const TREE_ACTIVE_HOLDS: &str = "active_holds";
const TREE_DAILY_LEDGER: &str = "daily_ledger";

/// Secondary-index row for an active reservation.
#[derive(Debug, Serialize, Deserialize)]
struct ActiveHold {
    connection_id: ConnectionId,
    budget_date: BudgetDate,
    amount_sats: u64,
    expires_at: DateTime<Utc>,
}

impl From<&Reservation> for ActiveHold {
    fn from(r: &Reservation) -> Self {
        Self {
            connection_id: r.connection_id.clone(),
            budget_date: r.budget_date,
            amount_sats: r.amount_sats,
            expires_at: r.expires_at,
        }
    }
}

fn ledger_key(key: &BucketKey) -> String {
    format!(
        "{}:{}",
        hex::encode(key.connection_id.as_str()),
        key.budget_date
    )
}

fn bucket_prefix(key: &BucketKey) -> String {
    format!("{}:", ledger_key(key))
}

fn hold_key(key: &BucketKey, id: &ReservationId) -> String {
    format!("{}{id}", bucket_prefix(key))
}

fn storage_error(err: sled::Error) -> BudgetError {
    BudgetError::Storage(err.to_string())
}

fn tx_error(err: TransactionError<BudgetError>) -> BudgetError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => storage_error(e),
    }
}

fn encode<T: Serialize>(value: &T) -> ConflictableTransactionResult<Vec<u8>, BudgetError> {
    serde_json::to_vec(value).map_err(|e| ConflictableTransactionError::Abort(e.into()))
}

fn decode<T: DeserializeOwned>(raw: &[u8]) -> ConflictableTransactionResult<T, BudgetError> {
    serde_json::from_slice(raw).map_err(|e| ConflictableTransactionError::Abort(e.into()))
}

/// sled-backed [`BudgetStore`]. Every multi-row write is a sled transaction
/// spanning the affected trees.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: Db,
    reservations: Tree,
    active_holds: Tree,
    ledger: Tree,
}

impl SledStore {
    /// Open (or create) a store in the directory at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path).map_err(storage_error)?;
        Self::from_db(db)
    }

    /// A throwaway store deleted when dropped.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(storage_error)?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self> {
        Ok(Self {
            reservations: db.open_tree(TREE_RESERVATIONS).map_err(storage_error)?,
            active_holds: db.open_tree(TREE_ACTIVE_HOLDS).map_err(storage_error)?,
            ledger: db.open_tree(TREE_DAILY_LEDGER).map_err(storage_error)?,
            db,
        })
    }

    /// Flush dirty pages to disk. Returns the number of bytes flushed.
    pub fn flush(&self) -> Result<usize> {
        self.db.flush().map_err(storage_error)
    }
}

impl BudgetStore for SledStore {
    fn bucket_usage(&self, key: &BucketKey) -> Result<BucketUsage> {
        let confirmed_spend = match self
            .ledger
            .get(ledger_key(key).as_bytes())
            .map_err(storage_error)?
        {
            Some(raw) => serde_json::from_slice::<LedgerEntry>(&raw)?.confirmed_spend,
            None => 0,
        };

        let mut active_held = 0u64;
        for row in self.active_holds.scan_prefix(bucket_prefix(key).as_bytes()) {
            let (_, raw) = row.map_err(storage_error)?;
            let hold: ActiveHold = serde_json::from_slice(&raw)?;
            active_held = active_held.saturating_add(hold.amount_sats);
        }

        Ok(BucketUsage {
            confirmed_spend,
            active_held,
        })
    }

    fn insert_reservation(&self, reservation: &Reservation) -> Result<()> {
        let id_key = reservation.id.0.as_bytes().as_slice();
        let record = serde_json::to_vec(reservation)?;
        let hold = serde_json::to_vec(&ActiveHold::from(reservation))?;
        let index_key = hold_key(&reservation.bucket_key(), &reservation.id);
        let active = reservation.is_active();

        (&self.reservations, &self.active_holds)
            .transaction(|(reservations, holds)| -> ConflictableTransactionResult<(), BudgetError> {
                if reservations.get(id_key)?.is_some() {
                    return Err(ConflictableTransactionError::Abort(BudgetError::Internal(
                        format!("reservation {} already stored", reservation.id),
                    )));
                }
                reservations.insert(id_key, record.as_slice())?;
                if active {
                    holds.insert(index_key.as_bytes(), hold.as_slice())?;
                }
                Ok(())
            })
            .map_err(tx_error)
    }

    fn reservation(&self, id: &ReservationId) -> Result<Option<Reservation>> {
        self.reservations
            .get(id.0.as_bytes().as_slice())
            .map_err(storage_error)?
            .map(|raw| serde_json::from_slice(&raw).map_err(BudgetError::from))
            .transpose()
    }

    fn apply(
        &self,
        id: &ReservationId,
        resolution: Resolution,
        now: DateTime<Utc>,
    ) -> Result<Option<(Reservation, Transition)>> {
        let id_key = id.0.as_bytes().as_slice();

        (&self.reservations, &self.active_holds, &self.ledger)
            .transaction(|(reservations, holds, ledger)| -> ConflictableTransactionResult<
                Option<(Reservation, Transition)>,
                BudgetError,
            > {
                let Some(raw) = reservations.get(id_key)? else {
                    return Ok(None);
                };
                let mut reservation: Reservation = decode(&raw)?;
                let transition = reservation.resolve(resolution, now);

                if let Transition::Applied { ledger_credit, .. } = transition {
                    let key = reservation.bucket_key();
                    reservations.insert(id_key, encode(&reservation)?)?;
                    holds.remove(hold_key(&key, id).as_bytes())?;

                    if let Some(credit) = ledger_credit {
                        let row_key = ledger_key(&key);
                        let mut entry = match ledger.get(row_key.as_bytes())? {
                            Some(raw) => decode::<LedgerEntry>(&raw)?,
                            None => LedgerEntry::new(&key, now),
                        };
                        entry.credit(credit, now);
                        ledger.insert(row_key.as_bytes(), encode(&entry)?)?;
                    }
                }

                Ok(Some((reservation, transition)))
            })
            .map_err(tx_error)
    }

    fn mark_processing(
        &self,
        id: &ReservationId,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>> {
        let id_key = id.0.as_bytes().as_slice();

        self.reservations
            .transaction(|reservations| -> ConflictableTransactionResult<
                Option<Reservation>,
                BudgetError,
            > {
                let Some(raw) = reservations.get(id_key)? else {
                    return Ok(None);
                };
                let mut reservation: Reservation = decode(&raw)?;
                if reservation.start_processing(now) {
                    reservations.insert(id_key, encode(&reservation)?)?;
                }
                Ok(Some(reservation))
            })
            .map_err(tx_error)
    }

    fn expired_candidates(&self, now: DateTime<Utc>) -> Result<Vec<(ReservationId, BucketKey)>> {
        let mut expired = Vec::new();
        for row in self.active_holds.iter() {
            let (raw_key, raw) = row.map_err(storage_error)?;
            let hold: ActiveHold = serde_json::from_slice(&raw)?;
            if hold.expires_at >= now {
                continue;
            }
            let id = reservation_id_from_hold_key(&raw_key)?;
            expired.push((id, BucketKey::new(hold.connection_id, hold.budget_date)));
        }
        Ok(expired)
    }

    fn ledger_entry(&self, key: &BucketKey) -> Result<Option<LedgerEntry>> {
        self.ledger
            .get(ledger_key(key).as_bytes())
            .map_err(storage_error)?
            .map(|raw| serde_json::from_slice(&raw).map_err(BudgetError::from))
            .transpose()
    }
}

/// Recover the reservation ID from the tail of an `active_holds` key.
fn reservation_id_from_hold_key(raw_key: &[u8]) -> Result<ReservationId> {
    let key = std::str::from_utf8(raw_key)
        .map_err(|e| BudgetError::Serialization(format!("hold key is not UTF-8: {e}")))?;
    let uuid = key
        .rsplit_once("rsv:")
        .and_then(|(_, tail)| tail.parse().ok())
        .ok_or_else(|| BudgetError::Serialization(format!("malformed hold key: {key}")))?;
    Ok(ReservationId(uuid))
}
