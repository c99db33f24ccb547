//! Error types for the BudgetGuard reservation engine.
//!
//! All errors use the `BG_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Connection errors
//! - 2xx: Reservation errors
//! - 3xx: Input / contract errors
//! - 4xx: Invariant errors
//! - 9xx: General / internal errors
//!
//! Running out of budget is **not** an error: it is reported as
//! [`ReservationOutcome::InsufficientBudget`](crate::ReservationOutcome).

use thiserror::Error;

use crate::{ConnectionId, ReservationId};

/// Central error enum for all BudgetGuard operations.
#[derive(Debug, Error)]
pub enum BudgetError {
    // =================================================================
    // Connection Errors (1xx)
    // =================================================================
    /// The connection registry does not know this connection.
    #[error("BG_ERR_100: Connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    // =================================================================
    // Reservation Errors (2xx)
    // =================================================================
    /// No reservation with this ID exists in the store.
    #[error("BG_ERR_200: Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    // =================================================================
    // Input Errors (3xx)
    // =================================================================
    /// The amount is outside the accepted range.
    #[error("BG_ERR_300: Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    /// The hold timeout is zero or above the configured maximum.
    #[error("BG_ERR_301: Invalid timeout: {timeout_ms}ms (allowed 1..={max_ms}ms)")]
    InvalidTimeout { timeout_ms: u64, max_ms: u64 },

    // =================================================================
    // Invariant Errors (4xx)
    // =================================================================
    /// Confirmed spend plus active holds exceed the daily budget.
    #[error("BG_ERR_400: Budget invariant violation: {reason}")]
    InvariantViolation { reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("BG_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("BG_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, out-of-range values, etc.).
    #[error("BG_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error (disk).
    #[error("BG_ERR_903: I/O error: {0}")]
    Io(String),

    /// The persistent store rejected or failed an operation.
    #[error("BG_ERR_904: Storage error: {0}")]
    Storage(String),
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, BudgetError>;

impl BudgetError {
    /// Whether the caller could reasonably retry the same call later.
    ///
    /// Only infrastructure failures qualify. Contract violations and unknown
    /// identifiers will fail the same way every time.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Io(_))
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for BudgetError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BudgetError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
