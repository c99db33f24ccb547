//! System-wide constants for the BudgetGuard reservation engine.

/// Default hold lifetime when the caller does not supply one (60 seconds).
pub const DEFAULT_RESERVATION_TIMEOUT_MS: u64 = 60_000;

/// Longest hold a caller may request (24 hours).
pub const MAX_RESERVATION_TIMEOUT_MS: u64 = 86_400_000;

/// Largest amount accepted in any single reservation or commit:
/// the total bitcoin supply expressed in satoshis.
pub const MAX_AMOUNT_SATS: u64 = 2_100_000_000_000_000;

/// Default cadence of the expiry sweeper in milliseconds.
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 30_000;

