//! # budgetguard-types
//!
//! Shared types, errors, and configuration for the **BudgetGuard**
//! spend-budget reservation engine.
//!
//! This crate is the leaf dependency of the workspace. Every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`ConnectionId`], [`RequestId`], [`ReservationId`]
//! - **Budget model**: [`BudgetDate`], [`BucketKey`], [`BucketUsage`], [`LedgerEntry`], [`Connection`], [`BudgetStatus`]
//! - **Reservation model**: [`Reservation`], [`ReservationStatus`], [`Resolution`], [`Transition`]
//! - **Outcomes**: [`ReservationOutcome`]
//! - **Configuration**: [`EngineConfig`]
//! - **Time**: [`Clock`], [`SystemClock`]
//! - **Errors**: [`BudgetError`] with `BG_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod budget;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod outcome;
pub mod reservation;

// Re-export all primary types at crate root for ergonomic imports:
//   use budgetguard_types::{Reservation, ReservationStatus, BudgetDate, ...};

pub use budget::*;
pub use clock::*;
pub use config::*;
pub use error::*;
pub use ids::*;
pub use outcome::*;
pub use reservation::*;

// Constants are accessed via `budgetguard_types::constants::FOO`
// (not re-exported to avoid name collisions).
