//! # budgetguard-engine
//!
//! Spend-budget admission control for delegated wallet connections.
//!
//! Every connection may have a daily allowance. Before a payment runs, the
//! caller asks the engine to hold the amount; afterwards it commits the
//! hold (booking the spend) or releases it. Abandoned holds are reclaimed
//! by a periodic sweep.
//!
//! - [`BudgetEngine`]: reserve / commit / release / cleanup operations
//! - [`ConnectionRegistry`]: read-only source of per-connection budgets
//! - [`BudgetStore`]: reservations plus the daily ledger, with
//!   [`MemoryStore`] and sled-backed [`SledStore`] implementations
//! - [`BucketLocks`]: per-(connection, day) serialisation
//! - [`BudgetAuditor`]: checks the budget invariant for a bucket
//!
//! ## Invariant
//!
//! ```text
//! ∀ connection, day: confirmed_spend + Σ active holds ≤ daily_budget
//! ```
//!
//! Every read-compute-write on a bucket runs under that bucket's lock, and
//! every terminal transition re-checks "still active" atomically inside the
//! store, so no interleaving of concurrent calls can admit more than the
//! allowance.

pub mod audit;
pub mod engine;
pub mod locks;
pub mod registry;
pub mod store;

pub use audit::BudgetAuditor;
pub use engine::BudgetEngine;
pub use locks::BucketLocks;
pub use registry::{ConnectionRegistry, StaticRegistry};
pub use store::{BudgetStore, MemoryStore, SledStore};
