//! # budgetguard-sweeper
//!
//! Host-side plumbing for the reservation engine:
//!
//! - [`ExpirySweeper`]: reclaims abandoned holds on a fixed cadence
//! - [`init_tracing`]: installs the `tracing` subscriber
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use budgetguard_engine::{BudgetEngine, MemoryStore, StaticRegistry};
//! # use budgetguard_sweeper::ExpirySweeper;
//! # use budgetguard_types::EngineConfig;
//! # use tokio_util::sync::CancellationToken;
//! # async fn run() -> budgetguard_types::Result<()> {
//! let engine = Arc::new(BudgetEngine::new(
//!     Arc::new(StaticRegistry::new()),
//!     Arc::new(MemoryStore::new()),
//!     EngineConfig::default(),
//! )?);
//! let shutdown = CancellationToken::new();
//! let handle = ExpirySweeper::from_engine_config(engine).spawn(shutdown.clone());
//! // ...
//! shutdown.cancel();
//! let _ = handle.await;
//! # Ok(())
//! # }
//! ```

pub mod sweeper;
pub mod telemetry;

pub use sweeper::ExpirySweeper;
pub use telemetry::init_tracing;
