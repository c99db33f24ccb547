//! Durability: holds and the ledger survive closing and reopening the store.

use std::sync::Arc;

use budgetguard_engine::{BudgetEngine, SledStore, StaticRegistry};
use budgetguard_types::*;

fn engine_at(path: &std::path::Path) -> BudgetEngine {
    let registry = Arc::new(StaticRegistry::with_connections([Connection::limited(
        "app", 1000,
    )]));
    let store = Arc::new(SledStore::open(path).expect("open sled store"));
    BudgetEngine::new(registry, store, EngineConfig::default()).unwrap()
}

#[test]
fn state_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let conn = ConnectionId::from("app");

    let (committed, pending) = {
        let engine = engine_at(dir.path());
        let committed = engine
            .reserve_budget(&conn, 300, RequestId::from("a"), 600_000)
            .unwrap()
            .reservation_id()
            .unwrap();
        engine.commit_reservation(committed, Some(250)).unwrap();

        let pending = engine
            .reserve_budget(&conn, 400, RequestId::from("b"), 600_000)
            .unwrap()
            .reservation_id()
            .unwrap();
        (committed, pending)
    };

    let engine = engine_at(dir.path());
    assert_eq!(
        engine.reservation(committed).unwrap().unwrap().status,
        ReservationStatus::Committed
    );
    assert_eq!(
        engine.reservation(pending).unwrap().unwrap().status,
        ReservationStatus::Pending
    );

    let status = engine.budget_status(&conn).unwrap().unwrap();
    assert_eq!(status.confirmed_spend, 250);
    assert_eq!(status.active_held, 400);
    assert_eq!(
        engine
            .reserve_budget(&conn, 400, RequestId::from("c"), 600_000)
            .unwrap(),
        ReservationOutcome::InsufficientBudget {
            requested: 400,
            available: 350,
        }
    );
}

#[test]
fn flush_reports_success() {
    let dir = tempfile::tempdir().unwrap();
    let store = SledStore::open(dir.path()).unwrap();
    assert!(store.flush().is_ok());
}
