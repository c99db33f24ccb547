//! Connection registry: where the engine learns each connection's budget.
//!
//! The registry is owned by the protocol layer; the engine only reads it.
//! A budget change takes effect for reservations made after the change.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use budgetguard_types::{Connection, ConnectionId};

/// Read-only lookup of connections by ID.
pub trait ConnectionRegistry: Send + Sync {
    /// `None` when the connection is unknown.
    fn lookup(&self, connection_id: &ConnectionId) -> Option<Connection>;
}

/// In-memory registry for embedding hosts and tests.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
}

impl StaticRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry pre-populated with `connections`.
    #[must_use]
    pub fn with_connections(connections: impl IntoIterator<Item = Connection>) -> Self {
        let registry = Self::new();
        for connection in connections {
            registry.upsert(connection);
        }
        registry
    }

    /// Insert or replace a connection.
    pub fn upsert(&self, connection: Connection) {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(connection.connection_id.clone(), connection);
    }

    /// Remove a connection. Returns the removed entry, if any.
    pub fn remove(&self, connection_id: &ConnectionId) -> Option<Connection> {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(connection_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConnectionRegistry for StaticRegistry {
    fn lookup(&self, connection_id: &ConnectionId) -> Option<Connection> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(connection_id)
            .cloned()
    }
}
