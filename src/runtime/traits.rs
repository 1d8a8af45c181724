//! Trait abstractions for runtime I/O
//!
//! The executor reaches storage only through [`FlowStore`], so tests can
//! run sessions against an in-memory implementation.

use crate::db::{Database, NewHistoryEntry};
use crate::flow::Variables;
use async_trait::async_trait;
use std::sync::Arc;

/// Persistence used by flow sessions
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Append an executed call to call history
    async fn record_call(&self, entry: &NewHistoryEntry) -> Result<(), String>;

    /// User-defined variables used to seed a run
    async fn load_variables(&self) -> Result<Variables, String>;
}

#[async_trait]
impl<T: FlowStore + ?Sized> FlowStore for Arc<T> {
    async fn record_call(&self, entry: &NewHistoryEntry) -> Result<(), String> {
        (**self).record_call(entry).await
    }

    async fn load_variables(&self) -> Result<Variables, String> {
        (**self).load_variables().await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as `FlowStore`
#[derive(Clone)]
pub struct DatabaseStore {
    db: Database,
}

impl DatabaseStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl FlowStore for DatabaseStore {
    async fn record_call(&self, entry: &NewHistoryEntry) -> Result<(), String> {
        self.db
            .add_history_entry(entry)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn load_variables(&self) -> Result<Variables, String> {
        self.db.variable_map().map_err(|e| e.to_string())
    }
}

/// Store used when the database could not be opened
pub struct DetachedStore;

#[async_trait]
impl FlowStore for DetachedStore {
    async fn record_call(&self, entry: &NewHistoryEntry) -> Result<(), String> {
        tracing::debug!(endpoint = %entry.endpoint, "No database, call not recorded");
        Ok(())
    }

    async fn load_variables(&self) -> Result<Variables, String> {
        Ok(Variables::new())
    }
}
