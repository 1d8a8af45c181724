//! HTTP API for the payment demo
//!
//! CRUD routes over the local store, flow sessions, and proxies to the
//! payment network.

mod error;
mod handlers;
mod sse;
mod types;


pub use error::panic_response;
pub use handlers::create_router;

use error::AppError;

use crate::db::Database;
use crate::flow::FlowCatalog;
use crate::network::PaymentGateway;
use crate::runtime::{DatabaseStore, DetachedStore, FlowManager, FlowStore};
use std::sync::Arc;

/// Upper bound for `GET /api/history?limit=`
const MAX_HISTORY_LIMIT: usize = 1000;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// `None` when the database could not be opened
    pub db: Option<Database>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub flows: Arc<FlowManager>,
    pub history_limit: usize,
}

impl AppState {
    pub fn new(
        db: Option<Database>,
        gateway: Arc<dyn PaymentGateway>,
        catalog: Arc<FlowCatalog>,
        api_base_url: Option<String>,
        history_limit: usize,
    ) -> Self {
        let store: Arc<dyn FlowStore> = match &db {
            Some(db) => Arc::new(DatabaseStore::new(db.clone())),
            None => Arc::new(DetachedStore),
        };
        let flows = FlowManager::new(catalog, Arc::clone(&gateway), store)
            .with_api_base_url(api_base_url);

        Self {
            db,
            gateway,
            flows: Arc::new(flows),
            history_limit: history_limit.min(MAX_HISTORY_LIMIT),
        }
    }

    /// The database, or 503 when persistence is unavailable
    fn db(&self) -> Result<&Database, AppError> {
        self.db
            .as_ref()
            .ok_or_else(|| AppError::Unavailable("Database is not available".to_string()))
    }

    fn clamp_history_limit(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.history_limit).min(MAX_HISTORY_LIMIT)
    }
}
