//! Runtime for flow demo sessions
//!
//! Each session is a tokio task running a [`FlowExecutor`]. Handlers talk to
//! it through [`FlowManager`], which routes commands and exposes state.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::FlowExecutor;
pub use traits::*;

use crate::flow::{seed_variables, Event, FlowCatalog, FlowState, TransitionError, Variables};
use crate::network::PaymentGateway;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};

/// An event for a session, with an optional channel for the outcome
pub struct FlowCommand {
    pub event: Event,
    pub reply: Option<oneshot::Sender<Result<FlowState, TransitionError>>>,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Unknown flow: {0}")]
    UnknownFlow(String),
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error(transparent)]
    Rejected(#[from] TransitionError),
    #[error("Session {0} is no longer running")]
    Stopped(String),
}

/// Handle to interact with a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub flow_id: String,
    command_tx: mpsc::Sender<FlowCommand>,
    state_rx: watch::Receiver<FlowState>,
    updates_tx: broadcast::Sender<FlowState>,
}

/// Manager for all flow sessions
pub struct FlowManager {
    catalog: Arc<FlowCatalog>,
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn FlowStore>,
    /// Injected into every run as `api_base_url`
    api_base_url: Option<String>,
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl FlowManager {
    pub fn new(
        catalog: Arc<FlowCatalog>,
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn FlowStore>,
    ) -> Self {
        Self {
            catalog,
            gateway,
            store,
            api_base_url: None,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_api_base_url(mut self, base_url: Option<String>) -> Self {
        self.api_base_url = base_url;
        self
    }

    pub fn catalog(&self) -> &FlowCatalog {
        &self.catalog
    }

    /// Spawn a session for `flow_id`, returning its id
    pub async fn create_session(&self, flow_id: &str) -> Result<String, RuntimeError> {
        let flow = self
            .catalog
            .get(flow_id)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownFlow(flow_id.to_string()))?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let (command_tx, command_rx) = mpsc::channel(32);
        let (state_tx, state_rx) = watch::channel(FlowState::default());
        let (updates_tx, _) = broadcast::channel(64);

        let executor = FlowExecutor::new(
            session_id.clone(),
            Arc::new(flow),
            Arc::clone(&self.gateway),
            Arc::clone(&self.store),
            command_rx,
            command_tx.downgrade(),
            state_tx,
            updates_tx.clone(),
        );
        tokio::spawn(executor.run());

        self.sessions.write().await.insert(
            session_id.clone(),
            SessionHandle {
                flow_id: flow_id.to_string(),
                command_tx,
                state_rx,
                updates_tx,
            },
        );

        tracing::info!(session_id = %session_id, flow_id = %flow_id, "Created flow session");
        Ok(session_id)
    }

    async fn handle(&self, session_id: &str) -> Result<SessionHandle, RuntimeError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| RuntimeError::SessionNotFound(session_id.to_string()))
    }

    /// Apply an event and wait for the resulting state, returned with the session's flow id
    pub async fn send(
        &self,
        session_id: &str,
        event: Event,
    ) -> Result<(String, FlowState), RuntimeError> {
        let handle = self.handle(session_id).await?;
        Self::dispatch(session_id, handle, event).await
    }

    async fn dispatch(
        session_id: &str,
        handle: SessionHandle,
        event: Event,
    ) -> Result<(String, FlowState), RuntimeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .command_tx
            .send(FlowCommand {
                event,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| RuntimeError::Stopped(session_id.to_string()))?;

        let outcome = reply_rx
            .await
            .map_err(|_| RuntimeError::Stopped(session_id.to_string()))?;
        Ok((handle.flow_id, outcome?))
    }

    /// Start (or restart) a run with freshly seeded variables
    pub async fn start(
        &self,
        session_id: &str,
        overrides: Variables,
    ) -> Result<(String, FlowState), RuntimeError> {
        let handle = self.handle(session_id).await?;
        let flow = self
            .catalog
            .get(&handle.flow_id)
            .ok_or_else(|| RuntimeError::UnknownFlow(handle.flow_id.clone()))?;

        let stored = self.store.load_variables().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to load variables, using flow defaults");
            Variables::new()
        });
        let base_url = self
            .api_base_url
            .iter()
            .map(|url| ("api_base_url".to_string(), url.clone()));
        let mut variables = seed_variables(flow, &stored, base_url);
        variables.extend(overrides);

        Self::dispatch(session_id, handle, Event::Start { variables }).await
    }

    pub async fn snapshot(&self, session_id: &str) -> Result<(String, FlowState), RuntimeError> {
        let handle = self.handle(session_id).await?;
        let state = handle.state_rx.borrow().clone();
        Ok((handle.flow_id, state))
    }

    /// Receiver holding the latest published state
    pub async fn watch_state(&self, session_id: &str) -> Result<watch::Receiver<FlowState>, RuntimeError> {
        Ok(self.handle(session_id).await?.state_rx)
    }

    /// Current state plus a receiver for every state published after it
    pub async fn subscribe(
        &self,
        session_id: &str,
    ) -> Result<(String, FlowState, broadcast::Receiver<FlowState>), RuntimeError> {
        let handle = self.handle(session_id).await?;
        let updates_rx = handle.updates_tx.subscribe();
        let current = handle.state_rx.borrow().clone();
        Ok((handle.flow_id, current, updates_rx))
    }

    /// Drop the session; its executor stops once queued work drains
    pub async fn close_session(&self, session_id: &str) -> Result<(), RuntimeError> {
        self.sessions
            .write()
            .await
            .remove(session_id)
            .map(|_| tracing::info!(session_id = %session_id, "Closed flow session"))
            .ok_or_else(|| RuntimeError::SessionNotFound(session_id.to_string()))
    }
}
