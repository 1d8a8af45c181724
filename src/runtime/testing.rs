//! Mock implementations for testing
//!
//! These mocks let sessions run end to end without a network or database.

use super::traits::FlowStore;
use crate::db::NewHistoryEntry;
use crate::flow::Variables;
use crate::network::{NetworkError, NetworkRequest, NetworkResponse, PaymentGateway};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

// ============================================================================
// Mock Gateway
// ============================================================================

/// Gateway that returns queued responses and records every request
#[derive(Default)]
pub struct MockGateway {
    responses: Mutex<VecDeque<Result<NetworkResponse, NetworkError>>>,
    pub requests: Mutex<Vec<NetworkRequest>>,
    /// When set, each call waits for one notification before answering
    gate: Option<Arc<Notify>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every call until the returned `Notify` is signalled
    pub fn gated() -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let gateway = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        };
        (gateway, gate)
    }

    pub fn queue_ok(&self, status: u16, body: Value) {
        self.responses.lock().unwrap().push_back(Ok(NetworkResponse {
            status,
            body,
            duration_ms: 5,
        }));
    }

    pub fn queue_error(&self, error: NetworkError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_requests(&self) -> Vec<NetworkRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn send(&self, request: &NetworkRequest) -> Result<NetworkResponse, NetworkError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(NetworkError::network("No mock response queued")))
    }

    fn is_configured(&self) -> bool {
        true
    }
}

// ============================================================================
// In-Memory Store
// ============================================================================

#[derive(Default)]
pub struct InMemoryStore {
    pub history: Mutex<Vec<NewHistoryEntry>>,
    pub variables: Mutex<Variables>,
}

impl InMemoryStore {
    pub fn with_variables(pairs: &[(&str, &str)]) -> Self {
        let store = Self::default();
        store.variables.lock().unwrap().extend(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string())),
        );
        store
    }

    pub fn recorded_history(&self) -> Vec<NewHistoryEntry> {
        self.history.lock().unwrap().clone()
    }
}

#[async_trait]
impl FlowStore for InMemoryStore {
    async fn record_call(&self, entry: &NewHistoryEntry) -> Result<(), String> {
        self.history.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn load_variables(&self) -> Result<Variables, String> {
        Ok(self.variables.lock().unwrap().clone())
    }
}

// ============================================================================
// Session Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{Event, FlowCatalog, FlowPhase, FlowState, TransitionError};
    use crate::runtime::{FlowManager, RuntimeError};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        manager: FlowManager,
        gateway: Arc<MockGateway>,
        store: Arc<InMemoryStore>,
    }

    fn harness(gateway: MockGateway, store: InMemoryStore) -> Harness {
        let gateway = Arc::new(gateway);
        let store = Arc::new(store);
        let catalog = Arc::new(FlowCatalog::builtin().unwrap());
        let manager = FlowManager::new(catalog, gateway.clone(), store.clone())
            .with_api_base_url(Some("https://api.sandbox.test".to_string()));
        Harness {
            manager,
            gateway,
            store,
        }
    }

    /// Advance and wait until any call the step issued has settled
    async fn advance_settled(manager: &FlowManager, session: &str) -> FlowState {
        let mut rx = manager.watch_state(session).await.unwrap();
        manager.send(session, Event::advance()).await.unwrap();
        let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| !s.is_busy()))
            .await
            .expect("call did not settle")
            .unwrap()
            .clone();
        state
    }

    #[tokio::test]
    async fn test_server_side_flow_runs_to_completion() {
        let gateway = MockGateway::new();
        gateway.queue_ok(
            201,
            json!({
                "payment_request_id": "pr_123",
                "state_context": { "customer_interaction": { "payment_request_url": "https://pay.test/pr_123" } }
            }),
        );
        gateway.queue_ok(200, json!({ "payment_transaction_id": "tx_9" }));
        let h = harness(gateway, InMemoryStore::default());

        let session = h.manager.create_session("server-side").await.unwrap();
        let (flow_id, started) = h.manager.start(&session, Variables::new()).await.unwrap();
        assert_eq!(flow_id, "server-side");
        assert_eq!(started.phase, FlowPhase::Running);
        assert_eq!(
            started.variables.get("api_base_url").map(String::as_str),
            Some("https://api.sandbox.test")
        );

        let step_count = h.manager.catalog().get("server-side").unwrap().len();
        let mut state = started;
        for _ in 0..step_count {
            state = advance_settled(&h.manager, &session).await;
        }

        assert_eq!(state.phase, FlowPhase::Complete);
        assert_eq!(state.step_index, step_count);
        assert_eq!(state.details.len(), 2);
        assert_eq!(
            state.variables.get("payment_transaction_id").map(String::as_str),
            Some("tx_9")
        );

        let requests = h.gateway.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].path, "/v2/payment/requests");
        assert_eq!(requests[1].path, "/v2/payment/requests/pr_123/authorize");

        let history = h.store.recorded_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].flow_id.as_deref(), Some("server-side"));
        assert_eq!(history[0].step_id.as_deref(), Some("create-request"));
        assert_eq!(history[1].status_code, Some(200));
    }

    #[tokio::test]
    async fn test_failure_halts_then_retry_recovers() {
        let gateway = MockGateway::new();
        gateway.queue_error(NetworkError::from_status(
            503,
            json!({ "error_message": "try later" }),
        ));
        gateway.queue_ok(200, json!({ "payment_request_id": "pr_1" }));
        let h = harness(gateway, InMemoryStore::default());

        let session = h.manager.create_session("server-side").await.unwrap();
        h.manager.start(&session, Variables::new()).await.unwrap();
        advance_settled(&h.manager, &session).await;
        let halted = advance_settled(&h.manager, &session).await;

        let FlowPhase::Halted { error } = &halted.phase else {
            panic!("expected halt, got {:?}", halted.phase);
        };
        assert!(error.contains("try later"));
        assert_eq!(halted.step_index, 1);
        assert!(halted.details[0].retryable);

        let err = h.manager.send(&session, Event::advance()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Rejected(TransitionError::Halted)));

        let mut rx = h.manager.watch_state(&session).await.unwrap();
        h.manager.send(&session, Event::retry()).await.unwrap();
        let recovered = rx.wait_for(|s| !s.is_busy()).await.unwrap().clone();
        assert_eq!(recovered.phase, FlowPhase::Running);
        assert_eq!(recovered.step_index, 2);
        assert_eq!(h.store.recorded_history().len(), 2);
    }

    #[tokio::test]
    async fn test_subscribers_see_every_published_state() {
        let gateway = MockGateway::new();
        gateway.queue_ok(201, json!({ "payment_request_id": "pr_7" }));
        let h = harness(gateway, InMemoryStore::default());

        let session = h.manager.create_session("server-side").await.unwrap();
        h.manager.start(&session, Variables::new()).await.unwrap();
        advance_settled(&h.manager, &session).await;

        let (flow_id, current, mut updates) = h.manager.subscribe(&session).await.unwrap();
        assert_eq!(flow_id, "server-side");
        assert_eq!(current.step_index, 1);

        h.manager.send(&session, Event::advance()).await.unwrap();
        let awaiting = tokio::time::timeout(Duration::from_secs(5), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(awaiting.is_busy());
        let settled = tokio::time::timeout(Duration::from_secs(5), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(settled.phase, FlowPhase::Running);
        assert_eq!(settled.step_index, 2);
        assert_eq!(
            settled.variables.get("payment_request_id").map(String::as_str),
            Some("pr_7")
        );
    }

    #[tokio::test]
    async fn test_reset_discards_in_flight_result() {
        let (gateway, gate) = MockGateway::gated();
        gateway.queue_ok(201, json!({ "payment_request_id": "late" }));
        let h = harness(gateway, InMemoryStore::default());

        let session = h.manager.create_session("server-side").await.unwrap();
        h.manager.start(&session, Variables::new()).await.unwrap();
        advance_settled(&h.manager, &session).await;

        let (_, busy) = h.manager.send(&session, Event::advance()).await.unwrap();
        assert!(busy.is_busy());
        let err = h.manager.send(&session, Event::advance()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Rejected(TransitionError::CallInFlight)));

        let (_, reset) = h.manager.send(&session, Event::Reset).await.unwrap();
        assert_eq!(reset.phase, FlowPhase::Idle);

        gate.notify_one();
        // Let the late result reach the executor
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (_, state) = h.manager.snapshot(&session).await.unwrap();
        assert_eq!(state.phase, FlowPhase::Idle);
        assert!(state.details.is_empty());
        assert!(h.store.recorded_history().is_empty());
    }

    #[tokio::test]
    async fn test_start_seeds_variables_in_order() {
        let store = InMemoryStore::with_variables(&[("amount", "2500"), ("api_base_url", "ignored")]);
        let h = harness(MockGateway::new(), store);

        let session = h.manager.create_session("server-side").await.unwrap();
        let mut overrides = Variables::new();
        overrides.insert("currency".to_string(), "EUR".to_string());
        let (_, state) = h.manager.start(&session, overrides).await.unwrap();

        assert_eq!(state.variables.get("amount").map(String::as_str), Some("2500"));
        assert_eq!(state.variables.get("currency").map(String::as_str), Some("EUR"));
        assert_eq!(
            state.variables.get("api_base_url").map(String::as_str),
            Some("https://api.sandbox.test")
        );
        assert_eq!(
            state.variables.get("return_url").map(String::as_str),
            Some("https://merchant.example/return")
        );
    }

    #[tokio::test]
    async fn test_unknown_flow_and_session() {
        let h = harness(MockGateway::new(), InMemoryStore::default());
        assert!(matches!(
            h.manager.create_session("nope").await,
            Err(RuntimeError::UnknownFlow(_))
        ));
        assert!(matches!(
            h.manager.send("missing", Event::Reset).await,
            Err(RuntimeError::SessionNotFound(_))
        ));

        let session = h.manager.create_session("on-site-messaging").await.unwrap();
        h.manager.close_session(&session).await.unwrap();
        assert!(matches!(
            h.manager.snapshot(&session).await,
            Err(RuntimeError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_advance_before_start_is_rejected() {
        let h = harness(MockGateway::new(), InMemoryStore::default());
        let session = h.manager.create_session("hosted-payment-page").await.unwrap();
        let err = h.manager.send(&session, Event::advance()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Rejected(TransitionError::NotStarted)));
        assert!(h.gateway.recorded_requests().is_empty());
    }
}
