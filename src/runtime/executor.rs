//! Flow session executor

use super::traits::FlowStore;
use super::FlowCommand;
use crate::flow::{transition, CallFailure, Effect, Event, FlowDefinition, FlowState};
use crate::network::{NetworkRequest, PaymentGateway};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

/// Owns one session's state; every mutation goes through its command channel
pub struct FlowExecutor {
    session_id: String,
    flow: Arc<FlowDefinition>,
    state: FlowState,
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn FlowStore>,
    command_rx: mpsc::Receiver<FlowCommand>,
    /// Weak so that dropping the session handle stops the executor
    command_tx: mpsc::WeakSender<FlowCommand>,
    state_tx: watch::Sender<FlowState>,
    /// Every published state, in order, for streaming subscribers
    updates_tx: broadcast::Sender<FlowState>,
}

impl FlowExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: String,
        flow: Arc<FlowDefinition>,
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn FlowStore>,
        command_rx: mpsc::Receiver<FlowCommand>,
        command_tx: mpsc::WeakSender<FlowCommand>,
        state_tx: watch::Sender<FlowState>,
        updates_tx: broadcast::Sender<FlowState>,
    ) -> Self {
        Self {
            session_id,
            flow,
            state: FlowState::default(),
            gateway,
            store,
            command_rx,
            command_tx,
            state_tx,
            updates_tx,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(session_id = %self.session_id, flow_id = %self.flow.id, "Starting flow session");

        while let Some(command) = self.command_rx.recv().await {
            self.process(command).await;
        }

        tracing::info!(session_id = %self.session_id, "Flow session stopped");
    }

    async fn process(&mut self, command: FlowCommand) {
        let FlowCommand { event, reply } = command;
        let event_name = event.name();

        let result = match transition(&self.state, &self.flow, event) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(
                    session_id = %self.session_id,
                    event = event_name,
                    phase = self.state.phase_name(),
                    error = %e,
                    "Transition rejected"
                );
                if let Some(reply) = reply {
                    let _ = reply.send(Err(e));
                }
                return;
            }
        };

        let old_phase = self.state.phase_name();
        self.state = result.new_state;
        if old_phase != self.state.phase_name() {
            tracing::info!(
                session_id = %self.session_id,
                event = event_name,
                from = old_phase,
                to = self.state.phase_name(),
                step_index = self.state.step_index,
                "Flow phase changed"
            );
        }

        for effect in result.effects {
            self.execute_effect(effect).await;
        }

        if let Some(reply) = reply {
            let _ = reply.send(Ok(self.state.clone()));
        }
    }

    async fn execute_effect(&mut self, effect: Effect) {
        match effect {
            Effect::IssueCall {
                call_id,
                step_id,
                request,
            } => self.issue_call(call_id, step_id, request),

            Effect::RecordHistory { entry } => {
                if let Err(e) = self.store.record_call(&entry).await {
                    tracing::warn!(session_id = %self.session_id, error = %e, "Failed to record call history");
                }
            }

            Effect::PublishState => {
                self.state_tx.send_replace(self.state.clone());
                // No receivers is fine
                let _ = self.updates_tx.send(self.state.clone());
            }
        }
    }

    /// Spawn the network call; its outcome re-enters as a call event
    fn issue_call(&self, call_id: u64, step_id: String, request: NetworkRequest) {
        let gateway = Arc::clone(&self.gateway);
        let command_tx = self.command_tx.clone();
        let session_id = self.session_id.clone();

        tokio::spawn(async move {
            tracing::info!(
                session_id = %session_id,
                step_id = %step_id,
                call_id,
                method = %request.method,
                path = %request.path,
                "Issuing step call"
            );

            let event = match gateway.send(&request).await {
                Ok(response) => Event::call_succeeded(call_id, response),
                Err(e) => {
                    tracing::warn!(session_id = %session_id, step_id = %step_id, error = %e, "Step call failed");
                    Event::call_failed(call_id, CallFailure::from(&e))
                }
            };

            let Some(command_tx) = command_tx.upgrade() else {
                tracing::debug!(session_id = %session_id, "Session closed before call returned");
                return;
            };
            let _ = command_tx.send(FlowCommand { event, reply: None }).await;
        });
    }
}
