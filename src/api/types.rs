//! API request and response types

use crate::db::{Variable, VariableInput};
use crate::flow::{FlowDefinition, FlowState, Variables};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Query for listing call history
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Query for deleting a variable
#[derive(Debug, Deserialize)]
pub struct VariableKeyQuery {
    pub key: Option<String>,
}

/// Body of `POST /api/variables`: one variable or a batch
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum VariablesInput {
    One(VariableInput),
    Many(Vec<VariableInput>),
}

/// Mirrors the shape of [`VariablesInput`]
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum UpsertedVariables {
    One(Variable),
    Many(Vec<Variable>),
}

/// Optional body of `POST /api/sessions/:id/start`
#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub variables: Variables,
}

/// Body of `POST /api/payments/authorize`
#[derive(Debug, Deserialize)]
pub struct AuthorizeRequest {
    pub authorization_token: String,
    pub order: Value,
}

/// Response for lifecycle actions
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Response for clearing call history
#[derive(Debug, Serialize)]
pub struct ClearedResponse {
    pub cleared: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: bool,
    pub payment_network: bool,
}

/// Catalog entry without step details
#[derive(Debug, Serialize)]
pub struct FlowSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub step_count: usize,
    pub parties: Vec<String>,
}

impl From<&FlowDefinition> for FlowSummary {
    fn from(flow: &FlowDefinition) -> Self {
        Self {
            id: flow.id.clone(),
            name: flow.name.clone(),
            description: flow.description.clone(),
            step_count: flow.len(),
            parties: flow.parties.iter().map(|p| p.label.clone()).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FlowListResponse {
    pub flows: Vec<FlowSummary>,
}

/// The step a session will execute next, ready for display
#[derive(Debug, Serialize)]
pub struct StepView {
    pub id: String,
    pub ordinal: usize,
    pub from: String,
    pub to: String,
    pub title: String,
    pub description: String,
    pub is_action: bool,
}

/// Snapshot of a flow session
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub flow_id: String,
    pub step_count: usize,
    pub terminal: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<StepView>,
    pub state: FlowState,
}

impl SessionResponse {
    pub fn new(session_id: impl Into<String>, flow: &FlowDefinition, state: FlowState) -> Self {
        let current_step = flow.steps.get(state.step_index).map(|step| StepView {
            id: step.id.clone(),
            ordinal: step.ordinal,
            from: step.from.clone(),
            to: step.to.clone(),
            title: step.title.clone(),
            description: step.display(&state.variables),
            is_action: step.is_action(),
        });
        Self {
            session_id: session_id.into(),
            flow_id: flow.id.clone(),
            step_count: flow.len(),
            terminal: state.is_terminal(),
            current_step,
            state,
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
