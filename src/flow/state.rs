//! Flow demo state types

use super::template::Variables;
use crate::network::NetworkRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where the controller is in a run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowPhase {
    /// Not started, or reset
    #[default]
    Idle,

    /// Ready to advance to the step at `step_index`
    Running,

    /// A network call for the current step is in flight
    AwaitingResponse {
        call_id: u64,
        request: NetworkRequest,
    },

    /// The current step failed; retry or reset to continue
    Halted { error: String },

    /// Every step has been executed
    Complete,
}

/// Outcome of one executed step, in execution order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDetail {
    pub step_id: String,
    pub ordinal: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<NetworkRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether a failed call is worth retrying as-is
    #[serde(default)]
    pub retryable: bool,
    pub recorded_at: DateTime<Utc>,
}

impl StepDetail {
    pub fn new(step_id: impl Into<String>, ordinal: usize, at: DateTime<Utc>) -> Self {
        Self {
            step_id: step_id.into(),
            ordinal,
            call_id: None,
            request: None,
            response: None,
            status: None,
            duration_ms: None,
            error: None,
            retryable: false,
            recorded_at: at,
        }
    }
}

/// Complete state of one flow session
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlowState {
    pub phase: FlowPhase,
    /// Index of the next step to execute; equals the step count when complete
    pub step_index: usize,
    pub details: Vec<StepDetail>,
    pub variables: Variables,
    /// Last call id handed out; survives resets so stale results never match
    pub last_call_id: u64,
}

impl FlowState {
    /// Complete is the only state that accepts nothing but start or reset
    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, FlowPhase::Complete)
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.phase, FlowPhase::AwaitingResponse { .. })
    }

    pub fn pending_call(&self) -> Option<u64> {
        match self.phase {
            FlowPhase::AwaitingResponse { call_id, .. } => Some(call_id),
            _ => None,
        }
    }

    pub fn phase_name(&self) -> &'static str {
        match self.phase {
            FlowPhase::Idle => "idle",
            FlowPhase::Running => "running",
            FlowPhase::AwaitingResponse { .. } => "awaiting_response",
            FlowPhase::Halted { .. } => "halted",
            FlowPhase::Complete => "complete",
        }
    }
}
