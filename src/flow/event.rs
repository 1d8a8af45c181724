//! Events that drive the flow controller

use super::template::Variables;
use crate::network::{NetworkError, NetworkResponse};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Input to [`super::transition`]
#[derive(Debug, Clone)]
pub enum Event {
    /// Begin (or restart) a run with the given variables
    Start { variables: Variables },

    /// Execute the current step
    Advance { at: DateTime<Utc> },

    /// Re-issue the call for the step that halted the flow
    Retry { at: DateTime<Utc> },

    /// Return to idle from anywhere
    Reset,

    CallSucceeded {
        call_id: u64,
        response: NetworkResponse,
        at: DateTime<Utc>,
    },

    CallFailed {
        call_id: u64,
        failure: CallFailure,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn advance() -> Self {
        Event::Advance { at: Utc::now() }
    }

    pub fn retry() -> Self {
        Event::Retry { at: Utc::now() }
    }

    pub fn call_succeeded(call_id: u64, response: NetworkResponse) -> Self {
        Event::CallSucceeded {
            call_id,
            response,
            at: Utc::now(),
        }
    }

    pub fn call_failed(call_id: u64, failure: CallFailure) -> Self {
        Event::CallFailed {
            call_id,
            failure,
            at: Utc::now(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::Start { .. } => "start",
            Event::Advance { .. } => "advance",
            Event::Retry { .. } => "retry",
            Event::Reset => "reset",
            Event::CallSucceeded { .. } => "call_succeeded",
            Event::CallFailed { .. } => "call_failed",
        }
    }
}

/// Failure of a step's network call
#[derive(Debug, Clone, PartialEq)]
pub struct CallFailure {
    pub message: String,
    pub status: Option<u16>,
    pub body: Option<Value>,
    pub retryable: bool,
}

impl CallFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            body: None,
            retryable: false,
        }
    }
}

impl From<&NetworkError> for CallFailure {
    fn from(error: &NetworkError) -> Self {
        Self {
            status: error.status,
            body: error.body.clone(),
            retryable: error.kind.is_transient(),
            ..Self::new(error.message.clone())
        }
    }
}
