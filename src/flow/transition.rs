//! Pure state transition function
//!
//! Given the same state, flow and event this always produces the same
//! result. Timestamps arrive on the events; network calls leave as effects.

use super::catalog::{FlowDefinition, Step};
use super::event::CallFailure;
use super::state::{FlowPhase, FlowState, StepDetail};
use super::template::{apply_captures, render_action, Variables};
use super::{Effect, Event};
use crate::db::NewHistoryEntry;
use crate::network::{NetworkRequest, NetworkResponse};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: FlowState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: FlowState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Commands the current state does not accept
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Flow has not been started")]
    NotStarted,
    #[error("A network call is in flight; wait for it to finish")]
    CallInFlight,
    #[error("Flow is halted; retry the step or reset")]
    Halted,
    #[error("Flow is complete; reset or start again")]
    Finished,
    #[error("Nothing to retry; the flow is not halted")]
    NotHalted,
}

/// Pure transition function
pub fn transition(
    state: &FlowState,
    flow: &FlowDefinition,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (&state.phase, event) {
        // ============================================================
        // Reset and start
        // ============================================================
        (_, Event::Reset) => Ok(TransitionResult::new(FlowState {
            last_call_id: state.last_call_id,
            ..FlowState::default()
        })
        .with_effect(Effect::PublishState)),

        (FlowPhase::AwaitingResponse { .. }, Event::Start { .. }) => {
            Err(TransitionError::CallInFlight)
        }

        (_, Event::Start { variables }) => {
            let phase = if flow.steps.is_empty() {
                FlowPhase::Complete
            } else {
                FlowPhase::Running
            };
            Ok(TransitionResult::new(FlowState {
                phase,
                step_index: 0,
                details: Vec::new(),
                variables,
                last_call_id: state.last_call_id,
            })
            .with_effect(Effect::PublishState))
        }

        // ============================================================
        // Advance and retry
        // ============================================================
        (FlowPhase::Running, Event::Advance { at }) | (FlowPhase::Halted { .. }, Event::Retry { at }) => {
            Ok(execute_current_step(state, flow, at))
        }

        (FlowPhase::AwaitingResponse { .. }, Event::Advance { .. } | Event::Retry { .. }) => {
            Err(TransitionError::CallInFlight)
        }
        (FlowPhase::Idle, Event::Advance { .. }) => Err(TransitionError::NotStarted),
        (FlowPhase::Halted { .. }, Event::Advance { .. }) => Err(TransitionError::Halted),
        (FlowPhase::Complete, Event::Advance { .. }) => Err(TransitionError::Finished),
        (_, Event::Retry { .. }) => Err(TransitionError::NotHalted),

        // ============================================================
        // Call results
        // ============================================================
        (
            FlowPhase::AwaitingResponse { call_id, request },
            Event::CallSucceeded {
                call_id: result_id,
                response,
                at,
            },
        ) if *call_id == result_id => Ok(complete_call(state, flow, request, &response, at)),

        (
            FlowPhase::AwaitingResponse { call_id, request },
            Event::CallFailed {
                call_id: result_id,
                failure,
                at,
            },
        ) if *call_id == result_id => Ok(fail_call(state, flow, request, failure, at)),

        // Result for a call that was reset away or superseded
        (_, Event::CallSucceeded { .. } | Event::CallFailed { .. }) => {
            Ok(TransitionResult::new(state.clone()))
        }
    }
}

/// Run the step at `step_index`: move past a non-action step, or issue its call
fn execute_current_step(state: &FlowState, flow: &FlowDefinition, at: DateTime<Utc>) -> TransitionResult {
    let mut next = state.clone();

    let Some(step) = flow.steps.get(state.step_index) else {
        next.phase = FlowPhase::Complete;
        next.step_index = flow.len();
        return TransitionResult::new(next).with_effect(Effect::PublishState);
    };

    let Some(action) = &step.action else {
        move_past(&mut next, flow);
        return TransitionResult::new(next).with_effect(Effect::PublishState);
    };

    match render_action(action, &state.variables) {
        Ok(request) => {
            let call_id = state.last_call_id + 1;
            next.last_call_id = call_id;
            next.phase = FlowPhase::AwaitingResponse {
                call_id,
                request: request.clone(),
            };
            TransitionResult::new(next)
                .with_effect(Effect::IssueCall {
                    call_id,
                    step_id: step.id.clone(),
                    request,
                })
                .with_effect(Effect::PublishState)
        }
        Err(e) => {
            let message = format!("Step {} could not be prepared: {e}", step.id);
            let mut detail = StepDetail::new(&step.id, step.ordinal, at);
            detail.error = Some(message.clone());
            next.details.push(detail);
            next.phase = FlowPhase::Halted { error: message };
            TransitionResult::new(next).with_effect(Effect::PublishState)
        }
    }
}

fn complete_call(
    state: &FlowState,
    flow: &FlowDefinition,
    request: &NetworkRequest,
    response: &NetworkResponse,
    at: DateTime<Utc>,
) -> TransitionResult {
    let mut next = state.clone();
    let Some(step) = flow.steps.get(state.step_index) else {
        next.phase = FlowPhase::Complete;
        return TransitionResult::new(next).with_effect(Effect::PublishState);
    };

    if let Some(action) = &step.action {
        apply_captures(action, &response.body, &mut next.variables);
    }

    let mut detail = StepDetail::new(&step.id, step.ordinal, at);
    detail.call_id = state.pending_call();
    detail.request = Some(request.clone());
    detail.response = Some(response.body.clone());
    detail.status = Some(response.status);
    detail.duration_ms = Some(response.duration_ms);
    next.details.push(detail);
    move_past(&mut next, flow);

    let entry = NewHistoryEntry {
        status_code: Some(response.status),
        duration_ms: Some(response.duration_ms),
        response: Some(response.body.clone()),
        ..history_entry(flow, step, request)
    };

    TransitionResult::new(next)
        .with_effect(Effect::RecordHistory { entry })
        .with_effect(Effect::PublishState)
}

fn fail_call(
    state: &FlowState,
    flow: &FlowDefinition,
    request: &NetworkRequest,
    failure: CallFailure,
    at: DateTime<Utc>,
) -> TransitionResult {
    let mut next = state.clone();
    let Some(step) = flow.steps.get(state.step_index) else {
        next.phase = FlowPhase::Halted {
            error: failure.message,
        };
        return TransitionResult::new(next).with_effect(Effect::PublishState);
    };

    let entry = NewHistoryEntry {
        status_code: failure.status,
        response: failure.body.clone(),
        ..history_entry(flow, step, request)
    };

    let mut detail = StepDetail::new(&step.id, step.ordinal, at);
    detail.call_id = state.pending_call();
    detail.request = Some(request.clone());
    detail.response = failure.body;
    detail.status = failure.status;
    detail.error = Some(failure.message.clone());
    detail.retryable = failure.retryable;
    next.details.push(detail);
    next.phase = FlowPhase::Halted {
        error: failure.message,
    };

    TransitionResult::new(next)
        .with_effect(Effect::RecordHistory { entry })
        .with_effect(Effect::PublishState)
}

fn move_past(state: &mut FlowState, flow: &FlowDefinition) {
    state.step_index += 1;
    state.phase = if state.step_index >= flow.len() {
        FlowPhase::Complete
    } else {
        FlowPhase::Running
    };
}

fn history_entry(flow: &FlowDefinition, step: &Step, request: &NetworkRequest) -> NewHistoryEntry {
    NewHistoryEntry {
        flow_id: Some(flow.id.clone()),
        step_id: Some(step.id.clone()),
        method: request.method.as_str().to_string(),
        endpoint: request.path.clone(),
        request: request.body.clone(),
        ..NewHistoryEntry::default()
    }
}

/// Seed variables for a run: flow defaults, then stored values, then overrides
pub fn seed_variables(
    flow: &FlowDefinition,
    stored: &Variables,
    overrides: impl IntoIterator<Item = (String, String)>,
) -> Variables {
    let mut variables = flow.defaults.clone();
    variables.extend(stored.iter().map(|(k, v)| (k.clone(), v.clone())));
    variables.extend(overrides);
    variables
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::catalog::StepAction;
    use crate::network::HttpMethod;
    use serde_json::json;

    fn demo_flow() -> FlowDefinition {
        FlowDefinition::new("demo", "Demo", "")
            .party("shopper", "Shopper")
            .party("shop", "Shop")
            .party("net", "Network")
            .step(Step::new("browse", "shopper", "shop", "Browse"))
            .step(
                Step::new("create", "shop", "net", "Create session").action(
                    StepAction::post("/sessions")
                        .body(r#"{"amount":{{amount}}}"#)
                        .capture("session_id", "/session_id"),
                ),
            )
            .step(
                Step::new("read", "shop", "net", "Read session")
                    .action(StepAction::get("/sessions/{{session_id}}")),
            )
    }

    fn started(flow: &FlowDefinition) -> FlowState {
        let mut variables = Variables::new();
        variables.insert("amount".to_string(), "100".to_string());
        transition(&FlowState::default(), flow, Event::Start { variables })
            .unwrap()
            .new_state
    }

    fn ok(status: u16, body: serde_json::Value) -> NetworkResponse {
        NetworkResponse {
            status,
            body,
            duration_ms: 12,
        }
    }

    #[test]
    fn test_advance_before_start_is_rejected() {
        let flow = demo_flow();
        let err = transition(&FlowState::default(), &flow, Event::advance()).unwrap_err();
        assert_eq!(err, TransitionError::NotStarted);
    }

    #[test]
    fn test_non_action_step_advances_without_call() {
        let flow = demo_flow();
        let result = transition(&started(&flow), &flow, Event::advance()).unwrap();
        assert_eq!(result.new_state.step_index, 1);
        assert_eq!(result.new_state.phase, FlowPhase::Running);
        assert_eq!(result.effects, vec![Effect::PublishState]);
        assert!(result.new_state.details.is_empty());
    }

    #[test]
    fn test_action_step_issues_call_and_captures() {
        let flow = demo_flow();
        let state = transition(&started(&flow), &flow, Event::advance())
            .unwrap()
            .new_state;

        let result = transition(&state, &flow, Event::advance()).unwrap();
        let state = result.new_state;
        assert!(state.is_busy());
        let Some(Effect::IssueCall { call_id, request, .. }) = result.effects.first() else {
            panic!("expected IssueCall, got {:?}", result.effects);
        };
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.body, Some(json!({ "amount": 100 })));

        // Busy: advance rejected
        assert_eq!(
            transition(&state, &flow, Event::advance()).unwrap_err(),
            TransitionError::CallInFlight
        );

        let result = transition(
            &state,
            &flow,
            Event::call_succeeded(*call_id, ok(200, json!({ "session_id": "s_9" }))),
        )
        .unwrap();
        let state = result.new_state;
        assert_eq!(state.step_index, 2);
        assert_eq!(state.variables.get("session_id").map(String::as_str), Some("s_9"));
        assert!(matches!(
            result.effects.first(),
            Some(Effect::RecordHistory { entry }) if entry.endpoint == "/sessions" && entry.status_code == Some(200)
        ));

        // The captured id feeds the next request path
        let result = transition(&state, &flow, Event::advance()).unwrap();
        assert!(matches!(
            result.effects.first(),
            Some(Effect::IssueCall { request, .. }) if request.path == "/sessions/s_9"
        ));
    }

    #[test]
    fn test_failure_halts_and_retry_reissues() {
        let flow = demo_flow();
        let mut state = started(&flow);
        state = transition(&state, &flow, Event::advance()).unwrap().new_state;
        state = transition(&state, &flow, Event::advance()).unwrap().new_state;
        let call_id = state.pending_call().unwrap();

        let mut failure = CallFailure::new("Payment network returned 503");
        failure.status = Some(503);
        failure.retryable = true;
        let result = transition(&state, &flow, Event::call_failed(call_id, failure)).unwrap();
        state = result.new_state;
        assert!(matches!(state.phase, FlowPhase::Halted { .. }));
        assert_eq!(state.step_index, 1);
        assert!(state.details.last().unwrap().retryable);

        assert_eq!(
            transition(&state, &flow, Event::advance()).unwrap_err(),
            TransitionError::Halted
        );

        let result = transition(&state, &flow, Event::retry()).unwrap();
        assert!(matches!(
            result.new_state.phase,
            FlowPhase::AwaitingResponse { call_id: id, .. } if id == call_id + 1
        ));
    }

    #[test]
    fn test_missing_variable_halts_without_call() {
        let flow = demo_flow();
        let state = transition(&FlowState::default(), &flow, Event::Start { variables: Variables::new() })
            .unwrap()
            .new_state;
        let state = transition(&state, &flow, Event::advance()).unwrap().new_state;

        let result = transition(&state, &flow, Event::advance()).unwrap();
        assert!(result
            .effects
            .iter()
            .all(|e| !matches!(e, Effect::IssueCall { .. })));
        let FlowPhase::Halted { error } = &result.new_state.phase else {
            panic!("expected halt");
        };
        assert!(error.contains("amount"));
    }

    #[test]
    fn test_stale_result_after_reset_is_ignored() {
        let flow = demo_flow();
        let mut state = started(&flow);
        state = transition(&state, &flow, Event::advance()).unwrap().new_state;
        state = transition(&state, &flow, Event::advance()).unwrap().new_state;
        let call_id = state.pending_call().unwrap();

        let reset = transition(&state, &flow, Event::Reset).unwrap().new_state;
        assert_eq!(reset.phase, FlowPhase::Idle);
        assert!(reset.details.is_empty());
        assert_eq!(reset.last_call_id, call_id);

        let result = transition(&reset, &flow, Event::call_succeeded(call_id, ok(200, json!({})))).unwrap();
        assert_eq!(result.new_state, reset);
        assert!(result.effects.is_empty());
    }

    #[test]
    fn test_completion_and_restart() {
        let flow = FlowDefinition::new("short", "Short", "")
            .party("a", "A")
            .step(Step::new("only", "a", "a", "Only"));
        let state = started(&flow);
        let done = transition(&state, &flow, Event::advance()).unwrap().new_state;
        assert!(done.is_terminal());
        assert_eq!(done.step_index, 1);
        assert_eq!(
            transition(&done, &flow, Event::advance()).unwrap_err(),
            TransitionError::Finished
        );

        let again = transition(&done, &flow, Event::Start { variables: Variables::new() })
            .unwrap()
            .new_state;
        assert_eq!(again.phase, FlowPhase::Running);
        assert!(again.details.is_empty());
    }

    #[test]
    fn test_retry_requires_halt() {
        let flow = demo_flow();
        assert_eq!(
            transition(&started(&flow), &flow, Event::retry()).unwrap_err(),
            TransitionError::NotHalted
        );
    }

    #[test]
    fn test_seed_variables_precedence() {
        let flow = FlowDefinition::new("f", "F", "")
            .default_var("currency", "USD")
            .default_var("amount", "1");
        let mut stored = Variables::new();
        stored.insert("amount".to_string(), "50".to_string());
        let seeded = seed_variables(
            &flow,
            &stored,
            [("api_base_url".to_string(), "https://api.test".to_string())],
        );
        assert_eq!(seeded.get("currency").map(String::as_str), Some("USD"));
        assert_eq!(seeded.get("amount").map(String::as_str), Some("50"));
        assert_eq!(seeded.get("api_base_url").map(String::as_str), Some("https://api.test"));
    }
}
