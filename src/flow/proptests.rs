//! Property-based tests for the flow controller

use super::catalog::{FlowDefinition, Step, StepAction};
use super::event::CallFailure;
use super::state::{FlowPhase, FlowState};
use super::*;
use crate::network::NetworkResponse;
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// Arbitrary Generators
// ============================================================================

/// A flow whose steps are actions where the flag is set
fn build_flow(actions: &[bool]) -> FlowDefinition {
    actions.iter().enumerate().fold(
        FlowDefinition::new("prop", "Prop", "")
            .party("a", "A")
            .party("b", "B"),
        |flow, (i, is_action)| {
            let step = Step::new(format!("step-{i}"), "a", "b", format!("Step {i}"));
            let step = if *is_action {
                step.action(StepAction::post(format!("/calls/{i}")).capture(format!("v{i}"), "/id"))
            } else {
                step
            };
            flow.step(step)
        },
    )
}

fn arb_flow() -> impl Strategy<Value = FlowDefinition> {
    prop::collection::vec(any::<bool>(), 0..8).prop_map(|actions| build_flow(&actions))
}

fn arb_plain_flow() -> impl Strategy<Value = (FlowDefinition, usize)> {
    (1usize..10).prop_map(|n| (build_flow(&vec![false; n]), n))
}

/// Commands a user or the gateway might send; call ids are drawn near the
/// current one so some results match and some are stale
#[derive(Debug, Clone)]
enum Cmd {
    Start,
    Advance,
    Retry,
    Reset,
    Succeed(u64),
    Fail(u64),
}

fn arb_cmd() -> impl Strategy<Value = Cmd> {
    prop_oneof![
        1 => Just(Cmd::Start),
        4 => Just(Cmd::Advance),
        1 => Just(Cmd::Retry),
        1 => Just(Cmd::Reset),
        3 => (0u64..3).prop_map(Cmd::Succeed),
        2 => (0u64..3).prop_map(Cmd::Fail),
    ]
}

fn to_event(cmd: &Cmd, state: &FlowState) -> Event {
    // Offset 0 targets the newest call id
    let id = |offset: u64| state.last_call_id.saturating_sub(offset);
    match cmd {
        Cmd::Start => Event::Start {
            variables: Variables::new(),
        },
        Cmd::Advance => Event::advance(),
        Cmd::Retry => Event::retry(),
        Cmd::Reset => Event::Reset,
        Cmd::Succeed(offset) => Event::call_succeeded(
            id(*offset),
            NetworkResponse {
                status: 200,
                body: json!({ "id": "x" }),
                duration_ms: 1,
            },
        ),
        Cmd::Fail(offset) => Event::call_failed(id(*offset), CallFailure::new("boom")),
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_invariants_hold_for_any_command_sequence(
        flow in arb_flow(),
        cmds in prop::collection::vec(arb_cmd(), 0..40),
    ) {
        let mut state = FlowState::default();
        for cmd in &cmds {
            let event = to_event(cmd, &state);
            let restarts = matches!(event, Event::Start { .. } | Event::Reset);
            let Ok(result) = transition(&state, &flow, event) else {
                continue;
            };
            let next = result.new_state;

            prop_assert!(next.step_index <= flow.len());
            prop_assert!(next.last_call_id >= state.last_call_id);
            if !restarts {
                // Details only grow, and existing entries never change
                prop_assert!(next.details.len() >= state.details.len());
                prop_assert_eq!(&next.details[..state.details.len()], &state.details[..]);
                prop_assert!(next.step_index >= state.step_index);
            }
            if next.is_terminal() {
                prop_assert_eq!(next.step_index, flow.len());
            }
            for effect in &result.effects {
                if let Effect::IssueCall { call_id, .. } = effect {
                    prop_assert_eq!(next.pending_call(), Some(*call_id));
                }
            }
            state = next;
        }
    }

    #[test]
    fn prop_reset_always_returns_to_idle(
        flow in arb_flow(),
        cmds in prop::collection::vec(arb_cmd(), 0..20),
    ) {
        let mut state = FlowState::default();
        for cmd in &cmds {
            if let Ok(result) = transition(&state, &flow, to_event(cmd, &state)) {
                state = result.new_state;
            }
        }
        let reset = transition(&state, &flow, Event::Reset).unwrap().new_state;
        prop_assert_eq!(reset.phase, FlowPhase::Idle);
        prop_assert_eq!(reset.step_index, 0);
        prop_assert!(reset.details.is_empty());
        prop_assert!(reset.variables.is_empty());
    }

    #[test]
    fn prop_non_action_steps_never_touch_the_network((flow, n) in arb_plain_flow()) {
        let mut state = transition(&FlowState::default(), &flow, Event::Start { variables: Variables::new() })
            .unwrap()
            .new_state;
        for _ in 0..n {
            let result = transition(&state, &flow, Event::advance()).unwrap();
            prop_assert!(result.effects.iter().all(|e| *e == Effect::PublishState));
            state = result.new_state;
        }
        prop_assert_eq!(state.step_index, n);
        prop_assert!(state.is_terminal());
        prop_assert!(state.details.is_empty());
    }

    #[test]
    fn prop_failure_halts_at_same_step(prefix in 0usize..5, message in "[a-z ]{1,20}") {
        let mut actions = vec![false; prefix];
        actions.push(true);
        let flow = build_flow(&actions);

        let mut state = transition(&FlowState::default(), &flow, Event::Start { variables: Variables::new() })
            .unwrap()
            .new_state;
        for _ in 0..=prefix {
            state = transition(&state, &flow, Event::advance()).unwrap().new_state;
        }
        let call_id = state.pending_call().unwrap();
        let halted = transition(&state, &flow, Event::call_failed(call_id, CallFailure::new(message.clone())))
            .unwrap()
            .new_state;

        prop_assert_eq!(halted.step_index, prefix);
        prop_assert_eq!(halted.phase, FlowPhase::Halted { error: message });
    }

    #[test]
    fn prop_stale_results_are_no_ops(flow in arb_flow(), offset in 1u64..4, succeed in any::<bool>()) {
        let mut state = transition(&FlowState::default(), &flow, Event::Start { variables: Variables::new() })
            .unwrap()
            .new_state;
        // Walk until a call is in flight, if the flow has an action at all
        while !state.is_busy() && !state.is_terminal() {
            state = transition(&state, &flow, Event::advance()).unwrap().new_state;
        }
        let stale = state.last_call_id + offset;
        let event = if succeed {
            Event::call_succeeded(stale, NetworkResponse { status: 200, body: json!({}), duration_ms: 0 })
        } else {
            Event::call_failed(stale, CallFailure::new("late"))
        };
        let result = transition(&state, &flow, event).unwrap();
        prop_assert_eq!(result.new_state, state);
        prop_assert!(result.effects.is_empty());
    }
}
