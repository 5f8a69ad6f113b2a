//! Property-based tests for the turn state machine
//!
//! These tests verify frame ordering, latest-partial-wins, and the single
//! terminal transition guarantee across arbitrary frame sequences.

use super::*;
use crate::action::ActionError;
use crate::stream_decoder::Frame;
use proptest::prelude::*;

type State = TurnState<String, String>;
type Event = TurnEvent<String, String>;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_text() -> impl Strategy<Value = String> {
    "[a-zA-Z ]{0,20}"
}

fn arb_frame_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        4 => arb_text().prop_map(TurnEvent::Partial),
        1 => arb_text().prop_map(TurnEvent::Final),
        1 => arb_text().prop_map(|m| TurnEvent::Failed(ActionError::server(m))),
    ]
}

fn arb_state() -> impl Strategy<Value = State> {
    prop_oneof![
        Just(TurnState::Idle),
        Just(TurnState::Pending),
        arb_text().prop_map(|partial| TurnState::Streaming { partial }),
        (arb_text(), proptest::option::of(arb_text())).prop_map(|(final_data, last_partial)| {
            TurnState::Success {
                final_data,
                last_partial,
            }
        }),
        arb_text().prop_map(|m| TurnState::Error {
            error: ActionError::parse(m),
            last_partial: None,
        }),
    ]
}

/// Apply events in order, skipping rejected ones, and record visited states
fn run(events: Vec<Event>) -> (Vec<TurnStatus>, Vec<TurnEffect<String, String>>, State) {
    let mut state = State::Idle;
    let mut statuses = Vec::new();
    let mut effects = Vec::new();
    for event in std::iter::once(TurnEvent::Start).chain(events) {
        if let Ok(result) = transition(&state, event) {
            statuses.push(result.new_state.status());
            effects.extend(result.effects);
            state = result.new_state;
        }
    }
    (statuses, effects, state)
}

proptest! {
    #[test]
    fn prop_partials_then_final_visit_streaming_then_success(
        partials in proptest::collection::vec(arb_text(), 0..8),
        final_text in arb_text(),
    ) {
        let mut events: Vec<Event> = partials.iter().cloned().map(TurnEvent::Partial).collect();
        events.push(TurnEvent::Final(final_text.clone()));

        let (statuses, _, state) = run(events);

        let mut expected = vec![TurnStatus::Pending];
        expected.extend(std::iter::repeat(TurnStatus::Streaming).take(partials.len()));
        expected.push(TurnStatus::Success);
        prop_assert_eq!(statuses, expected);
        prop_assert_eq!(state.final_data(), Some(&final_text));
    }

    #[test]
    fn prop_latest_partial_wins_and_callbacks_keep_order(
        partials in proptest::collection::vec(arb_text(), 1..8),
    ) {
        let events: Vec<Event> = partials.iter().cloned().map(TurnEvent::Partial).collect();
        let (_, effects, state) = run(events);

        prop_assert_eq!(state.stream_data(), partials.last());

        let streamed: Vec<String> = effects
            .iter()
            .filter_map(|e| match e {
                TurnEffect::StreamData(p) => Some(p.clone()),
                _ => None,
            })
            .collect();
        prop_assert_eq!(&streamed, &partials);

        let data: Vec<String> = effects
            .iter()
            .filter_map(|e| match e {
                TurnEffect::Data(Frame::Partial(p)) => Some(p.clone()),
                _ => None,
            })
            .collect();
        prop_assert_eq!(&data, &partials);
    }

    #[test]
    fn prop_at_most_one_terminal_transition(
        events in proptest::collection::vec(arb_frame_event(), 0..20),
    ) {
        let (statuses, effects, _) = run(events);
        let terminal = statuses.iter().filter(|s| s.is_terminal()).count();
        prop_assert!(terminal <= 1);

        let terminal_callbacks = effects
            .iter()
            .filter(|e| matches!(e, TurnEffect::FinalData(_) | TurnEffect::Error(_)))
            .count();
        prop_assert_eq!(terminal, terminal_callbacks);
    }

    #[test]
    fn prop_start_always_enters_pending(state in arb_state()) {
        let result = transition(&state, TurnEvent::Start).unwrap();
        prop_assert_eq!(result.new_state, TurnState::Pending);
        prop_assert!(result.effects.is_empty());
    }

    #[test]
    fn prop_reset_always_enters_idle(state in arb_state()) {
        let result = transition(&state, TurnEvent::Reset).unwrap();
        prop_assert_eq!(result.new_state, TurnState::Idle);
    }

    #[test]
    fn prop_success_never_holds_a_partial_as_final(
        partials in proptest::collection::vec("[a-z]{1,5}", 1..5),
    ) {
        let final_text = "FINAL".to_string();
        let mut events: Vec<Event> = partials.iter().cloned().map(TurnEvent::Partial).collect();
        events.push(TurnEvent::Final(final_text.clone()));
        events.extend(partials.iter().cloned().map(TurnEvent::Partial));

        let (_, _, state) = run(events);
        prop_assert_eq!(state.final_data(), Some(&final_text));
    }
}
