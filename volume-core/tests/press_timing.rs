mod common;

use std::time::Duration;

use common::{Harness, Transition, volume};
use volume_core::presses::{LineAction, PRESS_HOLD, PRESS_PAUSE, PressLine};
use volume_core::scheduler::{PressState, SelfTestPhase};

fn assert_pulse_timing(transitions: &[Transition]) {
    for pair in transitions.windows(2) {
        let gap = Duration::from_micros(pair[1].at.0 - pair[0].at.0);
        match (pair[0].action, pair[1].action) {
            (LineAction::Assert, LineAction::Release) => {
                assert_eq!(pair[0].line, pair[1].line);
                assert!(gap >= PRESS_HOLD, "hold too short: {gap:?} at {:?}", pair[0]);
            }
            (LineAction::Release, LineAction::Assert) => {
                assert!(gap >= PRESS_PAUSE, "pause too short: {gap:?} at {:?}", pair[0]);
            }
            _ => panic!("pulses must alternate: {pair:?}"),
        }
    }
}

#[test]
fn up_from_default_completes_after_one_full_pulse() {
    let mut harness = Harness::booted();
    let client = harness.connect();

    harness.send(client, "UP");
    assert!(harness.controller.is_busy());
    assert_eq!(harness.controller.press_state(), PressState::PulseOn);
    assert_eq!(harness.controller.volume(), volume(9));

    harness.advance(199);
    assert!(harness.lines_for(client).is_empty());
    assert_eq!(harness.controller.volume(), volume(9));

    harness.advance(1);
    assert_eq!(harness.lines_for(client), ["OK volume=10\n"]);
    assert_eq!(harness.controller.volume(), volume(10));
    assert!(!harness.controller.is_busy());

    let transitions = &harness.driver().transitions;
    assert_eq!(transitions.len(), 2);
    assert!(transitions.iter().all(|t| t.line == PressLine::Up));
    assert_pulse_timing(transitions);
}

#[test]
fn down_moves_one_step() {
    let mut harness = Harness::at_volume(4);
    let client = harness.connect();

    harness.send(client, "DOWN");
    harness.run_until_idle();

    assert_eq!(harness.lines_for(client), ["OK volume=3\n"]);
    assert_eq!(harness.driver().asserts(PressLine::Down), 1);
    assert_eq!(harness.driver().asserts(PressLine::Up), 0);
}

#[test]
fn resync_pulses_hold_and_pause_for_full_periods() {
    let mut harness = Harness::at_volume(10);
    let client = harness.connect();

    harness.send(client, "SET:3");
    harness.run_until_idle();

    assert_pulse_timing(&harness.driver().transitions);
}

#[test]
fn second_command_during_press_is_busy() {
    let mut harness = Harness::booted();
    let client = harness.connect();

    harness.send(client, "UP");
    harness.advance(50);
    harness.send(client, "DOWN");
    assert_eq!(harness.lines_for(client), ["ERR busy\n"]);
    assert_eq!(harness.controller.volume(), volume(9));

    harness.run_until_idle();
    assert_eq!(harness.lines_for(client), ["ERR busy\n", "OK volume=10\n"]);
    assert_eq!(harness.driver().asserts(PressLine::Down), 0);
}

#[test]
fn get_answers_immediately_without_pulses() {
    let mut harness = Harness::booted();
    let client = harness.connect();

    harness.send(client, "GET");

    assert_eq!(harness.lines_for(client), ["OK volume=9\n"]);
    assert!(harness.driver().transitions.is_empty());
    assert!(!harness.controller.is_busy());
}

#[test]
fn self_test_walks_both_lines_then_reports() {
    let mut harness = Harness::booted();
    let client = harness.connect();
    let started = harness.now();

    harness.send(client, "TEST");
    assert_eq!(
        harness.controller.press_state(),
        PressState::SelfTest(SelfTestPhase::DownOn)
    );

    harness.advance(4_699);
    assert!(harness.lines_for(client).is_empty());
    harness.advance(1);
    assert_eq!(harness.lines_for(client), ["OK test done\n"]);
    assert_eq!(harness.controller.volume(), volume(9));

    let offsets: Vec<(u64, PressLine, LineAction)> = harness
        .driver()
        .transitions
        .iter()
        .map(|t| (t.at.as_millis() - started.as_millis(), t.line, t.action))
        .collect();
    assert_eq!(
        offsets,
        [
            (0, PressLine::Down, LineAction::Assert),
            (2_000, PressLine::Down, LineAction::Release),
            (2_500, PressLine::Up, LineAction::Assert),
            (4_500, PressLine::Up, LineAction::Release),
        ]
    );
}

#[test]
fn commands_during_self_test_are_busy() {
    let mut harness = Harness::booted();
    let client = harness.connect();

    harness.send(client, "TEST");
    harness.advance(1_000);
    harness.send(client, "GET");

    assert_eq!(harness.lines_for(client), ["ERR busy\n"]);
}
