mod common;

use common::{Harness, volume};
use volume_core::link::{DeliveryError, LinkError, LinkEvent, MAX_CONNECTIONS};
use volume_core::presses::PressLine;
use volume_core::telemetry::TelemetryEventKind;

fn recorded(harness: &Harness, event: TelemetryEventKind) -> bool {
    harness
        .controller
        .telemetry()
        .oldest_first()
        .any(|record| record.event == event)
}

#[test]
fn disconnect_mid_press_finishes_the_job_silently() {
    let mut harness = Harness::booted();
    let client = harness.connect();

    harness.send(client, "UP");
    harness.advance(50);
    harness.disconnect(client);
    harness.run_until_idle();

    assert_eq!(harness.controller.volume(), volume(10));
    assert_eq!(harness.driver().asserts(PressLine::Up), 1);
    assert!(harness.sink.lines.is_empty());
    assert!(!harness.controller.connections().is_open(client));
}

#[test]
fn disconnect_during_sweep_drops_the_pending_reply() {
    let mut harness = Harness::booted();
    let client = harness.connect();

    harness.send(client, "SET:2");
    harness.advance(300);
    harness.disconnect(client);
    harness.run_until_idle();

    assert_eq!(harness.controller.volume(), volume(2));
    assert_eq!(harness.driver().asserts(PressLine::Down), 16);
    assert_eq!(harness.driver().asserts(PressLine::Up), 3);
    assert!(harness.sink.lines.is_empty());
}

#[test]
fn reused_slot_does_not_inherit_a_reply() {
    let mut harness = Harness::booted();
    let first = harness.connect();

    harness.send(first, "SET:5");
    harness.advance(10);
    harness.disconnect(first);
    let second = harness.connect();
    assert_eq!(first.slot(), second.slot());
    assert_ne!(first, second);

    harness.run_until_idle();

    assert_eq!(harness.controller.volume(), volume(5));
    assert!(harness.sink.lines.is_empty());
}

#[test]
fn other_clients_are_refused_while_busy() {
    let mut harness = Harness::booted();
    let owner = harness.connect();
    let other = harness.connect();

    harness.send(owner, "UP");
    harness.send(other, "GET");
    harness.send(other, "nonsense");
    harness.run_until_idle();

    assert_eq!(harness.lines_for(other), ["ERR busy\n", "ERR busy\n"]);
    assert_eq!(harness.lines_for(owner), ["OK volume=10\n"]);
}

#[test]
fn unwritable_respondent_is_suppressed() {
    let mut harness = Harness::booted();
    let client = harness.connect();

    harness.send(client, "DOWN");
    harness.sink.unwritable.insert(client);
    harness.run_until_idle();

    assert_eq!(harness.controller.volume(), volume(8));
    assert!(harness.sink.lines.is_empty());
    assert!(recorded(
        &harness,
        TelemetryEventKind::ResponseSuppressed(DeliveryError::NotWritable)
    ));
}

#[test]
fn stale_handles_are_rejected() {
    let mut harness = Harness::booted();
    let client = harness.connect();
    harness.disconnect(client);
    let now = harness.now();

    let data = harness.controller.handle_event(
        LinkEvent::DataReceived {
            connection: client,
            bytes: b"UP",
        },
        now,
        &mut harness.sink,
    );
    let gone = harness.controller.handle_event(
        LinkEvent::Disconnected { connection: client },
        now,
        &mut harness.sink,
    );

    assert_eq!(data, Err(LinkError::UnknownConnection));
    assert_eq!(gone, Err(LinkError::UnknownConnection));
    assert!(!harness.controller.is_busy());
    assert!(harness.sink.lines.is_empty());
}

#[test]
fn registry_refuses_connections_beyond_capacity() {
    let mut harness = Harness::booted();
    for _ in 0..MAX_CONNECTIONS {
        harness.connect();
    }
    let now = harness.now();

    assert_eq!(harness.controller.connect(now), Err(LinkError::RegistryFull));
}

#[test]
fn connection_lifecycle_is_recorded() {
    let mut harness = Harness::booted();
    let client = harness.connect();
    harness.disconnect(client);

    assert!(recorded(&harness, TelemetryEventKind::ConnectionOpened));
    assert!(recorded(&harness, TelemetryEventKind::ConnectionClosed));
}
