//! End-to-end tests through the running engine
//!
//! Everything here goes in through the public surface (host mutations and
//! commands) and comes back out through the event feed, with both actors,
//! the watcher and the blocking read loop live in between.

use std::sync::Arc;
use std::time::{Duration, Instant};

use session_actors::{EngineConfig, SessionEngine};
use session_protocol::{Event, EventKind, SessionCommand};
use session_runtime::EventFeed;
use transport_loopback::{LoopbackDriver, LoopbackHost};

fn start(host: &LoopbackHost) -> SessionEngine {
    let driver = Arc::new(LoopbackDriver::new(host));
    SessionEngine::start(Arc::new(host.clone()), driver, EngineConfig::default())
}

async fn next_event(feed: &mut EventFeed) -> Event {
    tokio::time::timeout(Duration::from_secs(5), feed.next())
        .await
        .expect("timed out waiting for an event")
        .expect("event feed closed")
}

/// Skip over events until one of the wanted kind arrives
async fn wait_for(feed: &mut EventFeed, kind: EventKind) -> Event {
    loop {
        let event = next_event(feed).await;
        if event.kind == kind {
            return event;
        }
    }
}

/// Give in-flight messages a moment to settle, then collect what arrived
async fn settle(feed: &mut EventFeed) -> Vec<Event> {
    tokio::time::sleep(Duration::from_millis(100)).await;
    feed.drain()
}

#[tokio::test]
async fn test_empty_host_reports_once_and_stays_idle() {
    let host = LoopbackHost::new();
    let mut engine = start(&host);
    let mut feed = engine.take_event_feed();

    let event = next_event(&mut feed).await;
    assert_eq!(event.kind, EventKind::Info);
    assert_eq!(event.message, "No USB serial device found");

    assert!(settle(&mut feed).await.is_empty());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_pre_granted_device_connects_without_dialog() {
    let host = LoopbackHost::new();
    let device = host.attach(0x0403, 0x6001, "FT232R");
    host.pre_grant(device.id);

    let mut engine = start(&host);
    let mut feed = engine.take_event_feed();

    let found = next_event(&mut feed).await;
    assert_eq!(found.kind, EventKind::DeviceFound);
    assert_eq!(
        found.message,
        format!("Found USB device: {}", device.label())
    );

    // Straight to the session, no permission round trip
    let connected = next_event(&mut feed).await;
    assert_eq!(connected.kind, EventKind::Connected);
    assert_eq!(
        connected.message,
        format!("Connected to {}", device.label())
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn test_grant_leads_to_active() {
    let host = LoopbackHost::new();
    let device = host.attach(0x0403, 0x6001, "FT232R");

    let mut engine = start(&host);
    let mut feed = engine.take_event_feed();

    assert_eq!(next_event(&mut feed).await.kind, EventKind::DeviceFound);
    let requested = next_event(&mut feed).await;
    assert_eq!(requested.kind, EventKind::PermissionRequested);
    assert_eq!(
        requested.message,
        format!("Requesting permission for {}", device.label())
    );

    host.grant(device.id);

    let result = next_event(&mut feed).await;
    assert_eq!(result.kind, EventKind::PermissionResult);
    assert_eq!(
        result.message,
        format!("Permission granted for {}", device.label())
    );
    assert_eq!(next_event(&mut feed).await.kind, EventKind::Connected);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_denial_returns_to_idle_without_retry() {
    let host = LoopbackHost::new();
    let device = host.attach(0x0403, 0x6001, "FT232R");

    let mut engine = start(&host);
    let mut feed = engine.take_event_feed();
    wait_for(&mut feed, EventKind::PermissionRequested).await;

    host.deny(device.id);

    let result = next_event(&mut feed).await;
    assert_eq!(result.kind, EventKind::PermissionResult);
    assert_eq!(
        result.message,
        format!("Permission denied for {}", device.label())
    );

    // No automatic retry, no connection
    assert!(settle(&mut feed).await.is_empty());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_reattach_after_denial_asks_again() {
    let host = LoopbackHost::new();
    let device = host.attach(0x0403, 0x6001, "FT232R");

    let mut engine = start(&host);
    let mut feed = engine.take_event_feed();
    wait_for(&mut feed, EventKind::PermissionRequested).await;
    host.deny(device.id);
    wait_for(&mut feed, EventKind::PermissionResult).await;

    // Replug: the denial dies with the attach cycle
    host.detach(device.id);
    feed.drain();
    let replugged = host.attach(0x0403, 0x6001, "FT232R");

    let requested = wait_for(&mut feed, EventKind::PermissionRequested).await;
    assert_eq!(
        requested.message,
        format!("Requesting permission for {}", replugged.label())
    );

    host.grant(replugged.id);
    assert_eq!(
        wait_for(&mut feed, EventKind::Connected).await.message,
        format!("Connected to {}", replugged.label())
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn test_first_match_wins_and_session_is_single() {
    let host = LoopbackHost::new();
    let first = host.attach(0x0403, 0x6001, "FT232R");
    host.attach(0x10c4, 0xea60, "CP2102");

    let mut engine = start(&host);
    let mut feed = engine.take_event_feed();

    let found = next_event(&mut feed).await;
    assert_eq!(found.kind, EventKind::DeviceFound);
    assert_eq!(
        found.message,
        format!("Found USB device: {}", first.label())
    );
    let requested = next_event(&mut feed).await;
    assert_eq!(requested.kind, EventKind::PermissionRequested);
    assert_eq!(
        requested.message,
        format!("Requesting permission for {}", first.label())
    );

    host.grant(first.id);
    wait_for(&mut feed, EventKind::Connected).await;

    // A third device attaching mid-session changes nothing
    host.attach(0x067b, 0x2303, "PL2303");
    let late = settle(&mut feed).await;
    assert!(
        late.iter()
            .all(|e| e.kind != EventKind::PermissionRequested && e.kind != EventKind::DeviceFound),
        "{:?}",
        late
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn test_stale_grant_after_detach_is_discarded() {
    let host = LoopbackHost::new();
    let device = host.attach(0x0403, 0x6001, "FT232R");

    let mut engine = start(&host);
    let mut feed = engine.take_event_feed();
    wait_for(&mut feed, EventKind::PermissionRequested).await;

    host.detach(device.id);
    let detached = next_event(&mut feed).await;
    assert_eq!(detached.kind, EventKind::Info);
    assert_eq!(
        detached.message,
        format!("Device detached: {}", device.label())
    );

    // The decision for the vanished device arrives anyway
    host.grant(device.id);
    let late = settle(&mut feed).await;
    assert!(late.is_empty(), "{:?}", late);

    // The engine is still usable afterwards
    host.set_auto_grant(true);
    host.attach(0x0403, 0x6001, "FT232R");
    wait_for(&mut feed, EventKind::Connected).await;

    engine.shutdown().await;
}

#[tokio::test]
async fn test_loopback_round_trip() {
    let host = LoopbackHost::new();
    let device = host.attach(0x0403, 0x6001, "FT232R");
    host.pre_grant(device.id);

    let mut engine = start(&host);
    let mut feed = engine.take_event_feed();
    wait_for(&mut feed, EventKind::Connected).await;

    engine
        .send_command(SessionCommand::Send {
            data: b"ping".to_vec(),
        })
        .unwrap();

    // Sent and the loopback echo, in whichever order the threads land
    let first = next_event(&mut feed).await;
    let second = next_event(&mut feed).await;
    let mut events = [first, second];
    events.sort_by_key(|e| e.kind != EventKind::DataSent);
    assert_eq!(events[0].kind, EventKind::DataSent);
    assert_eq!(events[0].message, "Sent: ping");
    assert_eq!(events[1].kind, EventKind::DataReceived);
    assert_eq!(events[1].message, "Received: ping");

    // Exactly one echo
    assert!(
        settle(&mut feed)
            .await
            .iter()
            .all(|e| e.kind != EventKind::DataReceived)
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn test_teardown_is_prompt_and_final() {
    let host = LoopbackHost::new();
    let device = host.attach(0x0403, 0x6001, "FT232R");
    host.pre_grant(device.id);

    let mut engine = start(&host);
    let mut feed = engine.take_event_feed();
    wait_for(&mut feed, EventKind::Connected).await;

    host.inject(device.id, b"live");
    assert_eq!(
        wait_for(&mut feed, EventKind::DataReceived).await.message,
        "Received: live"
    );

    // Teardown must not wait out the full read timeout
    let started = Instant::now();
    engine.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(2));

    // Data arriving after the close never surfaces
    host.inject(device.id, b"late");
    let late = settle(&mut feed).await;
    assert!(
        late.iter().all(|e| e.kind != EventKind::DataReceived),
        "{:?}",
        late
    );
}

#[tokio::test]
async fn test_detach_while_active_disconnects() {
    let host = LoopbackHost::new();
    let device = host.attach(0x0403, 0x6001, "FT232R");
    host.pre_grant(device.id);

    let mut engine = start(&host);
    let mut feed = engine.take_event_feed();
    wait_for(&mut feed, EventKind::Connected).await;

    host.detach(device.id);

    let disconnected = wait_for(&mut feed, EventKind::Disconnected).await;
    assert_eq!(
        disconnected.message,
        format!("Device detached: {}", device.label())
    );

    // Writes afterwards get the hint instead of reaching a port
    engine
        .send_command(SessionCommand::Send {
            data: b"ping".to_vec(),
        })
        .unwrap();
    let hint = next_event(&mut feed).await;
    assert_eq!(hint.message, "Serial port not opened");

    engine.shutdown().await;
}
