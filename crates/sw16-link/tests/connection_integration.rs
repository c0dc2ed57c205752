//! Integration tests for the shared controller connection.
//!
//! # Purpose
//!
//! These tests drive `ConnectionRegistry` and `ConnectionManager` through
//! their public API against a simulated controller: a real `TcpListener` on
//! `127.0.0.1:0` that the test reads poll/command frames from and writes
//! status/keepalive frames to.  They verify:
//!
//! - A status poll is sent as soon as the socket opens, and again after every
//!   reconnect.
//! - One status frame fans out to one event per channel.
//! - Commands arrive at the controller as complete frames, in order.
//! - Losing the socket publishes `disconnected`, commands return `false`,
//!   and the link comes back on its own.
//! - When the last subscriber leaves, the idle check closes the socket and
//!   removes the connection from the registry.
//!
//! ```text
//! test (controller)                   ConnectionManager
//! ─────────────────                   ─────────────────
//! accept()                 ◄────────  connect
//! read 20 bytes            ◄────────  aa 1e 01…01 bb   (poll)
//! write cc 0c …            ────────►  16 × channel-N events
//! drop socket              ────────►  disconnected, backoff, reconnect
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sw16_core::{encode_command, encode_poll, Channel, Frame, FRAME_LEN};
use sw16_link::{
    BackoffPolicy, BackoffStrategy, BusEvent, ConnectionConfig, ConnectionManager,
    ConnectionRegistry, LinkState, Subscription, Topic,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use uuid::Uuid;

// ── Helpers ───────────────────────────────────────────────────────────────────

const STEP: Duration = Duration::from_secs(5);

async fn within<F: Future>(fut: F) -> F::Output {
    timeout(STEP, fut).await.expect("step timed out")
}

/// Long timers, fast reconnects: tests trigger polls and teardown explicitly.
fn test_config() -> ConnectionConfig {
    ConnectionConfig {
        poll_interval: Duration::from_secs(60),
        idle_check_interval: Duration::from_secs(60),
        backoff: BackoffPolicy {
            strategy: BackoffStrategy::Fibonacci,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
        },
    }
}

async fn controller() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

async fn accept(listener: &TcpListener) -> TcpStream {
    let (socket, _) = within(listener.accept()).await.unwrap();
    socket
}

async fn read_frame(socket: &mut TcpStream) -> Frame {
    let mut frame = [0u8; FRAME_LEN];
    within(socket.read_exact(&mut frame)).await.unwrap();
    frame
}

async fn next_event(sub: &mut Subscription) -> BusEvent {
    within(sub.recv()).await.expect("bus dropped")
}

fn everything(mgr: &ConnectionManager) -> Subscription {
    mgr.subscribe_all(Channel::all().map(Topic::Channel).chain(Topic::LIFECYCLE))
}

fn status_frame(on: impl Fn(usize) -> bool) -> Frame {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = 0xCC;
    frame[1] = 0x0C;
    for i in 0..16 {
        frame[2 + i] = u8::from(on(i));
    }
    frame[18] = 0x00;
    frame[19] = 0xFF;
    frame
}

async fn channel_events(sub: &mut Subscription, n: usize) -> Vec<(u8, bool)> {
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        match next_event(sub).await {
            BusEvent::Channel { channel, on } => out.push((channel.index(), on)),
            other => panic!("unexpected event {other:?}"),
        }
    }
    out
}

// ── Connection lifecycle ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_connect_polls_immediately_and_status_fans_out() {
    // Arrange
    let (listener, port) = controller().await;
    let registry = ConnectionRegistry::new(test_config());
    let mgr = registry.get_or_create(Uuid::new_v4(), "127.0.0.1", port);
    let mut sub = everything(&mgr);

    // Act
    let mut socket = accept(&listener).await;
    let first = read_frame(&mut socket).await;
    assert_eq!(next_event(&mut sub).await, BusEvent::Connected);
    socket
        .write_all(&status_frame(|i| i % 2 == 0))
        .await
        .unwrap();

    // Assert
    assert_eq!(first, encode_poll());
    let events = channel_events(&mut sub, 16).await;
    let expected: Vec<(u8, bool)> = (0..16u8).map(|i| (i, i % 2 == 0)).collect();
    assert_eq!(events, expected);
    assert!(mgr.connected());
    assert_eq!(mgr.state(), LinkState::Connected);

    registry.shutdown_all();
}

#[tokio::test]
async fn test_connect_resolves_after_first_connection() {
    let (listener, port) = controller().await;
    let mgr = ConnectionManager::new(
        Uuid::new_v4(),
        sw16_core::ControllerAddress::new("127.0.0.1", port),
        test_config(),
    );
    let _sub = mgr.subscribe(Topic::Connected);

    let connecting = {
        let mgr = Arc::clone(&mgr);
        tokio::spawn(async move { mgr.connect().await })
    };
    let _socket = accept(&listener).await;

    within(connecting).await.unwrap().unwrap();
    assert!(mgr.connected());
    mgr.shutdown();
}

#[tokio::test]
async fn test_commands_arrive_as_whole_frames_in_order() {
    // Arrange
    let (listener, port) = controller().await;
    let registry = ConnectionRegistry::new(test_config());
    let mgr = registry.get_or_create(Uuid::new_v4(), "127.0.0.1", port);
    let mut sub = mgr.subscribe(Topic::Connected);
    let mut socket = accept(&listener).await;
    assert_eq!(read_frame(&mut socket).await, encode_poll());
    next_event(&mut sub).await;

    // Act
    assert!(mgr.turn_on(3));
    assert!(mgr.turn_off(3));
    assert!(mgr.turn_on("15"));
    assert!(!mgr.turn_on(16));

    // Assert
    assert_eq!(read_frame(&mut socket).await, encode_command(3, true).unwrap());
    assert_eq!(read_frame(&mut socket).await, encode_command(3, false).unwrap());
    assert_eq!(read_frame(&mut socket).await, encode_command(15, true).unwrap());

    registry.shutdown_all();
}

#[tokio::test]
async fn test_commands_from_many_tasks_are_not_interleaved() {
    let (listener, port) = controller().await;
    let registry = ConnectionRegistry::new(test_config());
    let mgr = registry.get_or_create(Uuid::new_v4(), "127.0.0.1", port);
    let mut sub = mgr.subscribe(Topic::Connected);
    let mut socket = accept(&listener).await;
    read_frame(&mut socket).await;
    next_event(&mut sub).await;

    let mut tasks = Vec::new();
    for ch in 0..16u8 {
        let mgr = Arc::clone(&mgr);
        tasks.push(tokio::spawn(async move { mgr.turn_on(ch) }));
    }
    for task in tasks {
        assert!(task.await.unwrap());
    }

    let mut seen = Vec::new();
    for _ in 0..16 {
        let frame = read_frame(&mut socket).await;
        assert_eq!((frame[0], frame[1], frame[3], frame[19]), (0xAA, 0x0F, 0x01, 0xBB));
        seen.push(frame[2]);
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..16u8).collect::<Vec<_>>());

    registry.shutdown_all();
}

#[tokio::test]
async fn test_poll_timer_repeats_while_connected() {
    let (listener, port) = controller().await;
    let registry = ConnectionRegistry::new(ConnectionConfig {
        poll_interval: Duration::from_millis(100),
        ..test_config()
    });
    let mgr = registry.get_or_create(Uuid::new_v4(), "127.0.0.1", port);
    let _sub = mgr.subscribe(Topic::Connected);
    let mut socket = accept(&listener).await;

    for _ in 0..3 {
        assert_eq!(read_frame(&mut socket).await, encode_poll());
    }

    registry.shutdown_all();
}

// ── Failure recovery ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_lost_socket_reconnects_and_polls_again() {
    // Arrange
    let (listener, port) = controller().await;
    let registry = ConnectionRegistry::new(test_config());
    let mgr = registry.get_or_create(Uuid::new_v4(), "127.0.0.1", port);
    let mut sub = mgr.subscribe_all(Topic::LIFECYCLE);
    let mut socket = accept(&listener).await;
    read_frame(&mut socket).await;
    assert_eq!(next_event(&mut sub).await, BusEvent::Connected);

    // Act: the controller drops the connection.
    drop(socket);

    // Assert
    assert_eq!(next_event(&mut sub).await, BusEvent::Disconnected);
    assert!(!mgr.turn_on(0), "commands must fail while disconnected");
    assert!(!mgr.poll_status());

    let mut socket = accept(&listener).await;
    assert_eq!(read_frame(&mut socket).await, encode_poll());
    assert_eq!(next_event(&mut sub).await, BusEvent::Connected);
    assert!(mgr.turn_on(0));
    assert_eq!(read_frame(&mut socket).await, encode_command(0, true).unwrap());

    registry.shutdown_all();
}

#[tokio::test]
async fn test_unreachable_controller_keeps_retrying_until_it_appears() {
    // Reserve a port, then close it so the first attempts are refused.
    let (listener, port) = controller().await;
    drop(listener);
    let registry = ConnectionRegistry::new(test_config());
    let mgr = registry.get_or_create(Uuid::new_v4(), "127.0.0.1", port);
    let mut sub = mgr.subscribe(Topic::Connected);

    sleep(Duration::from_millis(300)).await;
    assert!(!mgr.connected());
    assert_eq!(mgr.state(), LinkState::Connecting);

    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let mut socket = accept(&listener).await;
    assert_eq!(read_frame(&mut socket).await, encode_poll());
    assert_eq!(next_event(&mut sub).await, BusEvent::Connected);

    registry.shutdown_all();
}

#[tokio::test]
async fn test_malformed_chunks_are_dropped_and_link_survives() {
    let (listener, port) = controller().await;
    let registry = ConnectionRegistry::new(test_config());
    let mgr = registry.get_or_create(Uuid::new_v4(), "127.0.0.1", port);
    let mut sub = everything(&mgr);
    let mut socket = accept(&listener).await;
    read_frame(&mut socket).await;
    assert_eq!(next_event(&mut sub).await, BusEvent::Connected);

    // Short frame, then a full frame with the wrong marker.
    socket.write_all(&status_frame(|_| true)[..19]).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    let mut wrong = status_frame(|_| true);
    wrong[0] = 0xAA;
    socket.write_all(&wrong).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    socket.write_all(&status_frame(|i| i == 9)).await.unwrap();

    let events = channel_events(&mut sub, 16).await;
    assert_eq!(events.iter().filter(|(_, on)| *on).count(), 1);
    assert_eq!(events[9], (9, true));
    assert!(mgr.connected());

    registry.shutdown_all();
}

#[tokio::test]
async fn test_keepalive_is_retained_without_events() {
    let (listener, port) = controller().await;
    let registry = ConnectionRegistry::new(test_config());
    let mgr = registry.get_or_create(Uuid::new_v4(), "127.0.0.1", port);
    let mut sub = everything(&mgr);
    let mut socket = accept(&listener).await;
    read_frame(&mut socket).await;
    assert_eq!(next_event(&mut sub).await, BusEvent::Connected);

    // Reversed layout: second, minute, hour, day, month, week, year.
    let mut keepalive = [0u8; FRAME_LEN];
    keepalive[0] = 0xCC;
    keepalive[1] = 0x0E;
    keepalive[2..9].copy_from_slice(&[30, 15, 9, 24, 12, 3, 25]);
    socket.write_all(&keepalive).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    socket.write_all(&status_frame(|_| false)).await.unwrap();

    // The first event after the keepalive is the status frame's channel 0.
    assert_eq!(channel_events(&mut sub, 16).await[0], (0, false));
    let k = mgr.last_keepalive().expect("keepalive retained");
    assert_eq!((k.year, k.month, k.day), (25, 12, 24));
    assert_eq!((k.hour, k.minute, k.second, k.week), (9, 15, 30, 3));

    registry.shutdown_all();
}

// ── Registry and teardown ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_devices_of_one_instance_share_one_socket() {
    let (listener, port) = controller().await;
    let registry = ConnectionRegistry::new(test_config());
    let id = Uuid::new_v4();

    let managers: Vec<Arc<ConnectionManager>> = (0..16)
        .map(|_| registry.get_or_create(id, "127.0.0.1", port))
        .collect();
    let _sub = managers[0].subscribe(Topic::Connected);

    let _socket = accept(&listener).await;
    assert!(managers.iter().all(|m| Arc::ptr_eq(m, &managers[0])));
    assert_eq!(registry.len(), 1);
    // No second connection is attempted.
    assert!(timeout(Duration::from_millis(200), listener.accept()).await.is_err());

    registry.shutdown_all();
}

#[tokio::test]
async fn test_last_unsubscribe_tears_down_and_next_lookup_is_fresh() {
    // Arrange
    let (listener, port) = controller().await;
    let registry = ConnectionRegistry::new(ConnectionConfig {
        idle_check_interval: Duration::from_millis(100),
        ..test_config()
    });
    let id = Uuid::new_v4();
    let old = registry.get_or_create(id, "127.0.0.1", port);
    let mut sub = old.subscribe_all(Topic::LIFECYCLE);
    let mut socket = accept(&listener).await;
    read_frame(&mut socket).await;
    assert_eq!(next_event(&mut sub).await, BusEvent::Connected);

    // Act
    sub.unsubscribe();

    // Assert: the socket is closed from our side.
    let mut buf = [0u8; FRAME_LEN];
    let n = within(socket.read(&mut buf)).await.unwrap_or(0);
    assert_eq!(n, 0);
    assert_eq!(old.state(), LinkState::Shutdown);
    assert!(registry.get(&id).is_none());
    assert!(!old.turn_on(1));

    // No reconnect happens for the shut-down manager.
    assert!(timeout(Duration::from_millis(300), listener.accept()).await.is_err());

    // A new lookup builds a new manager and a new socket.
    let fresh = registry.get_or_create(id, "127.0.0.1", port);
    let _keep = fresh.subscribe(Topic::Connected);
    assert!(!Arc::ptr_eq(&old, &fresh));
    let mut socket = accept(&listener).await;
    assert_eq!(read_frame(&mut socket).await, encode_poll());

    registry.shutdown_all();
}

#[tokio::test]
async fn test_shutdown_closes_socket_and_stops_timers() {
    let (listener, port) = controller().await;
    let registry = ConnectionRegistry::new(ConnectionConfig {
        poll_interval: Duration::from_millis(50),
        ..test_config()
    });
    let mgr = registry.get_or_create(Uuid::new_v4(), "127.0.0.1", port);
    let _sub = mgr.subscribe(Topic::Connected);
    let mut socket = accept(&listener).await;
    read_frame(&mut socket).await;

    mgr.shutdown();

    // Polls already in flight may still arrive; after them comes EOF.
    let mut rest = Vec::new();
    within(socket.read_to_end(&mut rest)).await.unwrap_or(0);
    assert_eq!(rest.len() % FRAME_LEN, 0);
    assert!(rest.chunks(FRAME_LEN).all(|f| f == encode_poll()));
    assert!(registry.is_empty());
    assert_eq!(mgr.state(), LinkState::Shutdown);
}

#[tokio::test]
async fn test_replacement_after_shutdown_leaves_one_live_socket() {
    // Arrange
    let (listener, port) = controller().await;
    let registry = ConnectionRegistry::new(test_config());
    let id = Uuid::new_v4();
    let old = registry.get_or_create(id, "127.0.0.1", port);
    let _old_sub = old.subscribe(Topic::Connected);
    let mut old_socket = accept(&listener).await;
    read_frame(&mut old_socket).await;

    // Act: the only way out of the registry is through shutdown.
    old.shutdown();
    let fresh = registry.get_or_create(id, "127.0.0.1", port);
    let _fresh_sub = fresh.subscribe(Topic::Connected);
    let mut fresh_socket = accept(&listener).await;

    // Assert: the first socket is closed before the second is in use.
    let mut rest = Vec::new();
    within(old_socket.read_to_end(&mut rest)).await.unwrap_or(0);
    assert_eq!(read_frame(&mut fresh_socket).await, encode_poll());
    assert_eq!(old.state(), LinkState::Shutdown);
    assert_ne!(fresh.state(), LinkState::Shutdown);
    assert_eq!(registry.len(), 1);
    assert!(Arc::ptr_eq(&registry.get(&id).unwrap(), &fresh));

    registry.shutdown_all();
}

#[tokio::test]
async fn test_zero_intervals_still_poll_and_tear_down() {
    // Arrange
    let (listener, port) = controller().await;
    let registry = ConnectionRegistry::new(ConnectionConfig {
        poll_interval: Duration::ZERO,
        idle_check_interval: Duration::ZERO,
        ..test_config()
    });
    let id = Uuid::new_v4();
    let mgr = registry.get_or_create(id, "127.0.0.1", port);
    let sub = mgr.subscribe(Topic::Connected);
    let mut socket = accept(&listener).await;
    assert_eq!(read_frame(&mut socket).await, encode_poll());
    // The poll timer keeps running.
    assert_eq!(read_frame(&mut socket).await, encode_poll());

    // Act
    sub.unsubscribe();

    // Assert
    let mut rest = Vec::new();
    within(socket.read_to_end(&mut rest)).await.unwrap_or(0);
    assert_eq!(mgr.state(), LinkState::Shutdown);
    assert!(registry.get(&id).is_none());
}
