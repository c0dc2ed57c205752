//! ConnectionManager: one shared, self-healing TCP connection per controller.
//!
//! # Lifecycle
//!
//! ```text
//!              start()
//! Disconnected ───────► Connecting ◄──────────────┐
//!                           │                      │ socket error / EOF
//!                           │ TCP connect ok       │ (after backoff delay)
//!                           ▼                      │
//!                       Connected ─────────────────┘
//!
//!   shutdown() from any state ───► Shutdown   (terminal)
//! ```
//!
//! Three tasks run per manager once [`ConnectionManager::start`] is called:
//!
//! - the **link task** connects, reads frames, writes queued commands, and
//!   reconnects forever with [`Backoff`] delays;
//! - the **poll timer** requests a status frame every `poll_interval`;
//! - the **idle timer** shuts the manager down once nobody is subscribed.
//!
//! All three watch the same shutdown signal, so each exits exactly once.
//!
//! # Writes
//!
//! Commands and polls never touch the socket directly.  They are pushed onto
//! a per-session queue that only the link task drains, so frames are written
//! whole and in order even when sixteen devices issue commands at once.
//! Sending is fire-and-forget: the controller does not acknowledge commands;
//! the next status frame shows whether the relay switched.
//!
//! # Reads
//!
//! Each chunk returned by one socket read is treated as one candidate frame.
//! Chunks that are not exactly 20 bytes starting with `0xCC` are dropped.
//! There is no reassembly buffer.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use sw16_core::{
    decode, encode_command, encode_poll, to_hex, Channel, ControllerAddress, Frame, InstanceId,
    KeepaliveMessage, Message,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::backoff::{Backoff, BackoffPolicy};
use super::event_bus::{BusEvent, ChannelEventBus, Subscription, Topic};
use super::registry::{self, RegistryTable};

/// Size of the per-read buffer.  Larger than one frame so that coalesced
/// reads show up as a wrong-length chunk rather than being silently split.
const READ_BUFFER_LEN: usize = 256;

/// Floor for the poll and idle timers.  `interval_at` rejects a zero period.
const MIN_TIMER_PERIOD: Duration = Duration::from_millis(10);

/// Error type for connection operations visible to callers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// The manager was shut down before a connection was ever established.
    #[error("connection was shut down before it was established")]
    Shutdown,
}

/// Timing configuration for a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Interval between status polls while connected.
    pub poll_interval: Duration,
    /// Interval between checks for remaining subscribers.
    pub idle_check_interval: Duration,
    /// Reconnect delay policy.
    pub backoff: BackoffPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            idle_check_interval: Duration::from_secs(5),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Observable state of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
struct LinkStatus {
    state: LinkState,
    /// Set on the first successful connection and never cleared.
    established: bool,
}

/// The shared connection to one physical controller.
pub struct ConnectionManager {
    instance: InstanceId,
    address: ControllerAddress,
    config: ConnectionConfig,
    bus: ChannelEventBus,
    status: watch::Sender<LinkStatus>,
    shutdown: watch::Sender<bool>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    started: AtomicBool,
    last_keepalive: Mutex<Option<KeepaliveMessage>>,
    registry: Weak<RegistryTable>,
}

impl ConnectionManager {
    /// Creates a manager that is not tracked by any registry.
    ///
    /// Nothing happens on the network until [`start`](Self::start) or
    /// [`connect`](Self::connect) is called.
    pub fn new(
        instance: InstanceId,
        address: ControllerAddress,
        config: ConnectionConfig,
    ) -> Arc<Self> {
        Self::with_registry(instance, address, config, Weak::new())
    }

    pub(crate) fn with_registry(
        instance: InstanceId,
        address: ControllerAddress,
        config: ConnectionConfig,
        registry: Weak<RegistryTable>,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(LinkStatus {
            state: LinkState::Disconnected,
            established: false,
        });
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            instance,
            address,
            config,
            bus: ChannelEventBus::new(),
            status,
            shutdown,
            outbound: Mutex::new(None),
            started: AtomicBool::new(false),
            last_keepalive: Mutex::new(None),
            registry,
        })
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub fn address(&self) -> &ControllerAddress {
        &self.address
    }

    pub fn state(&self) -> LinkState {
        self.status.borrow().state
    }

    /// `true` while a socket to the controller is open.
    pub fn connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// The most recently decoded keepalive, if any.
    ///
    /// Kept for inspection only; no liveness decision is derived from it.
    pub fn last_keepalive(&self) -> Option<KeepaliveMessage> {
        *self
            .last_keepalive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The event bus this manager publishes on.
    pub fn events(&self) -> &ChannelEventBus {
        &self.bus
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        self.bus.subscribe(topic)
    }

    pub fn subscribe_all(&self, topics: impl IntoIterator<Item = Topic>) -> Subscription {
        self.bus.subscribe_all(topics)
    }

    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Spawns the link, poll and idle tasks.  Idempotent.
    ///
    /// Must be called from within a Tokio runtime.  Does nothing once the
    /// manager has been shut down.
    pub fn start(self: &Arc<Self>) {
        if *self.shutdown.borrow() || self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(instance = %self.instance, address = %self.address, "starting connection tasks");
        tokio::spawn(Arc::clone(self).run_link());
        tokio::spawn(Arc::clone(self).run_poll_timer());
        tokio::spawn(Arc::clone(self).run_idle_timer());
    }

    /// Starts the manager and waits for the first successful connection.
    ///
    /// Reconnects after that are not awaited here; they are announced on the
    /// `connected`/`disconnected` topics.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Shutdown`] if the manager is (or becomes)
    /// shut down before a connection is made.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ConnectionError> {
        self.start();
        let mut status = self.status.subscribe();
        let reached_shutdown = status
            .wait_for(|s| s.established || s.state == LinkState::Shutdown)
            .await
            .map(|s| s.state == LinkState::Shutdown)
            .unwrap_or(true);
        if reached_shutdown {
            Err(ConnectionError::Shutdown)
        } else {
            Ok(())
        }
    }

    /// Stops reconnecting, closes the socket, cancels both timers and leaves
    /// the registry.  Irreversible; later calls are no-ops.
    pub fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        self.status.send_modify(|s| s.state = LinkState::Shutdown);
        self.outbound_guard().take();
        if let Some(table) = self.registry.upgrade() {
            registry::remove_if_current(&table, &self.instance, self);
        }
        info!(instance = %self.instance, address = %self.address, "connection shut down");
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Requests a status frame.  Returns `false` without doing anything when
    /// not connected.
    pub fn poll_status(&self) -> bool {
        if !self.connected() {
            return false;
        }
        trace!(instance = %self.instance, "polling status");
        self.send_frame(encode_poll())
    }

    /// Switches `channel` on.  Returns `false` when not connected or when
    /// `channel` is not an integer in `0..=15`.
    pub fn turn_on<C: TryInto<Channel>>(&self, channel: C) -> bool {
        self.command(channel, true)
    }

    /// Switches `channel` off.  Same contract as [`turn_on`](Self::turn_on).
    pub fn turn_off<C: TryInto<Channel>>(&self, channel: C) -> bool {
        self.command(channel, false)
    }

    fn command<C: TryInto<Channel>>(&self, channel: C, on: bool) -> bool {
        if !self.connected() {
            return false;
        }
        let Ok(channel) = channel.try_into() else {
            debug!(instance = %self.instance, "rejecting command for invalid channel");
            return false;
        };
        match encode_command(channel, on) {
            Ok(frame) => {
                debug!(instance = %self.instance, %channel, on, "sending command");
                self.send_frame(frame)
            }
            Err(_) => false,
        }
    }

    fn send_frame(&self, frame: Frame) -> bool {
        self.outbound_guard()
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }

    fn outbound_guard(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Frame>>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves to `state` unless already shut down.  Returns whether it changed.
    fn set_state(&self, state: LinkState) -> bool {
        self.status.send_if_modified(|s| {
            if s.state == LinkState::Shutdown || s.state == state {
                return false;
            }
            s.state = state;
            if state == LinkState::Connected {
                s.established = true;
            }
            true
        })
    }

    // ── Tasks ─────────────────────────────────────────────────────────────────

    async fn run_link(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut backoff = Backoff::new(self.config.backoff.clone());

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.set_state(LinkState::Connecting);

            let attempt = tokio::select! {
                res = TcpStream::connect((self.address.host.as_str(), self.address.port)) => res,
                _ = shutdown.changed() => break,
            };

            match attempt {
                Ok(stream) => {
                    backoff.reset();
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(error = %e, "could not disable Nagle");
                    }
                    self.run_session(stream, &mut shutdown).await;
                }
                Err(e) => {
                    debug!(address = %self.address, error = %e, "connect attempt failed");
                }
            }

            if *shutdown.borrow() {
                break;
            }
            let delay = backoff.next_delay();
            debug!(address = %self.address, ?delay, attempt = backoff.attempts(), "reconnecting");
            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        debug!(instance = %self.instance, "link task stopped");
    }

    /// Drives one open socket until it fails, closes, or shutdown is signalled.
    async fn run_session<S>(&self, stream: S, shutdown: &mut watch::Receiver<bool>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
        *self.outbound_guard() = Some(tx);

        if !self.set_state(LinkState::Connected) {
            self.outbound_guard().take();
            return;
        }
        info!(instance = %self.instance, address = %self.address, "connected");

        // Relay state may have changed while we were away (e.g. power cycle).
        self.poll_status();
        self.bus.publish(BusEvent::Connected);

        let mut buf = vec![0u8; READ_BUFFER_LEN];
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        info!(address = %self.address, "connection closed by controller");
                        break;
                    }
                    Ok(n) => self.handle_chunk(&buf[..n]),
                    Err(e) => {
                        warn!(address = %self.address, error = %e, "read failed");
                        break;
                    }
                },
                Some(frame) = rx.recv() => {
                    trace!(frame = %to_hex(&frame), "write");
                    if let Err(e) = writer.write_all(&frame).await {
                        warn!(address = %self.address, error = %e, "write failed");
                        break;
                    }
                }
            }
        }

        self.outbound_guard().take();
        if let Err(e) = writer.shutdown().await {
            trace!(error = %e, "socket shutdown failed");
        }
        self.set_state(LinkState::Connecting);
        self.bus.publish(BusEvent::Disconnected);
        info!(instance = %self.instance, address = %self.address, "disconnected");
    }

    /// Decodes one inbound chunk and publishes whatever it carries.
    fn handle_chunk(&self, bytes: &[u8]) {
        let hex = to_hex(bytes);
        trace!(%hex, "received");

        match decode(bytes) {
            Err(e) => debug!(%hex, error = %e, "dropping frame"),
            Ok(Message::Status(status)) => {
                for (channel, on) in status.channels.iter() {
                    self.bus.publish(BusEvent::Channel { channel, on });
                }
            }
            Ok(Message::Keepalive(k)) => {
                debug!(
                    "keepalive {:02}-{:02}-{:02} {:02}:{:02}:{:02} week {}",
                    k.year, k.month, k.day, k.hour, k.minute, k.second, k.week
                );
                *self
                    .last_keepalive
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(k);
            }
            Ok(Message::Unknown(u)) => debug!(op = u.op, %hex, "unknown frame"),
        }
    }

    async fn run_poll_timer(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = timer(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_status();
                }
                _ = shutdown.changed() => break,
            }
        }
        trace!(instance = %self.instance, "poll timer stopped");
    }

    async fn run_idle_timer(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = timer(self.config.idle_check_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.bus.subscriber_count() == 0 {
                        info!(instance = %self.instance, "no subscribers left");
                        self.shutdown();
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        trace!(instance = %self.instance, "idle timer stopped");
    }
}

/// First tick one full period from now; late ticks push the schedule back.
fn timer(period: Duration) -> time::Interval {
    let period = period.max(MIN_TIMER_PERIOD);
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("instance", &self.instance)
            .field("address", &self.address)
            .field("state", &self.state())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
