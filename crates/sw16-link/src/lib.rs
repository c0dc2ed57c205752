//! sw16-link library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does sw16-link do?
//!
//! One HLK-SW16 controller has sixteen relays but only one TCP socket worth
//! talking to.  This crate shares that single socket between up to sixteen
//! independent consumers (one per relay):
//!
//! 1. [`ConnectionRegistry`] hands every consumer of the same controller the
//!    same [`ConnectionManager`].
//! 2. The manager keeps the socket alive forever, reconnecting with backoff,
//!    and polls relay status every few seconds and after every reconnect.
//! 3. Decoded status frames are fanned out through a [`ChannelEventBus`] so
//!    each consumer only hears about its own channel.
//! 4. When the last consumer unsubscribes, the manager shuts itself down and
//!    leaves the registry.

/// Application layer: device and pairing collaborators.
pub mod application;

/// Infrastructure layer: network connection, event bus, and configuration storage.
pub mod infrastructure;

pub use infrastructure::network::{
    backoff::{Backoff, BackoffPolicy, BackoffStrategy},
    connection_manager::{ConnectionConfig, ConnectionError, ConnectionManager, LinkState},
    event_bus::{BusEvent, ChannelEventBus, Subscription, Topic},
    probe::{ProbeError, ReachabilityProbe, TcpProbe},
    registry::ConnectionRegistry,
};
