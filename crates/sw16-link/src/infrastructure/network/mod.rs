//! Network infrastructure for talking to HLK-SW16 controllers.
//!
//! # Sub-modules
//!
//! - **`event_bus`** – In-process publish/subscribe keyed by channel plus the
//!   `connected`/`disconnected` lifecycle topics.
//!
//! - **`backoff`** – Fibonacci/exponential reconnect delay policy.
//!
//! - **`connection_manager`** – Owns the TCP socket, the reconnect loop, the
//!   status poller and the idle check; decodes inbound frames and republishes
//!   them on the bus.
//!
//! - **`registry`** – Maps a controller instance id to its single shared
//!   connection manager.
//!
//! - **`probe`** – One-shot reachability check used while pairing.

pub mod backoff;
pub mod connection_manager;
pub mod event_bus;
pub mod probe;
pub mod registry;
