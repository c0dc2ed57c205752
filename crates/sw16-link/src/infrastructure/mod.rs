//! Infrastructure layer for the relay link.
//!
//! Contains the OS-facing adapters: TCP sockets, timers and the file system.
//!
//! **Dependency rule**: this layer may depend on `sw16_core`, but MUST NOT
//! import from `application`.
//!
//! # Sub-modules
//!
//! - **`network`** – The shared controller connection: event bus, backoff
//!   policy, connection manager, registry and the one-shot reachability probe.
//!
//! - **`storage`** – TOML configuration file persistence.

pub mod network;
pub mod storage;
