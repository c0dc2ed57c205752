//! Application layer: the collaborators that sit on top of the shared
//! connection.
//!
//! These depend on the infrastructure through its public API (registry,
//! manager, bus) and on host capabilities through traits, so they can be
//! tested with mocks.
//!
//! # Sub-modules
//!
//! - **`pair_controller`** – Validates a user-entered address, probes it, and
//!   produces the sixteen device records for one controller.
//!
//! - **`relay_device`** – One paired relay: joins the shared connection,
//!   mirrors its channel onto a [`DeviceSurface`](relay_device::DeviceSurface),
//!   and forwards on/off requests.

pub mod pair_controller;
pub mod relay_device;
