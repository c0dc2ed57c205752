//! Domain entities for the HLK-SW16 relay controller.
//!
//! This module contains plain data types with no infrastructure dependencies:
//! no sockets, no timers, no runtime.  The connection layer in `sw16-link`
//! and the codec in [`crate::protocol`] both speak in these types, so a
//! channel index is validated exactly once, at the boundary where it enters
//! the system.

/// Channels, channel-state tables, controller addresses and pairing records.
pub mod controller;
