//! # sw16-core
//!
//! Shared library for the HLK-SW16 relay controller containing the wire
//! protocol codec and the domain types that describe a controller and its
//! sixteen relay channels.
//!
//! It has zero dependencies on sockets or an async runtime, so every function
//! here can be called from any thread without synchronisation.
//!
//! # Architecture overview
//!
//! The HLK-SW16 is a small network appliance with 16 relays.  It speaks a
//! fixed-length binary protocol over a raw TCP socket: every unit on the wire
//! is exactly 20 bytes.
//!
//! - **`protocol`** – How bytes travel over the network.  Inbound frames start
//!   with `0xCC` and are decoded into typed [`Message`]s; outbound frames start
//!   with `0xAA`, end with `0xBB`, and are produced by [`encode_poll`] and
//!   [`encode_command`].
//!
//! - **`domain`** – The vocabulary shared by everything above the codec: a
//!   validated [`Channel`] index, the 16-slot [`ChannelState`] table, the
//!   controller's network address, and the per-device store written during
//!   pairing.

pub mod domain;
pub mod protocol;

pub use domain::controller::{
    is_valid_ipv4, is_valid_port, Channel, ChannelState, ControllerAddress, DeviceDescriptor,
    DeviceStore, InstanceId, CHANNEL_COUNT,
};
pub use protocol::codec::{decode, encode_command, encode_poll, to_hex, ProtocolError};
pub use protocol::messages::{
    Frame, KeepaliveLayout, KeepaliveMessage, Message, MessageKind, StatusMessage,
    UnknownMessage, FRAME_LEN,
};
