//! Protocol module containing frame constants, decoded message types and the
//! fixed-length binary codec.

pub mod codec;
pub mod messages;

pub use codec::{decode, encode_command, encode_poll, to_hex, ProtocolError};
pub use messages::*;
