//! Frame layout constants and decoded message types.
//!
//! Every unit on the wire is exactly [`FRAME_LEN`] bytes:
//!
//! ```text
//! inbound:   [0xCC][op:1][payload:16][trailer:2]
//! poll:      [0xAA][0x1E][0x01 x 17][0xBB]
//! command:   [0xAA][0x0F][channel:1][state:1][0x01 x 15][0xBB]
//! ```
//!
//! There is no length prefix and no delimiter; the frame length is fixed.

use serde::{Deserialize, Serialize};

use crate::domain::controller::ChannelState;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Length in bytes of every frame, in either direction.
pub const FRAME_LEN: usize = 20;

/// First byte of every frame sent by the controller.
pub const INBOUND_MARKER: u8 = 0xCC;

/// First byte of every frame sent to the controller.
pub const OUTBOUND_MARKER: u8 = 0xAA;

/// Last byte of every frame sent to the controller.
pub const OUTBOUND_TERMINATOR: u8 = 0xBB;

/// Filler byte used in unused positions of outbound frames.
pub const FILLER: u8 = 0x01;

/// Inbound op: keepalive with clock fields stored forward.
pub const OP_KEEPALIVE_FORWARD: u8 = 0x1F;

/// Inbound op: keepalive with clock fields stored in reverse order.
pub const OP_KEEPALIVE_REVERSED: u8 = 0x0E;

/// Inbound op: 16-channel relay status.
pub const OP_STATUS: u8 = 0x0C;

/// Outbound op: request a status frame.
pub const OP_POLL: u8 = 0x1E;

/// Outbound op: switch one relay.
pub const OP_COMMAND: u8 = 0x0F;

/// Command state byte for "switch on".
pub const STATE_ON: u8 = 0x01;

/// Command state byte for "switch off".
pub const STATE_OFF: u8 = 0x02;

/// Status cell value meaning "relay on"; any other value means off.
pub const CELL_ON: u8 = 0x01;

/// Offset of the payload inside an inbound frame.
pub const PAYLOAD_OFFSET: usize = 2;

/// Length of the payload inside an inbound frame.
pub const PAYLOAD_LEN: usize = 16;

/// A complete fixed-length frame.
pub type Frame = [u8; FRAME_LEN];

// ── Decoded messages ──────────────────────────────────────────────────────────

/// Classification of an inbound frame by its op byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Keepalive,
    Status,
    Unknown,
}

impl MessageKind {
    /// Classifies an inbound op byte.
    ///
    /// Exactly two op values are keepalives and exactly one is a status
    /// frame; every other value is unknown.
    pub fn from_op(op: u8) -> Self {
        match op {
            OP_KEEPALIVE_FORWARD | OP_KEEPALIVE_REVERSED => MessageKind::Keepalive,
            OP_STATUS => MessageKind::Status,
            _ => MessageKind::Unknown,
        }
    }
}

/// Which firmware encoding a keepalive used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeepaliveLayout {
    /// Op `0x1F`: year, month, day, hour, minute, second, week.
    Forward,
    /// Op `0x0E`: second, minute, hour, day, month, week, year.
    Reversed,
}

/// Controller clock reported by a keepalive frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepaliveMessage {
    pub layout: KeepaliveLayout,
    pub year: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub week: u8,
    pub payload: [u8; PAYLOAD_LEN],
}

/// Relay states reported by a status frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub channels: ChannelState,
    pub payload: [u8; PAYLOAD_LEN],
}

/// A well-formed inbound frame whose op byte is not understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownMessage {
    pub op: u8,
    pub payload: [u8; PAYLOAD_LEN],
}

/// A decoded inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Keepalive(KeepaliveMessage),
    Status(StatusMessage),
    Unknown(UnknownMessage),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Keepalive(_) => MessageKind::Keepalive,
            Message::Status(_) => MessageKind::Status,
            Message::Unknown(_) => MessageKind::Unknown,
        }
    }

    /// The sixteen payload bytes following the op byte.
    pub fn payload(&self) -> &[u8; PAYLOAD_LEN] {
        match self {
            Message::Keepalive(m) => &m.payload,
            Message::Status(m) => &m.payload,
            Message::Unknown(m) => &m.payload,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
