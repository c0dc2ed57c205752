//! Binary codec for HLK-SW16 frames.
//!
//! Wire format (all frames are exactly 20 bytes):
//! ```text
//! inbound:  [0xCC][op][p0 .. p15][t0][t1]
//! outbound: [0xAA][op][ .. 17 op-specific bytes .. ][0xBB]
//! ```
//!
//! The codec is stateless: no buffering, no reassembly.  A slice handed to
//! [`decode`] is one candidate frame and is either accepted whole or rejected.
//! A rejection is not exceptional; callers drop the bytes and carry on.

use thiserror::Error;

use crate::domain::controller::{Channel, ChannelState, CHANNEL_COUNT};
use crate::protocol::messages::{
    Frame, KeepaliveLayout, KeepaliveMessage, Message, StatusMessage, UnknownMessage, CELL_ON,
    FILLER, FRAME_LEN, INBOUND_MARKER, OP_COMMAND, OP_KEEPALIVE_FORWARD, OP_KEEPALIVE_REVERSED,
    OP_POLL, OP_STATUS, OUTBOUND_MARKER, OUTBOUND_TERMINATOR, PAYLOAD_LEN, PAYLOAD_OFFSET,
    STATE_OFF, STATE_ON,
};

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// The candidate frame is not exactly [`FRAME_LEN`] bytes long.
    #[error("invalid frame length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// The candidate frame does not begin with the inbound marker.
    #[error("invalid frame marker: 0x{0:02X}")]
    InvalidMarker(u8),

    /// The value is not an integer channel index in `0..=15`.
    #[error("invalid channel: {0:?} is not an integer in 0..=15")]
    InvalidChannel(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decodes one inbound frame.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidLength`] if `bytes` is not exactly 20
/// bytes and [`ProtocolError::InvalidMarker`] if it does not start with
/// `0xCC`.  Unrecognised op bytes are not an error; they decode to
/// [`Message::Unknown`].
///
/// # Examples
///
/// ```rust
/// use sw16_core::{decode, Message};
///
/// let mut frame = [0u8; 20];
/// frame[0] = 0xCC;
/// frame[1] = 0x0C;
/// frame[2] = 0x01; // channel 0 on
/// let Message::Status(status) = decode(&frame).unwrap() else { panic!() };
/// assert!(status.channels.as_slots()[0]);
/// assert!(!status.channels.as_slots()[1]);
/// ```
pub fn decode(bytes: &[u8]) -> Result<Message, ProtocolError> {
    let frame: &Frame = bytes
        .try_into()
        .map_err(|_| ProtocolError::InvalidLength {
            expected: FRAME_LEN,
            actual: bytes.len(),
        })?;

    if frame[0] != INBOUND_MARKER {
        return Err(ProtocolError::InvalidMarker(frame[0]));
    }

    let op = frame[1];
    let mut payload = [0u8; PAYLOAD_LEN];
    payload.copy_from_slice(&frame[PAYLOAD_OFFSET..PAYLOAD_OFFSET + PAYLOAD_LEN]);

    let message = match op {
        OP_KEEPALIVE_FORWARD => Message::Keepalive(decode_keepalive(
            KeepaliveLayout::Forward,
            payload,
        )),
        OP_KEEPALIVE_REVERSED => Message::Keepalive(decode_keepalive(
            KeepaliveLayout::Reversed,
            payload,
        )),
        OP_STATUS => Message::Status(decode_status(payload)),
        _ => Message::Unknown(UnknownMessage { op, payload }),
    };
    Ok(message)
}

/// Builds the status-request frame.
///
/// The controller answers with a status frame describing all 16 relays.
pub fn encode_poll() -> Frame {
    let mut frame = [FILLER; FRAME_LEN];
    frame[0] = OUTBOUND_MARKER;
    frame[1] = OP_POLL;
    frame[FRAME_LEN - 1] = OUTBOUND_TERMINATOR;
    frame
}

/// Builds the frame that switches one relay on or off.
///
/// Accepts anything convertible into a [`Channel`]: a `Channel`, an integer,
/// a float holding an integral value, or a numeric string.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidChannel`] if `channel` is not an integer
/// in `0..=15`.
///
/// # Examples
///
/// ```rust
/// use sw16_core::encode_command;
///
/// let frame = encode_command(10, true).unwrap();
/// assert_eq!(&frame[..4], &[0xAA, 0x0F, 0x0A, 0x01]);
/// assert_eq!(frame[19], 0xBB);
/// assert!(encode_command(16, true).is_err());
/// ```
pub fn encode_command<C>(channel: C, on: bool) -> Result<Frame, ProtocolError>
where
    C: TryInto<Channel>,
    C::Error: Into<ProtocolError>,
{
    let channel = channel.try_into().map_err(Into::into)?;
    let mut frame = [FILLER; FRAME_LEN];
    frame[0] = OUTBOUND_MARKER;
    frame[1] = OP_COMMAND;
    frame[2] = channel.index() & 0x0F;
    frame[3] = if on { STATE_ON } else { STATE_OFF };
    frame[FRAME_LEN - 1] = OUTBOUND_TERMINATOR;
    Ok(frame)
}

/// Formats bytes as a lowercase hex string, the form frames are logged in.
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

// ── Payload decoding ──────────────────────────────────────────────────────────

fn decode_keepalive(layout: KeepaliveLayout, p: [u8; PAYLOAD_LEN]) -> KeepaliveMessage {
    // Offsets are relative to the payload, i.e. frame byte 2 is p[0].
    let (year, month, day, hour, minute, second, week) = match layout {
        KeepaliveLayout::Forward => (p[0], p[1], p[2], p[3], p[4], p[5], p[6]),
        KeepaliveLayout::Reversed => (p[6], p[4], p[3], p[2], p[1], p[0], p[5]),
    };
    KeepaliveMessage {
        layout,
        year,
        month,
        day,
        hour,
        minute,
        second,
        week,
        payload: p,
    }
}

fn decode_status(payload: [u8; PAYLOAD_LEN]) -> StatusMessage {
    let mut slots = [false; CHANNEL_COUNT];
    for (slot, cell) in slots.iter_mut().zip(payload.iter()) {
        *slot = *cell == CELL_ON;
    }
    StatusMessage {
        channels: ChannelState::from_slots(slots),
        payload,
    }
}

impl From<std::convert::Infallible> for ProtocolError {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
