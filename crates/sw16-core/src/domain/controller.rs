//! Controller-level domain types.
//!
//! # Channels
//!
//! A physical HLK-SW16 exposes 16 relays, addressed on the wire by the indices
//! `0..=15`.  [`Channel`] is a validated newtype over that index.  Values
//! arriving from outside (settings, user input, a command-line argument) are
//! converted with `TryFrom`/`FromStr`; anything that is not an integer in
//! range is rejected with [`ProtocolError::InvalidChannel`].
//!
//! # Instances
//!
//! Several logical devices (one per relay) share one physical controller.
//! During pairing a single [`InstanceId`] is generated for the controller and
//! written into every device's [`DeviceStore`], so that all sixteen devices
//! can find the same shared connection later.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::codec::ProtocolError;

/// Number of relay channels on one controller.
pub const CHANNEL_COUNT: usize = 16;

/// Identifies one physical controller in the connection registry.
///
/// Generated once at pairing time and shared by all sixteen channel devices.
pub type InstanceId = Uuid;

// ── Channel ───────────────────────────────────────────────────────────────────

/// A relay channel index in `0..=15`.
///
/// # Examples
///
/// ```rust
/// use sw16_core::Channel;
///
/// let ch = Channel::try_from(7u8).unwrap();
/// assert_eq!(ch.index(), 7);
/// assert!(Channel::try_from(16u8).is_err());
/// assert!("3".parse::<Channel>().is_ok());
/// assert!("three".parse::<Channel>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Channel(u8);

impl Channel {
    /// Creates a channel, rejecting indices above 15.
    pub fn new(index: u8) -> Result<Self, ProtocolError> {
        if usize::from(index) < CHANNEL_COUNT {
            Ok(Self(index))
        } else {
            Err(ProtocolError::InvalidChannel(index.to_string()))
        }
    }

    /// Returns the zero-based channel index.
    pub fn index(self) -> u8 {
        self.0
    }

    /// Iterates over all sixteen channels in ascending order.
    pub fn all() -> impl Iterator<Item = Channel> {
        (0..CHANNEL_COUNT as u8).map(Channel)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Channel> for u8 {
    fn from(channel: Channel) -> Self {
        channel.0
    }
}

impl TryFrom<u8> for Channel {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Channel::new(value)
    }
}

impl TryFrom<i32> for Channel {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Channel::try_from(i64::from(value))
    }
}

impl TryFrom<i64> for Channel {
    type Error = ProtocolError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .map_err(|_| ProtocolError::InvalidChannel(value.to_string()))
            .and_then(Channel::new)
    }
}

impl TryFrom<f64> for Channel {
    type Error = ProtocolError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        // NaN, infinities and fractional values are not channel indices.
        if !value.is_finite() || value.fract() != 0.0 || !(0.0..16.0).contains(&value) {
            return Err(ProtocolError::InvalidChannel(value.to_string()));
        }
        Channel::new(value as u8)
    }
}

impl TryFrom<&str> for Channel {
    type Error = ProtocolError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl FromStr for Channel {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map_err(|_| ProtocolError::InvalidChannel(s.to_string()))
            .and_then(Channel::try_from)
    }
}

// ── ChannelState ──────────────────────────────────────────────────────────────

/// On/off state of all sixteen relays as reported by one status frame.
///
/// The controller owns the authoritative state; this table is only the
/// snapshot carried by a single decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelState([bool; CHANNEL_COUNT]);

impl ChannelState {
    /// Builds a table from raw slots, index = channel.
    pub fn from_slots(slots: [bool; CHANNEL_COUNT]) -> Self {
        Self(slots)
    }

    /// Iterates `(channel, on)` pairs in ascending channel order.
    pub fn iter(&self) -> impl Iterator<Item = (Channel, bool)> + '_ {
        Channel::all().zip(self.0.iter().copied())
    }

    /// Returns the raw slot array.
    pub fn as_slots(&self) -> &[bool; CHANNEL_COUNT] {
        &self.0
    }

    /// Number of channels currently on.
    pub fn count_on(&self) -> usize {
        self.0.iter().filter(|on| **on).count()
    }
}

// ── Addresses and pairing records ─────────────────────────────────────────────

/// Network address of a controller's serial-server port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControllerAddress {
    pub host: String,
    pub port: u16,
}

impl ControllerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ControllerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Per-device record written at pairing time.
///
/// Every one of the sixteen devices paired from one controller carries the
/// same `ip`, `port` and `master_device`, and a distinct `channel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStore {
    pub ip: String,
    pub port: u16,
    pub channel: Channel,
    /// Registry key of the shared connection.
    pub master_device: InstanceId,
}

impl DeviceStore {
    pub fn address(&self) -> ControllerAddress {
        ControllerAddress::new(self.ip.clone(), self.port)
    }
}

/// A device offered to the user at the end of pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub id: Uuid,
    pub store: DeviceStore,
}

/// Returns `true` if `host` is a dotted-quad IPv4 literal.
pub fn is_valid_ipv4(host: &str) -> bool {
    host.parse::<Ipv4Addr>().is_ok()
}

/// Returns `true` if `port` fits in a TCP port number.
pub fn is_valid_port(port: i64) -> bool {
    (0..=i64::from(u16::MAX)).contains(&port)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
