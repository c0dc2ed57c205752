//! PairingUseCase: validates a user-entered controller address, checks that
//! something HLK-SW16-shaped answers there, and produces the sixteen device
//! records to hand to the host platform.
//!
//! The probe is injected through [`ReachabilityProbe`], so this use case has
//! no socket code of its own.

use std::time::Duration;

use sw16_core::{
    is_valid_ipv4, is_valid_port, Channel, ControllerAddress, DeviceDescriptor, DeviceStore,
};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::infrastructure::network::probe::ReachabilityProbe;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PairingError {
    #[error("both an IP address and a port are required")]
    MissingInput,

    #[error("{0:?} is not a valid IPv4 address")]
    InvalidIp(String),

    #[error("{0} is not a valid port")]
    InvalidPort(i64),

    #[error("unable to reach a controller at {address}: {reason}")]
    Unreachable {
        address: ControllerAddress,
        reason: String,
    },
}

pub struct PairingUseCase<P> {
    probe: P,
    timeout: Duration,
}

impl<P: ReachabilityProbe> PairingUseCase<P> {
    pub fn new(probe: P, timeout: Duration) -> Self {
        Self { probe, timeout }
    }

    /// Checks the raw form input.
    ///
    /// An empty host, an absent port or a port of `0` count as missing input.
    ///
    /// # Errors
    ///
    /// [`PairingError::MissingInput`], [`PairingError::InvalidIp`] or
    /// [`PairingError::InvalidPort`], checked in that order.
    pub fn validate(host: &str, port: Option<i64>) -> Result<ControllerAddress, PairingError> {
        let host = host.trim();
        let port = match port {
            Some(p) if !host.is_empty() && p != 0 => p,
            _ => return Err(PairingError::MissingInput),
        };
        if !is_valid_ipv4(host) {
            return Err(PairingError::InvalidIp(host.to_string()));
        }
        if !is_valid_port(port) {
            return Err(PairingError::InvalidPort(port));
        }
        let port = u16::try_from(port).map_err(|_| PairingError::InvalidPort(port))?;
        Ok(ControllerAddress::new(host, port))
    }

    /// Validates the input and probes the address.
    ///
    /// # Errors
    ///
    /// Any validation error, or [`PairingError::Unreachable`] when the probe
    /// fails for whatever reason.
    pub async fn pair(
        &self,
        host: &str,
        port: Option<i64>,
    ) -> Result<ControllerAddress, PairingError> {
        let address = Self::validate(host, port)?;
        match self.probe.probe(&address, self.timeout).await {
            Ok(()) => {
                info!(%address, "controller answered");
                Ok(address)
            }
            Err(e) => {
                warn!(%address, error = %e, "controller did not answer");
                Err(PairingError::Unreachable {
                    address,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Builds one device per relay, all sharing a freshly generated master id.
    pub fn list_devices(&self, address: &ControllerAddress) -> Vec<DeviceDescriptor> {
        build_devices(address)
    }
}

fn build_devices(address: &ControllerAddress) -> Vec<DeviceDescriptor> {
    let master_device = Uuid::new_v4();
    Channel::all()
        .map(|channel| DeviceDescriptor {
            name: format!("HLK-SW16 Relay {}", channel.index() + 1),
            id: Uuid::new_v4(),
            store: DeviceStore {
                ip: address.host.clone(),
                port: address.port,
                channel,
                master_device,
            },
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
