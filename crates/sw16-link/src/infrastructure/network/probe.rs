//! One-shot reachability check used while pairing.
//!
//! Opens a TCP connection, waits for the first chunk the controller sends
//! unprompted (normally a keepalive) and accepts the address only if that
//! chunk looks like an HLK-SW16 frame: exactly 20 bytes starting with `0xCC`.
//! The whole exchange is bounded by a single timeout.

use std::time::Duration;

use async_trait::async_trait;
use sw16_core::{to_hex, ControllerAddress, FRAME_LEN};
use sw16_core::protocol::messages::INBOUND_MARKER;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no frame from {address} within {timeout:?}")]
    Timeout {
        address: ControllerAddress,
        timeout: Duration,
    },

    #[error("could not connect to {address}: {source}")]
    Connect {
        address: ControllerAddress,
        #[source]
        source: std::io::Error,
    },

    #[error("read from {address} failed: {source}")]
    Read {
        address: ControllerAddress,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} closed the connection without sending anything")]
    Closed(ControllerAddress),

    #[error("{address} sent something that is not an HLK-SW16 frame: {hex}")]
    InvalidFrame {
        address: ControllerAddress,
        hex: String,
    },
}

/// Abstraction over "is there a controller at this address?".
///
/// Pairing depends on this trait rather than on [`TcpProbe`] so it can be
/// exercised without a network.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self, address: &ControllerAddress, timeout: Duration)
        -> Result<(), ProbeError>;
}

/// The real probe: connects over TCP and inspects the first chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn probe(
        &self,
        address: &ControllerAddress,
        timeout: Duration,
    ) -> Result<(), ProbeError> {
        probe_controller(address, timeout).await
    }
}

/// Connects to `address` and validates the first chunk it sends.
pub async fn probe_controller(
    address: &ControllerAddress,
    timeout: Duration,
) -> Result<(), ProbeError> {
    match time::timeout(timeout, first_chunk(address)).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout {
            address: address.clone(),
            timeout,
        }),
    }
}

async fn first_chunk(address: &ControllerAddress) -> Result<(), ProbeError> {
    let mut stream = TcpStream::connect((address.host.as_str(), address.port))
        .await
        .map_err(|source| ProbeError::Connect {
            address: address.clone(),
            source,
        })?;

    let mut buf = [0u8; 64];
    let n = stream
        .read(&mut buf)
        .await
        .map_err(|source| ProbeError::Read {
            address: address.clone(),
            source,
        })?;
    let chunk = &buf[..n];
    debug!(%address, hex = %to_hex(chunk), "probe received");

    if n == 0 {
        return Err(ProbeError::Closed(address.clone()));
    }
    if n != FRAME_LEN || chunk[0] != INBOUND_MARKER {
        return Err(ProbeError::InvalidFrame {
            address: address.clone(),
            hex: to_hex(chunk),
        });
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
