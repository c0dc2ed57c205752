//! RelayDevice: the per-channel consumer of a shared controller connection.
//!
//! One `RelayDevice` exists per paired relay.  It looks up (or creates) the
//! shared [`ConnectionManager`] for its controller, mirrors the relay's
//! reported state onto a [`DeviceSurface`], and forwards user on/off requests
//! to the connection.
//!
//! Detaching drops the device's subscription.  Once every device of a
//! controller is gone, the manager's idle check tears the connection down.

use std::sync::Arc;

use sw16_core::DeviceStore;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::infrastructure::network::connection_manager::ConnectionManager;
use crate::infrastructure::network::event_bus::{BusEvent, Subscription, Topic};
use crate::infrastructure::network::registry::ConnectionRegistry;

/// What the host platform lets a device do.
///
/// Implementations are called from a background task, so they must be
/// `Send + Sync` and should not block.
#[cfg_attr(test, mockall::automock)]
pub trait DeviceSurface: Send + Sync {
    fn set_available(&self);
    fn set_unavailable(&self);
    /// The on/off value currently shown to the user.
    fn on_off(&self) -> bool;
    fn set_on_off(&self, on: bool);
}

pub struct RelayDevice {
    store: DeviceStore,
    connection: Arc<ConnectionManager>,
    listener: Option<JoinHandle<()>>,
}

impl RelayDevice {
    /// Joins the shared connection for `store.master_device` and starts
    /// mirroring events onto `surface`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn attach(
        registry: &ConnectionRegistry,
        store: DeviceStore,
        surface: Arc<dyn DeviceSurface>,
    ) -> Self {
        let connection = registry.get_or_create(store.master_device, store.ip.clone(), store.port);
        // Subscribe before reading the state: a `connected` published in
        // between is then queued for the listener instead of lost.
        let subscription = connection.subscribe_all(
            [Topic::Channel(store.channel)]
                .into_iter()
                .chain(Topic::LIFECYCLE),
        );
        if connection.connected() {
            surface.set_available();
        }

        debug!(channel = %store.channel, instance = %store.master_device, "device attached");
        let listener = tokio::spawn(listen(subscription, surface));

        Self {
            store,
            connection,
            listener: Some(listener),
        }
    }

    /// Requests the relay to switch.  Returns `false` when the connection is
    /// down; the surface is updated later by the confirming status frame.
    pub fn set_on_off(&self, on: bool) -> bool {
        if on {
            self.connection.turn_on(self.store.channel)
        } else {
            self.connection.turn_off(self.store.channel)
        }
    }

    pub fn store(&self) -> &DeviceStore {
        &self.store
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Stops listening and releases the subscription.
    ///
    /// When this returns the device no longer counts as a subscriber.
    pub async fn detach(mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
            // Resolves once the task (and its subscription) has been dropped.
            let _ = listener.await;
        }
        debug!(channel = %self.store.channel, "device detached");
    }
}

impl Drop for RelayDevice {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

async fn listen(mut subscription: Subscription, surface: Arc<dyn DeviceSurface>) {
    while let Some(event) = subscription.recv().await {
        trace!(?event, "device event");
        match event {
            BusEvent::Channel { on, .. } => {
                if surface.on_off() != on {
                    surface.set_on_off(on);
                }
            }
            BusEvent::Connected => surface.set_available(),
            BusEvent::Disconnected => surface.set_unavailable(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
