//! Process-wide table of live connection managers, keyed by instance id.
//!
//! Every consumer of the same controller instance asks the registry for its
//! manager and gets the same `Arc`.  There is no public removal: a manager
//! removes itself when it shuts down, so the next request for that id builds
//! a fresh one and never races a still-open socket.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sw16_core::{ControllerAddress, InstanceId};
use tracing::info;

use super::connection_manager::{ConnectionConfig, ConnectionManager, LinkState};

pub(crate) type RegistryTable = Mutex<HashMap<InstanceId, Arc<ConnectionManager>>>;

/// Removes `instance` from `table` only if it still maps to `manager`.
///
/// A newer manager may already have taken the slot; that one is left alone.
pub(crate) fn remove_if_current(
    table: &RegistryTable,
    instance: &InstanceId,
    manager: &ConnectionManager,
) -> bool {
    let mut map = table.lock().unwrap_or_else(PoisonError::into_inner);
    let current = map
        .get(instance)
        .is_some_and(|m| std::ptr::eq(Arc::as_ptr(m), manager));
    if current {
        map.remove(instance);
    }
    current
}

/// Cloneable handle to one registry; clones share the same table.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    table: Arc<RegistryTable>,
    config: ConnectionConfig,
}

impl ConnectionRegistry {
    /// Creates an empty registry whose managers use `config`.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            table: Arc::default(),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<InstanceId, Arc<ConnectionManager>>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the live manager for `instance`, creating and starting one if
    /// none exists.
    ///
    /// `host`/`port` are only used when a new manager is created.  Must be
    /// called from within a Tokio runtime.
    pub fn get_or_create(
        &self,
        instance: InstanceId,
        host: impl Into<String>,
        port: u16,
    ) -> Arc<ConnectionManager> {
        let mut map = self.lock();
        if let Some(existing) = map.get(&instance) {
            if existing.state() != LinkState::Shutdown {
                return Arc::clone(existing);
            }
        }

        let address = ControllerAddress::new(host, port);
        info!(%instance, %address, "creating connection");
        let manager = ConnectionManager::with_registry(
            instance,
            address,
            self.config.clone(),
            Arc::downgrade(&self.table),
        );
        map.insert(instance, Arc::clone(&manager));
        drop(map);

        manager.start();
        manager
    }

    pub fn get(&self, instance: &InstanceId) -> Option<Arc<ConnectionManager>> {
        self.lock().get(instance).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Shuts down every registered manager.  Used on process exit.
    pub fn shutdown_all(&self) {
        let managers: Vec<Arc<ConnectionManager>> = self.lock().values().cloned().collect();
        for manager in managers {
            manager.shutdown();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
