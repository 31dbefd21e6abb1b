//! Registry of device instances.
//!
//! Created when the driver starts, filled on spawn and emptied on destroy.
//! Maps an instance id to its router: name on the emulator, installed adapters
//! and the tunnel bound to each adapter port.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use super::models::{adapter_model, AdapterModel};

/// Device registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("instance already registered: {0}")]
    AlreadyRegistered(String),

    #[error("unknown instance: {0}")]
    UnknownInstance(String),

    #[error("unknown adapter model: {0}")]
    UnknownAdapterModel(String),

    #[error("slot {slot} already holds {existing}, requested {requested}")]
    AdapterConflict {
        slot: u8,
        existing: &'static str,
        requested: String,
    },

    #[error("adapter {model} has no port {port}")]
    PortOutOfRange { model: &'static str, port: u8 },
}

/// Lifecycle state of a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    /// Registered, not yet running.
    Defined,
    Running,
    Stopped,
}

/// A device instance as the agent sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Router {
    pub instance_id: String,
    /// Name on the emulator.
    pub name: String,
    /// Emulator-wide numeric id.
    pub emulator_id: u32,
    pub platform: String,
    pub ram_mb: u32,
    pub state: RouterState,
    /// Installed adapters by slot.
    pub adapters: BTreeMap<u8, &'static AdapterModel>,
    /// Bound tunnel by (slot, port).
    pub tunnels: BTreeMap<(u8, u8), String>,
}

impl Router {
    /// Adapter installed in `slot`.
    pub fn adapter(&self, slot: u8) -> Option<&'static AdapterModel> {
        self.adapters.get(&slot).copied()
    }

    /// Tunnel bound to `slot/port`.
    pub fn tunnel_at(&self, slot: u8, port: u8) -> Option<&str> {
        self.tunnels.get(&(slot, port)).map(String::as_str)
    }
}

/// Result of [`DeviceRegistry::ensure_adapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsuredAdapter {
    pub model: &'static AdapterModel,
    /// The slot was empty and the adapter was recorded just now; the caller
    /// still has to install it on the emulator.
    pub created: bool,
}

/// Fields needed to register a router.
#[derive(Debug, Clone)]
pub struct RouterSpec {
    pub instance_id: String,
    pub name: String,
    pub platform: String,
    pub ram_mb: u32,
}

/// Registry of routers by instance id.
pub struct DeviceRegistry {
    routers: RwLock<HashMap<String, Router>>,
    next_emulator_id: AtomicU32,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            routers: RwLock::new(HashMap::new()),
            next_emulator_id: AtomicU32::new(1),
        }
    }

    /// Register a router, assigning it an emulator id.
    pub async fn register(&self, spec: RouterSpec) -> Result<Router, DeviceError> {
        let mut routers = self.routers.write().await;
        if routers.contains_key(&spec.instance_id) {
            return Err(DeviceError::AlreadyRegistered(spec.instance_id));
        }

        let router = Router {
            emulator_id: self.next_emulator_id.fetch_add(1, Ordering::Relaxed),
            instance_id: spec.instance_id,
            name: spec.name,
            platform: spec.platform,
            ram_mb: spec.ram_mb,
            state: RouterState::Defined,
            adapters: BTreeMap::new(),
            tunnels: BTreeMap::new(),
        };
        routers.insert(router.instance_id.clone(), router.clone());

        debug!(instance_id = %router.instance_id, name = %router.name, "router registered");
        Ok(router)
    }

    /// Drop the router of `instance_id`.
    pub async fn remove(&self, instance_id: &str) -> Option<Router> {
        self.routers.write().await.remove(instance_id)
    }

    /// Snapshot of the router of `instance_id`.
    pub async fn get(&self, instance_id: &str) -> Option<Router> {
        self.routers.read().await.get(instance_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.routers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.routers.read().await.is_empty()
    }

    pub async fn set_state(
        &self,
        instance_id: &str,
        state: RouterState,
    ) -> Result<(), DeviceError> {
        self.with_router(instance_id, |router| {
            router.state = state;
            Ok(())
        })
        .await
    }

    /// Make sure `slot` holds an adapter of `model_name`.
    ///
    /// An empty slot gets the adapter recorded (`created == true`). A slot
    /// holding a different model is a conflict.
    pub async fn ensure_adapter(
        &self,
        instance_id: &str,
        slot: u8,
        model_name: &str,
    ) -> Result<EnsuredAdapter, DeviceError> {
        let model = adapter_model(model_name)
            .ok_or_else(|| DeviceError::UnknownAdapterModel(model_name.to_string()))?;

        self.with_router(instance_id, |router| match router.adapters.get(&slot) {
            Some(existing) if *existing == model => Ok(EnsuredAdapter {
                model,
                created: false,
            }),
            Some(existing) => Err(DeviceError::AdapterConflict {
                slot,
                existing: existing.name,
                requested: model_name.to_string(),
            }),
            None => {
                router.adapters.insert(slot, model);
                Ok(EnsuredAdapter {
                    model,
                    created: true,
                })
            }
        })
        .await
    }

    /// Forget the adapter in `slot` (e.g. when installing it failed).
    pub async fn remove_adapter(&self, instance_id: &str, slot: u8) -> Result<(), DeviceError> {
        self.with_router(instance_id, |router| {
            router.adapters.remove(&slot);
            Ok(())
        })
        .await
    }

    /// Record `tunnel` as bound to `slot/port`.
    pub async fn record_tunnel(
        &self,
        instance_id: &str,
        slot: u8,
        port: u8,
        tunnel: &str,
    ) -> Result<(), DeviceError> {
        self.with_router(instance_id, |router| {
            router.tunnels.insert((slot, port), tunnel.to_string());
            Ok(())
        })
        .await
    }

    /// Tunnel bound to `slot/port` of `instance_id`.
    pub async fn tunnel_at(&self, instance_id: &str, slot: u8, port: u8) -> Option<String> {
        self.routers
            .read()
            .await
            .get(instance_id)
            .and_then(|router| router.tunnel_at(slot, port))
            .map(str::to_string)
    }

    /// Forget the tunnel on `slot/port`, returning it.
    pub async fn forget_tunnel(&self, instance_id: &str, slot: u8, port: u8) -> Option<String> {
        self.routers
            .write()
            .await
            .get_mut(instance_id)
            .and_then(|router| router.tunnels.remove(&(slot, port)))
    }

    async fn with_router<T, F>(&self, instance_id: &str, f: F) -> Result<T, DeviceError>
    where
        F: FnOnce(&mut Router) -> Result<T, DeviceError>,
    {
        let mut routers = self.routers.write().await;
        let router = routers
            .get_mut(instance_id)
            .ok_or_else(|| DeviceError::UnknownInstance(instance_id.to_string()))?;
        f(router)
    }
}
