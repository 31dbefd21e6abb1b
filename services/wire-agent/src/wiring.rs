//! Network wiring for device instances.
//!
//! Turns a leased link end into host and emulator state:
//!
//! ```text
//!   host eth0: alias 10.0.0.1/30          emulator: r1 slot 1 port 0
//!                  │                                    │
//!                  └──── udp-vm1-1-0 20000 ─► 10.0.0.2:20001
//! ```
//!
//! Setup and teardown for every instance on this host run one at a time under
//! the wiring domain lock, because adding and removing host aliases is not
//! atomic with binding the adapter.
//!
//! Host alias failures never abort wiring; the alias may already be in the
//! wanted state. Allocation and control protocol failures abort setup.
//! Teardown never aborts: each interface is unwound independently and
//! failures are only logged.

use std::net::Ipv4Addr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use wirelab_networking::LINK_PREFIX_LEN;

use crate::devices::{DeviceError, DeviceRegistry, Router};
use crate::emulator::{ControlProtocolError, EmulatorControl};
use crate::network::HostInterface;
use crate::state::{LinkPool, PortAttributeStore, PortAttributes, PortEndpoint, StateStoreError};

/// Attribute naming the adapter slot.
pub const ATTR_SLOT: &str = "slot";
/// Attribute naming the adapter model.
pub const ATTR_ADAPTER: &str = "adapter";
/// Attribute naming the port on the adapter (defaults to 0).
pub const ATTR_PORT: &str = "port";

/// Wiring errors.
#[derive(Debug, Error)]
pub enum WiringError {
    #[error(transparent)]
    State(#[from] StateStoreError),

    #[error(transparent)]
    Control(#[from] ControlProtocolError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("state lookup task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("port {port_id} has invalid placement: {reason}")]
    InvalidPlacement { port_id: String, reason: String },
}

/// One network attachment of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub network_id: String,
    pub port_id: String,
}

impl NetworkInterface {
    pub fn new(network_id: impl Into<String>, port_id: impl Into<String>) -> Self {
        Self {
            network_id: network_id.into(),
            port_id: port_id.into(),
        }
    }
}

/// Where a port lands on its device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub slot: u8,
    pub adapter: String,
    pub port: u8,
}

impl Placement {
    /// Read the placement out of a port's attributes.
    pub fn from_attributes(port_id: &str, attrs: &PortAttributes) -> Result<Self, WiringError> {
        let invalid = |reason: String| WiringError::InvalidPlacement {
            port_id: port_id.to_string(),
            reason,
        };

        let slot = small_int(attrs.get(ATTR_SLOT))
            .ok_or_else(|| invalid(format!("missing or invalid '{}'", ATTR_SLOT)))?;
        let adapter = attrs
            .get(ATTR_ADAPTER)
            .and_then(Value::as_str)
            .ok_or_else(|| invalid(format!("missing or invalid '{}'", ATTR_ADAPTER)))?
            .to_string();
        let port = match attrs.get(ATTR_PORT) {
            None => 0,
            Some(value) => small_int(Some(value))
                .ok_or_else(|| invalid(format!("invalid '{}'", ATTR_PORT)))?,
        };

        Ok(Self { slot, adapter, port })
    }

    /// Attributes describing this placement.
    pub fn to_attributes(&self) -> PortAttributes {
        let mut attrs = PortAttributes::new();
        attrs.insert(ATTR_SLOT.into(), self.slot.into());
        attrs.insert(ATTR_ADAPTER.into(), self.adapter.clone().into());
        attrs.insert(ATTR_PORT.into(), self.port.into());
        attrs
    }
}

/// Accepts JSON numbers and numeric strings.
fn small_int(value: Option<&Value>) -> Option<u8> {
    match value? {
        Value::Number(n) => n.as_u64().and_then(|n| u8::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Emulator-side name of the tunnel on `slot/port` of `instance_id`.
pub fn tunnel_name(instance_id: &str, slot: u8, port: u8) -> String {
    format!("udp-{}-{}-{}", instance_id, slot, port)
}

/// Outcome of a teardown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    /// Interfaces visited.
    pub interfaces: usize,
    /// One entry per failed step, already logged.
    pub failures: Vec<String>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn failed(&mut self, iface: &NetworkInterface, step: &str, error: impl std::fmt::Display) {
        warn!(
            network_id = %iface.network_id,
            port_id = %iface.port_id,
            step,
            error = %error,
            "teardown step failed"
        );
        self.failures
            .push(format!("{}/{}: {}: {}", iface.network_id, iface.port_id, step, error));
    }
}

/// Binds leased link ends to device adapters.
pub struct WiringOrchestrator {
    /// Wiring domain: one setup or teardown at a time on this host.
    domain: Mutex<()>,
    links: LinkPool,
    attributes: PortAttributeStore,
    host: HostInterface,
    registry: Arc<DeviceRegistry>,
    emulator: Arc<dyn EmulatorControl>,
}

impl WiringOrchestrator {
    pub fn new(
        links: LinkPool,
        attributes: PortAttributeStore,
        host: HostInterface,
        registry: Arc<DeviceRegistry>,
        emulator: Arc<dyn EmulatorControl>,
    ) -> Self {
        Self {
            domain: Mutex::new(()),
            links,
            attributes,
            host,
            registry,
            emulator,
        }
    }

    /// Wire every interface of `instance_id`.
    ///
    /// Stops at the first interface that fails; interfaces wired before it
    /// stay wired and are unwound by [`tear_down_network`](Self::tear_down_network).
    pub async fn setup_network(
        &self,
        instance_id: &str,
        interfaces: &[NetworkInterface],
    ) -> Result<(), WiringError> {
        let _domain = self.domain.lock().await;
        let router = self
            .registry
            .get(instance_id)
            .await
            .ok_or_else(|| DeviceError::UnknownInstance(instance_id.to_string()))?;

        for iface in interfaces {
            self.wire_interface(&router, iface).await?;
        }

        info!(instance_id = %instance_id, interfaces = interfaces.len(), "network wired");
        Ok(())
    }

    async fn wire_interface(
        &self,
        router: &Router,
        iface: &NetworkInterface,
    ) -> Result<(), WiringError> {
        let endpoint = self.endpoint_of(iface).await?;
        let placement = self.placement_of(iface).await?;

        if let Err(e) = self.host.add_alias(endpoint.local_address, LINK_PREFIX_LEN).await {
            warn!(
                port_id = %iface.port_id,
                address = %endpoint.local_address,
                error = %e,
                "failed to add local alias, continuing"
            );
        }

        let self_loop = self.is_local(endpoint.peer_address).await;
        if self_loop {
            info!(
                port_id = %iface.port_id,
                peer = %endpoint.peer_address,
                "self-loop link, lifting peer alias"
            );
            if let Err(e) = self.host.remove_alias(endpoint.peer_address, LINK_PREFIX_LEN).await {
                warn!(peer = %endpoint.peer_address, error = %e, "failed to lift peer alias");
            }
        }

        let result = self.bind(router, &endpoint, &placement).await;

        if self_loop {
            if let Err(e) = self.host.add_alias(endpoint.peer_address, LINK_PREFIX_LEN).await {
                warn!(peer = %endpoint.peer_address, error = %e, "failed to restore peer alias");
            }
        }

        result
    }

    /// Whether `addr` is configured on the data interface.
    async fn is_local(&self, addr: Ipv4Addr) -> bool {
        match self.host.addresses().await {
            Ok(addrs) => addrs.contains(&addr),
            Err(e) => {
                warn!(iface = %self.host.name(), error = %e, "failed to list interface addresses");
                false
            }
        }
    }

    async fn bind(
        &self,
        router: &Router,
        endpoint: &PortEndpoint,
        placement: &Placement,
    ) -> Result<(), WiringError> {
        let instance_id = router.instance_id.as_str();
        let ensured = self
            .registry
            .ensure_adapter(instance_id, placement.slot, &placement.adapter)
            .await?;
        if placement.port >= ensured.model.ports {
            if ensured.created {
                self.registry.remove_adapter(instance_id, placement.slot).await?;
            }
            return Err(DeviceError::PortOutOfRange {
                model: ensured.model.name,
                port: placement.port,
            }
            .into());
        }

        if ensured.created {
            if let Err(e) = self
                .emulator
                .add_adapter(&router.name, placement.slot, ensured.model.name)
                .await
            {
                self.registry.remove_adapter(instance_id, placement.slot).await?;
                return Err(e.into());
            }
            info!(
                instance_id = %instance_id,
                slot = placement.slot,
                model = ensured.model.name,
                "adapter installed"
            );
        }

        let tunnel = tunnel_name(instance_id, placement.slot, placement.port);
        self.emulator
            .create_udp_tunnel(
                &tunnel,
                endpoint.local_port,
                endpoint.peer_address,
                endpoint.peer_port,
            )
            .await?;
        if let Err(e) = self
            .emulator
            .bind_tunnel(&router.name, placement.slot, placement.port, &tunnel)
            .await
        {
            if let Err(cleanup) = self.emulator.delete_tunnel(&tunnel).await {
                warn!(tunnel = %tunnel, error = %cleanup, "failed to delete unbound tunnel");
            }
            return Err(e.into());
        }
        self.registry
            .record_tunnel(instance_id, placement.slot, placement.port, &tunnel)
            .await?;

        info!(
            instance_id = %instance_id,
            port_id = %endpoint.port_id,
            tunnel = %tunnel,
            local = %format!("{}:{}", endpoint.local_address, endpoint.local_port),
            peer = %format!("{}:{}", endpoint.peer_address, endpoint.peer_port),
            "tunnel bound"
        );
        Ok(())
    }

    /// Unwind the wiring of every interface of `instance_id`, best effort.
    ///
    /// Never fails; every failed step is logged and listed in the report.
    pub async fn tear_down_network(
        &self,
        instance_id: &str,
        interfaces: &[NetworkInterface],
    ) -> TeardownReport {
        let _domain = self.domain.lock().await;
        let router = self.registry.get(instance_id).await;
        let mut report = TeardownReport::default();

        for iface in interfaces {
            report.interfaces += 1;
            self.unwire_interface(instance_id, router.as_ref(), iface, &mut report)
                .await;
        }

        if report.is_clean() {
            info!(instance_id = %instance_id, interfaces = report.interfaces, "network torn down");
        } else {
            warn!(
                instance_id = %instance_id,
                interfaces = report.interfaces,
                failures = report.failures.len(),
                "network torn down with failures"
            );
        }
        report
    }

    async fn unwire_interface(
        &self,
        instance_id: &str,
        router: Option<&Router>,
        iface: &NetworkInterface,
        report: &mut TeardownReport,
    ) {
        match self.placement_of(iface).await {
            Ok(placement) => self.unbind(instance_id, router, iface, &placement, report).await,
            Err(e) => report.failed(iface, "resolve placement", e),
        }

        match self.endpoint_of(iface).await {
            Ok(endpoint) => {
                let removed = self
                    .host
                    .remove_alias(endpoint.local_address, LINK_PREFIX_LEN)
                    .await;
                if let Err(e) = removed {
                    report.failed(iface, "remove alias", e);
                }
            }
            Err(e) => report.failed(iface, "lookup port", e),
        }
    }

    async fn endpoint_of(&self, iface: &NetworkInterface) -> Result<PortEndpoint, WiringError> {
        let links = self.links.clone();
        let (network_id, port_id) = (iface.network_id.clone(), iface.port_id.clone());
        on_blocking_pool(move || links.lookup_port(&network_id, &port_id)).await
    }

    async fn placement_of(&self, iface: &NetworkInterface) -> Result<Placement, WiringError> {
        let attributes = self.attributes.clone();
        let port_id = iface.port_id.clone();
        let attrs = on_blocking_pool(move || attributes.get_attributes(&port_id)).await?;
        Placement::from_attributes(&iface.port_id, &attrs)
    }

    async fn unbind(
        &self,
        instance_id: &str,
        router: Option<&Router>,
        iface: &NetworkInterface,
        placement: &Placement,
        report: &mut TeardownReport,
    ) {
        let Some(router) = router else {
            let missing = DeviceError::UnknownInstance(instance_id.to_string());
            report.failed(iface, "resolve device", missing);
            return;
        };
        let Some(tunnel) = self
            .registry
            .tunnel_at(instance_id, placement.slot, placement.port)
            .await
        else {
            // Never bound (setup stopped early).
            return;
        };

        if let Err(e) = self
            .emulator
            .unbind_tunnel(&router.name, placement.slot, placement.port)
            .await
        {
            report.failed(iface, "unbind tunnel", e);
        }
        if let Err(e) = self.emulator.delete_tunnel(&tunnel).await {
            report.failed(iface, "delete tunnel", e);
        }
        self.registry
            .forget_tunnel(instance_id, placement.slot, placement.port)
            .await;
    }
}

/// Runs a SQLite call on the blocking pool so the wiring lock holder never
/// stalls a runtime worker on `busy_timeout`.
async fn on_blocking_pool<T, F>(call: F) -> Result<T, WiringError>
where
    F: FnOnce() -> Result<T, StateStoreError> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(call).await??)
}
