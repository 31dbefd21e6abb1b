//! Device emulator control.
//!
//! The orchestrator and driver talk to the emulator only through
//! [`EmulatorControl`], so tests can stand in a recording fake. The real
//! implementation is [`EmulatorClient`], which speaks the line protocol in
//! [`protocol`].

use std::net::Ipv4Addr;

use async_trait::async_trait;

mod client;
pub mod protocol;

pub use client::{EmulatorClient, Transport};
pub use protocol::{ControlProtocolError, Reply};

/// Typed operations against the device emulator.
#[async_trait]
pub trait EmulatorControl: Send + Sync {
    /// Create device `name` of `platform` under the emulator-wide id.
    async fn create_device(
        &self,
        name: &str,
        emulator_id: u32,
        platform: &str,
    ) -> Result<(), ControlProtocolError>;

    async fn delete_device(&self, name: &str) -> Result<(), ControlProtocolError>;

    async fn set_ram(&self, name: &str, ram_mb: u32) -> Result<(), ControlProtocolError>;

    /// Point the device console at a TCP port.
    async fn set_console_port(&self, name: &str, port: u16) -> Result<(), ControlProtocolError>;

    async fn start_device(&self, name: &str) -> Result<(), ControlProtocolError>;

    async fn stop_device(&self, name: &str) -> Result<(), ControlProtocolError>;

    /// Install adapter `model` in `slot`.
    async fn add_adapter(
        &self,
        name: &str,
        slot: u8,
        model: &str,
    ) -> Result<(), ControlProtocolError>;

    async fn remove_adapter(&self, name: &str, slot: u8) -> Result<(), ControlProtocolError>;

    /// Create a UDP tunnel object listening on `local_port` and sending to
    /// `remote_address:remote_port`.
    async fn create_udp_tunnel(
        &self,
        tunnel: &str,
        local_port: u16,
        remote_address: Ipv4Addr,
        remote_port: u16,
    ) -> Result<(), ControlProtocolError>;

    async fn delete_tunnel(&self, tunnel: &str) -> Result<(), ControlProtocolError>;

    /// Attach `tunnel` to adapter port `slot/port` of device `name`.
    async fn bind_tunnel(
        &self,
        name: &str,
        slot: u8,
        port: u8,
        tunnel: &str,
    ) -> Result<(), ControlProtocolError>;

    /// Detach whatever tunnel is on adapter port `slot/port`.
    async fn unbind_tunnel(
        &self,
        name: &str,
        slot: u8,
        port: u8,
    ) -> Result<(), ControlProtocolError>;
}
