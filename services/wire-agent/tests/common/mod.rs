//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use wirelab_networking::{Ipv4Block, PortRange};
use wirelab_wire_agent::emulator::{ControlProtocolError, EmulatorControl};
use wirelab_wire_agent::network::{HostCommandError, HostExecutor, HostInterface, PortProbe};
use wirelab_wire_agent::state::{LinkPool, PortAttributeStore, PortAttributes, StateStore};
use wirelab_wire_agent::{
    ConsolePortPool, DeviceDriver, DeviceRegistry, NetworkService, WiringOrchestrator,
};

/// Host that keeps interface addresses in memory and records every command.
#[derive(Default)]
pub struct FakeHost {
    pub addresses: Mutex<Vec<Ipv4Addr>>,
    pub commands: Mutex<Vec<String>>,
    failing: Mutex<Vec<String>>,
}

impl FakeHost {
    /// Make every command containing `pattern` fail.
    pub fn fail_on(&self, pattern: &str) {
        self.failing.lock().unwrap().push(pattern.to_string());
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn has_address(&self, addr: &str) -> bool {
        let addr: Ipv4Addr = addr.parse().unwrap();
        self.addresses.lock().unwrap().contains(&addr)
    }
}

fn cidr_address(cidr: &str) -> Ipv4Addr {
    cidr.split('/').next().unwrap().parse().unwrap()
}

#[async_trait]
impl HostExecutor for FakeHost {
    async fn run(&self, program: &str, args: &[&str]) -> Result<String, HostCommandError> {
        let command = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        self.commands.lock().unwrap().push(command.clone());

        if self
            .failing
            .lock()
            .unwrap()
            .iter()
            .any(|pattern| command.contains(pattern.as_str()))
        {
            return Err(HostCommandError::Failed {
                command,
                code: Some(2),
                stderr: "RTNETLINK answers: Cannot assign requested address".to_string(),
            });
        }

        let mut addresses = self.addresses.lock().unwrap();
        match args {
            ["addr", "add", cidr, ..] => {
                let addr = cidr_address(cidr);
                if !addresses.contains(&addr) {
                    addresses.push(addr);
                }
                Ok(String::new())
            }
            ["addr", "del", cidr, ..] => {
                let addr = cidr_address(cidr);
                addresses.retain(|a| *a != addr);
                Ok(String::new())
            }
            ["-o", "-4", "addr", "show", "dev", iface] => Ok(addresses
                .iter()
                .map(|a| format!("2: {iface}    inet {a}/30 scope global {iface}"))
                .collect::<Vec<_>>()
                .join("\n")),
            _ => Ok(String::new()),
        }
    }
}

/// Emulator that records calls and fails the ones matching a pattern.
#[derive(Default)]
pub struct FakeEmulator {
    calls: Mutex<Vec<String>>,
    failing: Mutex<Vec<String>>,
    forget_on_stop: Mutex<Option<(Arc<DeviceRegistry>, String)>>,
}

impl FakeEmulator {
    /// Drop `instance_id` from `registry` while the next stop is in flight.
    pub fn forget_on_stop(&self, registry: Arc<DeviceRegistry>, instance_id: &str) {
        *self.forget_on_stop.lock().unwrap() = Some((registry, instance_id.to_string()));
    }

    pub fn fail_on(&self, pattern: &str) {
        self.failing.lock().unwrap().push(pattern.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<(), ControlProtocolError> {
        self.calls.lock().unwrap().push(call.clone());
        if self
            .failing
            .lock()
            .unwrap()
            .iter()
            .any(|pattern| call.contains(pattern.as_str()))
        {
            return Err(ControlProtocolError::Rejected {
                code: 206,
                message: format!("refused: {call}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl EmulatorControl for FakeEmulator {
    async fn create_device(
        &self,
        name: &str,
        emulator_id: u32,
        platform: &str,
    ) -> Result<(), ControlProtocolError> {
        self.record(format!("create {name} {emulator_id} {platform}"))
    }

    async fn delete_device(&self, name: &str) -> Result<(), ControlProtocolError> {
        self.record(format!("delete {name}"))
    }

    async fn set_ram(&self, name: &str, ram_mb: u32) -> Result<(), ControlProtocolError> {
        self.record(format!("set_ram {name} {ram_mb}"))
    }

    async fn set_console_port(&self, name: &str, port: u16) -> Result<(), ControlProtocolError> {
        self.record(format!("console {name} {port}"))
    }

    async fn start_device(&self, name: &str) -> Result<(), ControlProtocolError> {
        self.record(format!("start {name}"))
    }

    async fn stop_device(&self, name: &str) -> Result<(), ControlProtocolError> {
        let forget = self.forget_on_stop.lock().unwrap().take();
        if let Some((registry, instance_id)) = forget {
            registry.remove(&instance_id).await;
        }
        self.record(format!("stop {name}"))
    }

    async fn add_adapter(
        &self,
        name: &str,
        slot: u8,
        model: &str,
    ) -> Result<(), ControlProtocolError> {
        self.record(format!("add_adapter {name} {slot} {model}"))
    }

    async fn remove_adapter(&self, name: &str, slot: u8) -> Result<(), ControlProtocolError> {
        self.record(format!("remove_adapter {name} {slot}"))
    }

    async fn create_udp_tunnel(
        &self,
        tunnel: &str,
        local_port: u16,
        remote_address: Ipv4Addr,
        remote_port: u16,
    ) -> Result<(), ControlProtocolError> {
        self.record(format!(
            "create_udp {tunnel} {local_port} {remote_address} {remote_port}"
        ))
    }

    async fn delete_tunnel(&self, tunnel: &str) -> Result<(), ControlProtocolError> {
        self.record(format!("delete_udp {tunnel}"))
    }

    async fn bind_tunnel(
        &self,
        name: &str,
        slot: u8,
        port: u8,
        tunnel: &str,
    ) -> Result<(), ControlProtocolError> {
        self.record(format!("bind {name} {slot} {port} {tunnel}"))
    }

    async fn unbind_tunnel(
        &self,
        name: &str,
        slot: u8,
        port: u8,
    ) -> Result<(), ControlProtocolError> {
        self.record(format!("unbind {name} {slot} {port}"))
    }
}

/// Probe answering from a set of bound ports.
#[derive(Default)]
pub struct FakeProbe {
    bound: Mutex<HashSet<u16>>,
}

impl FakeProbe {
    pub fn bind(&self, port: u16) {
        self.bound.lock().unwrap().insert(port);
    }
}

#[async_trait]
impl PortProbe for FakeProbe {
    async fn is_bound(&self, port: u16) -> bool {
        self.bound.lock().unwrap().contains(&port)
    }
}

/// Everything wired together over fakes and an in-memory database.
pub struct Lab {
    pub links: LinkPool,
    pub service: NetworkService,
    pub host: Arc<FakeHost>,
    pub emulator: Arc<FakeEmulator>,
    pub probe: Arc<FakeProbe>,
    pub registry: Arc<DeviceRegistry>,
    pub driver: DeviceDriver,
}

impl Lab {
    /// Pool of `10.0.0.0/24` with control ports `20000-20010`.
    pub fn new() -> Self {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let links = LinkPool::initialize(
            store.clone(),
            "10.0.0.0/24".parse::<Ipv4Block>().unwrap(),
            "20000-20010".parse::<PortRange>().unwrap(),
        )
        .unwrap();
        let attributes = PortAttributeStore::new(store);
        let service = NetworkService::new(links.clone(), attributes.clone());

        let host = Arc::new(FakeHost::default());
        let emulator = Arc::new(FakeEmulator::default());
        let probe = Arc::new(FakeProbe::default());
        let registry = Arc::new(DeviceRegistry::new());

        let wiring = WiringOrchestrator::new(
            links.clone(),
            attributes,
            HostInterface::new("eth0", host.clone()),
            registry.clone(),
            emulator.clone(),
        );
        let console = ConsolePortPool::new(PortRange::new(10000, 10010).unwrap(), probe.clone());
        let driver = DeviceDriver::new(registry.clone(), console, wiring, emulator.clone());

        Self {
            links,
            service,
            host,
            emulator,
            probe,
            registry,
            driver,
        }
    }
}

/// Attributes placing a port on `slot/port` of a `model` adapter.
pub fn placement(slot: u8, model: &str, port: u8) -> PortAttributes {
    match json!({"slot": slot, "adapter": model, "port": port}) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    }
}
