//! Device driver: spawns and destroys emulated devices.
//!
//! ```text
//! spawn:   register ─► create ─► set ram ─► wire ─► console ─► start
//! destroy: stop ─► unwire ─► delete ─► release console ─► unregister
//! ```
//!
//! Anything failing after registration rolls the instance back through the
//! destroy path. Destroy is best effort past the registry lookup.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::console::{ConsoleError, ConsolePortPool};
use crate::devices::{DeviceError, DeviceRegistry, RouterSpec, RouterState};
use crate::emulator::{ControlProtocolError, EmulatorControl};
use crate::wiring::{NetworkInterface, TeardownReport, WiringError, WiringOrchestrator};

/// Driver errors.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Control(#[from] ControlProtocolError),

    #[error(transparent)]
    Wiring(#[from] WiringError),

    #[error(transparent)]
    Console(#[from] ConsoleError),
}

/// What to spawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub instance_id: String,
    pub name: String,
    pub platform: String,
    pub ram_mb: u32,
    pub interfaces: Vec<NetworkInterface>,
}

/// A running device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnedDevice {
    pub instance_id: String,
    pub name: String,
    pub console_port: u16,
}

/// Spawns and destroys devices on the emulator.
pub struct DeviceDriver {
    registry: Arc<DeviceRegistry>,
    console: ConsolePortPool,
    wiring: WiringOrchestrator,
    emulator: Arc<dyn EmulatorControl>,
}

impl DeviceDriver {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        console: ConsolePortPool,
        wiring: WiringOrchestrator,
        emulator: Arc<dyn EmulatorControl>,
    ) -> Self {
        Self {
            registry,
            console,
            wiring,
            emulator,
        }
    }

    /// Spawn a device with its network interfaces wired.
    pub async fn spawn(&self, spec: DeviceSpec) -> Result<SpawnedDevice, DriverError> {
        let router = self
            .registry
            .register(RouterSpec {
                instance_id: spec.instance_id.clone(),
                name: spec.name.clone(),
                platform: spec.platform.clone(),
                ram_mb: spec.ram_mb,
            })
            .await?;

        match self.bring_up(&spec, router.emulator_id).await {
            Ok(console_port) => {
                info!(
                    instance_id = %spec.instance_id,
                    name = %spec.name,
                    console_port,
                    "device spawned"
                );
                Ok(SpawnedDevice {
                    instance_id: spec.instance_id,
                    name: spec.name,
                    console_port,
                })
            }
            Err(e) => {
                error!(instance_id = %spec.instance_id, error = %e, "spawn failed, rolling back");
                if let Err(rollback) = self.destroy(&spec.instance_id, &spec.interfaces).await {
                    warn!(instance_id = %spec.instance_id, error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn bring_up(&self, spec: &DeviceSpec, emulator_id: u32) -> Result<u16, DriverError> {
        self.emulator
            .create_device(&spec.name, emulator_id, &spec.platform)
            .await?;
        self.emulator.set_ram(&spec.name, spec.ram_mb).await?;

        self.wiring
            .setup_network(&spec.instance_id, &spec.interfaces)
            .await?;

        let console_port = self.console.acquire(&spec.instance_id).await?;
        self.emulator
            .set_console_port(&spec.name, console_port)
            .await?;

        self.emulator.start_device(&spec.name).await?;
        self.registry
            .set_state(&spec.instance_id, RouterState::Running)
            .await?;
        Ok(console_port)
    }

    /// Destroy a device and unwind its wiring.
    ///
    /// Only fails when the instance is unknown; every later step is best
    /// effort and reported through logs and the returned report.
    pub async fn destroy(
        &self,
        instance_id: &str,
        interfaces: &[NetworkInterface],
    ) -> Result<TeardownReport, DriverError> {
        let router = self
            .registry
            .get(instance_id)
            .await
            .ok_or_else(|| DeviceError::UnknownInstance(instance_id.to_string()))?;

        if router.state == RouterState::Running {
            if let Err(e) = self.emulator.stop_device(&router.name).await {
                warn!(instance_id = %instance_id, error = %e, "failed to stop device");
            }
            let marked = self
                .registry
                .set_state(instance_id, RouterState::Stopped)
                .await;
            if let Err(e) = marked {
                warn!(instance_id = %instance_id, error = %e, "failed to mark device stopped");
            }
        }

        let report = self.wiring.tear_down_network(instance_id, interfaces).await;

        if let Err(e) = self.emulator.delete_device(&router.name).await {
            warn!(instance_id = %instance_id, error = %e, "failed to delete device");
        }
        self.console.release(instance_id).await;
        self.registry.remove(instance_id).await;

        info!(
            instance_id = %instance_id,
            wiring_failures = report.failures.len(),
            "device destroyed"
        );
        Ok(report)
    }
}
