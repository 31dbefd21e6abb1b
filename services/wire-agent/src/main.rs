//! wirelab Wire Agent
//!
//! Opens the link pool, connects to the device emulator and keeps the wiring
//! components alive until shutdown.
//!
//! ## Startup
//!
//! - **State**: SQLite database under the data directory; the link pool is
//!   carved on first start
//! - **Emulator**: one control connection, shared by all wiring operations
//! - **Driver**: registry, console leases and wiring orchestrator
//!
//! Request handling is not part of this binary. Front ends embed the library
//! and drive `NetworkService` and `DeviceDriver` directly; the agent only
//! owns startup, pool carving and shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wirelab_wire_agent::config::Config;
use wirelab_wire_agent::network::{HostInterface, SystemExecutor, TcpProbe};
use wirelab_wire_agent::state::{LinkPool, PortAttributeStore, StateStore};
use wirelab_wire_agent::{
    ConsolePortPool, DeviceDriver, DeviceRegistry, EmulatorClient, WiringOrchestrator,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting wirelab wire agent");
    info!(
        data_dir = %config.data_dir.display(),
        link_cidr = %config.link_cidr,
        link_ports = %config.link_ports,
        data_iface = %config.data_iface,
        console_ports = %config.console_ports,
        emulator = %format!("{}:{}", config.emulator_host, config.emulator_port),
        "Configuration loaded"
    );

    // Open local state
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create {}", config.data_dir.display()))?;
    let store = Arc::new(
        StateStore::open(config.database_path()).context("failed to open state store")?,
    );
    let links = LinkPool::initialize(store.clone(), config.link_cidr, config.link_ports)
        .context("failed to initialize link pool")?;
    let attributes = PortAttributeStore::new(store);

    let stats = links.stats()?;
    info!(total = stats.total, leased = stats.leased, "Link pool ready");

    // Host and emulator collaborators
    let executor = Arc::new(SystemExecutor::new(config.use_sudo, config.command_timeout));
    let host = HostInterface::new(config.data_iface.clone(), executor);
    let probe = Arc::new(TcpProbe::loopback(config.command_timeout));
    let emulator = Arc::new(
        EmulatorClient::connect(
            &config.emulator_host,
            config.emulator_port,
            config.command_timeout,
        )
        .await
        .context("failed to connect to emulator")?,
    );

    let registry = Arc::new(DeviceRegistry::new());
    let wiring = WiringOrchestrator::new(
        links.clone(),
        attributes,
        host,
        registry.clone(),
        emulator.clone(),
    );
    // Held for the process lifetime so the control connection and console
    // leases stay open until shutdown.
    let _driver = DeviceDriver::new(
        registry,
        ConsolePortPool::new(config.console_ports, probe),
        wiring,
        emulator,
    );

    info!("Wire agent ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    let stats = links.stats()?;
    info!(leased = stats.leased, "Wire agent shutdown complete");
    Ok(())
}
