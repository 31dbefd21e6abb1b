//! Configuration for the wire agent.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use wirelab_networking::{Ipv4Block, PortRange};

/// Wire agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory for local state.
    pub data_dir: PathBuf,

    /// Address block carved into links.
    pub link_cidr: Ipv4Block,

    /// UDP control ports handed out two per link.
    pub link_ports: PortRange,

    /// Host interface carrying link address aliases.
    pub data_iface: String,

    /// TCP ports leased to console bridges.
    pub console_ports: PortRange,

    /// Emulator control endpoint.
    pub emulator_host: String,
    pub emulator_port: u16,

    /// Timeout for host commands, port probes and control exchanges.
    pub command_timeout: Duration,

    /// Run host commands through `sudo -n`.
    pub use_sudo: bool,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let data_dir = PathBuf::from(var("WIRELAB_DATA_DIR", "/var/lib/wirelab"));

        let link_cidr = var("WIRELAB_LINK_CIDR", "10.200.0.0/16")
            .parse()
            .context("invalid WIRELAB_LINK_CIDR")?;

        let link_ports = var("WIRELAB_LINK_PORTS", "20000-29999")
            .parse()
            .context("invalid WIRELAB_LINK_PORTS")?;

        let data_iface = var("WIRELAB_DATA_IFACE", "eth0");

        let console_ports = var("WIRELAB_CONSOLE_PORTS", "10000-12000")
            .parse()
            .context("invalid WIRELAB_CONSOLE_PORTS")?;

        let emulator_host = var("WIRELAB_EMULATOR_HOST", "127.0.0.1");

        let emulator_port = var("WIRELAB_EMULATOR_PORT", "7200")
            .parse()
            .context("invalid WIRELAB_EMULATOR_PORT")?;

        let command_timeout_secs: u64 = var("WIRELAB_COMMAND_TIMEOUT_SECS", "10")
            .parse()
            .context("invalid WIRELAB_COMMAND_TIMEOUT_SECS")?;

        let use_sudo = !matches!(
            var("WIRELAB_USE_SUDO", "true").to_ascii_lowercase().as_str(),
            "0" | "false" | "no" | "off"
        );

        let log_level = var("WIRELAB_LOG_LEVEL", "info");

        Ok(Self {
            data_dir,
            link_cidr,
            link_ports,
            data_iface,
            console_ports,
            emulator_host,
            emulator_port,
            command_timeout: Duration::from_secs(command_timeout_secs),
            use_sudo,
            log_level,
        })
    }

    /// Path of the SQLite database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("wirelab.db")
    }
}
