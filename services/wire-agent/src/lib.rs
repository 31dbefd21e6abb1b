//! wirelab Wire Agent Library
//!
//! The wire agent runs on each lab host and connects emulated network devices
//! with point-to-point UDP tunnels. It leases tunnel links from a persistent
//! pool, configures host address aliases and binds tunnels to device adapters
//! through the emulator control port.
//!
//! ## Architecture
//!
//! ```text
//! DeviceDriver
//! ├── DeviceRegistry       (instance → router, adapters, tunnels)
//! ├── ConsolePortPool      (console TCP port leases)
//! └── WiringOrchestrator   (host aliases + tunnel binding)
//!     ├── LinkPool / PortAttributeStore   (SQLite)
//!     ├── HostInterface                   (ip addr)
//!     └── EmulatorControl                 (control line protocol)
//! NetworkService           (network/port lifecycle on the link pool)
//! ```
//!
//! ## Modules
//!
//! - `state`: Link pool and port attributes (SQLite)
//! - `network`: Host commands, aliases and port probes
//! - `emulator`: Emulator control client
//! - `devices`: Adapter models and the device registry
//! - `wiring`: Tunnel setup and teardown
//! - `console`: Console port leases

pub mod config;
pub mod console;
pub mod devices;
pub mod driver;
pub mod emulator;
pub mod network;
pub mod service;
pub mod state;
pub mod wiring;

// Re-export commonly used types
pub use console::{ConsoleError, ConsolePortPool};
pub use devices::DeviceRegistry;
pub use driver::{DeviceDriver, DeviceSpec, DriverError, SpawnedDevice};
pub use emulator::{EmulatorClient, EmulatorControl};
pub use service::NetworkService;
pub use wiring::{NetworkInterface, TeardownReport, WiringError, WiringOrchestrator};
