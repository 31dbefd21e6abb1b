//! Host networking for link endpoints.
//!
//! This module handles the host side of tunnel wiring:
//! - Running host commands with a timeout (`exec`)
//! - Address aliases on the data interface (`alias`)
//! - Port liveness probes (`probe`)

mod alias;
mod exec;
mod probe;

pub use alias::HostInterface;
pub use exec::{HostCommandError, HostExecutor, SystemExecutor};
pub use probe::{PortProbe, TcpProbe};
