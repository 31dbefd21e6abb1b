//! Port liveness probing.
//!
//! A port counts as bound when something accepts a TCP connection on it.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::trace;

/// Answers "is anything listening on this port?".
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn is_bound(&self, port: u16) -> bool;
}

/// Probe that attempts a TCP connect under a timeout.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    host: IpAddr,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(host: IpAddr, timeout: Duration) -> Self {
        Self { host, timeout }
    }

    /// Probe ports on the loopback address.
    pub fn loopback(timeout: Duration) -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST), timeout)
    }
}

#[async_trait]
impl PortProbe for TcpProbe {
    async fn is_bound(&self, port: u16) -> bool {
        let addr = SocketAddr::new(self.host, port);
        let bound = matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        );
        trace!(%addr, bound, "probed port");
        bound
    }
}
