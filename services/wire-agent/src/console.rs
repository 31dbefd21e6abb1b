//! Console port leases.
//!
//! Each device instance gets one TCP port for its console bridge. Leases are
//! in-memory only; after a restart they are rebuilt from whatever the probe
//! observes.
//!
//! A lease is reused only while nothing is listening on its port. Once the
//! port is seen bound by someone else, the stale lease is dropped and a fresh
//! port is scanned for. The scan walks the whole range in ascending order
//! before reporting exhaustion.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use wirelab_networking::PortRange;

use crate::network::PortProbe;

/// Console lease errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("no free console port in {range} for instance {instance_id}")]
    PoolExhausted { instance_id: String, range: PortRange },
}

/// In-memory console port lease pool.
pub struct ConsolePortPool {
    range: PortRange,
    probe: Arc<dyn PortProbe>,
    /// Leased port by instance id. Held across the whole scan-and-claim.
    leases: Mutex<HashMap<String, u16>>,
}

impl ConsolePortPool {
    pub fn new(range: PortRange, probe: Arc<dyn PortProbe>) -> Self {
        Self {
            range,
            probe,
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Lease a console port for `instance_id` from the configured range.
    pub async fn acquire(&self, instance_id: &str) -> Result<u16, ConsoleError> {
        self.acquire_in(instance_id, self.range).await
    }

    /// Lease a console port for `instance_id` from `range`.
    pub async fn acquire_in(
        &self,
        instance_id: &str,
        range: PortRange,
    ) -> Result<u16, ConsoleError> {
        let mut leases = self.leases.lock().await;

        if let Some(&port) = leases.get(instance_id) {
            if !self.probe.is_bound(port).await {
                debug!(instance_id = %instance_id, port, "reusing console lease");
                return Ok(port);
            }
            warn!(
                instance_id = %instance_id,
                port,
                "console port bound externally, dropping lease"
            );
            leases.remove(instance_id);
        }

        for port in range.iter() {
            if leases.values().any(|&leased| leased == port) {
                continue;
            }
            if self.probe.is_bound(port).await {
                continue;
            }

            leases.insert(instance_id.to_string(), port);
            info!(instance_id = %instance_id, port, "console port leased");
            return Ok(port);
        }

        Err(ConsoleError::PoolExhausted {
            instance_id: instance_id.to_string(),
            range,
        })
    }

    /// Drop the lease of `instance_id`, returning the freed port.
    pub async fn release(&self, instance_id: &str) -> Option<u16> {
        let port = self.leases.lock().await.remove(instance_id);
        if let Some(port) = port {
            info!(instance_id = %instance_id, port, "console port released");
        }
        port
    }

    /// Port currently leased to `instance_id`.
    pub async fn lease(&self, instance_id: &str) -> Option<u16> {
        self.leases.lock().await.get(instance_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    /// Probe answering from a fixed set of bound ports.
    #[derive(Default)]
    struct FakeProbe {
        bound: StdMutex<HashSet<u16>>,
        probes: StdMutex<Vec<u16>>,
    }

    impl FakeProbe {
        fn bind(&self, port: u16) {
            self.bound.lock().unwrap().insert(port);
        }
    }

    #[async_trait]
    impl PortProbe for FakeProbe {
        async fn is_bound(&self, port: u16) -> bool {
            self.probes.lock().unwrap().push(port);
            self.bound.lock().unwrap().contains(&port)
        }
    }

    fn pool(start: u16, end: u16) -> (ConsolePortPool, Arc<FakeProbe>) {
        let probe = Arc::new(FakeProbe::default());
        let pool = ConsolePortPool::new(PortRange::new(start, end).unwrap(), probe.clone());
        (pool, probe)
    }

    #[tokio::test]
    async fn test_distinct_instances_get_distinct_ports() {
        let (pool, _) = pool(10000, 10010);
        assert_eq!(pool.acquire("vm1").await.unwrap(), 10000);
        assert_eq!(pool.acquire("vm2").await.unwrap(), 10001);
        assert_eq!(pool.lease("vm1").await, Some(10000));
    }

    #[tokio::test]
    async fn test_scan_skips_bound_ports() {
        let (pool, probe) = pool(10000, 10010);
        probe.bind(10000);
        probe.bind(10001);
        assert_eq!(pool.acquire("vm1").await.unwrap(), 10002);
    }

    #[tokio::test]
    async fn test_scan_visits_whole_range_before_failing() {
        let (pool, probe) = pool(10000, 10004);
        for port in 10000..=10003 {
            probe.bind(port);
        }
        assert_eq!(pool.acquire("vm1").await.unwrap(), 10004);

        let err = pool.acquire("vm2").await.unwrap_err();
        assert!(matches!(err, ConsoleError::PoolExhausted { .. }));

        // 10004 is tracked, so only the four bound ports get probed again.
        let probes = probe.probes.lock().unwrap().clone();
        assert_eq!(&probes[5..], &[10000, 10001, 10002, 10003]);
    }

    #[tokio::test]
    async fn test_release_frees_port() {
        let (pool, _) = pool(10000, 10000);
        pool.acquire("vm1").await.unwrap();
        assert!(pool.acquire("vm2").await.is_err());

        assert_eq!(pool.release("vm1").await, Some(10000));
        assert_eq!(pool.release("vm1").await, None);
        assert_eq!(pool.acquire("vm2").await.unwrap(), 10000);
    }

    #[tokio::test]
    async fn test_acquire_in_custom_range() {
        let (pool, _) = pool(10000, 10010);
        let range = PortRange::new(15000, 15001).unwrap();
        assert_eq!(pool.acquire_in("vm1", range).await.unwrap(), 15000);
    }
}
