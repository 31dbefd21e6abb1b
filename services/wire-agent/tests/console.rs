//! Integration tests for console port leases against real sockets.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use wirelab_networking::PortRange;
use wirelab_wire_agent::network::TcpProbe;
use wirelab_wire_agent::ConsolePortPool;

/// A range starting at a port the OS just handed out (and took back).
async fn scratch_range() -> PortRange {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let start = listener.local_addr().unwrap().port();
    drop(listener);
    PortRange::new(start, start.saturating_add(50)).unwrap()
}

#[tokio::test]
async fn test_lease_reused_until_port_bound_externally() {
    let pool = ConsolePortPool::new(
        scratch_range().await,
        Arc::new(TcpProbe::loopback(Duration::from_millis(500))),
    );

    let first = pool.acquire("vm1").await.unwrap();
    assert_eq!(pool.acquire("vm1").await.unwrap(), first);

    let _squatter = TcpListener::bind(("127.0.0.1", first)).await.unwrap();
    let second = pool.acquire("vm1").await.unwrap();
    assert_ne!(second, first);
    assert_eq!(pool.lease("vm1").await, Some(second));
}

#[tokio::test]
async fn test_concurrent_acquires_get_distinct_ports() {
    let pool = Arc::new(ConsolePortPool::new(
        scratch_range().await,
        Arc::new(TcpProbe::loopback(Duration::from_millis(500))),
    ));

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire(&format!("vm{}", i)).await.unwrap() })
        })
        .collect();

    let mut ports = Vec::new();
    for task in tasks {
        ports.push(task.await.unwrap());
    }
    ports.sort_unstable();
    ports.dedup();
    assert_eq!(ports.len(), 8);
}
