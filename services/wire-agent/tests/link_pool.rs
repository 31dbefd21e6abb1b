//! Integration tests for the persistent link pool.
//!
//! Several store handles share one database file, the way two agent
//! processes would.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use wirelab_networking::{Ipv4Block, PortRange};
use wirelab_wire_agent::state::{LinkPool, StateStore, StateStoreError};

fn block(s: &str) -> Ipv4Block {
    s.parse().unwrap()
}

fn ports(s: &str) -> PortRange {
    s.parse().unwrap()
}

#[test]
fn test_concurrent_allocation_never_double_leases() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wirelab.db");

    // 8 /30s but only 5 port pairs: 5 links.
    let pools: Vec<LinkPool> = (0..2)
        .map(|_| {
            let store = Arc::new(StateStore::open(&path).unwrap());
            LinkPool::initialize(store, block("10.0.0.0/27"), ports("20000-20009")).unwrap()
        })
        .collect();
    assert_eq!(pools[0].stats().unwrap().total, 5);

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let pool = pools[i % 2].clone();
            thread::spawn(move || pool.allocate_link(&format!("net{}", i)))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let leased: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(leased.len(), 5);
    let cidrs: HashSet<_> = leased.iter().map(|link| link.cidr.clone()).collect();
    assert_eq!(cidrs.len(), 5);

    for result in &results {
        if let Err(e) = result {
            assert!(matches!(e, StateStoreError::PoolExhausted(_)), "got: {e}");
        }
    }
    assert_eq!(pools[1].stats().unwrap().leased, 5);
}

#[test]
fn test_leases_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wirelab.db");

    {
        let store = Arc::new(StateStore::open(&path).unwrap());
        let pool = LinkPool::initialize(store, block("10.0.0.0/24"), ports("20000-20010")).unwrap();
        pool.allocate_link("net1").unwrap();
        pool.allocate_port("net1", "A").unwrap();
    }

    // A different configuration does not re-carve a populated pool.
    let store = Arc::new(StateStore::open(&path).unwrap());
    let pool = LinkPool::initialize(store, block("192.168.0.0/24"), ports("30000-30100")).unwrap();
    assert_eq!(pool.stats().unwrap().total, 5);

    let endpoint = pool.lookup_port("net1", "A").unwrap();
    assert_eq!(endpoint.local_address.to_string(), "10.0.0.1");
    assert_eq!(endpoint.local_port, 20000);

    let next = pool.allocate_link("net2").unwrap();
    assert_eq!(next.cidr, "10.0.0.4/30");
}
