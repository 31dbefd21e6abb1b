//! Link pool: leases point-to-point tunnel links and their two endpoints.
//!
//! ```text
//!   network N ──lease──► Link 10.0.0.4/30
//!                          left  10.0.0.5 : 20002  ◄── port A
//!                          right 10.0.0.6 : 20003  ◄── port B
//! ```
//!
//! Links are carved once from the configured block (see
//! [`wirelab_networking::carve_links`]) and never deleted; only the lease
//! columns change afterwards. Each public operation is one immediate
//! transaction, committed before it returns.

use std::net::Ipv4Addr;
use std::sync::Arc;

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, info, warn};
use wirelab_networking::{carve_links, Ipv4Block, PortRange};

use super::store::{StateStore, StateStoreError};

const LINK_COLUMNS: &str = "cidr, left_address, right_address, left_control_port, \
     right_control_port, network_id, left_port_id, right_port_id";

/// One leased-or-free link record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub cidr: String,
    pub left_address: Ipv4Addr,
    pub right_address: Ipv4Addr,
    pub left_control_port: u16,
    pub right_control_port: u16,
    /// Network holding the lease, `None` when free.
    pub network_id: Option<String>,
    pub left_port_id: Option<String>,
    pub right_port_id: Option<String>,
}

/// Which end of a link a port occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// A claimed link end seen from the port that claimed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortEndpoint {
    pub port_id: String,
    pub local_address: Ipv4Addr,
    pub local_port: u16,
    pub peer_address: Ipv4Addr,
    pub peer_port: u16,
}

/// Lease counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: u64,
    pub leased: u64,
}

impl Link {
    /// Side claimed by `port_id`, if any.
    pub fn side_of(&self, port_id: &str) -> Option<Side> {
        if self.left_port_id.as_deref() == Some(port_id) {
            Some(Side::Left)
        } else if self.right_port_id.as_deref() == Some(port_id) {
            Some(Side::Right)
        } else {
            None
        }
    }

    /// Endpoint for `side`, with the opposite side as peer.
    pub fn endpoint(&self, side: Side, port_id: &str) -> PortEndpoint {
        let (local_address, local_port, peer_address, peer_port) = match side {
            Side::Left => (
                self.left_address,
                self.left_control_port,
                self.right_address,
                self.right_control_port,
            ),
            Side::Right => (
                self.right_address,
                self.right_control_port,
                self.left_address,
                self.left_control_port,
            ),
        };
        PortEndpoint {
            port_id: port_id.to_string(),
            local_address,
            local_port,
            peer_address,
            peer_port,
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            cidr: row.get(0)?,
            left_address: parse_address(row, 1)?,
            right_address: parse_address(row, 2)?,
            left_control_port: row.get(3)?,
            right_control_port: row.get(4)?,
            network_id: row.get(5)?,
            left_port_id: row.get(6)?,
            right_port_id: row.get(7)?,
        })
    }
}

fn parse_address(row: &Row<'_>, idx: usize) -> rusqlite::Result<Ipv4Addr> {
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Persistent pool of tunnel links.
#[derive(Clone)]
pub struct LinkPool {
    store: Arc<StateStore>,
}

impl LinkPool {
    /// Attach to the store, carving `block` into links if the table is empty.
    ///
    /// Safe to run on every start: a populated table is left untouched, even
    /// if the configured block or port range changed since.
    pub fn initialize(
        store: Arc<StateStore>,
        block: Ipv4Block,
        ports: PortRange,
    ) -> Result<Self, StateStoreError> {
        store.immediate(|tx| {
            let existing: i64 = tx.query_row("SELECT COUNT(*) FROM links", [], |row| row.get(0))?;
            if existing > 0 {
                debug!(links = existing, "link pool already initialized");
                return Ok(());
            }

            let plans = carve_links(block, ports);
            let mut insert = tx.prepare(
                "INSERT INTO links (position, cidr, left_address, right_address,
                                    left_control_port, right_control_port)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (position, plan) in plans.iter().enumerate() {
                insert.execute(params![
                    position as i64,
                    plan.cidr.to_string(),
                    plan.left_address.to_string(),
                    plan.right_address.to_string(),
                    plan.left_control_port,
                    plan.right_control_port,
                ])?;
            }

            if plans.is_empty() {
                warn!(block = %block, ports = %ports, "link pool configuration yields no links");
            }
            info!(block = %block, ports = %ports, links = plans.len(), "link pool initialized");
            Ok(())
        })?;

        Ok(Self { store })
    }

    /// Lease a free link to `network_id`.
    ///
    /// A network that already holds a link gets that link back.
    pub fn allocate_link(&self, network_id: &str) -> Result<Link, StateStoreError> {
        self.store.immediate(|tx| {
            if let Some(link) = find_by_network(tx, network_id)? {
                debug!(network_id = %network_id, cidr = %link.cidr, "network already holds a link");
                return Ok(link);
            }

            let free = tx
                .query_row(
                    &format!(
                        "SELECT {LINK_COLUMNS} FROM links
                         WHERE network_id IS NULL ORDER BY position LIMIT 1"
                    ),
                    [],
                    Link::from_row,
                )
                .optional()?;
            let Some(mut link) = free else {
                return Err(StateStoreError::PoolExhausted(network_id.to_string()));
            };

            // Guarded update: only a row that is still free can be leased.
            let changed = tx.execute(
                "UPDATE links SET network_id = ?1, leased_at = ?2
                 WHERE cidr = ?3 AND network_id IS NULL",
                params![network_id, chrono::Utc::now().timestamp(), link.cidr],
            )?;
            if changed != 1 {
                return Err(StateStoreError::Invalid(format!(
                    "link {} was leased concurrently",
                    link.cidr
                )));
            }

            link.network_id = Some(network_id.to_string());
            info!(network_id = %network_id, cidr = %link.cidr, "link allocated");
            Ok(link)
        })
    }

    /// Return the link leased to `network_id` to the pool.
    ///
    /// Port claims still on the link are cleared too, so the next lease starts
    /// with both ends free.
    pub fn release_link(&self, network_id: &str) -> Result<Link, StateStoreError> {
        self.store.immediate(|tx| {
            let mut link = find_by_network(tx, network_id)?.ok_or_else(|| {
                StateStoreError::LookupFailure(format!("no link leased to network {network_id}"))
            })?;

            if link.left_port_id.is_some() || link.right_port_id.is_some() {
                warn!(
                    network_id = %network_id,
                    cidr = %link.cidr,
                    left_port_id = ?link.left_port_id,
                    right_port_id = ?link.right_port_id,
                    "releasing link with ports still claimed"
                );
            }

            tx.execute(
                "UPDATE links
                 SET network_id = NULL, left_port_id = NULL, right_port_id = NULL, leased_at = NULL
                 WHERE cidr = ?1",
                params![link.cidr],
            )?;

            link.network_id = None;
            link.left_port_id = None;
            link.right_port_id = None;
            info!(network_id = %network_id, cidr = %link.cidr, "link released");
            Ok(link)
        })
    }

    /// Claim a free end of the network's link for `port_id`.
    ///
    /// The left end is handed out first. Asking again with a port that
    /// already holds an end returns that end.
    pub fn allocate_port(
        &self,
        network_id: &str,
        port_id: &str,
    ) -> Result<PortEndpoint, StateStoreError> {
        self.store.immediate(|tx| {
            let link = find_by_network(tx, network_id)?.ok_or_else(|| {
                StateStoreError::LookupFailure(format!("no link leased to network {network_id}"))
            })?;

            if let Some(side) = link.side_of(port_id) {
                debug!(network_id = %network_id, port_id = %port_id, ?side, "port already claimed");
                return Ok(link.endpoint(side, port_id));
            }

            let (side, column) = if link.left_port_id.is_none() {
                (Side::Left, "left_port_id")
            } else if link.right_port_id.is_none() {
                (Side::Right, "right_port_id")
            } else {
                return Err(StateStoreError::NoFreePorts(network_id.to_string()));
            };

            let changed = tx.execute(
                &format!("UPDATE links SET {column} = ?1 WHERE cidr = ?2 AND {column} IS NULL"),
                params![port_id, link.cidr],
            )?;
            if changed != 1 {
                return Err(StateStoreError::Invalid(format!(
                    "{column} of link {} was claimed concurrently",
                    link.cidr
                )));
            }

            info!(
                network_id = %network_id,
                port_id = %port_id,
                cidr = %link.cidr,
                ?side,
                "port allocated"
            );
            Ok(link.endpoint(side, port_id))
        })
    }

    /// Clear the end of the network's link held by `port_id`.
    pub fn release_port(&self, network_id: &str, port_id: &str) -> Result<(), StateStoreError> {
        self.store.immediate(|tx| {
            let (link, side) = find_port(tx, network_id, port_id)?;
            let column = match side {
                Side::Left => "left_port_id",
                Side::Right => "right_port_id",
            };
            tx.execute(
                &format!("UPDATE links SET {column} = NULL WHERE cidr = ?1"),
                params![link.cidr],
            )?;

            info!(
                network_id = %network_id,
                port_id = %port_id,
                cidr = %link.cidr,
                ?side,
                "port released"
            );
            Ok(())
        })
    }

    /// Endpoint held by `port_id` on the network's link.
    pub fn lookup_port(
        &self,
        network_id: &str,
        port_id: &str,
    ) -> Result<PortEndpoint, StateStoreError> {
        self.store.read(|conn| {
            let (link, side) = find_port(conn, network_id, port_id)?;
            Ok(link.endpoint(side, port_id))
        })
    }

    /// Link currently leased to `network_id`.
    pub fn link_for_network(&self, network_id: &str) -> Result<Option<Link>, StateStoreError> {
        self.store.read(|conn| find_by_network(conn, network_id))
    }

    /// Every claimed end of the network's link, left first.
    pub fn channels(&self, network_id: &str) -> Result<Vec<PortEndpoint>, StateStoreError> {
        let link = self.link_for_network(network_id)?.ok_or_else(|| {
            StateStoreError::LookupFailure(format!("no link leased to network {network_id}"))
        })?;

        let claims = [
            (Side::Left, link.left_port_id.as_deref()),
            (Side::Right, link.right_port_id.as_deref()),
        ];
        Ok(claims
            .into_iter()
            .filter_map(|(side, port_id)| port_id.map(|port_id| link.endpoint(side, port_id)))
            .collect())
    }

    /// Total and leased link counts.
    pub fn stats(&self) -> Result<PoolStats, StateStoreError> {
        self.store.read(|conn| {
            let (total, leased): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COUNT(network_id) FROM links",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(PoolStats {
                total: total as u64,
                leased: leased as u64,
            })
        })
    }
}

fn find_by_network(
    conn: &Connection,
    network_id: &str,
) -> Result<Option<Link>, StateStoreError> {
    conn.query_row(
        &format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE network_id = ?1 ORDER BY position LIMIT 1"
        ),
        params![network_id],
        Link::from_row,
    )
    .optional()
    .map_err(Into::into)
}

fn find_port(
    conn: &Connection,
    network_id: &str,
    port_id: &str,
) -> Result<(Link, Side), StateStoreError> {
    let link = conn
        .query_row(
            &format!(
                "SELECT {LINK_COLUMNS} FROM links
                 WHERE network_id = ?1 AND (left_port_id = ?2 OR right_port_id = ?2)"
            ),
            params![network_id, port_id],
            Link::from_row,
        )
        .optional()?
        .ok_or_else(|| {
            StateStoreError::LookupFailure(format!(
                "port {port_id} holds no end of network {network_id}"
            ))
        })?;

    // The query matched on one of the two columns, so a miss here means the
    // row changed shape underneath us.
    let side = link.side_of(port_id).ok_or_else(|| {
        StateStoreError::LookupFailure(format!(
            "port {port_id} matched link {} but holds neither end",
            link.cidr
        ))
    })?;
    Ok((link, side))
}
