//! Networking utilities for the lab wiring agent.
//!
//! This library provides pure helpers for:
//! - IPv4 address blocks (parsing, masking, containment)
//! - Inclusive UDP/TCP port ranges
//! - Carving an address block into point-to-point tunnel links
//! - Interface alias labels
//!
//! Nothing in here touches the host; the agent owns all I/O.

use std::net::Ipv4Addr;
use std::str::FromStr;

use thiserror::Error;

/// Networking errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetworkError {
    /// Invalid IP address.
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    /// Invalid CIDR prefix.
    #[error("invalid CIDR prefix: {0}")]
    InvalidPrefix(String),

    /// Invalid port range.
    #[error("invalid port range: {0}")]
    InvalidPortRange(String),
}

// ============================================================================
// Address blocks
// ============================================================================

/// Prefix length of a single link: four addresses, two of them usable hosts.
pub const LINK_PREFIX_LEN: u8 = 30;

/// IPv4 address block in CIDR form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Block {
    /// Base (network) address of the block.
    pub address: Ipv4Addr,

    /// Prefix length (e.g., 24 for /24).
    pub prefix_len: u8,
}

impl Ipv4Block {
    /// Create a new block, masking the address down to the prefix.
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self, NetworkError> {
        if prefix_len > 32 {
            return Err(NetworkError::InvalidPrefix(format!(
                "prefix length {} exceeds 32",
                prefix_len
            )));
        }

        Ok(Self {
            address: mask_ipv4(address, prefix_len),
            prefix_len,
        })
    }

    /// Parse from CIDR notation (e.g., "10.0.0.0/24").
    pub fn from_cidr(s: &str) -> Result<Self, NetworkError> {
        let Some((addr_str, prefix_str)) = s.trim().split_once('/') else {
            return Err(NetworkError::InvalidPrefix(format!(
                "missing '/' in CIDR: {}",
                s
            )));
        };

        let address = Ipv4Addr::from_str(addr_str)
            .map_err(|_| NetworkError::InvalidAddress(addr_str.to_string()))?;

        let prefix_len = prefix_str
            .parse::<u8>()
            .map_err(|_| NetworkError::InvalidPrefix(prefix_str.to_string()))?;

        Self::new(address, prefix_len)
    }

    /// Check if an address is within this block.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        mask_ipv4(addr, self.prefix_len) == self.address
    }

    /// Number of addresses in this block.
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix_len))
    }

    /// Split the block into consecutive sub-blocks of `prefix_len`.
    ///
    /// Returns an empty iterator when the requested prefix is shorter than
    /// the block's own.
    pub fn subnets(&self, prefix_len: u8) -> impl Iterator<Item = Ipv4Block> {
        let base = u32::from(self.address);
        let (count, step) = if prefix_len < self.prefix_len || prefix_len > 32 {
            (0u64, 0u64)
        } else {
            (
                1u64 << (prefix_len - self.prefix_len),
                1u64 << (32 - u32::from(prefix_len)),
            )
        };

        (0..count).map(move |i| Ipv4Block {
            // Offsets stay below 2^32 because count * step == self.size().
            address: Ipv4Addr::from(base.wrapping_add((i * step) as u32)),
            prefix_len,
        })
    }

    /// Address at `offset` from the base of the block.
    pub fn nth(&self, offset: u32) -> Option<Ipv4Addr> {
        if u64::from(offset) >= self.size() {
            return None;
        }
        Some(Ipv4Addr::from(u32::from(self.address).wrapping_add(offset)))
    }
}

impl std::fmt::Display for Ipv4Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for Ipv4Block {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_cidr(s)
    }
}

/// Mask an IPv4 address to a prefix length.
fn mask_ipv4(addr: Ipv4Addr, prefix_len: u8) -> Ipv4Addr {
    let bits = u32::from(addr);
    let mask = if prefix_len == 0 {
        0
    } else if prefix_len >= 32 {
        u32::MAX
    } else {
        u32::MAX << (32 - u32::from(prefix_len))
    };
    Ipv4Addr::from(bits & mask)
}

// ============================================================================
// Port ranges
// ============================================================================

/// Inclusive range of ports, written as `start-end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    /// Create a range; `start` must not exceed `end`.
    pub fn new(start: u16, end: u16) -> Result<Self, NetworkError> {
        if start > end {
            return Err(NetworkError::InvalidPortRange(format!("{}-{}", start, end)));
        }
        Ok(Self { start, end })
    }

    /// Number of ports in the range.
    pub fn len(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    /// A valid range is never empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Check if a port is within the range.
    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    /// Iterate the ports in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl FromStr for PortRange {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((start, end)) = s.trim().split_once('-') else {
            return Err(NetworkError::InvalidPortRange(s.to_string()));
        };
        let start = start
            .trim()
            .parse::<u16>()
            .map_err(|_| NetworkError::InvalidPortRange(s.to_string()))?;
        let end = end
            .trim()
            .parse::<u16>()
            .map_err(|_| NetworkError::InvalidPortRange(s.to_string()))?;
        Self::new(start, end)
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

// ============================================================================
// Link carving
// ============================================================================

/// One point-to-point link carved out of an address block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPlan {
    /// The /30 sub-block, e.g. `10.0.0.4/30`.
    pub cidr: Ipv4Block,
    /// First usable host address.
    pub left_address: Ipv4Addr,
    /// Second usable host address.
    pub right_address: Ipv4Addr,
    /// UDP control port reserved for the left end.
    pub left_control_port: u16,
    /// UDP control port reserved for the right end.
    pub right_control_port: u16,
}

/// Partition `block` into /30 links and pair each with two control ports.
///
/// Links come out in ascending address order; the i-th link gets ports
/// `start + 2i` and `start + 2i + 1`. Carving stops at whichever runs out
/// first, the address block or the port range.
///
/// | block         | ports       | link 0                        | link 1                        |
/// |---------------|-------------|-------------------------------|-------------------------------|
/// | `10.0.0.0/24` | 20000-20010 | `.1`/`.2`, 20000/20001        | `.5`/`.6`, 20002/20003        |
pub fn carve_links(block: Ipv4Block, ports: PortRange) -> Vec<LinkPlan> {
    let port_pairs = ports.len() / 2;

    block
        .subnets(LINK_PREFIX_LEN)
        .zip(0..port_pairs)
        .filter_map(|(cidr, i)| {
            let left_control_port = ports.start.checked_add(u16::try_from(i * 2).ok()?)?;
            Some(LinkPlan {
                left_address: cidr.nth(1)?,
                right_address: cidr.nth(2)?,
                left_control_port,
                right_control_port: left_control_port.checked_add(1)?,
                cidr,
            })
        })
        .collect()
}

// ============================================================================
// Interface aliases
// ============================================================================

/// Kernel limit on interface label length (IFNAMSIZ - 1).
pub const MAX_LABEL_LEN: usize = 15;

/// Derive the alias label for `addr` on `iface`.
///
/// Labels look like `eth0:0a000001` (the address in hex). Interfaces with long
/// names fall back to the low two octets, which still identify a link inside a
/// /16. Returns `None` when even that does not fit.
pub fn alias_label(iface: &str, addr: Ipv4Addr) -> Option<String> {
    let bits = u32::from(addr);
    let full = format!("{}:{:08x}", iface, bits);
    if full.len() <= MAX_LABEL_LEN {
        return Some(full);
    }

    let short = format!("{}:{:04x}", iface, bits & 0xffff);
    (short.len() <= MAX_LABEL_LEN).then_some(short)
}
