//! Virtual network service.
//!
//! Sequences the link pool and the attribute store for network and port
//! lifecycle. A network owns exactly one link; a port owns one end of it plus
//! its attributes.

use tracing::{info, warn};

use crate::state::{
    Link, LinkPool, PortAttributeStore, PortAttributes, PortEndpoint, StateStoreError,
};

/// Network and port lifecycle on top of the link pool.
#[derive(Clone)]
pub struct NetworkService {
    links: LinkPool,
    attributes: PortAttributeStore,
}

impl NetworkService {
    pub fn new(links: LinkPool, attributes: PortAttributeStore) -> Self {
        Self { links, attributes }
    }

    /// Lease a link for a new network.
    pub fn create_network(&self, network_id: &str) -> Result<Link, StateStoreError> {
        let link = self.links.allocate_link(network_id)?;
        info!(network_id = %network_id, cidr = %link.cidr, "network created");
        Ok(link)
    }

    /// Claim a link end for `port_id` and store its attributes.
    ///
    /// If the attributes cannot be stored the claim is released again.
    pub fn attach_port(
        &self,
        network_id: &str,
        port_id: &str,
        attributes: &PortAttributes,
    ) -> Result<PortEndpoint, StateStoreError> {
        let endpoint = self.links.allocate_port(network_id, port_id)?;

        if let Err(e) = self.attributes.set_attributes(port_id, attributes) {
            if let Err(rollback) = self.links.release_port(network_id, port_id) {
                warn!(
                    network_id = %network_id,
                    port_id = %port_id,
                    error = %rollback,
                    "failed to roll back port claim"
                );
            }
            return Err(e);
        }

        info!(
            network_id = %network_id,
            port_id = %port_id,
            local = %endpoint.local_address,
            "port attached"
        );
        Ok(endpoint)
    }

    /// Release the link end held by `port_id`.
    pub fn detach_port(&self, network_id: &str, port_id: &str) -> Result<(), StateStoreError> {
        self.links.release_port(network_id, port_id)?;
        info!(network_id = %network_id, port_id = %port_id, "port detached");
        Ok(())
    }

    /// Return the network's link to the pool.
    pub fn delete_network(&self, network_id: &str) -> Result<Link, StateStoreError> {
        let link = self.links.release_link(network_id)?;
        info!(network_id = %network_id, cidr = %link.cidr, "network deleted");
        Ok(link)
    }

    pub fn attributes(&self, port_id: &str) -> Result<PortAttributes, StateStoreError> {
        self.attributes.get_attributes(port_id)
    }
}
