//! The shared anycast network.
//!
//! Every container gets an `anycast0` veth endpoint with an address from
//! the anycast network's own IPAM pool and a link route to each anycast
//! service address. The load balancer answers on those addresses.

use std::net::Ipv4Addr;

use ipnetwork::{IpNetwork, Ipv4Network};
use l4lb_constants::anycast::{
    ADDRESSES, IF_NAME, IPAM_SUBNET, IPAM_TYPE, NETWORK_CNI_VERSION, NETWORK_NAME,
};
use l4lb_net::{NetError, Topology, WireRequest};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{CniError, Result, Stage};
use crate::ipam::{self, IpamConfig};
use crate::plugin::Outcome;
use crate::request::AttachRequest;

/// The anycast service addresses.
#[must_use]
pub fn addresses() -> Vec<Ipv4Network> {
    ADDRESSES
        .iter()
        .filter_map(|&(octets, prefix)| Ipv4Network::new(Ipv4Addr::from(octets), prefix).ok())
        .collect()
}

/// Network configuration handed to the anycast network's IPAM plugin.
#[must_use]
pub fn network_config() -> Value {
    json!({
        "cniVersion": NETWORK_CNI_VERSION,
        "name": NETWORK_NAME,
        "ipam": {
            "type": IPAM_TYPE,
            "subnet": IPAM_SUBNET,
        },
    })
}

/// Installs and removes a container's anycast endpoint.
#[derive(Debug)]
pub struct AnycastNetwork<'a, T> {
    topology: &'a T,
    ipam: IpamConfig,
}

impl<'a, T: Topology> AnycastNetwork<'a, T> {
    /// Creates the collaborator for the built-in anycast network.
    ///
    /// # Errors
    ///
    /// Returns an error if the IPAM configuration cannot be prepared.
    pub fn new(topology: &'a T) -> Result<Self> {
        Ok(Self {
            topology,
            ipam: IpamConfig::from_network(&network_config())?,
        })
    }

    /// Allocates an address, wires the veth and adds the host route.
    ///
    /// Returns the address as IPAM allocated it. Errors carry the stage that
    /// failed. Nothing is undone here on failure; [`Self::remove`] cleans up
    /// whatever was created.
    ///
    /// # Errors
    ///
    /// Returns the first failing stage.
    pub fn install(&self, request: &AttachRequest, mtu: u16) -> Result<Ipv4Network> {
        let request = anycast_request(request);

        let allocated = self
            .ipam
            .allocate(&request)
            .and_then(|addresses| ipam::single_ipv4(&addresses))
            .map_err(|e| e.at(Stage::IpamAllocate))?;

        let anycast = addresses();
        let host_ifname = self
            .topology
            .wire_container(&WireRequest {
                netns: request.netns(),
                ifname: IF_NAME,
                mtu,
                address: allocated,
                anycast: &anycast,
            })
            .map_err(|e| CniError::from(e).at(Stage::VethWire))?;

        self.topology
            .wire_host(&host_ifname, allocated.ip())
            .map_err(|e| CniError::from(e).at(Stage::HostRoute))?;

        info!(
            container_id = %request.container_id,
            address = %allocated.ip(),
            host_ifname = %host_ifname,
            "anycast network attached"
        );
        Ok(allocated)
    }

    /// Releases the address and deletes the container endpoint.
    ///
    /// Every step runs regardless of the others and failures are reported
    /// rather than returned. A missing namespace path skips the endpoint
    /// removal.
    pub fn remove(&self, request: &AttachRequest) -> Vec<(Stage, Outcome)> {
        let request = anycast_request(request);
        let mut steps = Vec::with_capacity(2);

        let release = match self.ipam.release(&request) {
            Ok(()) => Outcome::Done,
            Err(e) => Outcome::Degraded(e),
        };
        steps.push((Stage::IpamRelease, release));

        let unwire = if request.has_netns() {
            match self.topology.unwire_container(request.netns(), IF_NAME) {
                Ok(Some(addresses)) => {
                    debug!(?addresses, "anycast endpoint removed");
                    Outcome::Done
                }
                Ok(None) => {
                    debug!(netns = %request.netns().display(), "no anycast endpoint to remove");
                    Outcome::Skipped
                }
                Err(e) => Outcome::Degraded(e.into()),
            }
        } else {
            Outcome::Skipped
        };
        steps.push((Stage::VethRemove, unwire));

        steps
    }

    /// Confirms the container endpoint exists with a single /32 address.
    ///
    /// # Errors
    ///
    /// Returns a topology error describing the mismatch.
    pub fn check(&self, request: &AttachRequest) -> Result<()> {
        let found = self.topology.inspect_container(request.netns(), IF_NAME)?;
        match found.as_deref() {
            Some([IpNetwork::V4(address)]) if address.prefix() == 32 => Ok(()),
            Some(addresses) => {
                warn!(?addresses, "unexpected anycast endpoint addresses");
                Err(NetError::Address(format!(
                    "expected a single /32 address on {IF_NAME}, found {addresses:?}"
                ))
                .into())
            }
            None => Err(NetError::Veth(format!(
                "{IF_NAME} missing in {}",
                request.netns().display()
            ))
            .into()),
        }
    }
}

/// The request as seen by the anycast network: same container, but the
/// anycast interface instead of the primary one.
fn anycast_request(request: &AttachRequest) -> AttachRequest {
    AttachRequest {
        ifname: IF_NAME.to_string(),
        config: Vec::new(),
        ..request.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addresses() {
        let addresses = addresses();
        assert_eq!(addresses.len(), 3);
        assert!(addresses.iter().all(|a| a.prefix() == 32));
        assert_eq!(addresses[0].to_string(), "198.51.100.1/32");
    }

    #[test]
    fn test_network_config() {
        let conf = network_config();
        assert_eq!(conf["name"], "anycast-network");
        assert_eq!(conf["ipam"]["type"], "host-local");
        assert!(IpamConfig::from_network(&conf).is_ok());
    }
}
