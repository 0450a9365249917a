//! Point-to-point veth topology between a container and the host.
//!
//! IPAM hands out something like `10.1.2.5/24`. What the anycast network
//! needs is a point-to-point link, which veth cannot express, so the
//! container end is configured as `10.1.2.5/32`. With a /32 the kernel
//! installs no subnet route, so every anycast destination gets an explicit
//! link-scope route in the container, and the host gets one link-scope route
//! back to the container's address.

use std::net::{IpAddr, Ipv4Addr};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use ipnetwork::{IpNetwork, Ipv4Network};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{NetError, Result};
use crate::netlink::{validate_ifname, NetlinkHandle, Route, VethConfig};
use crate::netns::with_netns_path;

/// Everything needed to wire one container onto the anycast network.
#[derive(Debug, Clone, Copy)]
pub struct WireRequest<'a> {
    /// Path of the container's network namespace.
    pub netns: &'a Path,
    /// Name of the container-side endpoint.
    pub ifname: &'a str,
    /// MTU of both endpoints.
    pub mtu: u16,
    /// Address allocated by IPAM. Its prefix length is ignored.
    pub address: Ipv4Network,
    /// Destinations routed through the container-side endpoint.
    pub anycast: &'a [Ipv4Network],
}

/// Returns `address` with a /32 prefix.
#[must_use]
pub fn host_scoped(address: Ipv4Network) -> Ipv4Network {
    Ipv4Network::from(address.ip())
}

/// Generates a host-side veth name such as `veth1f0c9a2b`.
#[must_use]
pub fn random_veth_name() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}{}", l4lb_constants::net::VETH_PREFIX, &id[..8])
}

/// Creates the veth pair and the container-side topology.
///
/// Runs inside the container namespace: the pair is created there with the
/// peer placed in the caller's namespace, the container end is brought up,
/// given the allocated address as a /32, and a link-scope route with the
/// allocated address as source is added for every anycast destination.
///
/// Returns the generated name of the host-side endpoint. Nothing is cleaned
/// up on failure; detaching removes whatever was created.
///
/// # Errors
///
/// Returns an error naming the step that failed.
pub fn wire_container(request: &WireRequest<'_>) -> Result<String> {
    validate_ifname(request.ifname)?;

    with_netns_path(request.netns, |host_ns| {
        let mut netlink = NetlinkHandle::new()?;
        let host_ifname = random_veth_name();
        let ifname = request.ifname;

        let ifindex = netlink
            .create_veth(&VethConfig {
                name: ifname.to_string(),
                peer_name: host_ifname.clone(),
                mtu: Some(request.mtu),
                peer_netns: Some(host_ns.as_raw_fd()),
            })
            .map_err(|e| {
                NetError::Veth(format!("failed to create veth pair {ifname}/{host_ifname}: {e}"))
            })?;

        netlink
            .set_link_state(ifindex, true)
            .map_err(|e| NetError::Veth(format!("failed to set {ifname} up: {e}")))?;

        let address = host_scoped(request.address);
        netlink
            .add_address(ifindex, IpNetwork::V4(address))
            .map_err(|e| {
                NetError::Address(format!("failed to add address {address} to {ifname}: {e}"))
            })?;

        let source = IpAddr::V4(request.address.ip());
        for destination in request.anycast {
            let route =
                Route::link_scoped(IpNetwork::V4(*destination), ifindex).with_source(source);
            netlink.add_route(&route).map_err(|e| {
                NetError::Route(format!(
                    "failed to add anycast route {destination} via {ifname}: {e}"
                ))
            })?;
        }

        debug!(
            ifname,
            host_ifname = %host_ifname,
            %address,
            routes = request.anycast.len(),
            "container side of veth wired"
        );
        Ok(host_ifname)
    })
}

/// Brings the host-side endpoint up and routes the container's address
/// through it. Runs in the calling thread's namespace.
///
/// # Errors
///
/// Returns an error if the endpoint does not exist or the route cannot be
/// added.
pub fn wire_host(host_ifname: &str, address: Ipv4Addr) -> Result<()> {
    let mut netlink = NetlinkHandle::new()?;

    let ifindex = netlink
        .get_ifindex(host_ifname)
        .map_err(|e| NetError::Veth(format!("failed to lookup host veth {host_ifname}: {e}")))?;
    netlink
        .set_link_state(ifindex, true)
        .map_err(|e| NetError::Veth(format!("failed to set {host_ifname} up: {e}")))?;

    let destination = Ipv4Network::from(address);
    netlink
        .add_route(&Route::link_scoped(IpNetwork::V4(destination), ifindex))
        .map_err(|e| {
            NetError::Route(format!(
                "failed to add container route {destination} via {host_ifname}: {e}"
            ))
        })?;

    info!(host_ifname, %destination, "host side of veth wired");
    Ok(())
}

/// Deletes the container-side endpoint, which takes the host peer and every
/// route bound to either end with it.
///
/// Returns the IPv4 addresses the endpoint carried, or `None` when there was
/// no such interface.
///
/// # Errors
///
/// Returns an error if the namespace cannot be entered or the link cannot be
/// deleted.
pub fn unwire_container(netns: &Path, ifname: &str) -> Result<Option<Vec<IpNetwork>>> {
    with_netns_path(netns, |_| {
        let mut netlink = NetlinkHandle::new()?;
        let Some(ifindex) = netlink.find_ifindex(ifname)? else {
            return Ok(None);
        };

        let addresses = netlink.list_addresses(ifindex, libc::AF_INET)?;
        netlink
            .delete_link(ifindex)
            .map_err(|e| NetError::Veth(format!("failed to delete {ifname}: {e}")))?;

        debug!(ifname, ?addresses, "container side of veth removed");
        Ok(Some(addresses))
    })
}

/// Reports the IPv4 addresses of `ifname` in the container, or `None` when
/// the interface does not exist.
///
/// # Errors
///
/// Returns an error if the namespace cannot be entered or the dump fails.
pub fn inspect_container(netns: &Path, ifname: &str) -> Result<Option<Vec<IpNetwork>>> {
    with_netns_path(netns, |_| {
        let mut netlink = NetlinkHandle::new()?;
        match netlink.find_ifindex(ifname)? {
            Some(ifindex) => Ok(Some(netlink.list_addresses(ifindex, libc::AF_INET)?)),
            None => Ok(None),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_scoped_forces_32() {
        let allocated: Ipv4Network = "10.1.2.5/24".parse().unwrap();
        let scoped = host_scoped(allocated);
        assert_eq!(scoped.prefix(), 32);
        assert_eq!(scoped.ip(), allocated.ip());
        assert_eq!(scoped.to_string(), "10.1.2.5/32");
    }

    #[test]
    fn test_random_veth_name() {
        let a = random_veth_name();
        let b = random_veth_name();
        assert!(a.starts_with("veth"));
        assert_eq!(a.len(), 12);
        assert!(a.len() <= crate::netlink::MAX_IFNAME_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn test_wire_container_rejects_bad_ifname() {
        let anycast: [Ipv4Network; 0] = [];
        let request = WireRequest {
            netns: Path::new("/proc/self/ns/net"),
            ifname: "",
            mtu: 1500,
            address: "10.1.2.5/24".parse().unwrap(),
            anycast: &anycast,
        };
        assert!(matches!(wire_container(&request), Err(NetError::Config(_))));
    }
}
