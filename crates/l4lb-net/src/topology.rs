//! Host network operations the attach/detach sequence depends on.

use std::net::Ipv4Addr;
use std::path::Path;

use ipnetwork::IpNetwork;

use crate::error::Result;
use crate::veth::WireRequest;
use crate::{sysctl, veth};

/// Network operations performed while attaching and detaching a container.
pub trait Topology {
    /// Enables IPv4 forwarding on the host.
    fn enable_forwarding(&self) -> Result<()>;

    /// Creates the veth pair and container-side routes, returning the
    /// host-side endpoint name.
    fn wire_container(&self, request: &WireRequest<'_>) -> Result<String>;

    /// Routes the container's address through the host-side endpoint.
    fn wire_host(&self, host_ifname: &str, address: Ipv4Addr) -> Result<()>;

    /// Removes the container-side endpoint, returning its addresses or
    /// `None` if it did not exist.
    fn unwire_container(&self, netns: &Path, ifname: &str) -> Result<Option<Vec<IpNetwork>>>;

    /// Returns the addresses of the container-side endpoint, or `None` if it
    /// does not exist.
    fn inspect_container(&self, netns: &Path, ifname: &str) -> Result<Option<Vec<IpNetwork>>>;
}

/// [`Topology`] backed by netlink and namespace switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxTopology;

impl Topology for LinuxTopology {
    fn enable_forwarding(&self) -> Result<()> {
        sysctl::enable_ipv4_forwarding()
    }

    fn wire_container(&self, request: &WireRequest<'_>) -> Result<String> {
        veth::wire_container(request)
    }

    fn wire_host(&self, host_ifname: &str, address: Ipv4Addr) -> Result<()> {
        veth::wire_host(host_ifname, address)
    }

    fn unwire_container(&self, netns: &Path, ifname: &str) -> Result<Option<Vec<IpNetwork>>> {
        veth::unwire_container(netns, ifname)
    }

    fn inspect_container(&self, netns: &Path, ifname: &str) -> Result<Option<Vec<IpNetwork>>> {
        veth::inspect_container(netns, ifname)
    }
}
