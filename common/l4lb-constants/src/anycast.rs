/// Interface name of the anycast network endpoint inside every container.
pub const IF_NAME: &str = "anycast0";

/// Anycast service addresses, as `(octets, prefix_len)`, routed through the
/// anycast interface.
pub const ADDRESSES: [([u8; 4], u8); 3] = [
    ([198, 51, 100, 1], 32),
    ([198, 51, 100, 2], 32),
    ([198, 51, 100, 3], 32),
];

/// Name of the network handed to IPAM when allocating anycast endpoints.
pub const NETWORK_NAME: &str = "anycast-network";

/// CNI version used for the anycast network IPAM exchange.
pub const NETWORK_CNI_VERSION: &str = "0.3.1";

/// IPAM plugin serving the anycast network.
pub const IPAM_TYPE: &str = "host-local";

/// Subnet the anycast endpoints are allocated from.
pub const IPAM_SUBNET: &str = "172.31.254.0/24";
