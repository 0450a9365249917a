/// MTU used when the network configuration leaves `mtu` at zero.
pub const DEFAULT_MTU: u16 = 1500;

/// Prefix of generated host-side veth names.
pub const VETH_PREFIX: &str = "veth";

/// Sysctl controlling IPv4 forwarding.
pub const IPV4_FORWARD_SYSCTL: &str = "/proc/sys/net/ipv4/ip_forward";
