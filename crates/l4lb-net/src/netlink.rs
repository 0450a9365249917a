//! Netlink socket operations for network configuration.
//!
//! This module provides a low-level interface to the Linux rtnetlink
//! subsystem for creating veth pairs, setting link state, assigning addresses,
//! installing link-scope routes and dumping the addresses and routes of a
//! link.
//!
//! A netlink socket is bound to the network namespace of the thread that
//! opened it. Open the handle after entering a namespace, never before.

use std::ffi::CString;
use std::io;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use ipnetwork::IpNetwork;

use crate::error::{NetError, Result};

// Netlink constants
const NETLINK_ROUTE: i32 = 0;

// Netlink message types
const NLMSG_ERROR: u16 = 2;
const NLMSG_DONE: u16 = 3;
const RTM_NEWLINK: u16 = 16;
const RTM_DELLINK: u16 = 17;
const RTM_NEWADDR: u16 = 20;
const RTM_GETADDR: u16 = 22;
const RTM_NEWROUTE: u16 = 24;
const RTM_GETROUTE: u16 = 26;

// Netlink flags
const NLM_F_REQUEST: u16 = 0x0001;
const NLM_F_ACK: u16 = 0x0004;
const NLM_F_EXCL: u16 = 0x0200;
const NLM_F_CREATE: u16 = 0x0400;
const NLM_F_DUMP: u16 = 0x0300;

const NLA_F_NESTED: u16 = 1 << 15;
const NLA_TYPE_MASK: u16 = !(NLA_F_NESTED | (1 << 14));

// Interface flags
const IFF_UP: u32 = 0x1;

// Attribute types for RTM_NEWLINK
const IFLA_IFNAME: u16 = 3;
const IFLA_MTU: u16 = 4;
const IFLA_LINKINFO: u16 = 18;
const IFLA_NET_NS_FD: u16 = 28;
const IFLA_INFO_KIND: u16 = 1;
const IFLA_INFO_DATA: u16 = 2;
const VETH_INFO_PEER: u16 = 1;

// Attribute types for RTM_NEWADDR
const IFA_ADDRESS: u16 = 1;
const IFA_LOCAL: u16 = 2;

// Attribute types for RTM_NEWROUTE
const RTA_DST: u16 = 1;
const RTA_OIF: u16 = 4;
const RTA_PREFSRC: u16 = 7;

// Route table and protocol constants
const RT_TABLE_MAIN: u8 = 254;
const RTPROT_BOOT: u8 = 3;
const RTN_UNICAST: u8 = 1;
const RT_SCOPE_LINK: u8 = 253;

/// Longest interface name the kernel accepts, excluding the terminator.
pub const MAX_IFNAME_LEN: usize = libc::IF_NAMESIZE - 1;

const RECV_BUF_SIZE: usize = 32 * 1024;

/// Netlink message header.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct NlMsgHdr {
    nlmsg_len: u32,
    nlmsg_type: u16,
    nlmsg_flags: u16,
    nlmsg_seq: u32,
    nlmsg_pid: u32,
}

/// Interface info message.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct IfInfoMsg {
    ifi_family: u8,
    _pad: u8,
    ifi_type: u16,
    ifi_index: i32,
    ifi_flags: u32,
    ifi_change: u32,
}

/// Interface address message.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct IfAddrMsg {
    ifa_family: u8,
    ifa_prefixlen: u8,
    ifa_flags: u8,
    ifa_scope: u8,
    ifa_index: u32,
}

/// Route message.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct RtMsg {
    rtm_family: u8,
    rtm_dst_len: u8,
    rtm_src_len: u8,
    rtm_tos: u8,
    rtm_table: u8,
    rtm_protocol: u8,
    rtm_scope: u8,
    rtm_type: u8,
    rtm_flags: u32,
}

/// Netlink attribute header.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct NlAttr {
    nla_len: u16,
    nla_type: u16,
}

/// A link-scope route in the main table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Destination network.
    pub destination: IpNetwork,
    /// Output interface index.
    pub ifindex: u32,
    /// Preferred source address.
    pub source: Option<IpAddr>,
}

impl Route {
    /// A route to `destination` directly through `ifindex`.
    #[must_use]
    pub const fn link_scoped(destination: IpNetwork, ifindex: u32) -> Self {
        Self {
            destination,
            ifindex,
            source: None,
        }
    }

    /// Sets the preferred source address.
    #[must_use]
    pub const fn with_source(mut self, source: IpAddr) -> Self {
        self.source = Some(source);
        self
    }
}

/// Veth pair configuration.
///
/// The pair is created in the namespace of the handle; the peer is moved
/// into `peer_netns` when given.
#[derive(Debug, Clone)]
pub struct VethConfig {
    /// Name of the endpoint that stays in the handle's namespace.
    pub name: String,
    /// Name of the peer endpoint.
    pub peer_name: String,
    /// MTU applied to both endpoints.
    pub mtu: Option<u16>,
    /// Namespace file descriptor the peer is created in.
    pub peer_netns: Option<RawFd>,
}

/// An address assigned to a link, as reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkAddress {
    /// Index of the link carrying the address.
    pub ifindex: u32,
    /// Address with its prefix length.
    pub address: IpNetwork,
}

/// Netlink socket handle for network configuration.
pub struct NetlinkHandle {
    /// Netlink socket file descriptor.
    fd: OwnedFd,
    /// Sequence number for netlink messages.
    seq: u32,
}

impl NetlinkHandle {
    /// Creates a new netlink socket in the calling thread's namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be created.
    pub fn new() -> Result<Self> {
        let fd = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                NETLINK_ROUTE,
            )
        };

        if fd < 0 {
            return Err(NetError::Netlink(format!(
                "failed to create netlink socket: {}",
                io::Error::last_os_error()
            )));
        }

        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        // SAFETY: sockaddr_nl is a plain C struct; all-zero is a valid value.
        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as u16;
        addr.nl_pid = 0; // Let kernel assign
        addr.nl_groups = 0;

        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                std::ptr::addr_of!(addr).cast::<libc::sockaddr>(),
                mem::size_of::<libc::sockaddr_nl>() as u32,
            )
        };

        if ret < 0 {
            return Err(NetError::Netlink(format!(
                "failed to bind netlink socket: {}",
                io::Error::last_os_error()
            )));
        }

        Ok(Self { fd, seq: 0 })
    }

    fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    fn send(&self, msg: &[u8]) -> Result<()> {
        let ret = unsafe {
            libc::send(
                self.fd.as_raw_fd(),
                msg.as_ptr().cast::<libc::c_void>(),
                msg.len(),
                0,
            )
        };

        if ret < 0 {
            return Err(NetError::Netlink(format!(
                "failed to send netlink message: {}",
                io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let len = unsafe {
            libc::recv(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr().cast::<libc::c_void>(),
                buf.len(),
                0,
            )
        };

        if len < 0 {
            return Err(NetError::Netlink(format!(
                "failed to receive netlink response: {}",
                io::Error::last_os_error()
            )));
        }

        #[allow(clippy::cast_sign_loss)]
        let len = len as usize;
        Ok(len)
    }

    /// Sends a request and waits for the kernel's acknowledgement.
    fn send_and_ack(&mut self, msg: &[u8]) -> Result<()> {
        self.send(msg)?;

        let mut buf = vec![0u8; RECV_BUF_SIZE];
        let len = self.recv(&mut buf)?;

        for (hdr, payload) in Messages::new(&buf[..len]) {
            if hdr.nlmsg_type == NLMSG_ERROR {
                check_error_payload(payload)?;
            }
        }

        Ok(())
    }

    /// Creates a veth pair.
    ///
    /// # Errors
    ///
    /// Returns an error if either name is invalid or the kernel rejects the
    /// request (for example when a link with the same name exists).
    pub fn create_veth(&mut self, config: &VethConfig) -> Result<u32> {
        validate_ifname(&config.name)?;
        validate_ifname(&config.peer_name)?;

        let seq = self.next_seq();
        self.send_and_ack(&veth_request(config, seq))?;

        self.get_ifindex(&config.name)
    }

    /// Deletes a network interface. Deleting one end of a veth pair deletes
    /// the peer along with every route bound to either end.
    ///
    /// # Errors
    ///
    /// Returns an error if the interface cannot be deleted.
    pub fn delete_link(&mut self, ifindex: u32) -> Result<()> {
        let seq = self.next_seq();

        let ifinfo = IfInfoMsg {
            ifi_family: libc::AF_UNSPEC as u8,
            ifi_index: ifindex_to_raw(ifindex),
            ..IfInfoMsg::default()
        };
        let mut msg = Message::new();
        msg.push_struct(&ifinfo);

        self.send_and_ack(&msg.finish(RTM_DELLINK, NLM_F_REQUEST | NLM_F_ACK, seq))
    }

    /// Sets interface state (up/down).
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be changed.
    pub fn set_link_state(&mut self, ifindex: u32, up: bool) -> Result<()> {
        let seq = self.next_seq();

        let ifinfo = IfInfoMsg {
            ifi_family: libc::AF_UNSPEC as u8,
            ifi_index: ifindex_to_raw(ifindex),
            ifi_flags: if up { IFF_UP } else { 0 },
            ifi_change: IFF_UP,
            ..IfInfoMsg::default()
        };
        let mut msg = Message::new();
        msg.push_struct(&ifinfo);

        self.send_and_ack(&msg.finish(RTM_NEWLINK, NLM_F_REQUEST | NLM_F_ACK, seq))
    }

    /// Adds an IP address to an interface.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be added.
    pub fn add_address(&mut self, ifindex: u32, addr: IpNetwork) -> Result<()> {
        let seq = self.next_seq();
        self.send_and_ack(&address_request(ifindex, addr, seq))
    }

    /// Lists the addresses assigned to `ifindex` for the given family
    /// (`libc::AF_INET`, `libc::AF_INET6` or `libc::AF_UNSPEC`).
    ///
    /// # Errors
    ///
    /// Returns an error if the dump fails.
    pub fn list_addresses(&mut self, ifindex: u32, family: i32) -> Result<Vec<IpNetwork>> {
        let seq = self.next_seq();

        let ifaddr = IfAddrMsg {
            ifa_family: u8::try_from(family)
                .map_err(|_| NetError::Config(format!("invalid address family {family}")))?,
            ifa_prefixlen: 0,
            ifa_flags: 0,
            ifa_scope: 0,
            ifa_index: 0,
        };
        let mut msg = Message::new();
        msg.push_struct(&ifaddr);
        self.send(&msg.finish(RTM_GETADDR, NLM_F_REQUEST | NLM_F_DUMP, seq))?;

        let mut addresses = Vec::new();
        let mut buf = vec![0u8; RECV_BUF_SIZE];
        loop {
            let len = self.recv(&mut buf)?;
            if len == 0 {
                return Ok(addresses);
            }
            for (hdr, payload) in Messages::new(&buf[..len]) {
                match hdr.nlmsg_type {
                    NLMSG_DONE => return Ok(addresses),
                    NLMSG_ERROR => check_error_payload(payload)?,
                    RTM_NEWADDR => {
                        if let Some(entry) = parse_address(payload) {
                            if entry.ifindex == ifindex {
                                addresses.push(entry.address);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    /// Adds a route.
    ///
    /// # Errors
    ///
    /// Returns an error if the route cannot be added.
    pub fn add_route(&mut self, route: &Route) -> Result<()> {
        let seq = self.next_seq();
        self.send_and_ack(&route_request(route, seq))
    }

    /// Lists the link-scope routes of the main table that leave through
    /// `ifindex`.
    ///
    /// # Errors
    ///
    /// Returns an error if the dump fails.
    pub fn list_routes(&mut self, ifindex: u32, family: i32) -> Result<Vec<Route>> {
        let seq = self.next_seq();

        let rtm = RtMsg {
            rtm_family: u8::try_from(family)
                .map_err(|_| NetError::Config(format!("invalid address family {family}")))?,
            rtm_dst_len: 0,
            rtm_src_len: 0,
            rtm_tos: 0,
            rtm_table: 0,
            rtm_protocol: 0,
            rtm_scope: 0,
            rtm_type: 0,
            rtm_flags: 0,
        };
        let mut msg = Message::new();
        msg.push_struct(&rtm);
        self.send(&msg.finish(RTM_GETROUTE, NLM_F_REQUEST | NLM_F_DUMP, seq))?;

        let mut routes = Vec::new();
        let mut buf = vec![0u8; RECV_BUF_SIZE];
        loop {
            let len = self.recv(&mut buf)?;
            if len == 0 {
                return Ok(routes);
            }
            for (hdr, payload) in Messages::new(&buf[..len]) {
                match hdr.nlmsg_type {
                    NLMSG_DONE => return Ok(routes),
                    NLMSG_ERROR => check_error_payload(payload)?,
                    RTM_NEWROUTE => {
                        if let Some(route) = parse_route(payload) {
                            if route.ifindex == ifindex {
                                routes.push(route);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    /// Gets interface index by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the interface is not found.
    pub fn get_ifindex(&self, name: &str) -> Result<u32> {
        self.find_ifindex(name)?
            .ok_or_else(|| NetError::Netlink(format!("interface not found: {name}")))
    }

    /// Gets interface index by name, `None` when no such interface exists in
    /// the calling thread's namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not a valid C string.
    pub fn find_ifindex(&self, name: &str) -> Result<Option<u32>> {
        let c_name = CString::new(name).map_err(|e| NetError::Config(e.to_string()))?;
        let ifindex = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
        Ok((ifindex != 0).then_some(ifindex))
    }
}

/// Rejects names the kernel would refuse.
///
/// # Errors
///
/// Returns an error if the name is empty, too long, or contains `/`,
/// whitespace or NUL.
pub fn validate_ifname(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_IFNAME_LEN {
        return Err(NetError::Config(format!(
            "interface name {name:?} must be 1-{MAX_IFNAME_LEN} bytes"
        )));
    }
    if name == "." || name == ".." {
        return Err(NetError::Config(format!("invalid interface name {name:?}")));
    }
    if name
        .chars()
        .any(|c| c == '/' || c == ':' || c == '\0' || c.is_whitespace())
    {
        return Err(NetError::Config(format!(
            "interface name {name:?} contains an invalid character"
        )));
    }
    Ok(())
}

#[allow(clippy::cast_possible_wrap)]
const fn ifindex_to_raw(ifindex: u32) -> i32 {
    ifindex as i32
}

const fn family_of(addr: &IpNetwork) -> u8 {
    match addr {
        IpNetwork::V4(_) => libc::AF_INET as u8,
        IpNetwork::V6(_) => libc::AF_INET6 as u8,
    }
}

fn ip_octets(ip: IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

/// Builds an RTM_NEWLINK request creating a veth pair.
fn veth_request(config: &VethConfig, seq: u32) -> Vec<u8> {
    let mut msg = Message::new();
    msg.push_struct(&IfInfoMsg {
        ifi_family: libc::AF_UNSPEC as u8,
        ..IfInfoMsg::default()
    });
    msg.attr_str(IFLA_IFNAME, &config.name);
    if let Some(mtu) = config.mtu {
        msg.attr_u32(IFLA_MTU, u32::from(mtu));
    }

    let linkinfo = msg.begin_nested(IFLA_LINKINFO | NLA_F_NESTED);
    msg.attr_str(IFLA_INFO_KIND, "veth");
    let data = msg.begin_nested(IFLA_INFO_DATA | NLA_F_NESTED);
    // The peer attribute carries its own ifinfomsg ahead of its attributes.
    let peer = msg.begin_nested(VETH_INFO_PEER);
    msg.push_struct(&IfInfoMsg {
        ifi_family: libc::AF_UNSPEC as u8,
        ..IfInfoMsg::default()
    });
    msg.attr_str(IFLA_IFNAME, &config.peer_name);
    if let Some(mtu) = config.mtu {
        msg.attr_u32(IFLA_MTU, u32::from(mtu));
    }
    if let Some(fd) = config.peer_netns {
        #[allow(clippy::cast_sign_loss)]
        msg.attr_u32(IFLA_NET_NS_FD, fd as u32);
    }
    msg.end_nested(peer);
    msg.end_nested(data);
    msg.end_nested(linkinfo);

    msg.finish(
        RTM_NEWLINK,
        NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
        seq,
    )
}

/// Builds an RTM_NEWADDR request. The prefix length is taken verbatim from
/// `addr`; the kernel derives the subnet route from it.
fn address_request(ifindex: u32, addr: IpNetwork, seq: u32) -> Vec<u8> {
    let mut msg = Message::new();
    msg.push_struct(&IfAddrMsg {
        ifa_family: family_of(&addr),
        ifa_prefixlen: addr.prefix(),
        ifa_flags: 0,
        ifa_scope: 0,
        ifa_index: ifindex,
    });
    let ip_bytes = ip_octets(addr.ip());
    msg.attr_bytes(IFA_LOCAL, &ip_bytes);
    msg.attr_bytes(IFA_ADDRESS, &ip_bytes);

    msg.finish(
        RTM_NEWADDR,
        NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
        seq,
    )
}

fn route_request(route: &Route, seq: u32) -> Vec<u8> {
    let mut msg = Message::new();
    msg.push_struct(&RtMsg {
        rtm_family: family_of(&route.destination),
        rtm_dst_len: route.destination.prefix(),
        rtm_src_len: 0,
        rtm_tos: 0,
        rtm_table: RT_TABLE_MAIN,
        rtm_protocol: RTPROT_BOOT,
        rtm_scope: RT_SCOPE_LINK,
        rtm_type: RTN_UNICAST,
        rtm_flags: 0,
    });

    if route.destination.prefix() > 0 {
        msg.attr_bytes(RTA_DST, &ip_octets(route.destination.network()));
    }
    if let Some(source) = route.source {
        msg.attr_bytes(RTA_PREFSRC, &ip_octets(source));
    }
    msg.attr_u32(RTA_OIF, route.ifindex);

    msg.finish(
        RTM_NEWROUTE,
        NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
        seq,
    )
}

/// Decodes the payload of an RTM_NEWROUTE message, skipping anything other
/// than a link-scope route of the main table.
fn parse_route(payload: &[u8]) -> Option<Route> {
    let rtm: RtMsg = read_struct(payload)?;
    if rtm.rtm_table != RT_TABLE_MAIN || rtm.rtm_scope != RT_SCOPE_LINK {
        return None;
    }

    let mut destination = None;
    let mut source = None;
    let mut ifindex = None;
    for (attr_type, value) in Attrs::new(payload.get(align(mem::size_of::<RtMsg>())..)?) {
        match attr_type {
            RTA_DST => destination = decode_ip(rtm.rtm_family, value),
            RTA_PREFSRC => source = decode_ip(rtm.rtm_family, value),
            RTA_OIF => {
                ifindex = value
                    .get(..4)
                    .and_then(|b| <[u8; 4]>::try_from(b).ok())
                    .map(u32::from_ne_bytes);
            }
            _ => {}
        }
    }

    let destination = match destination {
        Some(ip) => IpNetwork::new(ip, rtm.rtm_dst_len).ok()?,
        None if i32::from(rtm.rtm_family) == libc::AF_INET6 => {
            IpNetwork::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0).ok()?
        }
        None => IpNetwork::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0).ok()?,
    };
    Some(Route {
        destination,
        ifindex: ifindex?,
        source,
    })
}

/// Decodes the payload of an RTM_NEWADDR message.
fn parse_address(payload: &[u8]) -> Option<LinkAddress> {
    let hdr_len = mem::size_of::<IfAddrMsg>();
    if payload.len() < hdr_len {
        return None;
    }
    let ifaddr: IfAddrMsg = read_struct(payload)?;

    let mut local = None;
    let mut address = None;
    for (attr_type, value) in Attrs::new(&payload[align(hdr_len)..]) {
        match attr_type {
            IFA_LOCAL => local = decode_ip(ifaddr.ifa_family, value),
            IFA_ADDRESS => address = decode_ip(ifaddr.ifa_family, value),
            _ => {}
        }
    }

    // IFA_LOCAL is the interface's own address; IFA_ADDRESS is the peer on
    // point-to-point links.
    let ip = local.or(address)?;
    let address = IpNetwork::new(ip, ifaddr.ifa_prefixlen).ok()?;
    Some(LinkAddress {
        ifindex: ifaddr.ifa_index,
        address,
    })
}

fn decode_ip(family: u8, value: &[u8]) -> Option<IpAddr> {
    match i32::from(family) {
        libc::AF_INET => {
            let octets: [u8; 4] = value.get(..4)?.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        libc::AF_INET6 => {
            let octets: [u8; 16] = value.get(..16)?.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

/// Interprets an NLMSG_ERROR payload; a zero code is an acknowledgement.
fn check_error_payload(payload: &[u8]) -> Result<()> {
    let Some(code) = payload
        .get(..4)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .map(i32::from_ne_bytes)
    else {
        return Err(NetError::Netlink("truncated netlink error message".to_string()));
    };

    if code != 0 {
        return Err(NetError::Netlink(
            io::Error::from_raw_os_error(-code).to_string(),
        ));
    }
    Ok(())
}

const fn align(len: usize) -> usize {
    (len + 3) & !3
}

fn struct_bytes<T: Copy>(value: &T) -> &[u8] {
    unsafe { std::slice::from_raw_parts(std::ptr::from_ref(value).cast::<u8>(), mem::size_of::<T>()) }
}

fn read_struct<T: Copy>(buf: &[u8]) -> Option<T> {
    if buf.len() < mem::size_of::<T>() {
        return None;
    }
    Some(unsafe { std::ptr::read_unaligned(buf.as_ptr().cast::<T>()) })
}

/// Request builder. The header is filled in by [`Message::finish`].
struct Message {
    buf: Vec<u8>,
}

impl Message {
    fn new() -> Self {
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(&[0u8; mem::size_of::<NlMsgHdr>()]);
        Self { buf }
    }

    fn pad(&mut self) {
        let padded = align(self.buf.len());
        self.buf.resize(padded, 0);
    }

    fn push_struct<T: Copy>(&mut self, value: &T) {
        self.buf.extend_from_slice(struct_bytes(value));
        self.pad();
    }

    fn attr_bytes(&mut self, attr_type: u16, value: &[u8]) {
        let attr = NlAttr {
            nla_len: (mem::size_of::<NlAttr>() + value.len()) as u16,
            nla_type: attr_type,
        };
        self.buf.extend_from_slice(struct_bytes(&attr));
        self.buf.extend_from_slice(value);
        self.pad();
    }

    fn attr_str(&mut self, attr_type: u16, value: &str) {
        let mut bytes = Vec::with_capacity(value.len() + 1);
        bytes.extend_from_slice(value.as_bytes());
        bytes.push(0);
        self.attr_bytes(attr_type, &bytes);
    }

    fn attr_u32(&mut self, attr_type: u16, value: u32) {
        self.attr_bytes(attr_type, &value.to_ne_bytes());
    }

    fn begin_nested(&mut self, attr_type: u16) -> usize {
        let start = self.buf.len();
        let attr = NlAttr {
            nla_len: 0,
            nla_type: attr_type,
        };
        self.buf.extend_from_slice(struct_bytes(&attr));
        start
    }

    fn end_nested(&mut self, start: usize) {
        let len = (self.buf.len() - start) as u16;
        self.buf[start..start + 2].copy_from_slice(&len.to_ne_bytes());
    }

    fn finish(mut self, msg_type: u16, flags: u16, seq: u32) -> Vec<u8> {
        let hdr = NlMsgHdr {
            nlmsg_len: self.buf.len() as u32,
            nlmsg_type: msg_type,
            nlmsg_flags: flags,
            nlmsg_seq: seq,
            nlmsg_pid: 0,
        };
        self.buf[..mem::size_of::<NlMsgHdr>()].copy_from_slice(struct_bytes(&hdr));
        self.buf
    }
}

/// Iterator over the messages of a netlink datagram.
struct Messages<'a> {
    buf: &'a [u8],
}

impl<'a> Messages<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl<'a> Iterator for Messages<'a> {
    type Item = (NlMsgHdr, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let hdr_len = mem::size_of::<NlMsgHdr>();
        let hdr: NlMsgHdr = read_struct(self.buf)?;
        let len = hdr.nlmsg_len as usize;
        if len < hdr_len || len > self.buf.len() {
            self.buf = &[];
            return None;
        }
        let payload = &self.buf[hdr_len..len];
        self.buf = &self.buf[align(len).min(self.buf.len())..];
        Some((hdr, payload))
    }
}

/// Iterator over a run of netlink attributes.
struct Attrs<'a> {
    buf: &'a [u8],
}

impl<'a> Attrs<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl<'a> Iterator for Attrs<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let hdr_len = mem::size_of::<NlAttr>();
        let attr: NlAttr = read_struct(self.buf)?;
        let len = attr.nla_len as usize;
        if len < hdr_len || len > self.buf.len() {
            self.buf = &[];
            return None;
        }
        let value = &self.buf[hdr_len..len];
        self.buf = &self.buf[align(len).min(self.buf.len())..];
        Some((attr.nla_type & NLA_TYPE_MASK, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(msg: &[u8]) -> NlMsgHdr {
        read_struct(msg).unwrap()
    }

    #[test]
    fn test_veth_request_layout() {
        let config = VethConfig {
            name: "anycast0".to_string(),
            peer_name: "veth1a2b3c4d".to_string(),
            mtu: Some(1500),
            peer_netns: Some(7),
        };
        let msg = veth_request(&config, 42);

        let hdr = header(&msg);
        assert_eq!(hdr.nlmsg_len as usize, msg.len());
        assert_eq!(hdr.nlmsg_type, RTM_NEWLINK);
        assert_eq!(hdr.nlmsg_seq, 42);
        assert_ne!(hdr.nlmsg_flags & NLM_F_EXCL, 0);
        assert_eq!(msg.len() % 4, 0);

        let attrs_start = mem::size_of::<NlMsgHdr>() + mem::size_of::<IfInfoMsg>();
        let attrs: Vec<_> = Attrs::new(&msg[attrs_start..]).collect();
        assert_eq!(attrs[0], (IFLA_IFNAME, &b"anycast0\0"[..]));
        assert_eq!(attrs[1].0, IFLA_MTU);

        // IFLA_LINKINFO -> IFLA_INFO_DATA -> VETH_INFO_PEER
        let (kind, linkinfo) = attrs[2];
        assert_eq!(kind, IFLA_LINKINFO);
        let nested: Vec<_> = Attrs::new(linkinfo).collect();
        assert_eq!(nested[0], (IFLA_INFO_KIND, &b"veth\0"[..]));
        assert_eq!(nested[1].0, IFLA_INFO_DATA);

        let (peer_kind, peer) = Attrs::new(nested[1].1).next().unwrap();
        assert_eq!(peer_kind, VETH_INFO_PEER);
        let peer_attrs: Vec<_> = Attrs::new(&peer[mem::size_of::<IfInfoMsg>()..]).collect();
        assert_eq!(peer_attrs[0], (IFLA_IFNAME, &b"veth1a2b3c4d\0"[..]));
        assert_eq!(peer_attrs[2], (IFLA_NET_NS_FD, &7u32.to_ne_bytes()[..]));
    }

    #[test]
    fn test_address_request_keeps_prefix() {
        let addr: IpNetwork = "10.1.2.5/32".parse().unwrap();
        let msg = address_request(3, addr, 1);

        let ifaddr: IfAddrMsg = read_struct(&msg[mem::size_of::<NlMsgHdr>()..]).unwrap();
        assert_eq!(ifaddr.ifa_prefixlen, 32);
        assert_eq!(ifaddr.ifa_index, 3);
        assert_eq!(i32::from(ifaddr.ifa_family), libc::AF_INET);
    }

    #[test]
    fn test_route_request_link_scope_with_source() {
        let route = Route::link_scoped("198.51.100.1/32".parse().unwrap(), 5)
            .with_source("10.1.2.2".parse().unwrap());
        let msg = route_request(&route, 9);

        let rtm: RtMsg = read_struct(&msg[mem::size_of::<NlMsgHdr>()..]).unwrap();
        assert_eq!(rtm.rtm_scope, 253);
        assert_eq!(rtm.rtm_dst_len, 32);

        let attrs_start = mem::size_of::<NlMsgHdr>() + mem::size_of::<RtMsg>();
        let attrs: Vec<_> = Attrs::new(&msg[attrs_start..]).collect();
        assert!(attrs.contains(&(RTA_DST, &[198, 51, 100, 1][..])));
        assert!(attrs.contains(&(RTA_PREFSRC, &[10, 1, 2, 2][..])));
        assert!(attrs.contains(&(RTA_OIF, &5u32.to_ne_bytes()[..])));
    }

    #[test]
    fn test_parse_route_reads_back_request() {
        let route = Route::link_scoped("198.51.100.2/32".parse().unwrap(), 5)
            .with_source("10.1.2.2".parse().unwrap());
        let msg = route_request(&route, 1);

        let (hdr, payload) = Messages::new(&msg).next().unwrap();
        assert_eq!(hdr.nlmsg_type, RTM_NEWROUTE);
        assert_eq!(parse_route(payload), Some(route));
    }

    #[test]
    fn test_parse_route_skips_other_scopes() {
        let mut msg = Message::new();
        msg.push_struct(&RtMsg {
            rtm_family: libc::AF_INET as u8,
            rtm_dst_len: 0,
            rtm_src_len: 0,
            rtm_tos: 0,
            rtm_table: RT_TABLE_MAIN,
            rtm_protocol: RTPROT_BOOT,
            rtm_scope: 0,
            rtm_type: RTN_UNICAST,
            rtm_flags: 0,
        });
        msg.attr_u32(RTA_OIF, 5);
        let msg = msg.finish(RTM_NEWROUTE, 0, 0);

        let (_, payload) = Messages::new(&msg).next().unwrap();
        assert_eq!(parse_route(payload), None);
    }

    #[test]
    fn test_parse_address_prefers_local() {
        let mut msg = Message::new();
        msg.push_struct(&IfAddrMsg {
            ifa_family: libc::AF_INET as u8,
            ifa_prefixlen: 32,
            ifa_flags: 0,
            ifa_scope: 0,
            ifa_index: 4,
        });
        msg.attr_bytes(IFA_ADDRESS, &[10, 0, 0, 1]);
        msg.attr_bytes(IFA_LOCAL, &[10, 1, 2, 5]);
        let msg = msg.finish(RTM_NEWADDR, 0, 0);

        let (hdr, payload) = Messages::new(&msg).next().unwrap();
        assert_eq!(hdr.nlmsg_type, RTM_NEWADDR);
        let entry = parse_address(payload).unwrap();
        assert_eq!(entry.ifindex, 4);
        assert_eq!(entry.address, "10.1.2.5/32".parse::<IpNetwork>().unwrap());
    }

    #[test]
    fn test_error_payload() {
        assert!(check_error_payload(&0i32.to_ne_bytes()).is_ok());
        let err = check_error_payload(&(-libc::EEXIST).to_ne_bytes()).unwrap_err();
        assert!(err.to_string().contains("exists"));
        assert!(check_error_payload(&[0, 0]).is_err());
    }

    #[test]
    fn test_validate_ifname() {
        assert!(validate_ifname("eth0").is_ok());
        assert!(validate_ifname("anycast0").is_ok());
        assert!(validate_ifname("").is_err());
        assert!(validate_ifname("a-very-long-ifname").is_err());
        assert!(validate_ifname("eth/0").is_err());
        assert!(validate_ifname("..").is_err());
    }

    #[test]
    fn test_get_ifindex_loopback() {
        let handle = match NetlinkHandle::new() {
            Ok(handle) => handle,
            Err(e) => {
                eprintln!("Skipping test: netlink unavailable: {e}");
                return;
            }
        };
        let ifindex = handle.get_ifindex("lo").unwrap();
        assert!(ifindex > 0);
        assert_eq!(handle.find_ifindex("nonexistent0").unwrap(), None);
    }
}
