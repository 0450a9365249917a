//! # l4lb-net
//!
//! Linux network plumbing for the l4lb CNI plugin.
//!
//! - **Netlink**: a small rtnetlink client for links, veth pairs, addresses
//!   and routes
//! - **Namespaces**: network namespace handles and a scoped execution
//!   context that runs a closure inside a namespace on a dedicated thread
//! - **Veth**: the point-to-point topology between a container and the host
//!   used to reach the anycast service addresses
//! - **Sysctl**: IPv4 forwarding
//!
//! ```text
//!  container netns                     host netns
//! ┌───────────────────────────┐       ┌───────────────────────────┐
//! │ anycast0   10.1.2.5/32    │ veth  │ vethXXXXXXXX              │
//! │                           │◄─────►│                           │
//! │ 198.51.100.x/32 scope link│       │ 10.1.2.5/32 scope link    │
//! │   src 10.1.2.5            │       │                           │
//! └───────────────────────────┘       └───────────────────────────┘
//! ```

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod netlink;
pub mod netns;
pub mod sysctl;
pub mod topology;
pub mod veth;

pub use error::{NetError, Result};
pub use netns::{with_netns_path, NetNs};
pub use topology::{LinuxTopology, Topology};
pub use veth::WireRequest;
