//! Error types for the network plumbing.

use thiserror::Error;

/// Result type alias for network operations.
pub type Result<T> = std::result::Result<T, NetError>;

/// Errors that can occur while configuring links, addresses, routes and
/// namespaces.
#[derive(Debug, Error)]
pub enum NetError {
    /// Netlink error.
    #[error("netlink error: {0}")]
    Netlink(String),

    /// Network namespace error.
    #[error("namespace error: {0}")]
    Namespace(String),

    /// Veth pair error.
    #[error("veth error: {0}")]
    Veth(String),

    /// Address assignment error.
    #[error("address error: {0}")]
    Address(String),

    /// Route installation error.
    #[error("route error: {0}")]
    Route(String),

    /// Sysctl error.
    #[error("sysctl error: {0}")]
    Sysctl(String),

    /// Invalid argument supplied by the caller.
    #[error("configuration error: {0}")]
    Config(String),
}
