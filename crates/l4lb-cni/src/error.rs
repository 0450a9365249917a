//! Error types for the CNI plugin.

use std::fmt;

use l4lb_constants::codes;
use l4lb_net::NetError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for plugin operations.
pub type Result<T> = std::result::Result<T, CniError>;

/// A step of the attach or detach sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ParseConfig,
    EnableForwarding,
    DelegateAdd,
    IpamAllocate,
    VethWire,
    HostRoute,
    Checkpoint,
    IpamRelease,
    VethRemove,
    CheckpointRemove,
    DelegateDel,
    DelegateCheck,
    AnycastCheck,
    CheckpointCheck,
}

impl Stage {
    /// Stable name used in logs and error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ParseConfig => "parse-config",
            Self::EnableForwarding => "enable-forwarding",
            Self::DelegateAdd => "delegate-add",
            Self::IpamAllocate => "ipam-allocate",
            Self::VethWire => "veth-wire",
            Self::HostRoute => "host-route",
            Self::Checkpoint => "checkpoint",
            Self::IpamRelease => "ipam-release",
            Self::VethRemove => "veth-remove",
            Self::CheckpointRemove => "checkpoint-remove",
            Self::DelegateDel => "delegate-del",
            Self::DelegateCheck => "delegate-check",
            Self::AnycastCheck => "anycast-check",
            Self::CheckpointCheck => "checkpoint-check",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Coarse error classes deciding how a failure is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing configuration, environment or input.
    Configuration,
    /// The delegate plugin failed or returned garbage.
    Delegate,
    /// The IPAM plugin failed.
    Ipam,
    /// A veth, route, namespace or sysctl operation failed.
    Topology,
    /// A checkpoint file operation failed.
    Checkpoint,
    /// Reading input or writing output failed.
    Io,
}

/// Errors that can occur while attaching or detaching a container.
#[derive(Debug, Error)]
pub enum CniError {
    /// Invalid network configuration.
    #[error("invalid network configuration: {0}")]
    Config(String),

    /// Missing or invalid CNI_* environment variable.
    #[error("invalid environment: {0}")]
    Env(String),

    /// Input that is not valid JSON for the expected document.
    #[error("failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Unsupported `cniVersion`.
    #[error("incompatible CNI version {0}")]
    IncompatibleVersion(String),

    /// The delegate plugin failed.
    #[error("delegate plugin {plugin}: {message}")]
    Delegate {
        plugin: String,
        code: Option<u32>,
        message: String,
    },

    /// The IPAM plugin failed.
    #[error("IPAM plugin {plugin}: {message}")]
    Ipam { plugin: String, message: String },

    /// Network topology error.
    #[error(transparent)]
    Topology(#[from] NetError),

    /// Checkpoint store error.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure of one step of a sequence.
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<CniError>,
    },
}

impl CniError {
    /// Wraps this error with the stage it happened in.
    #[must_use]
    pub fn at(self, stage: Stage) -> Self {
        Self::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// Classifies this error, looking through stage wrappers.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::Env(_) | Self::Decode { .. } | Self::IncompatibleVersion(_) => {
                ErrorKind::Configuration
            }
            Self::Delegate { .. } => ErrorKind::Delegate,
            Self::Ipam { .. } => ErrorKind::Ipam,
            Self::Topology(NetError::Config(_)) => ErrorKind::Configuration,
            Self::Topology(_) => ErrorKind::Topology,
            Self::Checkpoint(_) => ErrorKind::Checkpoint,
            Self::Io(_) => ErrorKind::Io,
            Self::Stage { source, .. } => source.kind(),
        }
    }

    /// The stage this error was raised in, if it was wrapped with one.
    #[must_use]
    pub const fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// CNI error code reported to the runtime.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::Config(_) | Self::Topology(NetError::Config(_)) => codes::INVALID_NETWORK_CONFIG,
            Self::Env(_) => codes::INVALID_ENVIRONMENT,
            Self::Decode { .. } => codes::DECODING_FAILURE,
            Self::IncompatibleVersion(_) => codes::INCOMPATIBLE_VERSION,
            Self::Delegate { code, .. } => code.unwrap_or(codes::DELEGATE_FAILURE),
            Self::Ipam { .. } => codes::IPAM_FAILURE,
            Self::Topology(_) => codes::TOPOLOGY_FAILURE,
            Self::Checkpoint(_) => codes::CHECKPOINT_FAILURE,
            Self::Io(_) => codes::IO_FAILURE,
            Self::Stage { source, .. } => source.code(),
        }
    }

    /// Renders this error as the CNI error document.
    #[must_use]
    pub fn to_document(&self, cni_version: &str) -> ErrorDocument {
        let details = match self {
            Self::Stage { source, .. } => source.to_string(),
            _ => String::new(),
        };
        ErrorDocument {
            cni_version: cni_version.to_string(),
            code: self.code(),
            msg: self.to_string(),
            details,
        }
    }
}

/// The error document a CNI plugin prints on stdout when it fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDocument {
    #[serde(rename = "cniVersion", default)]
    pub cni_version: String,
    pub code: u32,
    pub msg: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}
