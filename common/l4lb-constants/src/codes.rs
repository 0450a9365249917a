//! CNI error codes. 0-99 are reserved by CNI, 100+ are ours.

pub const INCOMPATIBLE_VERSION: u32 = 1;
pub const INVALID_ENVIRONMENT: u32 = 4;
pub const IO_FAILURE: u32 = 5;
pub const DECODING_FAILURE: u32 = 6;
pub const INVALID_NETWORK_CONFIG: u32 = 7;

pub const DELEGATE_FAILURE: u32 = 100;
pub const IPAM_FAILURE: u32 = 101;
pub const TOPOLOGY_FAILURE: u32 = 102;
pub const CHECKPOINT_FAILURE: u32 = 103;
