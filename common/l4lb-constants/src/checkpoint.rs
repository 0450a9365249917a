/// Directory an external load balancer watches for container registrations.
pub const DEFAULT_PATH: &str = "/var/run/l4lb/cni";

/// Permission bits of the checkpoint directory.
pub const DIR_MODE: u32 = 0o755;

/// Permission bits of each checkpoint file.
pub const FILE_MODE: u32 = 0o644;
