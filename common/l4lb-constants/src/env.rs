/// CNI invocation variables.
pub const CNI_COMMAND: &str = "CNI_COMMAND";
pub const CNI_CONTAINERID: &str = "CNI_CONTAINERID";
pub const CNI_NETNS: &str = "CNI_NETNS";
pub const CNI_IFNAME: &str = "CNI_IFNAME";
pub const CNI_ARGS: &str = "CNI_ARGS";
pub const CNI_PATH: &str = "CNI_PATH";

/// Log filter for the plugin process.
pub const LOG_LEVEL: &str = "L4LB_LOG_LEVEL";

/// Optional log file for the plugin process.
pub const LOG_FILE: &str = "L4LB_LOG_FILE";

/// Prefix for settings read through the environment.
pub const SETTINGS_PREFIX: &str = "L4LB_";
