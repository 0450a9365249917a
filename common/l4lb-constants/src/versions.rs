/// CNI versions accepted in `cniVersion` and reported by `VERSION`.
pub const SUPPORTED: [&str; 6] = ["0.1.0", "0.2.0", "0.3.0", "0.3.1", "0.4.0", "1.0.0"];

/// Version reported in `VERSION` output and in error documents when the
/// configuration could not be read.
pub const LATEST: &str = "1.0.0";

/// First version that knows the `CHECK` command.
pub const CHECK_MIN: &str = "0.4.0";
