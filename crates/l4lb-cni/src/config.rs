//! Network configuration read from the plugin's stdin.
//!
//! ```json
//! {
//!   "cniVersion": "0.3.1",
//!   "name": "l4lb-net",
//!   "type": "l4lb",
//!   "mtu": 1420,
//!   "anycast": true,
//!   "checkpoint": { "path": "/var/run/l4lb/cni" },
//!   "delegate": {
//!     "type": "bridge",
//!     "bridge": "cni0",
//!     "ipam": { "type": "host-local", "subnet": "10.1.2.0/24" }
//!   }
//! }
//! ```

use std::path::PathBuf;

use l4lb_constants::{checkpoint, net, versions};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::error::{CniError, Result};

/// The network configuration of one ADD, DEL or CHECK invocation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    /// CNI version of the configuration.
    pub cni_version: String,
    /// Network name.
    pub name: String,
    /// Name of this plugin, as the runtime resolved it.
    #[serde(default, rename = "type")]
    pub plugin_type: Option<String>,
    /// Free-form arguments, forwarded to the delegate.
    #[serde(default, deserialize_with = "null_as_default")]
    pub args: Map<String, Value>,
    /// MTU of the anycast veth; zero selects the default.
    #[serde(default, deserialize_with = "null_as_default")]
    pub mtu: u32,
    /// Configuration of the delegate plugin, forwarded mostly untouched.
    #[serde(default)]
    pub delegate: Option<Map<String, Value>>,
    /// Anycast sub-network toggle.
    #[serde(default, deserialize_with = "null_as_default")]
    pub anycast: AnycastToggle,
    /// Checkpoint sub-network settings.
    #[serde(default, deserialize_with = "null_as_default")]
    pub checkpoint: CheckpointConfig,
}

/// `"anycast": true` or `"anycast": { "enable": true }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AnycastToggle {
    Flag(bool),
    Settings {
        #[serde(default = "enabled_by_default")]
        enable: bool,
    },
}

impl Default for AnycastToggle {
    fn default() -> Self {
        Self::Flag(true)
    }
}

impl AnycastToggle {
    /// Whether the anycast network is attached.
    #[must_use]
    pub const fn enabled(self) -> bool {
        match self {
            Self::Flag(enable) | Self::Settings { enable } => enable,
        }
    }
}

/// Where and whether the container's namespace is registered for the load
/// balancer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckpointConfig {
    /// Whether registration happens on ADD.
    #[serde(default = "enabled_by_default")]
    pub enable: bool,
    /// Registration directory. Omitted selects the default; an explicit
    /// empty string is a configuration error.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enable: true,
            path: None,
        }
    }
}

impl CheckpointConfig {
    /// The registration directory.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` was given but is empty.
    pub fn dir(&self) -> Result<PathBuf> {
        match &self.path {
            None => Ok(PathBuf::from(checkpoint::DEFAULT_PATH)),
            Some(path) if path.as_os_str().is_empty() => Err(CniError::Config(
                "checkpoint path must not be empty".to_string(),
            )),
            Some(path) => Ok(path.clone()),
        }
    }
}

const fn enabled_by_default() -> bool {
    true
}

/// An explicit `null` leaves the field at its default.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl NetworkConfig {
    /// Parses and validates a configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON for this schema,
    /// names an unsupported CNI version, or carries an out-of-range MTU.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let conf: Self = serde_json::from_slice(bytes).map_err(|source| CniError::Decode {
            what: "network configuration",
            source,
        })?;

        if !versions::SUPPORTED.contains(&conf.cni_version.as_str()) {
            return Err(CniError::IncompatibleVersion(format!(
                "{} (supported: {})",
                conf.cni_version,
                versions::SUPPORTED.join(", ")
            )));
        }

        if conf.mtu > u32::from(u16::MAX) || (conf.mtu != 0 && conf.mtu < 68) {
            return Err(CniError::Config(format!("invalid mtu {}", conf.mtu)));
        }

        Ok(conf)
    }

    /// Reads only the `cniVersion` of a document, for error reporting when
    /// the full document may not parse.
    #[must_use]
    pub fn peek_version(bytes: &[u8]) -> Option<String> {
        #[derive(Deserialize)]
        struct Peek {
            #[serde(rename = "cniVersion")]
            cni_version: String,
        }
        serde_json::from_slice::<Peek>(bytes)
            .ok()
            .map(|peek| peek.cni_version)
    }

    /// MTU of the anycast veth.
    #[must_use]
    pub fn effective_mtu(&self) -> u16 {
        match u16::try_from(self.mtu) {
            Ok(0) | Err(_) => net::DEFAULT_MTU,
            Ok(mtu) => mtu,
        }
    }

    /// Whether the anycast network is attached.
    #[must_use]
    pub const fn anycast_enabled(&self) -> bool {
        self.anycast.enabled()
    }

    /// Whether the container is registered on ADD.
    #[must_use]
    pub const fn checkpoint_enabled(&self) -> bool {
        self.checkpoint.enable
    }

    /// Checks that ADD has something to do beyond the delegate.
    ///
    /// # Errors
    ///
    /// Returns an error if both sub-networks are disabled.
    pub fn ensure_attachable(&self) -> Result<()> {
        if !self.anycast_enabled() && !self.checkpoint_enabled() {
            return Err(CniError::Config(
                "at least one of the anycast or checkpoint sub-networks must be enabled"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Whether this configuration's version knows the CHECK command.
    #[must_use]
    pub fn supports_check(&self) -> bool {
        version_tuple(&self.cni_version) >= version_tuple(versions::CHECK_MIN)
    }
}

fn version_tuple(version: &str) -> (u32, u32, u32) {
    let mut parts = version.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn parse(json: &str) -> Result<NetworkConfig> {
        NetworkConfig::parse(json.as_bytes())
    }

    #[test]
    fn test_defaults() {
        let conf = parse(
            r#"{"cniVersion": "0.3.1", "name": "net", "delegate": {"type": "bridge"}}"#,
        )
        .unwrap();
        assert!(conf.anycast_enabled());
        assert!(conf.checkpoint_enabled());
        assert_eq!(conf.effective_mtu(), 1500);
        assert_eq!(
            conf.checkpoint.dir().unwrap(),
            PathBuf::from("/var/run/l4lb/cni")
        );
        assert!(conf.args.is_empty());
    }

    #[test]
    fn test_null_sections_keep_defaults() {
        let conf = parse(
            r#"{
                "cniVersion": "0.3.1",
                "name": "n",
                "args": null,
                "mtu": null,
                "anycast": null,
                "checkpoint": null,
                "delegate": {"type": "bridge"}
            }"#,
        )
        .unwrap();
        assert!(conf.anycast_enabled());
        assert!(conf.checkpoint_enabled());
        assert_eq!(conf.effective_mtu(), 1500);
        assert_eq!(conf.checkpoint, CheckpointConfig::default());
        assert!(conf.args.is_empty());
    }

    #[test]
    fn test_anycast_toggle_forms() {
        let flag = parse(r#"{"cniVersion": "0.3.1", "name": "n", "anycast": false}"#).unwrap();
        assert!(!flag.anycast_enabled());

        let object =
            parse(r#"{"cniVersion": "0.3.1", "name": "n", "anycast": {"enable": false}}"#).unwrap();
        assert!(!object.anycast_enabled());

        let empty = parse(r#"{"cniVersion": "0.3.1", "name": "n", "anycast": {}}"#).unwrap();
        assert!(empty.anycast_enabled());
    }

    #[test]
    fn test_checkpoint_settings() {
        let conf = parse(
            r#"{"cniVersion": "0.3.1", "name": "n", "checkpoint": {"path": "/tmp/l4lb"}}"#,
        )
        .unwrap();
        assert!(conf.checkpoint_enabled());
        assert_eq!(conf.checkpoint.dir().unwrap(), PathBuf::from("/tmp/l4lb"));

        let conf =
            parse(r#"{"cniVersion": "0.3.1", "name": "n", "checkpoint": {"path": ""}}"#).unwrap();
        assert_eq!(
            conf.checkpoint.dir().unwrap_err().kind(),
            ErrorKind::Configuration
        );

        let conf = parse(r#"{"cniVersion": "0.3.1", "name": "n", "checkpoint": {"enable": false}}"#)
            .unwrap();
        assert!(!conf.checkpoint_enabled());
    }

    #[test]
    fn test_validation_errors() {
        let err = parse(r#"{"cniVersion": "9.9.9", "name": "n"}"#).unwrap_err();
        assert!(matches!(err, CniError::IncompatibleVersion(_)));

        let err = parse(r#"{"cniVersion": "0.3.1", "name": "n", "mtu": 70000}"#).unwrap_err();
        assert!(matches!(err, CniError::Config(_)));

        let err = parse("not json").unwrap_err();
        assert!(matches!(err, CniError::Decode { .. }));

        let err = parse(r#"{"name": "n"}"#).unwrap_err();
        assert!(matches!(err, CniError::Decode { .. }));
    }

    #[test]
    fn test_ensure_attachable() {
        let conf = parse(
            r#"{"cniVersion": "0.3.1", "name": "n", "anycast": false, "checkpoint": {"enable": false}}"#,
        )
        .unwrap();
        assert!(conf.ensure_attachable().is_err());
    }

    #[test]
    fn test_peek_version_and_check_support() {
        assert_eq!(
            NetworkConfig::peek_version(br#"{"cniVersion": "0.4.0", "garbage": [}"#),
            None
        );
        assert_eq!(
            NetworkConfig::peek_version(br#"{"cniVersion": "0.4.0", "mtu": "oops"}"#),
            Some("0.4.0".to_string())
        );

        let old = parse(r#"{"cniVersion": "0.3.1", "name": "n"}"#).unwrap();
        assert!(!old.supports_check());
        let new = parse(r#"{"cniVersion": "1.0.0", "name": "n"}"#).unwrap();
        assert!(new.supports_check());
    }
}
