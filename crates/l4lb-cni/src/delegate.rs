//! Chaining to the plugin that provides the container's primary network.

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::NetworkConfig;
use crate::error::{CniError, Result};
use crate::exec::{self, PluginFailure};
use crate::request::{AttachRequest, Command};

/// The delegate's configuration with the parent's identity injected, ready
/// to be written to the delegate's stdin.
#[derive(Debug, Clone)]
pub struct DelegateConfig {
    plugin: String,
    bytes: Vec<u8>,
}

/// The delegate's ADD result, kept exactly as the delegate printed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegateResult {
    pub raw: Vec<u8>,
}

impl DelegateConfig {
    /// Builds the delegate configuration from the parent network.
    ///
    /// `name`, `cniVersion` and `args` of the parent overwrite whatever the
    /// sub-config carried. The plugin to run is the sub-config's `type`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if there is no delegate sub-config, or
    /// its `type` is missing or not a non-empty string.
    pub fn from_network(conf: &NetworkConfig) -> Result<Self> {
        let mut delegate = conf.delegate.clone().ok_or_else(|| {
            CniError::Config(format!("delegate network missing in network {}", conf.name))
        })?;

        delegate.insert("name".to_string(), Value::String(conf.name.clone()));
        delegate.insert(
            "cniVersion".to_string(),
            Value::String(conf.cni_version.clone()),
        );
        delegate.insert("args".to_string(), Value::Object(conf.args.clone()));

        let plugin = plugin_type(&delegate, &conf.name)?;
        let bytes = serde_json::to_vec(&delegate).map_err(|source| CniError::Decode {
            what: "delegate configuration",
            source,
        })?;

        Ok(Self { plugin, bytes })
    }

    /// Name of the delegate executable.
    #[must_use]
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Serialized configuration.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Runs the delegate's ADD.
    ///
    /// # Errors
    ///
    /// Returns a delegate error if the plugin fails or prints something that
    /// is not a JSON document.
    pub fn invoke_add(&self, request: &AttachRequest) -> Result<DelegateResult> {
        let raw = self.invoke(Command::Add, request)?;
        if let Err(e) = serde_json::from_slice::<Value>(&raw) {
            return Err(CniError::Delegate {
                plugin: self.plugin.clone(),
                code: None,
                message: format!("malformed result: {e}"),
            });
        }
        info!(plugin = %self.plugin, "delegate attached");
        Ok(DelegateResult { raw })
    }

    /// Runs the delegate's DEL.
    ///
    /// # Errors
    ///
    /// Returns a delegate error if the plugin fails.
    pub fn invoke_del(&self, request: &AttachRequest) -> Result<()> {
        self.invoke(Command::Del, request)?;
        info!(plugin = %self.plugin, "delegate detached");
        Ok(())
    }

    /// Runs the delegate's CHECK.
    ///
    /// # Errors
    ///
    /// Returns a delegate error if the plugin fails.
    pub fn invoke_check(&self, request: &AttachRequest) -> Result<()> {
        self.invoke(Command::Check, request).map(drop)
    }

    fn invoke(&self, command: Command, request: &AttachRequest) -> Result<Vec<u8>> {
        debug!(plugin = %self.plugin, %command, "invoking delegate");
        exec::invoke(&self.plugin, command, &self.bytes, request).map_err(
            |PluginFailure { code, message }| CniError::Delegate {
                plugin: self.plugin.clone(),
                code,
                message,
            },
        )
    }
}

fn plugin_type(delegate: &Map<String, Value>, network: &str) -> Result<String> {
    match delegate.get("type") {
        None => Err(CniError::Config(format!(
            "type field missing in delegate network {network}"
        ))),
        Some(Value::String(plugin)) if !plugin.is_empty() => Ok(plugin.clone()),
        Some(_) => Err(CniError::Config(format!(
            "type field in delegate network {network} has incorrect type, expected a string"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn network(json: &str) -> NetworkConfig {
        NetworkConfig::parse(json.as_bytes()).unwrap()
    }

    #[test]
    fn test_injects_parent_identity() {
        let conf = network(
            r#"{
                "cniVersion": "0.3.1",
                "name": "dcos",
                "args": {"labels": {"app": "web"}},
                "delegate": {"type": "bridge", "name": "stale", "bridge": "cni0"}
            }"#,
        );
        let delegate = DelegateConfig::from_network(&conf).unwrap();
        assert_eq!(delegate.plugin(), "bridge");

        let sent: Value = serde_json::from_slice(delegate.bytes()).unwrap();
        assert_eq!(sent["name"], "dcos");
        assert_eq!(sent["cniVersion"], "0.3.1");
        assert_eq!(sent["args"]["labels"]["app"], "web");
        assert_eq!(sent["bridge"], "cni0");
    }

    #[test]
    fn test_missing_type() {
        let conf = network(r#"{"cniVersion": "0.3.1", "name": "dcos", "delegate": {}}"#);
        let err = DelegateConfig::from_network(&conf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(
            err.to_string(),
            "invalid network configuration: type field missing in delegate network dcos"
        );
    }

    #[test]
    fn test_non_string_type() {
        for bad in ["42", "null", r#""""#, r#"["bridge"]"#] {
            let conf = network(&format!(
                r#"{{"cniVersion": "0.3.1", "name": "dcos", "delegate": {{"type": {bad}}}}}"#
            ));
            let err = DelegateConfig::from_network(&conf).unwrap_err();
            assert!(err.to_string().contains("incorrect type"), "{bad}: {err}");
        }
    }

    #[test]
    fn test_missing_delegate() {
        let conf = network(r#"{"cniVersion": "0.3.1", "name": "dcos"}"#);
        let err = DelegateConfig::from_network(&conf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
