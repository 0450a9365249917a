//! Address allocation through an IPAM plugin.

use ipnetwork::{IpNetwork, Ipv4Network};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{CniError, Result};
use crate::exec::{self, PluginFailure};
use crate::request::{AttachRequest, Command};

/// A network configuration whose `ipam` section names the plugin to run.
#[derive(Debug, Clone)]
pub struct IpamConfig {
    plugin: String,
    bytes: Vec<u8>,
}

impl IpamConfig {
    /// Prepares `network` for IPAM invocation.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `ipam.type` is missing or not a
    /// string.
    pub fn from_network(network: &Value) -> Result<Self> {
        let plugin = network
            .get("ipam")
            .and_then(|ipam| ipam.get("type"))
            .and_then(Value::as_str)
            .filter(|plugin| !plugin.is_empty())
            .ok_or_else(|| CniError::Config("ipam type missing in network".to_string()))?
            .to_string();
        let bytes = serde_json::to_vec(network).map_err(|source| CniError::Decode {
            what: "IPAM configuration",
            source,
        })?;
        Ok(Self { plugin, bytes })
    }

    /// Name of the IPAM executable.
    #[must_use]
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Asks the plugin for addresses.
    ///
    /// # Errors
    ///
    /// Returns an IPAM error if the plugin fails, or a decoding error if its
    /// result is malformed.
    pub fn allocate(&self, request: &AttachRequest) -> Result<Vec<IpNetwork>> {
        let raw = self.invoke(Command::Add, request)?;
        let addresses = decode_result(&raw)?;
        debug!(plugin = %self.plugin, ?addresses, "addresses allocated");
        Ok(addresses)
    }

    /// Returns the container's addresses to the pool.
    ///
    /// # Errors
    ///
    /// Returns an IPAM error if the plugin fails.
    pub fn release(&self, request: &AttachRequest) -> Result<()> {
        self.invoke(Command::Del, request).map(drop)
    }

    fn invoke(&self, command: Command, request: &AttachRequest) -> Result<Vec<u8>> {
        exec::invoke(&self.plugin, command, &self.bytes, request).map_err(
            |PluginFailure { message, .. }| CniError::Ipam {
                plugin: self.plugin.clone(),
                message,
            },
        )
    }
}

#[derive(Debug, Default, Deserialize)]
struct IpamResult {
    #[serde(default)]
    ips: Vec<IpConfig>,
    #[serde(default)]
    ip4: Option<LegacyIpConfig>,
    #[serde(default)]
    ip6: Option<LegacyIpConfig>,
}

/// 0.3.0 and later.
#[derive(Debug, Deserialize)]
struct IpConfig {
    address: IpNetwork,
}

/// 0.1.0 and 0.2.0.
#[derive(Debug, Deserialize)]
struct LegacyIpConfig {
    ip: IpNetwork,
}

/// Extracts the allocated addresses from an IPAM result of any supported
/// version. Prefix lengths are kept as returned.
///
/// # Errors
///
/// Returns a decoding error if `raw` is not an IPAM result.
pub fn decode_result(raw: &[u8]) -> Result<Vec<IpNetwork>> {
    let result: IpamResult = serde_json::from_slice(raw).map_err(|source| CniError::Decode {
        what: "IPAM result",
        source,
    })?;

    if !result.ips.is_empty() {
        return Ok(result.ips.into_iter().map(|ip| ip.address).collect());
    }
    Ok(result
        .ip4
        .into_iter()
        .chain(result.ip6)
        .map(|legacy| legacy.ip)
        .collect())
}

/// The only address of an allocation, which must be IPv4.
///
/// # Errors
///
/// Returns a configuration error if there is no address, more than one, or
/// the one address is IPv6.
pub fn single_ipv4(addresses: &[IpNetwork]) -> Result<Ipv4Network> {
    match addresses {
        [] => Err(CniError::Config(
            "IPAM plugin returned missing IPv4 config".to_string(),
        )),
        [IpNetwork::V4(address)] => Ok(*address),
        _ => Err(CniError::Config(format!(
            "expecting a single IPv4 address from IPAM, got [{}]",
            addresses
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_decode_current_result() {
        let raw = br#"{
            "cniVersion": "0.3.1",
            "ips": [{"version": "4", "address": "10.1.2.5/24", "gateway": "10.1.2.1"}],
            "routes": [{"dst": "0.0.0.0/0"}]
        }"#;
        let addresses = decode_result(raw).unwrap();
        assert_eq!(addresses, vec!["10.1.2.5/24".parse::<IpNetwork>().unwrap()]);
        assert_eq!(single_ipv4(&addresses).unwrap().prefix(), 24);
    }

    #[test]
    fn test_decode_legacy_result() {
        let raw = br#"{"cniVersion": "0.2.0", "ip4": {"ip": "172.31.254.7/24"}}"#;
        let addresses = decode_result(raw).unwrap();
        assert_eq!(
            single_ipv4(&addresses).unwrap(),
            "172.31.254.7/24".parse::<Ipv4Network>().unwrap()
        );
    }

    #[test]
    fn test_single_ipv4_rejects_others() {
        let err = single_ipv4(&[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("missing IPv4 config"));

        let two = decode_result(
            br#"{"ips": [{"address": "10.1.2.5/24"}, {"address": "10.1.2.6/24"}]}"#,
        )
        .unwrap();
        let err = single_ipv4(&two).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("expecting a single IPv4 address"));

        let v6 = decode_result(br#"{"ips": [{"address": "fd00::5/64"}]}"#).unwrap();
        assert!(single_ipv4(&v6).is_err());
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode_result(b"not json"),
            Err(CniError::Decode { .. })
        ));
    }

    #[test]
    fn test_ipam_type_required() {
        let err = IpamConfig::from_network(&serde_json::json!({"name": "n"})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let conf = IpamConfig::from_network(&serde_json::json!({
            "name": "n",
            "ipam": {"type": "host-local"}
        }))
        .unwrap();
        assert_eq!(conf.plugin(), "host-local");
    }
}
