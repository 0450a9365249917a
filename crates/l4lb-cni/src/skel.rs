//! Dispatch of one plugin invocation.

use std::io::{Read, Write};

use l4lb_constants::versions;
use l4lb_net::Topology;
use serde::Serialize;
use tracing::{debug, error};

use crate::config::NetworkConfig;
use crate::error::{CniError, Result};
use crate::plugin::Plugin;
use crate::request::{AttachRequest, Command, PluginEnv};

/// Output of the `VERSION` command.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub cni_version: &'static str,
    pub supported_versions: &'static [&'static str],
}

impl VersionInfo {
    #[must_use]
    pub const fn current() -> Self {
        Self {
            cni_version: versions::LATEST,
            supported_versions: &versions::SUPPORTED,
        }
    }
}

/// Runs the command selected by `env`, reading the network configuration
/// from `stdin` and writing the result or error document to `stdout`.
///
/// Returns the process exit code.
pub fn plugin_main<T, R, W>(
    plugin: &Plugin<T>,
    env: &PluginEnv,
    stdin: &mut R,
    stdout: &mut W,
) -> i32
where
    T: Topology,
    R: Read,
    W: Write,
{
    let mut config = Vec::new();
    let outcome = env.command().and_then(|command| {
        if command != Command::Version {
            stdin.read_to_end(&mut config)?;
        }
        dispatch(plugin, command, env, &config, stdout)
    });

    match outcome {
        Ok(()) => 0,
        Err(e) => write_error(&e, &config, stdout),
    }
}

/// Reports a failure that happened before a command could be dispatched,
/// such as an unusable command line. The configuration on `stdin` is only
/// read for its `cniVersion`.
///
/// Returns the process exit code.
pub fn report_error<R: Read, W: Write>(error: &CniError, stdin: &mut R, stdout: &mut W) -> i32 {
    let mut config = Vec::new();
    if let Err(e) = stdin.read_to_end(&mut config) {
        debug!(error = %e, "no configuration to take the version from");
    }
    write_error(error, &config, stdout)
}

fn write_error<W: Write>(error: &CniError, config: &[u8], stdout: &mut W) -> i32 {
    let version =
        NetworkConfig::peek_version(config).unwrap_or_else(|| versions::LATEST.to_string());
    error!(code = error.code(), stage = ?error.stage(), %error, "plugin failed");
    let document = error.to_document(&version);
    if let Err(e) = serde_json::to_writer(&mut *stdout, &document)
        .map_err(std::io::Error::from)
        .and_then(|()| stdout.flush())
    {
        error!(error = %e, "failed to write error document");
    }
    1
}

fn dispatch<T: Topology, W: Write>(
    plugin: &Plugin<T>,
    command: Command,
    env: &PluginEnv,
    config: &[u8],
    stdout: &mut W,
) -> Result<()> {
    let request = || AttachRequest::from_env(command, env, config.to_vec());
    match command {
        Command::Version => {
            serde_json::to_writer(&mut *stdout, &VersionInfo::current())
                .map_err(std::io::Error::from)?;
        }
        Command::Add => {
            let result = plugin.attach(&request()?)?;
            stdout.write_all(&result.raw)?;
        }
        Command::Del => {
            plugin.detach(&request()?)?;
        }
        Command::Check => plugin.check(&request()?)?,
    }
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info() {
        let json = serde_json::to_value(VersionInfo::current()).unwrap();
        assert_eq!(json["cniVersion"], "1.0.0");
        assert_eq!(json["supportedVersions"].as_array().unwrap().len(), 6);
        assert_eq!(json["supportedVersions"][3], "0.3.1");
    }

    #[test]
    fn test_report_error_uses_config_version() {
        let error = CniError::Env("unexpected argument '--bogus'".to_string());
        let mut stdout = Vec::new();
        let code = report_error(
            &error,
            &mut br#"{"cniVersion": "0.3.1", "name": "n"}"#.as_slice(),
            &mut stdout,
        );
        assert_eq!(code, 1);

        let doc: serde_json::Value = serde_json::from_slice(&stdout).unwrap();
        assert_eq!(doc["cniVersion"], "0.3.1");
        assert_eq!(doc["code"], 4);
        assert!(doc["msg"].as_str().unwrap().contains("--bogus"));

        let mut stdout = Vec::new();
        report_error(&error, &mut std::io::empty(), &mut stdout);
        let doc: serde_json::Value = serde_json::from_slice(&stdout).unwrap();
        assert_eq!(doc["cniVersion"], versions::LATEST);
    }
}
