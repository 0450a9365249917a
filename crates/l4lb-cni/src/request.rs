//! Invocation parameters passed by the container runtime.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use l4lb_constants::env;

use crate::error::{CniError, Result};

/// CNI command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Add,
    Del,
    Check,
    Version,
}

impl Command {
    /// Value of `CNI_COMMAND` for this command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Del => "DEL",
            Self::Check => "CHECK",
            Self::Version => "VERSION",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = CniError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ADD" => Ok(Self::Add),
            "DEL" => Ok(Self::Del),
            "CHECK" => Ok(Self::Check),
            "VERSION" => Ok(Self::Version),
            other => Err(CniError::Env(format!("unknown {} {other:?}", env::CNI_COMMAND))),
        }
    }
}

/// Raw `CNI_*` variables, as read from the process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginEnv {
    pub command: Option<String>,
    pub container_id: Option<String>,
    pub netns: Option<String>,
    pub ifname: Option<String>,
    pub args: Option<String>,
    pub path: Option<String>,
}

impl PluginEnv {
    /// The requested command.
    ///
    /// # Errors
    ///
    /// Returns an error if `CNI_COMMAND` is missing or unknown.
    pub fn command(&self) -> Result<Command> {
        non_empty(self.command.as_deref())
            .ok_or_else(|| CniError::Env(format!("{} not set", env::CNI_COMMAND)))?
            .parse()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// One ADD, DEL or CHECK invocation. Immutable for its duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachRequest {
    /// Container identifier.
    pub container_id: String,
    /// Network namespace path; empty on a DEL for a container whose
    /// namespace is already gone.
    pub netns: PathBuf,
    /// Interface name requested for the primary network.
    pub ifname: String,
    /// `CNI_ARGS`, forwarded verbatim.
    pub args: String,
    /// Directories searched for delegate and IPAM plugins.
    pub plugin_dirs: Vec<PathBuf>,
    /// Raw network configuration.
    pub config: Vec<u8>,
}

impl AttachRequest {
    /// Builds a request from the environment, checking the variables the
    /// command needs are present.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing variable.
    pub fn from_env(command: Command, vars: &PluginEnv, config: Vec<u8>) -> Result<Self> {
        let require = |value: Option<&str>, name: &str| -> Result<String> {
            non_empty(value)
                .map(str::to_string)
                .ok_or_else(|| CniError::Env(format!("{name} not set")))
        };

        let container_id = require(vars.container_id.as_deref(), env::CNI_CONTAINERID)?;
        let ifname = require(vars.ifname.as_deref(), env::CNI_IFNAME)?;
        let path = require(vars.path.as_deref(), env::CNI_PATH)?;
        let netns = match command {
            Command::Del => vars.netns.clone().unwrap_or_default(),
            _ => require(vars.netns.as_deref(), env::CNI_NETNS)?,
        };

        Ok(Self {
            container_id,
            netns: PathBuf::from(netns),
            ifname,
            args: vars.args.clone().unwrap_or_default(),
            plugin_dirs: split_path(&path),
            config,
        })
    }

    /// Whether a namespace path was supplied.
    #[must_use]
    pub fn has_netns(&self) -> bool {
        !self.netns.as_os_str().is_empty()
    }

    /// Namespace path.
    #[must_use]
    pub fn netns(&self) -> &Path {
        &self.netns
    }

    /// `CNI_*` variables handed to a child plugin running `command`.
    #[must_use]
    pub fn child_env(&self, command: Command) -> Vec<(&'static str, String)> {
        let path = self
            .plugin_dirs
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(":");

        vec![
            (env::CNI_COMMAND, command.as_str().to_string()),
            (env::CNI_CONTAINERID, self.container_id.clone()),
            (env::CNI_NETNS, self.netns.display().to_string()),
            (env::CNI_IFNAME, self.ifname.clone()),
            (env::CNI_ARGS, self.args.clone()),
            (env::CNI_PATH, path),
        ]
    }
}

/// Splits a `CNI_PATH`-style list, dropping empty entries.
#[must_use]
pub fn split_path(path: &str) -> Vec<PathBuf> {
    path.split(':')
        .filter(|entry| !entry.is_empty())
        .map(PathBuf::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> PluginEnv {
        PluginEnv {
            command: Some("ADD".to_string()),
            container_id: Some("c0ffee".to_string()),
            netns: Some("/var/run/netns/c0ffee".to_string()),
            ifname: Some("eth0".to_string()),
            args: Some("IgnoreUnknown=1".to_string()),
            path: Some("/opt/cni/bin::/usr/lib/cni".to_string()),
        }
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!(vars().command().unwrap(), Command::Add);
        assert!("add".parse::<Command>().is_err());

        let missing = PluginEnv::default();
        let err = missing.command().unwrap_err();
        assert!(err.to_string().contains("CNI_COMMAND not set"));
    }

    #[test]
    fn test_from_env() {
        let request = AttachRequest::from_env(Command::Add, &vars(), b"{}".to_vec()).unwrap();
        assert_eq!(request.container_id, "c0ffee");
        assert_eq!(
            request.plugin_dirs,
            vec![PathBuf::from("/opt/cni/bin"), PathBuf::from("/usr/lib/cni")]
        );
        assert!(request.has_netns());
    }

    #[test]
    fn test_del_tolerates_missing_netns() {
        let mut vars = vars();
        vars.netns = None;
        let request = AttachRequest::from_env(Command::Del, &vars, Vec::new()).unwrap();
        assert!(!request.has_netns());

        let err = AttachRequest::from_env(Command::Add, &vars, Vec::new()).unwrap_err();
        assert!(err.to_string().contains("CNI_NETNS"));
    }

    #[test]
    fn test_child_env_overrides_command() {
        let request = AttachRequest::from_env(Command::Add, &vars(), Vec::new()).unwrap();
        let env = request.child_env(Command::Del);
        assert!(env.contains(&("CNI_COMMAND", "DEL".to_string())));
        assert!(env.contains(&("CNI_PATH", "/opt/cni/bin:/usr/lib/cni".to_string())));
        assert!(env.contains(&("CNI_ARGS", "IgnoreUnknown=1".to_string())));
    }
}
