//! Execution of other CNI plugins.
//!
//! The exchange is the standard one: the configuration goes to the plugin's
//! stdin, `CNI_*` variables select the command, and stdout carries either a
//! result document (exit 0) or an error document (non-zero exit). The
//! plugin's stderr is inherited so its logs reach the runtime.

use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command as Process, Stdio};
use std::thread;

use tracing::debug;

use crate::error::ErrorDocument;
use crate::request::{AttachRequest, Command};

/// Why a plugin invocation failed. Callers turn this into the error variant
/// matching the plugin's role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginFailure {
    /// Code from the plugin's error document, if it printed one.
    pub code: Option<u32>,
    /// Human-readable reason.
    pub message: String,
}

impl PluginFailure {
    fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }
}

/// Locates `plugin` in `dirs`, first match wins.
///
/// # Errors
///
/// Returns a failure if the name is not a bare file name or no directory
/// holds an executable of that name.
pub fn find_plugin(plugin: &str, dirs: &[PathBuf]) -> Result<PathBuf, PluginFailure> {
    if plugin.is_empty() || plugin.contains('/') || plugin == "." || plugin == ".." {
        return Err(PluginFailure::new(format!("invalid plugin name {plugin:?}")));
    }

    dirs.iter()
        .map(|dir| dir.join(plugin))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| {
            let searched = dirs
                .iter()
                .map(|dir| dir.display().to_string())
                .collect::<Vec<_>>()
                .join(":");
            PluginFailure::new(format!("failed to find plugin {plugin:?} in path [{searched}]"))
        })
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

/// Runs `plugin` with `command` and returns its stdout on success.
///
/// # Errors
///
/// Returns a failure if the plugin cannot be found or started, or exits
/// non-zero.
pub fn invoke(
    plugin: &str,
    command: Command,
    config: &[u8],
    request: &AttachRequest,
) -> Result<Vec<u8>, PluginFailure> {
    let path = find_plugin(plugin, &request.plugin_dirs)?;
    debug!(plugin, path = %path.display(), %command, "invoking plugin");

    let mut child = Process::new(&path)
        .envs(request.child_env(command))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| PluginFailure::new(format!("failed to start {}: {e}", path.display())))?;

    let stdin = child.stdin.take();
    let output = thread::scope(|scope| {
        // Feed stdin concurrently so a chatty plugin cannot fill stdout and
        // block on a full pipe.
        let writer = scope.spawn(move || -> io::Result<()> {
            if let Some(mut stdin) = stdin {
                match stdin.write_all(config) {
                    // The plugin may exit without reading its input.
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
                    other => other?,
                }
            }
            Ok(())
        });
        let output = child.wait_with_output();
        let written = writer
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("stdin writer panicked")));
        output.and_then(|output| written.map(|()| output))
    })
    .map_err(|e| PluginFailure::new(format!("failed to run {}: {e}", path.display())))?;

    if output.status.success() {
        return Ok(output.stdout);
    }

    match serde_json::from_slice::<ErrorDocument>(&output.stdout) {
        Ok(doc) => {
            let message = if doc.details.is_empty() {
                doc.msg
            } else {
                format!("{}; {}", doc.msg, doc.details)
            };
            Err(PluginFailure {
                code: Some(doc.code),
                message,
            })
        }
        Err(_) => Err(PluginFailure::new(format!(
            "{} ({})",
            output.status,
            String::from_utf8_lossy(&output.stdout).trim()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn request(dir: &Path) -> AttachRequest {
        AttachRequest {
            container_id: "c1".to_string(),
            netns: PathBuf::from("/var/run/netns/c1"),
            ifname: "eth0".to_string(),
            args: String::new(),
            plugin_dirs: vec![PathBuf::from("/nonexistent"), dir.to_path_buf()],
            config: Vec::new(),
        }
    }

    #[test]
    fn test_find_plugin() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "bridge", "exit 0");
        fs::write(dir.path().join("notexec"), "").unwrap();

        let dirs = vec![dir.path().to_path_buf()];
        assert_eq!(find_plugin("bridge", &dirs).unwrap(), script);
        assert!(find_plugin("notexec", &dirs).is_err());
        assert!(find_plugin("missing", &dirs)
            .unwrap_err()
            .message
            .contains("failed to find plugin"));
        assert!(find_plugin("../bridge", &dirs).is_err());
    }

    #[test]
    fn test_invoke_passes_stdin_and_env() {
        let dir = tempfile::tempdir().unwrap();
        write_script(
            dir.path(),
            "echo-plugin",
            r#"input=$(cat); printf '{"cmd":"%s","id":"%s","in":%s}' "$CNI_COMMAND" "$CNI_CONTAINERID" "$input""#,
        );

        let out = invoke(
            "echo-plugin",
            Command::Add,
            br#"{"k":1}"#,
            &request(dir.path()),
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["cmd"], "ADD");
        assert_eq!(value["id"], "c1");
        assert_eq!(value["in"]["k"], 1);
    }

    #[test]
    fn test_invoke_decodes_error_document() {
        let dir = tempfile::tempdir().unwrap();
        write_script(
            dir.path(),
            "failing",
            r#"cat >/dev/null; echo '{"cniVersion":"0.3.1","code":11,"msg":"busy","details":"retry"}'; exit 1"#,
        );

        let failure = invoke("failing", Command::Del, b"{}", &request(dir.path())).unwrap_err();
        assert_eq!(failure.code, Some(11));
        assert_eq!(failure.message, "busy; retry");
    }

    #[test]
    fn test_invoke_reports_raw_output() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "garbage", "echo not-json; exit 3");

        let failure = invoke("garbage", Command::Add, b"{}", &request(dir.path())).unwrap_err();
        assert_eq!(failure.code, None);
        assert!(failure.message.contains("not-json"));
        assert!(failure.message.contains('3'));
    }
}
