//! l4lb - CNI plugin attaching containers to the layer 4 load balancer.
//!
//! Invoked by the container runtime with the CNI environment and the
//! network configuration on stdin. Logs go to stderr because stdout carries
//! the result.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use l4lb_cni::{plugin_main, report_error, CniError, Plugin, PluginEnv};
use l4lb_constants::env;
use l4lb_net::LinuxTopology;
use tracing::warn;
use tracing_subscriber::{
    fmt::writer::BoxMakeWriter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

mod settings;

use settings::{Settings, SYSTEM_SETTINGS_PATH};

/// CNI plugin for the layer 4 load balancer anycast network
#[derive(Debug, Parser)]
#[command(name = "l4lb")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug output
    #[arg(long)]
    debug: bool,

    /// Log filter directive
    #[arg(long, env = env::LOG_LEVEL)]
    log_level: Option<String>,

    /// Append logs to this file instead of stderr
    #[arg(long, env = env::LOG_FILE)]
    log_file: Option<PathBuf>,

    /// Settings file
    #[arg(long, default_value = SYSTEM_SETTINGS_PATH)]
    config: PathBuf,

    #[arg(long, env = env::CNI_COMMAND, hide = true)]
    cni_command: Option<String>,

    #[arg(long, env = env::CNI_CONTAINERID, hide = true)]
    cni_containerid: Option<String>,

    #[arg(long, env = env::CNI_NETNS, hide = true)]
    cni_netns: Option<String>,

    #[arg(long, env = env::CNI_IFNAME, hide = true)]
    cni_ifname: Option<String>,

    #[arg(long, env = env::CNI_ARGS, hide = true)]
    cni_args: Option<String>,

    #[arg(long, env = env::CNI_PATH, hide = true)]
    cni_path: Option<String>,
}

impl Cli {
    /// The CNI environment, with `plugins.dirs` standing in for a missing
    /// `CNI_PATH`.
    fn plugin_env(&self, settings: &Settings) -> PluginEnv {
        PluginEnv {
            command: self.cni_command.clone(),
            container_id: self.cni_containerid.clone(),
            netns: self.cni_netns.clone(),
            ifname: self.cni_ifname.clone(),
            args: self.cni_args.clone(),
            path: self
                .cni_path
                .clone()
                .filter(|path| !path.is_empty())
                .or_else(|| settings.plugin_path()),
        }
    }

    fn log_filter(&self, settings: &Settings) -> String {
        if let Some(level) = self.log_level.as_ref().or(settings.log.level.as_ref()) {
            return level.clone();
        }
        if self.debug {
            "l4lb=debug,l4lb_cni=debug,l4lb_net=debug".to_string()
        } else {
            "l4lb=info,l4lb_cni=info,l4lb_net=info".to_string()
        }
    }
}

/// A command line clap rejected, as a CNI error. Requests for help or the
/// version are not errors and yield `None`.
fn invocation_error(error: &clap::Error) -> Option<CniError> {
    match error.kind() {
        ErrorKind::DisplayHelp
        | ErrorKind::DisplayVersion
        | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => None,
        _ => {
            let rendered = error.to_string();
            let message = rendered
                .lines()
                .next()
                .unwrap_or_default()
                .trim_start_matches("error: ");
            Some(CniError::Env(format!("invalid invocation: {message}")))
        }
    }
}

fn init_logging(filter: &str, file: Option<&Path>) -> Result<()> {
    let writer = match file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(io::stderr),
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .context("invalid log filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false),
        )
        .try_init()
        .context("failed to install log subscriber")
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => match invocation_error(&e) {
            Some(error) => {
                if let Err(log_error) = init_logging("l4lb=info,l4lb_cni=info", None) {
                    eprintln!("l4lb: {log_error:#}");
                }
                let code = report_error(&error, &mut io::stdin().lock(), &mut io::stdout().lock());
                return exit_code(code);
            }
            None => e.exit(),
        },
    };

    let (settings, settings_error) = match Settings::load_from(&cli.config) {
        Ok(settings) => (settings, None),
        Err(e) => (Settings::default(), Some(e)),
    };

    let log_file = cli.log_file.as_deref().or(settings.log.file.as_deref());
    if let Err(e) = init_logging(&cli.log_filter(&settings), log_file) {
        eprintln!("l4lb: {e:#}");
    }
    if let Some(e) = settings_error {
        warn!(path = %cli.config.display(), error = %e, "ignoring unreadable settings");
    }

    let plugin = Plugin::new(LinuxTopology);
    let code = plugin_main(
        &plugin,
        &cli.plugin_env(&settings),
        &mut io::stdin().lock(),
        &mut io::stdout().lock(),
    );
    exit_code(code)
}
