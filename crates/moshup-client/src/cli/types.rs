//! CLI types and struct definitions.

use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use moshup_core::constants::{DEFAULT_MOSH_CLIENT, DEFAULT_SSH_PORT};
use moshup_core::params::UdpPortSpec;

/// Log output format for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CliLogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

impl From<CliLogFormat> for moshup_core::LogFormat {
    fn from(fmt: CliLogFormat) -> Self {
        match fmt {
            CliLogFormat::Text => moshup_core::LogFormat::Text,
            CliLogFormat::Json => moshup_core::LogFormat::Json,
        }
    }
}

/// Local echo prediction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum PredictArg {
    /// Show predictions on slow links.
    #[default]
    Adaptive,
    /// Always show predictions.
    Always,
    /// Never show predictions.
    Never,
    /// Predict aggressively.
    Experimental,
}

impl From<PredictArg> for moshup_core::PredictionMode {
    fn from(arg: PredictArg) -> Self {
        match arg {
            PredictArg::Adaptive => moshup_core::PredictionMode::Adaptive,
            PredictArg::Always => moshup_core::PredictionMode::Always,
            PredictArg::Never => moshup_core::PredictionMode::Never,
            PredictArg::Experimental => moshup_core::PredictionMode::Experimental,
        }
    }
}

/// Start mosh-server over SSH and hand off to mosh-client.
#[derive(Debug, Parser)]
#[command(
    name = "moshup",
    version,
    about = "Start mosh-server over SSH and hand off to mosh-client"
)]
pub struct Cli {
    /// Remote host (user@host or host)
    pub destination: String,

    /// Command to execute on remote host instead of the login shell
    #[arg(trailing_var_arg = true)]
    pub command: Vec<String>,

    /// UDP port or port range for mosh-server
    #[arg(
        short = 'p',
        long = "port",
        value_parser = super::parsing::parse_udp_port_spec,
        value_name = "PORT[:PORT2]"
    )]
    pub port: Option<UdpPortSpec>,

    /// SSH port to connect to
    #[arg(long = "ssh-port", default_value_t = DEFAULT_SSH_PORT)]
    pub ssh_port: u16,

    /// Login user name (overrides user@ in destination)
    #[arg(short = 'l', long, value_name = "USER")]
    pub login: Option<String>,

    /// Identity file for authentication (repeatable)
    #[arg(short = 'i', long = "identity", action = ArgAction::Append, value_name = "FILE")]
    pub identity: Vec<PathBuf>,

    /// Do not use the SSH agent
    #[arg(long = "no-agent")]
    pub no_agent: bool,

    /// Path of mosh-server on the remote host
    #[arg(long = "server", value_name = "PATH")]
    pub server: Option<String>,

    /// Local static mosh-server to upload if the remote has none
    #[arg(long = "push-server", value_name = "LOCAL_PATH")]
    pub push_server: Option<PathBuf>,

    /// Number of colors to request from mosh-server
    #[arg(long, value_name = "N")]
    pub colors: Option<u32>,

    /// Locale variable for the remote session (repeatable)
    #[arg(
        long = "locale",
        action = ArgAction::Append,
        value_parser = super::parsing::parse_locale,
        value_name = "NAME=VALUE"
    )]
    pub locale: Vec<String>,

    /// Local echo prediction mode
    #[arg(long = "predict", value_enum, default_value = "adaptive")]
    pub predict: PredictArg,

    /// Allow predictions to overwrite screen contents
    #[arg(long = "predict-overwrite")]
    pub predict_overwrite: bool,

    /// Local mosh-client binary
    #[arg(long = "client", value_name = "PATH", default_value = DEFAULT_MOSH_CLIENT)]
    pub client: PathBuf,

    /// Print the negotiated session as JSON instead of starting mosh-client
    #[arg(long = "print-only")]
    pub print_only: bool,

    /// Pre-shared session key, read from `MOSH_KEY` only so it never
    /// appears on the command line.
    #[arg(skip)]
    pub key: Option<String>,

    /// Alternate known_hosts file
    #[arg(long = "known-hosts", value_name = "FILE")]
    pub known_hosts: Option<PathBuf>,

    /// Skip SSH host key verification (insecure)
    #[arg(long = "insecure-skip-host-key-check")]
    pub insecure_skip_host_key_check: bool,

    /// SSH connection and authentication timeout in seconds
    #[arg(long = "connect-timeout", default_value_t = 30, value_name = "SECS")]
    pub connect_timeout_secs: u64,

    /// Time to wait for mosh-server to announce itself, in seconds
    #[arg(long = "announce-timeout", default_value_t = 15, value_name = "SECS")]
    pub announce_timeout_secs: u64,

    /// Increase verbosity (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Log to file instead of stderr
    #[arg(long = "log-file", value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Log output format
    #[arg(long = "log-format", default_value = "text")]
    pub log_format: CliLogFormat,
}
