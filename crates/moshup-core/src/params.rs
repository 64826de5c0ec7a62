//! Negotiation inputs.
//!
//! - [`ClientParameters`]: what the user asked for (ports, remote binary,
//!   remote command, locale and color hints, prediction settings).
//! - [`HostConfig`]: where and how to reach the host over SSH.
//! - [`NegotiationConfig`]: timeouts and bounds for the negotiation itself.
//!
//! All three are built once per session attempt and then only read.

use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::bootstrap::{SessionKey, parse_udp_port};
use crate::constants::{
    ANNOUNCEMENT_TIMEOUT, DEFAULT_COLORS, DEFAULT_LOCALE, DEFAULT_MOSH_SERVER, DEFAULT_SSH_PORT,
    DIAL_TIMEOUT, DISCONNECT_TIMEOUT, MAX_ANNOUNCEMENT_BYTES, UPLOAD_TIMEOUT,
};
use crate::error::{Error, Result};

// =============================================================================
// UDP Port Selection
// =============================================================================

/// UDP port request passed to `mosh-server -p`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdpPortSpec {
    /// Exactly this port.
    Single(u16),
    /// Any free port in `start..=end`.
    Range(u16, u16),
}

impl UdpPortSpec {
    /// The port, if exactly one was requested.
    pub fn single(&self) -> Option<u16> {
        match self {
            UdpPortSpec::Single(port) => Some(*port),
            UdpPortSpec::Range(..) => None,
        }
    }
}

impl fmt::Display for UdpPortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UdpPortSpec::Single(port) => write!(f, "{}", port),
            UdpPortSpec::Range(start, end) => write!(f, "{}:{}", start, end),
        }
    }
}

impl FromStr for UdpPortSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let port = |v: &str| {
            parse_udp_port(v).map_err(|_| {
                Error::configuration(format!("invalid UDP port {:?} (expected 0-65535)", v))
            })
        };

        match s.split_once(':') {
            None => Ok(UdpPortSpec::Single(port(s)?)),
            Some((start, end)) => {
                let (start, end) = (port(start)?, port(end)?);
                if start > end {
                    return Err(Error::configuration(format!(
                        "invalid UDP port range {}: start is above end",
                        s
                    )));
                }
                Ok(UdpPortSpec::Range(start, end))
            }
        }
    }
}

// =============================================================================
// Prediction Mode
// =============================================================================

/// Local echo prediction mode for the session client
/// (`MOSH_PREDICTION_DISPLAY`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionMode {
    /// Show predictions when the link is slow.
    #[default]
    Adaptive,
    /// Always show predictions.
    Always,
    /// Never show predictions.
    Never,
    /// Predict aggressively.
    Experimental,
}

impl PredictionMode {
    /// Value understood by `mosh-client`.
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionMode::Adaptive => "adaptive",
            PredictionMode::Always => "always",
            PredictionMode::Never => "never",
            PredictionMode::Experimental => "experimental",
        }
    }
}

impl fmt::Display for PredictionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Client Parameters
// =============================================================================

/// User-requested session settings.
///
/// Construct with [`ClientParameters::builder`]; there are no setters on the
/// built value.
#[derive(Debug, Clone, Default)]
pub struct ClientParameters {
    udp_port: Option<UdpPortSpec>,
    server_path: Option<String>,
    static_server: Option<PathBuf>,
    remote_command: Vec<String>,
    colors: Option<u32>,
    locale: Vec<String>,
    pre_shared_key: Option<SessionKey>,
    prediction: PredictionMode,
    predict_overwrite: bool,
}

impl ClientParameters {
    /// Start building a parameter set.
    pub fn builder() -> ClientParametersBuilder {
        ClientParametersBuilder::default()
    }

    /// Requested UDP port or range, if any.
    pub fn udp_port(&self) -> Option<UdpPortSpec> {
        self.udp_port
    }

    /// Remote `mosh-server` path, falling back to a `$PATH` lookup.
    pub fn server_path(&self) -> &str {
        self.server_path.as_deref().unwrap_or(DEFAULT_MOSH_SERVER)
    }

    /// Local static `mosh-server` to push when the remote has none.
    pub fn static_server(&self) -> Option<&PathBuf> {
        self.static_server.as_ref()
    }

    /// Command to run remotely instead of the login shell.
    pub fn remote_command(&self) -> &[String] {
        &self.remote_command
    }

    /// Requested color count.
    pub fn colors(&self) -> u32 {
        self.colors.unwrap_or(DEFAULT_COLORS)
    }

    /// Pre-shared session key (skips SSH entirely).
    pub fn pre_shared_key(&self) -> Option<&SessionKey> {
        self.pre_shared_key.as_ref()
    }

    /// Prediction display mode for the session client.
    pub fn prediction(&self) -> PredictionMode {
        self.prediction
    }

    /// Whether predictions may overwrite existing screen contents.
    pub fn predict_overwrite(&self) -> bool {
        self.predict_overwrite
    }

    /// Locale assignments forwarded with `-l`.
    pub fn locale(&self) -> Vec<&str> {
        if self.locale.is_empty() {
            vec![DEFAULT_LOCALE]
        } else {
            self.locale.iter().map(String::as_str).collect()
        }
    }

    /// Arguments appended to the remote server path to start a session:
    /// `new -s -c <colors> -l <locale>... [-p <port>] [-- <command>...]`.
    ///
    /// Every argument is quoted for the remote shell.
    pub fn server_args(&self) -> String {
        let mut args: Vec<String> = vec![
            "new".into(),
            "-s".into(),
            "-c".into(),
            self.colors().to_string(),
        ];
        for assignment in self.locale() {
            args.push("-l".into());
            args.push(quote(assignment));
        }
        if let Some(port) = self.udp_port {
            args.push("-p".into());
            args.push(port.to_string());
        }
        if !self.remote_command.is_empty() {
            args.push("--".into());
            args.extend(self.remote_command.iter().map(|arg| quote(arg)));
        }
        args.join(" ")
    }
}

/// Builder for [`ClientParameters`].
#[derive(Debug, Clone, Default)]
pub struct ClientParametersBuilder {
    inner: ClientParameters,
}

impl ClientParametersBuilder {
    /// Request a UDP port or range.
    pub fn udp_port(mut self, port: UdpPortSpec) -> Self {
        self.inner.udp_port = Some(port);
        self
    }

    /// Override the remote `mosh-server` path.
    pub fn server_path(mut self, path: impl Into<String>) -> Self {
        self.inner.server_path = Some(path.into());
        self
    }

    /// Push this local static binary if the remote has no server.
    pub fn static_server(mut self, path: impl Into<PathBuf>) -> Self {
        self.inner.static_server = Some(path.into());
        self
    }

    /// Run this command remotely.
    pub fn remote_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.remote_command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Request a color count.
    pub fn colors(mut self, colors: u32) -> Self {
        self.inner.colors = Some(colors);
        self
    }

    /// Add a `NAME=VALUE` locale assignment.
    pub fn locale(mut self, assignment: impl Into<String>) -> Self {
        self.inner.locale.push(assignment.into());
        self
    }

    /// Use a pre-shared session key instead of negotiating one.
    pub fn pre_shared_key(mut self, key: SessionKey) -> Self {
        self.inner.pre_shared_key = Some(key);
        self
    }

    /// Set the prediction display mode.
    pub fn prediction(mut self, mode: PredictionMode) -> Self {
        self.inner.prediction = mode;
        self
    }

    /// Allow predictions to overwrite screen contents.
    pub fn predict_overwrite(mut self, enabled: bool) -> Self {
        self.inner.predict_overwrite = enabled;
        self
    }

    /// Finish building.
    pub fn build(self) -> ClientParameters {
        self.inner
    }
}

fn quote(arg: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(arg)).into_owned()
}

// =============================================================================
// Host Configuration
// =============================================================================

/// SSH authentication settings.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Private keys to try, in order.
    pub identity_files: Vec<PathBuf>,
    /// Try keys held by the agent at `SSH_AUTH_SOCK`.
    pub use_agent: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            identity_files: Vec::new(),
            use_agent: true,
        }
    }
}

/// The SSH host to bootstrap through.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Host name or address to dial.
    pub hostname: String,
    /// SSH port.
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Authentication settings.
    pub auth: AuthConfig,
    /// Accept any host key (insecure).
    pub skip_host_key_check: bool,
    /// Alternate known_hosts file.
    pub known_hosts: Option<PathBuf>,
}

impl HostConfig {
    /// Host config with default port and auth.
    pub fn new(hostname: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port: DEFAULT_SSH_PORT,
            user: user.into(),
            auth: AuthConfig::default(),
            skip_host_key_check: false,
            known_hosts: None,
        }
    }

    /// Set the SSH port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Add an identity file.
    pub fn with_identity(mut self, path: impl Into<PathBuf>) -> Self {
        self.auth.identity_files.push(path.into());
        self
    }

    /// `host:port` form used for dialing and logging.
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

// =============================================================================
// Negotiation Configuration
// =============================================================================

/// Bounds on a single negotiation.
#[derive(Debug, Clone)]
pub struct NegotiationConfig {
    /// Time allowed for the SSH dial, handshake and authentication.
    pub dial_timeout: Duration,
    /// Time allowed for one started server to print its announcement.
    pub announcement_timeout: Duration,
    /// Maximum bytes read from one exec channel.
    pub max_announcement_bytes: usize,
    /// Time allowed for pushing a static server binary.
    pub upload_timeout: Duration,
    /// Time allowed for the closing SSH disconnect.
    pub disconnect_timeout: Duration,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            dial_timeout: DIAL_TIMEOUT,
            announcement_timeout: ANNOUNCEMENT_TIMEOUT,
            max_announcement_bytes: MAX_ANNOUNCEMENT_BYTES,
            upload_timeout: UPLOAD_TIMEOUT,
            disconnect_timeout: DISCONNECT_TIMEOUT,
        }
    }
}

impl NegotiationConfig {
    /// Set the dial timeout.
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Set the announcement timeout.
    pub fn with_announcement_timeout(mut self, timeout: Duration) -> Self {
        self.announcement_timeout = timeout;
        self
    }

    /// Set the per-channel read bound.
    pub fn with_max_announcement_bytes(mut self, max: usize) -> Self {
        self.max_announcement_bytes = max;
        self
    }

    /// Set the static server upload timeout.
    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_server_args_match_mosh() {
        let params = ClientParameters::builder().build();
        assert_eq!(params.server_args(), "new -s -c 256 -l LC_ALL=en_US.UTF-8");
        assert_eq!(params.server_path(), "mosh-server");
    }

    #[test]
    fn server_args_with_port_and_command() {
        let params = ClientParameters::builder()
            .udp_port(UdpPortSpec::Single(60001))
            .colors(8)
            .remote_command(["tmux", "new", "-A", "-s", "main session"])
            .build();
        assert_eq!(
            params.server_args(),
            "new -s -c 8 -l LC_ALL=en_US.UTF-8 -p 60001 -- tmux new -A -s 'main session'"
        );
    }

    #[test]
    fn server_args_multiple_locales() {
        let params = ClientParameters::builder()
            .locale("LANG=de_DE.UTF-8")
            .locale("LC_CTYPE=C.UTF-8")
            .build();
        assert_eq!(
            params.server_args(),
            "new -s -c 256 -l LANG=de_DE.UTF-8 -l LC_CTYPE=C.UTF-8"
        );
    }

    #[test]
    fn server_args_quote_shell_metacharacters() {
        let params = ClientParameters::builder()
            .remote_command(["echo", "$(id); rm -rf ~"])
            .build();
        assert!(params.server_args().ends_with("-- echo '$(id); rm -rf ~'"));
    }

    #[test]
    fn udp_port_spec_parse() {
        assert_eq!("60001".parse::<UdpPortSpec>().unwrap(), UdpPortSpec::Single(60001));
        assert_eq!(
            "60001:60010".parse::<UdpPortSpec>().unwrap(),
            UdpPortSpec::Range(60001, 60010)
        );
        assert_eq!(UdpPortSpec::Range(60001, 60010).to_string(), "60001:60010");
        assert!("70000".parse::<UdpPortSpec>().is_err());
        assert!("60010:60001".parse::<UdpPortSpec>().is_err());
        assert!("abc".parse::<UdpPortSpec>().is_err());
        assert!(":".parse::<UdpPortSpec>().is_err());
    }

    #[test]
    fn udp_port_single() {
        assert_eq!(UdpPortSpec::Single(1).single(), Some(1));
        assert_eq!(UdpPortSpec::Range(1, 2).single(), None);
    }

    #[test]
    fn prediction_mode_strings() {
        assert_eq!(PredictionMode::default(), PredictionMode::Adaptive);
        assert_eq!(PredictionMode::Experimental.to_string(), "experimental");
        assert_eq!(PredictionMode::Never.as_str(), "never");
    }

    #[test]
    fn host_config_builder() {
        let host = HostConfig::new("example.com", "alice")
            .with_port(2222)
            .with_identity("/home/alice/.ssh/id_ed25519");
        assert_eq!(host.address(), "example.com:2222");
        assert_eq!(host.auth.identity_files.len(), 1);
        assert!(host.auth.use_agent);
        assert!(!host.skip_host_key_check);
    }

    #[test]
    fn negotiation_config_defaults() {
        let config = NegotiationConfig::default();
        assert_eq!(config.max_announcement_bytes, 1024);
        assert_eq!(config.dial_timeout, DIAL_TIMEOUT);
        assert_eq!(config.upload_timeout, UPLOAD_TIMEOUT);

        let config = config
            .with_announcement_timeout(Duration::from_millis(50))
            .with_max_announcement_bytes(64)
            .with_upload_timeout(Duration::from_secs(5));
        assert_eq!(config.announcement_timeout, Duration::from_millis(50));
        assert_eq!(config.max_announcement_bytes, 64);
        assert_eq!(config.upload_timeout, Duration::from_secs(5));
    }
}
