//! CLI parsing functions and methods.

use std::time::Duration;

use moshup_core::bootstrap::SessionKey;
use moshup_core::error::{Error, Result};
use moshup_core::params::{ClientParameters, HostConfig, NegotiationConfig, UdpPortSpec};

use super::types::Cli;

/// Environment variable carrying a pre-shared session key.
pub const MOSH_KEY_ENV: &str = "MOSH_KEY";

impl Cli {
    /// Set the pre-shared key.
    pub fn with_key(mut self, key: Option<String>) -> Self {
        self.key = key;
        self
    }

    /// Take the pre-shared key from `MOSH_KEY`, if set and non-empty.
    pub fn with_env_key(self) -> Self {
        let key = std::env::var(MOSH_KEY_ENV).ok().filter(|k| !k.is_empty());
        self.with_key(key)
    }

    /// Parse the destination into user and host components.
    pub fn parse_destination(&self) -> (Option<&str>, &str) {
        match self.destination.rsplit_once('@') {
            Some((user, host)) => (Some(user), host),
            None => (None, self.destination.as_str()),
        }
    }

    /// Get the effective user (from -l, the destination, or `$USER`).
    pub fn effective_user(&self) -> String {
        if let Some(ref login) = self.login {
            return login.clone();
        }
        if let (Some(user), _) = self.parse_destination() {
            return user.to_string();
        }
        std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "root".to_string())
    }

    /// Get the host from the destination.
    pub fn host(&self) -> &str {
        self.parse_destination().1
    }

    /// Pre-shared key from `MOSH_KEY`, validated.
    pub fn session_key(&self) -> Result<Option<SessionKey>> {
        match self.key.as_deref() {
            None => Ok(None),
            Some(token) => token
                .trim()
                .parse()
                .map(Some)
                .map_err(|e| Error::configuration(format!("invalid MOSH_KEY: {}", e))),
        }
    }

    /// Build the session parameters.
    pub fn client_parameters(&self) -> Result<ClientParameters> {
        let mut builder = ClientParameters::builder()
            .remote_command(self.command.iter().cloned())
            .prediction(self.predict.into())
            .predict_overwrite(self.predict_overwrite);

        if let Some(port) = self.port {
            builder = builder.udp_port(port);
        }
        if let Some(ref server) = self.server {
            builder = builder.server_path(server.clone());
        }
        if let Some(ref local) = self.push_server {
            builder = builder.static_server(local.clone());
        }
        if let Some(colors) = self.colors {
            builder = builder.colors(colors);
        }
        for assignment in &self.locale {
            builder = builder.locale(assignment.clone());
        }
        if let Some(key) = self.session_key()? {
            builder = builder.pre_shared_key(key);
        }

        Ok(builder.build())
    }

    /// Build the SSH host configuration.
    pub fn host_config(&self) -> Result<HostConfig> {
        let host = self.host();
        if host.is_empty() {
            return Err(Error::configuration(format!(
                "destination {:?} has no host name",
                self.destination
            )));
        }

        let mut config = HostConfig::new(host, self.effective_user()).with_port(self.ssh_port);
        config.auth.identity_files = self.identity.clone();
        config.auth.use_agent = !self.no_agent;
        config.skip_host_key_check = self.insecure_skip_host_key_check;
        config.known_hosts = self.known_hosts.clone();
        Ok(config)
    }

    /// Negotiation timeouts.
    pub fn negotiation_config(&self) -> NegotiationConfig {
        NegotiationConfig::default()
            .with_dial_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_announcement_timeout(Duration::from_secs(self.announce_timeout_secs))
    }
}

/// Parse `PORT` or `PORT:PORT2` for `-p`.
pub fn parse_udp_port_spec(s: &str) -> std::result::Result<UdpPortSpec, String> {
    s.parse::<UdpPortSpec>().map_err(|e| match e {
        Error::Configuration { message } => message,
        other => other.to_string(),
    })
}

/// Parse a `NAME=VALUE` locale assignment.
pub fn parse_locale(s: &str) -> std::result::Result<String, String> {
    match s.split_once('=') {
        Some((name, _)) if !name.is_empty() && !name.contains(char::is_whitespace) => {
            Ok(s.to_string())
        }
        _ => Err(format!("expected NAME=VALUE, got {:?}", s)),
    }
}
