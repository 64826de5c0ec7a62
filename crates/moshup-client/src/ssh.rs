//! SSH transport over russh.
//!
//! Implements the core transport traits:
//! 1. [`SshDialer`] connects over TCP, verifies the host key and authenticates
//! 2. [`SshConnection`] opens exec channels on the session
//! 3. [`SshExecChannel`] exposes the channel's stdout as bounded reads

use std::future::Future;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::keys::{HashAlg, PrivateKeyWithHashAlg, PublicKey};
use russh::{Channel, ChannelMsg, Disconnect};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use moshup_core::error::{Error, Result};
use moshup_core::params::HostConfig;
use moshup_core::transport::{Connection, Dialer, ExecChannel};

/// Key file names tried when no identity is given, in preference order.
const DEFAULT_KEY_NAMES: &[&str] = &["id_ed25519", "id_ecdsa", "id_rsa"];

fn ssh_error(context: &'static str) -> impl FnOnce(russh::Error) -> Error {
    move |e| Error::transport(format!("{}: {}", context, e))
}

// =============================================================================
// Host Key Verification
// =============================================================================

/// russh client handler; only verifies the server key.
struct SshHandler {
    host: String,
    port: u16,
    skip_host_key_check: bool,
    known_hosts: Option<PathBuf>,
}

impl SshHandler {
    fn verify(&self, key: &PublicKey) -> bool {
        if self.skip_host_key_check {
            warn!(host = %self.host, "Skipping SSH host key verification (insecure)");
            return true;
        }

        let known = match &self.known_hosts {
            Some(path) => russh::keys::known_hosts::check_known_hosts_path(
                &self.host, self.port, key, path,
            ),
            None => russh::keys::known_hosts::check_known_hosts(&self.host, self.port, key),
        };
        match known {
            Ok(true) => {
                debug!(host = %self.host, port = self.port, "Host key verified");
                true
            }
            Ok(false) => {
                warn!(
                    host = %self.host,
                    port = self.port,
                    "Host key is not in known_hosts; connect once with ssh to record it"
                );
                false
            }
            Err(e) => {
                warn!(host = %self.host, port = self.port, error = %e, "Host key verification failed");
                false
            }
        }
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl Future<Output = std::result::Result<bool, Self::Error>> + Send {
        let accepted = self.verify(server_public_key);
        async move { Ok(accepted) }
    }
}

// =============================================================================
// Dialer
// =============================================================================

/// Opens authenticated russh sessions.
#[derive(Debug, Clone)]
pub struct SshDialer {
    keepalive_interval: Duration,
}

impl Default for SshDialer {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(30),
        }
    }
}

impl SshDialer {
    pub fn new() -> Self {
        Self::default()
    }

    fn client_config(&self) -> Arc<client::Config> {
        Arc::new(client::Config {
            keepalive_interval: Some(self.keepalive_interval),
            keepalive_max: 3,
            ..Default::default()
        })
    }
}

#[async_trait]
impl Dialer for SshDialer {
    async fn dial(&self, host: &HostConfig) -> Result<Box<dyn Connection>> {
        let addr = host.address();
        info!(addr = %addr, user = %host.user, "Connecting via SSH");

        let stream = TcpStream::connect((host.hostname.as_str(), host.port))
            .await
            .map_err(|e| Error::transport(format!("cannot connect to {}: {}", addr, e)))?;
        let peer = stream.peer_addr()?.ip().to_canonical();

        let handler = SshHandler {
            host: host.hostname.clone(),
            port: host.port,
            skip_host_key_check: host.skip_host_key_check,
            known_hosts: host.known_hosts.clone(),
        };
        let mut handle = client::connect_stream(self.client_config(), stream, handler)
            .await
            .map_err(|e| Error::transport(format!("SSH handshake with {} failed: {}", addr, e)))?;
        debug!(peer = %peer, "SSH connection established");

        authenticate(&mut handle, host).await?;
        info!(user = %host.user, "SSH authentication successful");

        Ok(Box::new(SshConnection { handle, peer }))
    }
}

async fn authenticate(handle: &mut client::Handle<SshHandler>, host: &HostConfig) -> Result<()> {
    let identities = if host.auth.identity_files.is_empty() {
        default_identity_files()
    } else {
        host.auth.identity_files.clone()
    };

    for path in &identities {
        let key = match load_key(path) {
            Ok(key) => key,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping identity file");
                continue;
            }
        };
        let result = handle
            .authenticate_publickey(&host.user, key)
            .await
            .map_err(ssh_error("public key authentication failed"))?;
        if result.success() {
            debug!(path = %path.display(), "Authenticated with identity file");
            return Ok(());
        }
        debug!(path = %path.display(), "Identity rejected by server");
    }

    if host.auth.use_agent && authenticate_with_agent(handle, &host.user).await? {
        return Ok(());
    }

    Err(Error::AuthenticationFailed)
}

fn load_key(path: &Path) -> Result<PrivateKeyWithHashAlg> {
    let key = russh::keys::load_secret_key(path, None)
        .map_err(|e| Error::transport(format!("cannot load {}: {}", path.display(), e)))?;
    let hash_alg = if key.algorithm().is_rsa() {
        Some(HashAlg::Sha512)
    } else {
        None
    };
    Ok(PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
}

/// Try every agent identity. `Ok(false)` when no agent is reachable or no
/// key is accepted.
async fn authenticate_with_agent(
    handle: &mut client::Handle<SshHandler>,
    user: &str,
) -> Result<bool> {
    let Ok(socket) = std::env::var("SSH_AUTH_SOCK") else {
        debug!("SSH_AUTH_SOCK not set, agent auth unavailable");
        return Ok(false);
    };

    let stream = match tokio::net::UnixStream::connect(&socket).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Cannot reach SSH agent");
            return Ok(false);
        }
    };
    let mut agent = russh::keys::agent::client::AgentClient::connect(stream);
    let identities = match agent.request_identities().await {
        Ok(identities) => identities,
        Err(e) => {
            warn!(error = %e, "SSH agent refused to list identities");
            return Ok(false);
        }
    };

    for identity in identities {
        let hash_alg = if identity.algorithm().is_rsa() {
            Some(HashAlg::Sha512)
        } else {
            None
        };
        match handle
            .authenticate_publickey_with(user, identity, hash_alg, &mut agent)
            .await
        {
            Ok(result) if result.success() => {
                debug!("Authenticated with agent key");
                return Ok(true);
            }
            Ok(_) => continue,
            Err(e) => debug!(error = %e, "Agent key failed"),
        }
    }
    Ok(false)
}

/// Existing default private keys under `$HOME/.ssh`.
pub fn default_identity_files() -> Vec<PathBuf> {
    match std::env::var_os("HOME") {
        Some(home) => identity_files_in(&PathBuf::from(home).join(".ssh")),
        None => Vec::new(),
    }
}

fn identity_files_in(ssh_dir: &Path) -> Vec<PathBuf> {
    DEFAULT_KEY_NAMES
        .iter()
        .map(|name| ssh_dir.join(name))
        .filter(|path| path.exists())
        .collect()
}

// =============================================================================
// Connection
// =============================================================================

/// An authenticated russh session.
pub struct SshConnection {
    handle: client::Handle<SshHandler>,
    peer: IpAddr,
}

#[async_trait]
impl Connection for SshConnection {
    async fn exec(&mut self, command: &str) -> Result<Box<dyn ExecChannel>> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(ssh_error("failed to open SSH channel"))?;
        channel
            .exec(true, command)
            .await
            .map_err(ssh_error("failed to send exec request"))?;

        let mut exec = SshExecChannel::new(channel);
        exec.await_reply().await?;
        Ok(Box::new(exec))
    }

    fn peer_ip(&self) -> IpAddr {
        self.peer
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!(error = %e, "SSH disconnect failed");
        }
    }
}

// =============================================================================
// Exec Channel
// =============================================================================

/// A remote command's session channel.
pub struct SshExecChannel {
    channel: Channel<client::Msg>,
    pending: Vec<u8>,
    eof: bool,
    exit_status: Option<u32>,
    closed: bool,
}

impl SshExecChannel {
    fn new(channel: Channel<client::Msg>) -> Self {
        Self {
            channel,
            pending: Vec::new(),
            eof: false,
            exit_status: None,
            closed: false,
        }
    }

    /// Wait for the server's answer to the exec request.
    async fn await_reply(&mut self) -> Result<()> {
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Success) => return Ok(()),
                Some(ChannelMsg::Failure) => return Err(Error::transport("exec rejected")),
                Some(ChannelMsg::Close) | None => return Err(Error::ConnectionClosed),
                // Output before the reply means the command is running.
                Some(msg @ ChannelMsg::Data { .. }) => {
                    self.record(msg);
                    return Ok(());
                }
                Some(msg) => self.record(msg),
            }
        }
    }

    /// Fold one channel message into the buffered state.
    fn record(&mut self, msg: ChannelMsg) {
        match msg {
            ChannelMsg::Data { data } => self.pending.extend_from_slice(&data),
            ChannelMsg::ExtendedData { data, ext } => {
                debug!(ext, stderr = %String::from_utf8_lossy(&data).trim_end(), "Remote stderr");
            }
            ChannelMsg::ExitStatus { exit_status } => self.exit_status = Some(exit_status),
            ChannelMsg::Eof | ChannelMsg::Close => self.eof = true,
            _ => {}
        }
    }
}

#[async_trait]
impl ExecChannel for SshExecChannel {
    async fn read(&mut self, max: usize) -> Result<Vec<u8>> {
        while self.pending.is_empty() && !self.eof {
            match self.channel.wait().await {
                Some(msg) => self.record(msg),
                None => self.eof = true,
            }
        }
        Ok(take_prefix(&mut self.pending, max))
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.channel
            .data(data)
            .await
            .map_err(ssh_error("failed to write to SSH channel"))
    }

    async fn send_eof(&mut self) -> Result<()> {
        self.channel
            .eof()
            .await
            .map_err(ssh_error("failed to send EOF"))
    }

    async fn exit_status(&mut self) -> Result<Option<u32>> {
        while let Some(msg) = self.channel.wait().await {
            let closed = matches!(msg, ChannelMsg::Close);
            self.record(msg);
            if closed {
                break;
            }
        }
        self.eof = true;
        Ok(self.exit_status)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.channel
            .close()
            .await
            .map_err(ssh_error("failed to close SSH channel"))
    }
}

/// Remove and return at most `max` bytes from the front of `buf`.
fn take_prefix(buf: &mut Vec<u8>, max: usize) -> Vec<u8> {
    if buf.len() <= max {
        std::mem::take(buf)
    } else {
        let rest = buf.split_off(max);
        std::mem::replace(buf, rest)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_prefix_bounds_reads() {
        let mut buf = b"MOSH CONNECT".to_vec();
        assert_eq!(take_prefix(&mut buf, 4), b"MOSH");
        assert_eq!(buf, b" CONNECT");
        assert_eq!(take_prefix(&mut buf, 100), b" CONNECT");
        assert!(buf.is_empty());
        assert!(take_prefix(&mut buf, 4).is_empty());
    }

    #[test]
    fn identity_files_follow_preference_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("id_rsa"), "rsa").unwrap();
        std::fs::write(dir.path().join("id_ed25519"), "ed25519").unwrap();
        std::fs::write(dir.path().join("config"), "Host *").unwrap();

        let files = identity_files_in(dir.path());
        assert_eq!(
            files,
            vec![dir.path().join("id_ed25519"), dir.path().join("id_rsa")]
        );
    }

    #[test]
    fn missing_ssh_dir_has_no_identities() {
        let dir = tempfile::tempdir().unwrap();
        assert!(identity_files_in(&dir.path().join("nope")).is_empty());
    }

    #[test]
    fn unreadable_key_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_ed25519");
        std::fs::write(&path, "not a key").unwrap();
        assert!(load_key(&path).is_err());
    }

    #[test]
    fn skip_host_key_check_accepts_any_key() {
        let handler = SshHandler {
            host: "example.com".into(),
            port: 22,
            skip_host_key_check: true,
            known_hosts: None,
        };
        let key = russh::keys::parse_public_key_base64(
            "AAAAC3NzaC1lZDI1NTE5AAAAIJdD7y3aLq454yWBdwLWbieU1ebz9/cu7/QEXn9OIeZJ",
        )
        .unwrap();
        assert!(handler.verify(&key));
    }

    #[test]
    fn unknown_host_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let known_hosts = dir.path().join("known_hosts");
        std::fs::write(&known_hosts, "").unwrap();
        let handler = SshHandler {
            host: "example.com".into(),
            port: 22,
            skip_host_key_check: false,
            known_hosts: Some(known_hosts),
        };
        let key = russh::keys::parse_public_key_base64(
            "AAAAC3NzaC1lZDI1NTE5AAAAIJdD7y3aLq454yWBdwLWbieU1ebz9/cu7/QEXn9OIeZJ",
        )
        .unwrap();
        assert!(!handler.verify(&key));
    }
}
