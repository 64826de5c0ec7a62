//! Ways of obtaining a runnable `mosh-server` on the remote host.
//!
//! A strategy yields the executable part of the server command line; the
//! orchestrator appends the session arguments, runs it, and parses the
//! announcement. New strategies only need to implement [`BootstrapStrategy`].

use std::borrow::Cow;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::constants::{
    DEFAULT_MOSH_SERVER, DEFAULT_STATIC_SERVER_PATH, UPLOAD_CHUNK, UPLOAD_TIMEOUT,
};
use crate::error::Error;
use crate::transport::{Connection, ExecChannel};

/// Why a strategy produced no command line.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// This strategy cannot work here; the next one may.
    #[error("{reason}")]
    Unavailable { reason: String },

    /// The connection failed; no further strategy can run on it.
    #[error(transparent)]
    Transport(#[from] Error),
}

impl StrategyError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        StrategyError::Unavailable {
            reason: reason.into(),
        }
    }
}

/// One way of locating or installing the remote session binary.
#[async_trait]
pub trait BootstrapStrategy: Send + Sync {
    /// Short name used in logs and failure summaries.
    fn name(&self) -> &str;

    /// Prepare the remote side and return the server executable as a shell
    /// word, ready to be followed by its arguments.
    async fn attempt(&self, conn: &mut dyn Connection) -> Result<String, StrategyError>;
}

// =============================================================================
// Server on PATH
// =============================================================================

/// Assume `mosh-server` (or a user-supplied path) is already installed.
///
/// The path is used unquoted so the remote shell can expand `~` and `$HOME`.
#[derive(Debug, Clone)]
pub struct UseServerOnPath {
    path: String,
}

impl UseServerOnPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for UseServerOnPath {
    fn default() -> Self {
        Self::new(DEFAULT_MOSH_SERVER)
    }
}

#[async_trait]
impl BootstrapStrategy for UseServerOnPath {
    fn name(&self) -> &str {
        "server-on-path"
    }

    async fn attempt(&self, _conn: &mut dyn Connection) -> Result<String, StrategyError> {
        Ok(self.path.clone())
    }
}

// =============================================================================
// Push Static Server
// =============================================================================

/// Upload a local static `mosh-server` and run that copy.
///
/// The upload goes to `<remote_path>.part` and is renamed only after the
/// remote `cat` exits cleanly, so an interrupted push never leaves a
/// truncated executable at `remote_path`. The whole transfer, up to the
/// installer's exit status, is bounded by the upload timeout.
#[derive(Debug, Clone)]
pub struct PushStaticServer {
    local: PathBuf,
    remote_path: String,
    timeout: Duration,
}

impl PushStaticServer {
    pub fn new(local: impl Into<PathBuf>) -> Self {
        Self {
            local: local.into(),
            remote_path: DEFAULT_STATIC_SERVER_PATH.to_string(),
            timeout: UPLOAD_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_remote_path(mut self, path: impl Into<String>) -> Self {
        self.remote_path = path.into();
        self
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    /// Remote shell command that installs stdin at `remote_path`.
    pub fn upload_command(&self) -> String {
        let target = quote(&self.remote_path);
        let part = quote(&format!("{}.part", self.remote_path));
        let install = format!(
            "cat > {part} && chmod 755 {part} && mv -f {part} {target}",
            part = part,
            target = target
        );
        match self.remote_path.rsplit_once('/') {
            Some((dir, _)) if !dir.is_empty() => format!("mkdir -p {} && {}", quote(dir), install),
            _ => install,
        }
    }

    async fn upload(&self, channel: &mut dyn ExecChannel, data: &[u8]) -> Result<String, StrategyError> {
        for chunk in data.chunks(UPLOAD_CHUNK) {
            channel.write_all(chunk).await?;
        }
        channel.send_eof().await?;

        match channel.exit_status().await? {
            Some(0) => Ok(quote(&self.remote_path)),
            Some(code) => Err(StrategyError::unavailable(format!(
                "upload to {} exited with status {}",
                self.remote_path, code
            ))),
            None => Err(StrategyError::unavailable(format!(
                "upload to {} ended without an exit status",
                self.remote_path
            ))),
        }
    }
}

#[async_trait]
impl BootstrapStrategy for PushStaticServer {
    fn name(&self) -> &str {
        "push-static-server"
    }

    async fn attempt(&self, conn: &mut dyn Connection) -> Result<String, StrategyError> {
        let data = tokio::fs::read(&self.local).await.map_err(|e| {
            StrategyError::unavailable(format!("cannot read {}: {}", self.local.display(), e))
        })?;
        if data.is_empty() {
            return Err(StrategyError::unavailable(format!(
                "{} is empty",
                self.local.display()
            )));
        }

        debug!(
            local = %self.local.display(),
            remote = %self.remote_path,
            bytes = data.len(),
            "Pushing static server"
        );

        let mut channel = conn.exec(&self.upload_command()).await?;
        let result = match tokio::time::timeout(self.timeout, self.upload(channel.as_mut(), &data))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(StrategyError::unavailable(format!(
                "upload to {} timed out after {:?}",
                self.remote_path, self.timeout
            ))),
        };
        if let Err(e) = channel.close().await {
            warn!(error = %e, "Failed to close upload channel");
        }
        result
    }
}

fn quote(arg: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(arg)).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_names() {
        assert_eq!(UseServerOnPath::default().name(), "server-on-path");
        assert_eq!(PushStaticServer::new("/tmp/x").name(), "push-static-server");
        assert_eq!(
            PushStaticServer::new("/tmp/x").remote_path(),
            ".local/share/moshup/mosh-server"
        );
    }

    #[test]
    fn upload_command_stages_then_renames() {
        let push = PushStaticServer::new("/opt/mosh-server");
        assert_eq!(
            push.upload_command(),
            "mkdir -p .local/share/moshup && \
             cat > .local/share/moshup/mosh-server.part && \
             chmod 755 .local/share/moshup/mosh-server.part && \
             mv -f .local/share/moshup/mosh-server.part .local/share/moshup/mosh-server"
        );
    }

    #[test]
    fn upload_command_without_directory() {
        let push = PushStaticServer::new("/opt/mosh-server").with_remote_path("mosh-server");
        assert_eq!(
            push.upload_command(),
            "cat > mosh-server.part && chmod 755 mosh-server.part && mv -f mosh-server.part mosh-server"
        );
    }

    #[test]
    fn upload_command_quotes_paths() {
        let push = PushStaticServer::new("/opt/mosh-server").with_remote_path("my bin/mosh server");
        let cmd = push.upload_command();
        assert!(cmd.starts_with("mkdir -p 'my bin' && "));
        assert!(cmd.ends_with("'my bin/mosh server'"));
    }

    #[test]
    fn transport_errors_convert() {
        let err: StrategyError = Error::ConnectionClosed.into();
        assert!(matches!(err, StrategyError::Transport(Error::ConnectionClosed)));
        assert_eq!(
            StrategyError::unavailable("not installed").to_string(),
            "not installed"
        );
    }
}
