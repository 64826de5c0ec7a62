//! Session transports that take over after negotiation.
//!
//! - [`MoshClientLauncher`] runs the local `mosh-client` on the terminal
//! - [`PrintHandoff`] prints the negotiated session as JSON

use std::io::Write;
use std::net::IpAddr;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use moshup_core::bootstrap::RemoteEndpoint;
use moshup_core::error::{Error, Result};
use moshup_core::handoff::{SessionHandoff, SessionTransport};

/// Resolve the endpoint to a single address for `mosh-client`.
pub async fn resolve_endpoint(remote: &RemoteEndpoint) -> Result<IpAddr> {
    match remote {
        RemoteEndpoint::Ip(ip) => Ok(*ip),
        RemoteEndpoint::Host(host) => {
            let mut addrs = tokio::net::lookup_host((host.as_str(), 0))
                .await
                .map_err(|e| Error::Launch {
                    message: format!("cannot resolve {}: {}", host, e),
                })?;
            addrs.next().map(|addr| addr.ip()).ok_or_else(|| Error::Launch {
                message: format!("{} has no addresses", host),
            })
        }
    }
}

/// Runs `mosh-client <ip> <port>` with the session key in its environment.
#[derive(Debug, Clone)]
pub struct MoshClientLauncher {
    program: PathBuf,
}

impl MoshClientLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The command that would be run, without spawning it.
    pub fn command(&self, ip: IpAddr, handoff: &SessionHandoff) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(ip.to_string())
            .arg(handoff.announcement.udp_port.to_string())
            .envs(handoff.client_env())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        cmd
    }
}

#[async_trait]
impl SessionTransport for MoshClientLauncher {
    async fn run(&self, handoff: SessionHandoff) -> Result<i32> {
        let ip = resolve_endpoint(&handoff.announcement.remote).await?;
        info!(
            program = %self.program.display(),
            ip = %ip,
            port = handoff.announcement.udp_port,
            term_size = ?handoff.term_size,
            "Starting session client"
        );

        let status = self
            .command(ip, &handoff)
            .status()
            .await
            .map_err(|e| Error::Launch {
                message: format!("cannot run {}: {}", self.program.display(), e),
            })?;
        debug!(status = %status, "Session client exited");

        Ok(status
            .code()
            .or_else(|| status.signal().map(|sig| 128 + sig))
            .unwrap_or(1))
    }
}

/// Prints the handoff as one JSON line on stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrintHandoff;

#[async_trait]
impl SessionTransport for PrintHandoff {
    async fn run(&self, handoff: SessionHandoff) -> Result<i32> {
        let json = serde_json::to_string(&handoff).map_err(|e| Error::Launch {
            message: format!("cannot encode session: {}", e),
        })?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", json)?;
        stdout.flush()?;
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moshup_core::bootstrap::ServerAnnouncement;
    use moshup_core::params::ClientParameters;
    use std::ffi::OsStr;
    use std::net::Ipv4Addr;

    const KEY: &str = "4NeCCgvZFe2RnPgrcU1PQw";

    fn handoff(remote: RemoteEndpoint) -> SessionHandoff {
        let mut announcement = ServerAnnouncement::preshared(KEY.parse().unwrap(), 60001, "x");
        announcement.remote = remote;
        SessionHandoff::new(announcement, &ClientParameters::default(), None)
    }

    #[tokio::test]
    async fn ip_endpoint_resolves_to_itself() {
        let ip = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
        assert_eq!(resolve_endpoint(&RemoteEndpoint::Ip(ip)).await.unwrap(), ip);
    }

    #[tokio::test]
    async fn literal_host_resolves_without_dns() {
        let ip = resolve_endpoint(&RemoteEndpoint::Host("127.0.0.1".into()))
            .await
            .unwrap();
        assert_eq!(ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn command_carries_endpoint_and_key() {
        let launcher = MoshClientLauncher::new("/usr/bin/mosh-client");
        let ip = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
        let cmd = launcher.command(ip, &handoff(RemoteEndpoint::Ip(ip)));
        let std_cmd = cmd.as_std();

        assert_eq!(std_cmd.get_program(), "/usr/bin/mosh-client");
        let args: Vec<_> = std_cmd.get_args().collect();
        assert_eq!(args, [OsStr::new("192.0.2.1"), OsStr::new("60001")]);
        let envs: Vec<_> = std_cmd.get_envs().collect();
        assert!(envs.contains(&(OsStr::new("MOSH_KEY"), Some(OsStr::new(KEY)))));
        assert!(envs.contains(&(
            OsStr::new("MOSH_PREDICTION_DISPLAY"),
            Some(OsStr::new("adaptive"))
        )));
    }

    #[tokio::test]
    async fn missing_client_binary_is_launch_error() {
        let launcher = MoshClientLauncher::new("/nonexistent/mosh-client");
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let err = launcher
            .run(handoff(RemoteEndpoint::Ip(ip)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Launch { .. }));
    }

    #[tokio::test]
    async fn exit_code_is_returned() {
        let launcher = MoshClientLauncher::new("false");
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let code = launcher.run(handoff(RemoteEndpoint::Ip(ip))).await.unwrap();
        assert_eq!(code, 1);
    }
}
