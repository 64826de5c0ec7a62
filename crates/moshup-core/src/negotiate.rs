//! Session negotiation controller.
//!
//! Turns [`ClientParameters`] and a [`HostConfig`] into a complete
//! [`ServerAnnouncement`]:
//!
//! - With a pre-shared key, no connection is made; the UDP port must be given.
//! - Otherwise the host is dialed, the bootstrap strategies run in order, and
//!   the connection is closed again whatever the result.
//!
//! Negotiation can be cancelled at any suspension point (dial, exec, read)
//! through a [`CancellationToken`]. A cancelled negotiation always reports
//! [`Error::Cancelled`], never a success or exhaustion.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bootstrap::{
    BootstrapStrategy, Orchestrator, PushStaticServer, ServerAnnouncement, SessionKey,
    UseServerOnPath,
};
use crate::error::{Error, Result};
use crate::params::{ClientParameters, HostConfig, NegotiationConfig, UdpPortSpec};
use crate::transport::{Connection, Dialer};

/// Terminal result of one negotiation.
pub type NegotiationOutcome = Result<ServerAnnouncement>;

/// Build the strategy queue for these parameters.
///
/// The server on `$PATH` (or the configured path) is always tried first; a
/// configured static binary is pushed only when that fails.
pub fn strategies_for(
    params: &ClientParameters,
    config: &NegotiationConfig,
) -> Vec<Box<dyn BootstrapStrategy>> {
    let mut strategies: Vec<Box<dyn BootstrapStrategy>> =
        vec![Box::new(UseServerOnPath::new(params.server_path()))];
    if let Some(local) = params.static_server() {
        strategies.push(Box::new(
            PushStaticServer::new(local.clone()).with_timeout(config.upload_timeout),
        ));
    }
    strategies
}

/// Drives negotiations over a [`Dialer`].
#[derive(Clone)]
pub struct Negotiator {
    dialer: Arc<dyn Dialer>,
    config: NegotiationConfig,
}

impl Negotiator {
    pub fn new(dialer: Arc<dyn Dialer>, config: NegotiationConfig) -> Self {
        Self { dialer, config }
    }

    pub fn config(&self) -> &NegotiationConfig {
        &self.config
    }

    /// Run one negotiation to completion or cancellation.
    pub async fn negotiate(
        &self,
        params: &ClientParameters,
        host: &HostConfig,
        cancel: &CancellationToken,
    ) -> NegotiationOutcome {
        if let Some(key) = params.pre_shared_key() {
            return preshared(key, params, host);
        }

        if cancel.is_cancelled() {
            info!(host = %host.hostname, "Negotiation cancelled before dial");
            return Err(Error::Cancelled);
        }

        info!(host = %host.hostname, port = host.port, "Connecting");
        let dial = tokio::time::timeout(self.config.dial_timeout, self.dialer.dial(host));
        let mut conn = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(host = %host.hostname, "Negotiation cancelled during dial");
                return Err(Error::Cancelled);
            }
            result = dial => match result {
                Ok(Ok(conn)) => conn,
                Ok(Err(e)) => {
                    warn!(host = %host.hostname, error = %e, "Dial failed");
                    return Err(e);
                }
                Err(_) => {
                    warn!(host = %host.hostname, timeout = ?self.config.dial_timeout, "Dial timed out");
                    return Err(Error::Timeout);
                }
            },
        };
        debug!(peer = %conn.peer_ip(), "Connected");

        let mut orchestrator = Orchestrator::new(
            strategies_for(params, &self.config),
            params.server_args(),
            &self.config,
        );
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = orchestrator.run(conn.as_mut()) => result,
        };

        self.disconnect(conn.as_mut()).await;

        match &outcome {
            Ok(announcement) => info!(
                host = %host.hostname,
                remote = %announcement.remote,
                port = announcement.udp_port,
                "Negotiation succeeded"
            ),
            Err(Error::Cancelled) => info!(
                host = %host.hostname,
                attempted = ?orchestrator.attempted(),
                "Negotiation cancelled"
            ),
            Err(Error::StrategyExhausted { .. }) => warn!(
                host = %host.hostname,
                attempted = ?orchestrator.attempted(),
                "Negotiation exhausted all strategies"
            ),
            Err(e) => warn!(host = %host.hostname, error = %e, "Negotiation failed"),
        }
        outcome
    }

    /// Run a negotiation on its own task.
    pub fn spawn(&self, params: ClientParameters, host: HostConfig) -> NegotiationHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let negotiator = self.clone();
        let task =
            tokio::spawn(async move { negotiator.negotiate(&params, &host, &token).await });
        NegotiationHandle { cancel, task }
    }

    async fn disconnect(&self, conn: &mut dyn Connection) {
        if tokio::time::timeout(self.config.disconnect_timeout, conn.disconnect())
            .await
            .is_err()
        {
            warn!(timeout = ?self.config.disconnect_timeout, "Disconnect timed out");
        }
    }
}

impl std::fmt::Debug for Negotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn preshared(key: &SessionKey, params: &ClientParameters, host: &HostConfig) -> NegotiationOutcome {
    let port = match params.udp_port() {
        Some(UdpPortSpec::Single(port)) => port,
        Some(UdpPortSpec::Range(..)) => {
            return Err(Error::configuration(
                "MOSH_KEY needs a single UDP port, not a range (-p)",
            ));
        }
        None => {
            return Err(Error::configuration(
                "if MOSH_KEY is set a UDP port is required (-p)",
            ));
        }
    };
    info!(host = %host.hostname, port, "Using pre-shared session key, skipping SSH");
    Ok(ServerAnnouncement::preshared(key.clone(), port, host.hostname.clone()))
}

/// A negotiation running on a background task.
///
/// The handle may be shared by reference across threads; cancellation goes
/// through the token, so the task still closes its connection on abort.
#[derive(Debug)]
pub struct NegotiationHandle {
    cancel: CancellationToken,
    task: JoinHandle<NegotiationOutcome>,
}

impl NegotiationHandle {
    /// Request cancellation. Has no effect once the outcome is decided.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this negotiation.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the outcome.
    pub async fn outcome(self) -> NegotiationOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(Error::Cancelled),
        }
    }
}
