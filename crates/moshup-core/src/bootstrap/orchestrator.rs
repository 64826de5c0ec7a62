//! Sequential driver for the bootstrap strategy queue.
//!
//! States: `Pending -> Running(i) -> Succeeded | ExhaustedFailed`, plus
//! `Failed` when a transport error stops the run. Strategies are popped
//! front-to-back and each runs at most once. The exec channel opened for a
//! strategy is closed before the next one starts.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::announcement::{PartialAnnouncement, ServerAnnouncement, contains_announcement};
use super::strategy::{BootstrapStrategy, StrategyError};
use crate::error::{Error, Result};
use crate::params::NegotiationConfig;
use crate::transport::{Connection, ExecChannel};

/// Where the orchestrator is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Not started.
    Pending,
    /// Running the strategy at this index.
    Running(usize),
    /// An announcement was parsed.
    Succeeded,
    /// Every strategy failed.
    ExhaustedFailed,
    /// A transport error ended the run.
    Failed,
}

impl OrchestratorState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestratorState::Succeeded | OrchestratorState::ExhaustedFailed | OrchestratorState::Failed
        )
    }
}

/// Runs bootstrap strategies in order until one yields an announcement.
pub struct Orchestrator {
    queue: VecDeque<Box<dyn BootstrapStrategy>>,
    state: OrchestratorState,
    server_args: String,
    max_bytes: usize,
    read_timeout: Duration,
    attempted: Vec<String>,
    failures: Vec<String>,
}

impl Orchestrator {
    /// Create an orchestrator. `server_args` is appended to the executable
    /// each strategy returns.
    pub fn new(
        strategies: impl IntoIterator<Item = Box<dyn BootstrapStrategy>>,
        server_args: impl Into<String>,
        config: &NegotiationConfig,
    ) -> Self {
        Self {
            queue: strategies.into_iter().collect(),
            state: OrchestratorState::Pending,
            server_args: server_args.into(),
            max_bytes: config.max_announcement_bytes,
            read_timeout: config.announcement_timeout,
            attempted: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Names of the strategies started so far, in order.
    pub fn attempted(&self) -> &[String] {
        &self.attempted
    }

    /// Strategies not yet started.
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    /// Drive the queue over `conn`.
    ///
    /// Returns the first announcement, with the remote IP taken from the
    /// connection's peer address. Unusable strategies fall through to the
    /// next one; transport errors return immediately.
    pub async fn run(&mut self, conn: &mut dyn Connection) -> Result<ServerAnnouncement> {
        if self.state != OrchestratorState::Pending {
            return Err(Error::configuration("bootstrap orchestrator can only run once"));
        }

        let mut index = 0;
        while let Some(strategy) = self.queue.pop_front() {
            self.state = OrchestratorState::Running(index);
            self.attempted.push(strategy.name().to_string());
            info!(strategy = strategy.name(), index, "Trying bootstrap strategy");

            match self.try_strategy(strategy.as_ref(), conn).await {
                Ok(partial) => {
                    let announcement = ServerAnnouncement::from_partial(partial, conn.peer_ip());
                    self.state = OrchestratorState::Succeeded;
                    info!(
                        strategy = strategy.name(),
                        index,
                        port = announcement.udp_port,
                        remote = %announcement.remote,
                        "Remote server announced session"
                    );
                    return Ok(announcement);
                }
                Err(StrategyError::Unavailable { reason }) => {
                    warn!(strategy = strategy.name(), index, %reason, "Bootstrap strategy failed");
                    self.failures.push(format!("{}: {}", strategy.name(), reason));
                }
                Err(StrategyError::Transport(e)) => {
                    warn!(strategy = strategy.name(), index, error = %e, "Transport failed during bootstrap");
                    self.state = OrchestratorState::Failed;
                    return Err(e);
                }
            }
            index += 1;
        }

        self.state = OrchestratorState::ExhaustedFailed;
        warn!(attempts = self.failures.len(), "All bootstrap strategies exhausted");
        Err(Error::StrategyExhausted {
            attempts: self.failures.clone(),
        })
    }

    async fn try_strategy(
        &self,
        strategy: &dyn BootstrapStrategy,
        conn: &mut dyn Connection,
    ) -> std::result::Result<PartialAnnouncement, StrategyError> {
        let executable = strategy.attempt(conn).await?;
        let command = format!("{} {}", executable, self.server_args);
        debug!(%command, "Starting remote server");

        let mut channel = conn.exec(&command).await?;
        let output = self.read_announcement(channel.as_mut()).await;
        if let Err(e) = channel.close().await {
            debug!(error = %e, "Failed to close server channel");
        }
        drop(channel);

        let output = output?;
        debug!(bytes = output.len(), "Read server output");
        if output.is_empty() {
            return Err(StrategyError::unavailable(
                "no output before channel closed (server not installed?)",
            ));
        }

        PartialAnnouncement::parse(&output)
            .map_err(|e| StrategyError::unavailable(format!("unusable server output: {}", e)))
    }

    /// Read until EOF, a complete announcement line, or the byte bound.
    async fn read_announcement(
        &self,
        channel: &mut dyn ExecChannel,
    ) -> std::result::Result<Vec<u8>, StrategyError> {
        let max = self.max_bytes;
        let read_loop = async move {
            let mut buf = Vec::new();
            while buf.len() < max {
                let chunk = channel.read(max - buf.len()).await?;
                if chunk.is_empty() {
                    break;
                }
                buf.extend_from_slice(&chunk);
                if contains_announcement(&buf) {
                    break;
                }
            }
            buf.truncate(max);
            Ok::<_, Error>(buf)
        };

        match tokio::time::timeout(self.read_timeout, read_loop).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StrategyError::unavailable(format!(
                "no announcement within {:?}",
                self.read_timeout
            ))),
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state)
            .field("remaining", &self.queue.len())
            .field("attempted", &self.attempted)
            .finish()
    }
}
