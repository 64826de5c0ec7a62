//! Scripted in-memory SSH transport.
//!
//! A [`MockDialer`] is loaded with one [`ExecScript`] per expected exec
//! request. Every transport call is appended to a shared [`TransportLog`] so
//! tests can assert what was dialed, executed, read, closed and dropped.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use moshup_core::error::{Error, Result};
use moshup_core::params::HostConfig;
use moshup_core::transport::{Connection, Dialer, ExecChannel};

/// Default peer address reported by mock connections.
pub const MOCK_PEER_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Dial { host: String },
    Exec { command: String },
    Read { bytes: usize },
    Write { bytes: usize },
    SendEof,
    ChannelClosed { command: String },
    ChannelDropped { command: String },
    Disconnect,
}

/// Shared, ordered record of transport calls.
#[derive(Debug, Clone, Default)]
pub struct TransportLog {
    events: Arc<Mutex<Vec<TransportEvent>>>,
}

impl TransportLog {
    fn push(&self, event: TransportEvent) {
        lock(&self.events).push(event);
    }

    /// All events so far.
    pub fn events(&self) -> Vec<TransportEvent> {
        lock(&self.events).clone()
    }

    /// Number of dial attempts.
    pub fn dials(&self) -> usize {
        self.count(|e| matches!(e, TransportEvent::Dial { .. }))
    }

    /// Commands passed to exec, in order.
    pub fn execs(&self) -> Vec<String> {
        lock(&self.events)
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Exec { command } => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    /// Total bytes written to exec channels.
    pub fn bytes_written(&self) -> usize {
        lock(&self.events)
            .iter()
            .map(|e| match e {
                TransportEvent::Write { bytes } => *bytes,
                _ => 0,
            })
            .sum()
    }

    /// Exec channels that have not been dropped yet.
    pub fn open_channels(&self) -> usize {
        let opened = self.count(|e| matches!(e, TransportEvent::Exec { .. }));
        let dropped = self.count(|e| matches!(e, TransportEvent::ChannelDropped { .. }));
        opened.saturating_sub(dropped)
    }

    /// Number of disconnects.
    pub fn disconnects(&self) -> usize {
        self.count(|e| matches!(e, TransportEvent::Disconnect))
    }

    pub fn count(&self, pred: impl Fn(&TransportEvent) -> bool) -> usize {
        lock(&self.events).iter().filter(|e| pred(e)).count()
    }
}

// =============================================================================
// Scripts
// =============================================================================

/// How the mock answers one exec request.
#[derive(Debug, Clone)]
pub enum ExecScript {
    /// Exec succeeds; stdout yields these chunks, then EOF.
    Output {
        chunks: Vec<Vec<u8>>,
        exit_status: Option<u32>,
    },
    /// Exec succeeds but stdout never produces anything or closes.
    Hang,
    /// The exec request is rejected.
    Reject(String),
    /// Exec succeeds and the first read fails.
    ReadError(String),
}

impl ExecScript {
    /// Stdout is `text` in one chunk; exit status 0.
    pub fn output(text: impl AsRef<[u8]>) -> Self {
        Self::chunks([text])
    }

    /// Stdout arrives in several chunks; exit status 0.
    pub fn chunks<I, T>(chunks: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        ExecScript::Output {
            chunks: chunks.into_iter().map(|c| c.as_ref().to_vec()).collect(),
            exit_status: Some(0),
        }
    }

    /// Channel closes without output, like a shell reporting
    /// "command not found" on stderr.
    pub fn not_found() -> Self {
        ExecScript::Output {
            chunks: Vec::new(),
            exit_status: Some(127),
        }
    }

    /// No output; the command exits with `status`.
    pub fn exit(status: u32) -> Self {
        ExecScript::Output {
            chunks: Vec::new(),
            exit_status: Some(status),
        }
    }

    pub fn reject(message: impl Into<String>) -> Self {
        ExecScript::Reject(message.into())
    }

    pub fn read_error(message: impl Into<String>) -> Self {
        ExecScript::ReadError(message.into())
    }
}

#[derive(Debug, Clone)]
enum DialBehavior {
    Connect,
    Fail(String),
    AuthFail,
    Hang,
}

// =============================================================================
// Dialer
// =============================================================================

/// A [`Dialer`] that hands out scripted connections.
#[derive(Debug, Clone)]
pub struct MockDialer {
    log: TransportLog,
    scripts: Arc<Mutex<VecDeque<ExecScript>>>,
    peer_ip: IpAddr,
    behavior: DialBehavior,
}

impl Default for MockDialer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDialer {
    pub fn new() -> Self {
        Self {
            log: TransportLog::default(),
            scripts: Arc::new(Mutex::new(VecDeque::new())),
            peer_ip: MOCK_PEER_IP,
            behavior: DialBehavior::Connect,
        }
    }

    /// Queue the answer to the next exec request.
    pub fn exec(self, script: ExecScript) -> Self {
        lock(&self.scripts).push_back(script);
        self
    }

    /// Report this address as the connection's peer.
    pub fn with_peer_ip(mut self, ip: IpAddr) -> Self {
        self.peer_ip = ip;
        self
    }

    /// Fail every dial with a transport error.
    pub fn fail_dial(mut self, message: impl Into<String>) -> Self {
        self.behavior = DialBehavior::Fail(message.into());
        self
    }

    /// Fail every dial with an authentication error.
    pub fn fail_auth(mut self) -> Self {
        self.behavior = DialBehavior::AuthFail;
        self
    }

    /// Never complete a dial.
    pub fn hang_dial(mut self) -> Self {
        self.behavior = DialBehavior::Hang;
        self
    }

    /// Shared handle on the call log.
    pub fn log(&self) -> TransportLog {
        self.log.clone()
    }

    /// Scripts not yet consumed.
    pub fn unused_scripts(&self) -> usize {
        lock(&self.scripts).len()
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, host: &HostConfig) -> Result<Box<dyn Connection>> {
        self.log.push(TransportEvent::Dial {
            host: host.address(),
        });
        match &self.behavior {
            DialBehavior::Connect => Ok(Box::new(MockConnection {
                log: self.log.clone(),
                scripts: Arc::clone(&self.scripts),
                peer_ip: self.peer_ip,
            })),
            DialBehavior::Fail(message) => Err(Error::transport(message.clone())),
            DialBehavior::AuthFail => Err(Error::AuthenticationFailed),
            DialBehavior::Hang => std::future::pending().await,
        }
    }
}

// =============================================================================
// Connection and Channel
// =============================================================================

/// A scripted connection.
#[derive(Debug)]
pub struct MockConnection {
    log: TransportLog,
    scripts: Arc<Mutex<VecDeque<ExecScript>>>,
    peer_ip: IpAddr,
}

#[async_trait]
impl Connection for MockConnection {
    async fn exec(&mut self, command: &str) -> Result<Box<dyn ExecChannel>> {
        self.log.push(TransportEvent::Exec {
            command: command.to_string(),
        });
        let script = lock(&self.scripts).pop_front();
        let channel = |mode| MockChannel {
            command: command.to_string(),
            log: self.log.clone(),
            mode,
            closed: false,
        };

        match script {
            None => {
                // Count it as dropped so open_channels() stays accurate.
                self.log.push(TransportEvent::ChannelDropped {
                    command: command.to_string(),
                });
                Err(Error::transport(format!("unscripted exec: {}", command)))
            }
            Some(ExecScript::Reject(message)) => {
                self.log.push(TransportEvent::ChannelDropped {
                    command: command.to_string(),
                });
                Err(Error::transport(message))
            }
            Some(ExecScript::Output {
                chunks,
                exit_status,
            }) => Ok(Box::new(channel(ChannelMode::Output {
                chunks: chunks.into(),
                exit_status,
            }))),
            Some(ExecScript::Hang) => Ok(Box::new(channel(ChannelMode::Hang))),
            Some(ExecScript::ReadError(message)) => {
                Ok(Box::new(channel(ChannelMode::ReadError(message))))
            }
        }
    }

    fn peer_ip(&self) -> IpAddr {
        self.peer_ip
    }

    async fn disconnect(&mut self) {
        self.log.push(TransportEvent::Disconnect);
    }
}

#[derive(Debug)]
enum ChannelMode {
    Output {
        chunks: VecDeque<Vec<u8>>,
        exit_status: Option<u32>,
    },
    Hang,
    ReadError(String),
}

/// A scripted exec channel. Records its own drop.
#[derive(Debug)]
pub struct MockChannel {
    command: String,
    log: TransportLog,
    mode: ChannelMode,
    closed: bool,
}

#[async_trait]
impl ExecChannel for MockChannel {
    async fn read(&mut self, max: usize) -> Result<Vec<u8>> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        match &mut self.mode {
            ChannelMode::Output { chunks, .. } => {
                let mut chunk = chunks.pop_front().unwrap_or_default();
                if chunk.len() > max {
                    let rest = chunk.split_off(max);
                    chunks.push_front(rest);
                }
                self.log.push(TransportEvent::Read { bytes: chunk.len() });
                Ok(chunk)
            }
            ChannelMode::Hang => std::future::pending().await,
            ChannelMode::ReadError(message) => Err(Error::transport(message.clone())),
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        self.log.push(TransportEvent::Write { bytes: data.len() });
        Ok(())
    }

    async fn send_eof(&mut self) -> Result<()> {
        self.log.push(TransportEvent::SendEof);
        Ok(())
    }

    async fn exit_status(&mut self) -> Result<Option<u32>> {
        match &self.mode {
            ChannelMode::Output { exit_status, .. } => Ok(*exit_status),
            ChannelMode::Hang => std::future::pending().await,
            ChannelMode::ReadError(message) => Err(Error::transport(message.clone())),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.log.push(TransportEvent::ChannelClosed {
                command: self.command.clone(),
            });
        }
        Ok(())
    }
}

impl Drop for MockChannel {
    fn drop(&mut self) {
        self.log.push(TransportEvent::ChannelDropped {
            command: self.command.clone(),
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
