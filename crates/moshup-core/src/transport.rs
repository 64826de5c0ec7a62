//! Transport collaborator traits.
//!
//! Negotiation only needs three capabilities from SSH: dial a host, open an
//! exec channel on the authenticated connection, and read that channel's
//! output. The russh implementation lives in `moshup-client`; tests use the
//! scripted mock in `moshup-test-utils`.
//!
//! The traits are object-safe (`async_trait`) because strategies receive the
//! connection as `&mut dyn Connection`.

use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::Result;
use crate::params::HostConfig;

/// Opens authenticated connections.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connect and authenticate to `host`.
    async fn dial(&self, host: &HostConfig) -> Result<Box<dyn Connection>>;
}

/// An authenticated connection to a remote host.
#[async_trait]
pub trait Connection: Send {
    /// Start `command` on a new exec channel.
    ///
    /// Fails with a transport error if the channel cannot be opened or the
    /// remote rejects the request.
    async fn exec(&mut self, command: &str) -> Result<Box<dyn ExecChannel>>;

    /// The remote address observed on the underlying socket.
    fn peer_ip(&self) -> IpAddr;

    /// Close the connection. Errors are logged, not returned.
    async fn disconnect(&mut self);
}

/// A running remote command.
#[async_trait]
pub trait ExecChannel: Send {
    /// Read up to `max` bytes of stdout. An empty vector means EOF.
    async fn read(&mut self, max: usize) -> Result<Vec<u8>>;

    /// Write all of `data` to the command's stdin.
    async fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Signal end of stdin.
    async fn send_eof(&mut self) -> Result<()>;

    /// Wait for the channel to finish and return the exit status, if the
    /// remote reported one.
    async fn exit_status(&mut self) -> Result<Option<u32>>;

    /// Close the channel. Safe to call more than once.
    async fn close(&mut self) -> Result<()>;
}
