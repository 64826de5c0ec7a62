//! The `mosh-server` startup announcement.
//!
//! Once `mosh-server new` has bound its UDP socket it prints, on stdout:
//!
//! ```text
//!
//! MOSH CONNECT 60001 4NeCCgvZFe2RnPgrcU1PQw
//! ```
//!
//! and detaches. The port is the UDP port the session will use; the last
//! token is the 16-byte session key in unpadded standard base64. The remote
//! IP is not part of the line; the caller fills it in from the connection.
//!
//! Everything here is pure and must hold up against arbitrary bytes, since
//! the output comes from an untrusted remote host.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::constants::{ANNOUNCEMENT_PREFIX, MOSH_KEY_B64_LEN, MOSH_KEY_LEN};

/// Longest slice of untrusted output echoed back in an error message.
const ERROR_EXCERPT_LEN: usize = 80;

/// Why a chunk of server output is not a usable announcement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnnouncementError {
    /// Nothing but whitespace was received.
    #[error("no output from remote server")]
    Empty,

    /// Output was present but no line starts with `MOSH CONNECT`.
    #[error("unexpected server output: {line:?}")]
    UnexpectedLine { line: String },

    /// `MOSH CONNECT` with nothing after it.
    #[error("announcement is missing the UDP port")]
    MissingPort,

    /// Port token is not a decimal number in 0..=65535.
    #[error("invalid UDP port in announcement: {value:?}")]
    InvalidPort { value: String },

    /// Port present, key absent.
    #[error("announcement is missing the session key")]
    MissingKey,

    /// Key token is not a 22-character base64 encoding of 16 bytes.
    #[error("invalid session key: {reason}")]
    InvalidKey { reason: String },

    /// Extra tokens after the key.
    #[error("unexpected data after session key: {extra:?}")]
    TrailingTokens { extra: String },
}

// =============================================================================
// Session Key
// =============================================================================

/// The AES-128 key shared between `mosh-server` and `mosh-client`.
///
/// Parsed from (and rendered back to) the exact 22-character token that
/// `mosh-server` prints and `mosh-client` expects in `MOSH_KEY`.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; MOSH_KEY_LEN]);

impl SessionKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; MOSH_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; MOSH_KEY_LEN] {
        &self.0
    }

    /// The key in `mosh-server` wire form (unpadded standard base64).
    pub fn to_base64(&self) -> String {
        STANDARD_NO_PAD.encode(self.0)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

impl FromStr for SessionKey {
    type Err = AnnouncementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != MOSH_KEY_B64_LEN {
            return Err(AnnouncementError::InvalidKey {
                reason: format!("expected {} characters, got {}", MOSH_KEY_B64_LEN, s.len()),
            });
        }
        if !s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
        {
            return Err(AnnouncementError::InvalidKey {
                reason: "contains characters outside the base64 alphabet".to_string(),
            });
        }

        let bytes = STANDARD_NO_PAD
            .decode(s)
            .map_err(|e| AnnouncementError::InvalidKey {
                reason: e.to_string(),
            })?;
        let key: [u8; MOSH_KEY_LEN] =
            bytes
                .try_into()
                .map_err(|v: Vec<u8>| AnnouncementError::InvalidKey {
                    reason: format!("expected {} bytes, got {}", MOSH_KEY_LEN, v.len()),
                })?;

        Ok(Self(key))
    }
}

impl Serialize for SessionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

// =============================================================================
// Announcement Types
// =============================================================================

/// What the announcement line itself carries: port and key, no address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialAnnouncement {
    /// UDP port `mosh-server` is listening on.
    pub udp_port: u16,
    /// Shared session key.
    pub key: SessionKey,
}

impl PartialAnnouncement {
    /// Parse raw exec-channel output.
    ///
    /// Blank lines and unrelated lines (login banners, shell noise) before
    /// the announcement are skipped. The first line whose leading tokens are
    /// `MOSH CONNECT` must be well formed; if there is no such line, the
    /// first non-blank line is reported as unexpected.
    pub fn parse(raw: &[u8]) -> Result<Self, AnnouncementError> {
        let text = String::from_utf8_lossy(raw);
        let mut first_seen: Option<&str> = None;

        for line in text.lines().map(str::trim) {
            if line.is_empty() {
                continue;
            }
            if is_announcement_line(line) {
                return Self::parse_line(line);
            }
            first_seen.get_or_insert(line);
        }

        match first_seen {
            Some(line) => Err(AnnouncementError::UnexpectedLine {
                line: excerpt(line),
            }),
            None => Err(AnnouncementError::Empty),
        }
    }

    /// Parse exactly one line of the form `MOSH CONNECT <port> <key>`.
    pub fn parse_line(line: &str) -> Result<Self, AnnouncementError> {
        let mut tokens = after_prefix(line).ok_or_else(|| AnnouncementError::UnexpectedLine {
            line: excerpt(line.trim()),
        })?;

        let udp_port = parse_udp_port(tokens.next().ok_or(AnnouncementError::MissingPort)?)?;
        let key = tokens
            .next()
            .ok_or(AnnouncementError::MissingKey)?
            .parse::<SessionKey>()?;

        if let Some(extra) = tokens.next() {
            return Err(AnnouncementError::TrailingTokens {
                extra: excerpt(extra),
            });
        }

        Ok(Self { udp_port, key })
    }
}

/// Where the `mosh-client` should send its datagrams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEndpoint {
    /// Address observed on the SSH connection (or announced explicitly).
    Ip(IpAddr),
    /// Host name left for the session transport to resolve. Only produced
    /// when negotiation was skipped with a pre-shared key.
    Host(String),
}

impl fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteEndpoint::Ip(ip) => write!(f, "{}", ip),
            RemoteEndpoint::Host(host) => f.write_str(host),
        }
    }
}

impl Serialize for RemoteEndpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Complete session parameters, ready for the UDP session transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerAnnouncement {
    /// Shared session key.
    pub key: SessionKey,
    /// Remote UDP port.
    pub udp_port: u16,
    /// Remote endpoint; never missing.
    pub remote: RemoteEndpoint,
}

impl ServerAnnouncement {
    /// Complete a parsed announcement with the connection's peer address.
    pub fn from_partial(partial: PartialAnnouncement, peer_ip: IpAddr) -> Self {
        Self {
            key: partial.key,
            udp_port: partial.udp_port,
            remote: RemoteEndpoint::Ip(peer_ip),
        }
    }

    /// Parameters supplied up front by the user, addressed by host name.
    pub fn preshared(key: SessionKey, udp_port: u16, host: impl Into<String>) -> Self {
        Self {
            key,
            udp_port,
            remote: RemoteEndpoint::Host(host.into()),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// True if `buf` holds at least one newline-terminated announcement line.
///
/// Used to stop reading the exec channel as soon as the server has spoken,
/// without waiting for it to close stdout.
pub fn contains_announcement(buf: &[u8]) -> bool {
    let Some(end) = buf.iter().rposition(|&b| b == b'\n') else {
        return false;
    };
    String::from_utf8_lossy(&buf[..end])
        .lines()
        .any(|line| is_announcement_line(line.trim()))
}

/// Parse a decimal UDP port (0..=65535, digits only, no sign).
pub fn parse_udp_port(value: &str) -> Result<u16, AnnouncementError> {
    let invalid = || AnnouncementError::InvalidPort {
        value: excerpt(value),
    };
    if value.is_empty() || value.len() > 5 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    value.parse::<u16>().map_err(|_| invalid())
}

/// Tokens following [`ANNOUNCEMENT_PREFIX`], or `None` if `line` does not
/// start with it.
fn after_prefix(line: &str) -> Option<std::str::SplitAsciiWhitespace<'_>> {
    let mut tokens = line.split_ascii_whitespace();
    let matched = ANNOUNCEMENT_PREFIX
        .split_ascii_whitespace()
        .all(|want| tokens.next() == Some(want));
    matched.then_some(tokens)
}

fn is_announcement_line(line: &str) -> bool {
    after_prefix(line).is_some()
}

fn excerpt(s: &str) -> String {
    s.chars().take(ERROR_EXCERPT_LEN).collect()
}

// =============================================================================
// Tests
// =============================================================================
