//! Protocol and configuration constants for moshup.

use std::time::Duration;

// =============================================================================
// Announcement Constants
// =============================================================================

/// Leading tokens of the line `mosh-server` prints once it is listening.
pub const ANNOUNCEMENT_PREFIX: &str = "MOSH CONNECT";

/// Shared session key length in bytes (AES-128).
pub const MOSH_KEY_LEN: usize = 16;

/// Length of the session key as printed by `mosh-server` (unpadded base64).
pub const MOSH_KEY_B64_LEN: usize = 22;

/// Upper bound on bytes read from a single exec channel while waiting for
/// the announcement.
pub const MAX_ANNOUNCEMENT_BYTES: usize = 1024;

// =============================================================================
// Remote Server Defaults
// =============================================================================

/// Remote binary looked up on `$PATH` when no override is given.
pub const DEFAULT_MOSH_SERVER: &str = "mosh-server";

/// Local session client the negotiated parameters are handed to.
pub const DEFAULT_MOSH_CLIENT: &str = "mosh-client";

/// Color count passed to `mosh-server -c` when none is requested.
pub const DEFAULT_COLORS: u32 = 256;

/// Locale passed to `mosh-server -l` when none is requested.
pub const DEFAULT_LOCALE: &str = "LC_ALL=en_US.UTF-8";

/// Remote install location for a pushed static server, relative to the
/// login directory.
pub const DEFAULT_STATIC_SERVER_PATH: &str = ".local/share/moshup/mosh-server";

/// Chunk size used when streaming a static server binary to the remote host.
pub const UPLOAD_CHUNK: usize = 32 * 1024;

// =============================================================================
// Timing Constants
// =============================================================================

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// SSH dial (TCP + handshake + auth) timeout.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed for a started server to print its announcement.
pub const ANNOUNCEMENT_TIMEOUT: Duration = Duration::from_secs(15);

/// Time allowed for pushing a static server, from first byte to the
/// remote installer's exit status.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Time allowed for a polite SSH disconnect before the connection is dropped.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_lengths_agree() {
        // 16 bytes need ceil(128 / 6) = 22 base64 characters without padding.
        assert_eq!(MOSH_KEY_B64_LEN, (MOSH_KEY_LEN * 8).div_ceil(6));
    }

    #[test]
    fn announcement_fits_in_read_bound() {
        let longest = format!("\r\n{} 65535 {}\r\n", ANNOUNCEMENT_PREFIX, "A".repeat(22));
        assert!(longest.len() < MAX_ANNOUNCEMENT_BYTES);
    }

    #[test]
    fn timeouts_are_ordered() {
        assert!(DISCONNECT_TIMEOUT < ANNOUNCEMENT_TIMEOUT);
        assert!(ANNOUNCEMENT_TIMEOUT <= DIAL_TIMEOUT);
        assert!(ANNOUNCEMENT_TIMEOUT < UPLOAD_TIMEOUT);
    }
}
