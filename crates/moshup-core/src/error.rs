//! Error types for moshup-core.

use thiserror::Error;

/// Main error type for session negotiation.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or contradictory client configuration. Raised before any
    /// network activity.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// SSH transport failure (dial, exec, channel I/O).
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Authentication failed.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Connection was closed underneath us.
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// Every bootstrap strategy ran and none produced an announcement.
    #[error("no usable remote session binary found ({})", attempts.join("; "))]
    StrategyExhausted { attempts: Vec<String> },

    /// Negotiation was aborted before it completed.
    #[error("negotiation cancelled")]
    Cancelled,

    /// The local session client could not be started.
    #[error("launch error: {message}")]
    Launch { message: String },
}

impl Error {
    /// Shorthand for a [`Error::Transport`] with a formatted message.
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
        }
    }

    /// Shorthand for a [`Error::Configuration`] with a formatted message.
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Returns true if this error comes from the SSH transport collaborator.
    ///
    /// These are never retried with another bootstrap strategy: the
    /// connection itself is unusable.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. }
                | Error::AuthenticationFailed
                | Error::ConnectionClosed
                | Error::Timeout
                | Error::Io(_)
        )
    }

    /// Returns true if a fresh negotiation might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. } | Error::ConnectionClosed | Error::Timeout | Error::Io(_)
        )
    }

    /// Returns true if retrying the same negotiation cannot help.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Configuration { .. }
                | Error::AuthenticationFailed
                | Error::StrategyExhausted { .. }
        )
    }

    /// Returns true if the negotiation was aborted rather than failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Convenience result type for moshup operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_display_lists_attempts() {
        let err = Error::StrategyExhausted {
            attempts: vec![
                "mosh-server: no output".into(),
                "push-static: local binary missing".into(),
            ],
        };
        assert_eq!(
            err.to_string(),
            "no usable remote session binary found \
             (mosh-server: no output; push-static: local binary missing)"
        );
    }

    #[test]
    fn cancelled_is_distinct_from_exhausted() {
        let cancelled = Error::Cancelled;
        let exhausted = Error::StrategyExhausted { attempts: vec![] };

        assert!(cancelled.is_cancelled());
        assert!(!exhausted.is_cancelled());
        assert_ne!(cancelled.to_string(), exhausted.to_string());
        assert!(!cancelled.is_fatal());
        assert!(exhausted.is_fatal());
    }

    #[test]
    fn transport_classification() {
        assert!(Error::transport("exec rejected").is_transport());
        assert!(Error::ConnectionClosed.is_transport());
        assert!(Error::Timeout.is_transport());
        assert!(Error::AuthenticationFailed.is_transport());

        assert!(!Error::configuration("no port").is_transport());
        assert!(!Error::Cancelled.is_transport());
        assert!(!Error::StrategyExhausted { attempts: vec![] }.is_transport());
    }

    #[test]
    fn transient_errors() {
        assert!(Error::transport("reset").is_transient());
        assert!(Error::Timeout.is_transient());
        assert!(!Error::AuthenticationFailed.is_transient());
        assert!(!Error::configuration("bad key").is_transient());
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn configuration_display() {
        let err = Error::configuration("MOSH_KEY is set but no UDP port was given");
        assert_eq!(
            err.to_string(),
            "configuration error: MOSH_KEY is set but no UDP port was given"
        );
    }
}
