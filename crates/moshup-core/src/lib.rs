//! moshup-core: session negotiation for mosh over SSH.
//!
//! This crate provides:
//! - The `MOSH CONNECT` announcement parser
//! - Bootstrap strategies and the orchestrator that runs them
//! - The negotiation controller with cancellation
//! - Transport collaborator traits (implemented over russh in `moshup-client`)
//! - Session handoff types
//! - Logging setup

pub mod bootstrap;
pub mod constants;
pub mod error;
pub mod handoff;
pub mod logging;
pub mod negotiate;
pub mod params;
pub mod transport;

pub use bootstrap::{RemoteEndpoint, ServerAnnouncement, SessionKey};
pub use error::{Error, Result};
pub use handoff::{SessionHandoff, SessionTransport, TermSize};
pub use logging::{LogFormat, init_logging};
pub use negotiate::{NegotiationHandle, NegotiationOutcome, Negotiator};
pub use params::{ClientParameters, HostConfig, NegotiationConfig, PredictionMode, UdpPortSpec};
