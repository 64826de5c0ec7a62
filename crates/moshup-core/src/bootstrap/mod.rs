//! Remote session bootstrap.
//!
//! Starting a session means running `mosh-server` on the remote host over an
//! SSH exec channel and reading the one-line announcement it prints:
//!
//! ```text
//! MOSH CONNECT 60001 4NeCCgvZFe2RnPgrcU1PQw
//! ```
//!
//! Flow:
//! 1. A [`BootstrapStrategy`] makes a server binary available and names it
//! 2. The [`Orchestrator`] runs it with the session arguments
//! 3. The output is parsed into a [`ServerAnnouncement`]
//! 4. On an unusable strategy, the next one in the queue is tried

mod announcement;
mod orchestrator;
mod proptest;
mod strategy;

pub use announcement::{
    AnnouncementError, PartialAnnouncement, RemoteEndpoint, ServerAnnouncement, SessionKey,
    contains_announcement, parse_udp_port,
};
pub use orchestrator::{Orchestrator, OrchestratorState};
pub use strategy::{BootstrapStrategy, PushStaticServer, StrategyError, UseServerOnPath};
