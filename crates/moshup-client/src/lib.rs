//! moshup-client: Client library for the moshup command.
//!
//! Provides:
//! - CLI argument parsing
//! - russh-backed SSH transport for session negotiation
//! - Session handoff to the local `mosh-client`
//! - Terminal size detection

pub mod cli;
pub mod launch;
pub mod ssh;
pub mod terminal;

pub use cli::Cli;
pub use launch::{MoshClientLauncher, PrintHandoff, resolve_endpoint};
pub use ssh::{SshConnection, SshDialer, SshExecChannel, default_identity_files};
pub use terminal::get_terminal_size;
