//! moshup binary entry point.
//!
//! Starts `mosh-server` on the remote host over SSH, then runs `mosh-client`
//! against the announced session.

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use moshup_client::{Cli, MoshClientLauncher, PrintHandoff, SshDialer, get_terminal_size};
use moshup_core::{Negotiator, SessionHandoff, SessionTransport};

fn main() {
    let cli = Cli::parse().with_env_key();

    let log_format = cli.log_format.into();
    if let Err(e) = moshup_core::init_logging(cli.verbose, cli.log_file.as_deref(), log_format) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!(version = env!("CARGO_PKG_VERSION"), "moshup starting");

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("moshup: failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    match rt.block_on(run(&cli)) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!(error = %e, "moshup failed");
            eprintln!("moshup: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: &Cli) -> moshup_core::Result<i32> {
    let params = cli.client_parameters()?;
    let host = cli.host_config()?;
    let negotiator = Negotiator::new(Arc::new(SshDialer::new()), cli.negotiation_config());

    // Ctrl-C during negotiation cancels it and closes the SSH connection.
    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });
    let outcome = negotiator.negotiate(&params, &host, &cancel).await;
    interrupt.abort();
    let announcement = outcome?;

    let handoff = SessionHandoff::new(announcement, &params, get_terminal_size());
    if cli.print_only {
        PrintHandoff.run(handoff).await
    } else {
        MoshClientLauncher::new(&cli.client).run(handoff).await
    }
}
