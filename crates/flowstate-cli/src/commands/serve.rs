//! `flowstate serve`: answer every socket connection with the table.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use clap::Args;
use flowstate_common::config::FlowstateConfig;
use flowstate_daemon::Listener;

/// Arguments for the `serve` command.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path, overriding the configured one.
    #[arg(long)]
    pub socket: Option<PathBuf>,
}

/// Executes the `serve` command.
///
/// Binds the socket and serves until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the socket cannot be bound or the handler cannot be
/// installed.
pub fn execute(args: ServeArgs, config: &FlowstateConfig) -> anyhow::Result<()> {
    let path = args.socket.unwrap_or_else(|| config.socket_path.clone());
    let listener = Listener::bind(path, Arc::new(super::collector(config)))?;

    let shutdown = listener.shutdown_flag();
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

    listener.serve()?;
    Ok(())
}
