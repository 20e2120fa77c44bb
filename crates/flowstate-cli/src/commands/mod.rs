//! CLI command definitions and dispatch.

pub mod flows;
pub mod serve;
pub mod table;
pub mod watch;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use flowstate_common::config::FlowstateConfig;
use flowstate_conntrack::{CommandSource, FlowFilter, FlowStore};
use flowstate_daemon::Collector;
use flowstate_leases::LeaseStore;

/// flowstate: who on the LAN is talking to what.
#[derive(Parser, Debug)]
#[command(name = "flowstate", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// JSON configuration file. Built-in defaults apply when omitted.
    #[arg(long, global = true, env = "FLOWSTATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the combined table on a Unix socket.
    Serve(serve::ServeArgs),
    /// Collect the combined table once and print it.
    Table(table::TableArgs),
    /// Show the tracked flows of one address.
    Flows(flows::FlowsArgs),
    /// Follow connection-tracking events as they happen.
    Watch(watch::WatchArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the command
/// fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = FlowstateConfig::load_or_default(cli.config.as_deref())?;
    match cli.command {
        Command::Serve(args) => serve::execute(args, &config),
        Command::Table(args) => table::execute(args, &config),
        Command::Flows(args) => flows::execute(args, &config),
        Command::Watch(args) => watch::execute(args, &config),
    }
}

/// Builds the flow store described by `config`.
pub fn flow_store(config: &FlowstateConfig) -> FlowStore {
    let source = CommandSource::dump_from_config(&config.conntrack);
    if !source.is_available() {
        tracing::warn!(program = %config.conntrack.program, "conntrack program not found on PATH");
    }
    FlowStore::new(source, FlowFilter::from_nat_only(config.conntrack.nat_only))
}

/// Builds a collector over the lease store and the flow store. Lease
/// fields come first.
pub fn collector(config: &FlowstateConfig) -> Collector {
    Collector::new()
        .with_store(Arc::new(LeaseStore::new(config.leases_path.clone())))
        .with_store(Arc::new(flow_store(config)))
}
