//! `flowstate table`: collect once and print.

use std::io::Write;

use clap::Args;
use flowstate_common::config::FlowstateConfig;
use flowstate_daemon::render_table;

/// Arguments for the `table` command.
#[derive(Args, Debug)]
pub struct TableArgs {
    /// Print JSON instead of aligned text.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `table` command.
///
/// # Errors
///
/// Returns an error if any store fails to answer for a listed address.
pub fn execute(args: TableArgs, config: &FlowstateConfig) -> anyhow::Result<()> {
    let table = super::collector(config).collect()?;
    let mut out = std::io::stdout().lock();

    if args.json {
        serde_json::to_writer_pretty(&mut out, &table)?;
        writeln!(out)?;
    } else {
        render_table(&table, &mut out)?;
    }
    Ok(())
}
