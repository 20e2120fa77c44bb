//! `flowstate flows`: list the tracked flows of one address.

use std::io::Write;

use clap::Args;
use flowstate_common::config::FlowstateConfig;
use flowstate_conntrack::Flow;

use crate::output::{format_bytes, format_endpoint};

/// Arguments for the `flows` command.
#[derive(Args, Debug)]
pub struct FlowsArgs {
    /// Original source address to look up.
    pub address: String,

    /// Print the flows in conntrack's own line format.
    #[arg(long)]
    pub raw: bool,
}

/// Executes the `flows` command.
///
/// # Errors
///
/// Returns an error if the address has no flows or the table cannot be
/// dumped.
pub fn execute(args: FlowsArgs, config: &FlowstateConfig) -> anyhow::Result<()> {
    let flows = super::flow_store(config).flows_for(&args.address)?;
    let mut out = std::io::stdout().lock();

    if args.raw {
        for flow in &flows {
            writeln!(out, "{flow}")?;
        }
        return Ok(());
    }

    writeln!(
        out,
        "{:<6} {:<12} {:<45} {:<45} {:>10} {:>10}",
        "PROTO", "STATE", "DESTINATION", "TRANSLATED", "SENT", "RECEIVED"
    )?;
    for flow in &flows {
        writeln!(out, "{}", summary(flow))?;
    }
    Ok(())
}

fn summary(flow: &Flow) -> String {
    let original = &flow.original;
    let reply = &flow.reply;
    format!(
        "{:<6} {:<12} {:<45} {:<45} {:>10} {:>10}",
        flow.protocol,
        flow.protocol_state.as_deref().unwrap_or("-"),
        format_endpoint(original.layer3.destination, original.layer4.destination_port),
        format_endpoint(reply.layer3.destination, reply.layer4.destination_port),
        format_bytes(original.counter.bytes),
        format_bytes(reply.counter.bytes),
    )
}
