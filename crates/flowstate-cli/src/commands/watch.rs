//! `flowstate watch`: follow connection-tracking events.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use clap::Args;
use flowstate_common::config::FlowstateConfig;
use flowstate_common::error::{FlowstateError, Result};
use flowstate_conntrack::{CommandSource, EventStream, FlowReader, FlowUpdate};

/// Arguments for the `watch` command.
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Replay events from a file instead of running the event command.
    /// `-` reads standard input.
    #[arg(long)]
    pub file: Option<PathBuf>,
}

enum Outcome {
    Interrupted,
    Finished(anyhow::Result<u64>),
}

/// Executes the `watch` command.
///
/// Prints every update until the stream ends or Ctrl-C is pressed. On
/// Ctrl-C the event command is killed and reaped before returning.
///
/// # Errors
///
/// Returns an error if the stream cannot be opened or fails mid-way.
pub fn execute(args: WatchArgs, config: &FlowstateConfig) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::channel();

    let interrupt = tx.clone();
    ctrlc::set_handler(move || {
        let _ = interrupt.send(Outcome::Interrupted);
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

    let (reader, stopper) = match args.file {
        Some(path) => {
            let reader = std::thread::spawn(move || {
                let _ = tx.send(Outcome::Finished(replay(&path)));
            });
            (reader, None)
        }
        None => {
            let events = spawn_events(config)?;
            let stopper = events.stopper();
            let reader = std::thread::spawn(move || {
                let _ = tx.send(Outcome::Finished(follow(events)));
            });
            (reader, Some(stopper))
        }
    };

    match rx.recv() {
        Ok(Outcome::Finished(result)) => {
            let printed = result?;
            tracing::info!(updates = printed, "event stream ended");
            Ok(())
        }
        Ok(Outcome::Interrupted) | Err(_) => {
            // stdin and files cannot be unblocked; only the event command
            // is stopped and waited for.
            if let Some(stopper) = stopper {
                stopper.stop();
                if reader.join().is_err() {
                    tracing::warn!("event reader panicked");
                }
            }
            Ok(())
        }
    }
}

fn spawn_events(config: &FlowstateConfig) -> anyhow::Result<EventStream> {
    let source = CommandSource::events_from_config(&config.conntrack);
    if !source.is_available() {
        anyhow::bail!(
            "{} not found on PATH; use --file to replay a capture",
            config.conntrack.program
        );
    }
    Ok(source.spawn_events()?)
}

fn follow(mut events: EventStream) -> anyhow::Result<u64> {
    let printed = print_updates(|| events.read_update())?;
    events.finish()?;
    Ok(printed)
}

fn replay(path: &Path) -> anyhow::Result<u64> {
    if path.as_os_str() == "-" {
        let mut reader = FlowReader::new(std::io::stdin().lock(), "stdin");
        return print_updates(|| reader.read_update());
    }
    let file = File::open(path).map_err(|e| FlowstateError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut reader = FlowReader::new(BufReader::new(file), path.display().to_string());
    print_updates(|| reader.read_update())
}

/// Prints updates until `next` reports end of stream. Lines that fail to
/// decode are logged and skipped; stream failures end the watch.
fn print_updates(mut next: impl FnMut() -> Result<Option<FlowUpdate>>) -> anyhow::Result<u64> {
    let mut out = std::io::stdout().lock();
    let mut printed = 0;
    loop {
        match next() {
            Ok(Some(update)) => {
                writeln!(out, "{update}")?;
                out.flush()?;
                printed += 1;
            }
            Ok(None) => return Ok(printed),
            Err(FlowstateError::MalformedInput { line, message }) => {
                tracing::warn!(%line, %message, "skipping undecodable event");
            }
            Err(e) => return Err(e.into()),
        }
    }
}
