//! Unix-domain socket front end.
//!
//! Every accepted connection gets its own thread, receives one freshly
//! collected table and is closed. The accept loop polls a shared shutdown
//! flag between accepts; once it is set the loop waits for in-flight
//! connections and returns. Dropping the [`Listener`] removes the socket
//! file.

use std::io::{self, BufWriter, ErrorKind, Write};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use flowstate_common::error::{FlowstateError, Result};

use crate::collector::Collector;
use crate::render::render_table;

/// How long the accept loop sleeps when no client is waiting.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// A bound socket serving collected tables.
#[derive(Debug)]
pub struct Listener {
    socket: UnixListener,
    path: PathBuf,
    collector: Arc<Collector>,
    shutdown: Arc<AtomicBool>,
}

impl Listener {
    /// Binds `path`, replacing a stale socket file left by a previous run.
    ///
    /// # Errors
    ///
    /// Returns [`FlowstateError::Io`] if another process is serving on
    /// `path` or the socket cannot be bound, and
    /// [`FlowstateError::Config`] if `path` exists but is not a socket.
    pub fn bind(path: impl Into<PathBuf>, collector: Arc<Collector>) -> Result<Self> {
        let path = path.into();
        remove_stale_socket(&path)?;

        let io_err = |source| FlowstateError::Io {
            path: path.clone(),
            source,
        };
        let socket = UnixListener::bind(&path).map_err(io_err)?;
        socket.set_nonblocking(true).map_err(io_err)?;

        tracing::info!(path = %path.display(), "listening");
        Ok(Self {
            socket,
            path,
            collector,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The socket path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flag that stops [`Listener::serve`] once set.
    #[must_use]
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Accepts connections until the shutdown flag is set.
    ///
    /// # Errors
    ///
    /// Returns [`FlowstateError::Io`] if accepting fails for a reason other
    /// than an interrupted or empty queue.
    pub fn serve(&self) -> Result<()> {
        std::thread::scope(|scope| {
            while !self.shutdown.load(Ordering::SeqCst) {
                match self.socket.accept() {
                    Ok((stream, _)) => {
                        let collector = self.collector.as_ref();
                        let _ = scope.spawn(move || {
                            if let Err(e) = serve_connection(collector, stream) {
                                tracing::warn!(error = %e, "failed writing to connection");
                            }
                        });
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::sleep(ACCEPT_POLL),
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => {
                        return Err(FlowstateError::Io {
                            path: self.path.clone(),
                            source: e,
                        });
                    }
                }
            }
            tracing::info!(path = %self.path.display(), "shutting down listener");
            Ok(())
        })
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove socket");
            }
        }
    }
}

/// Writes one collected table to `stream`. A collection failure is
/// reported to the client as a single `error:` line.
fn serve_connection(collector: &Collector, stream: UnixStream) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    let mut out = BufWriter::new(stream);
    match collector.collect() {
        Ok(table) => render_table(&table, &mut out)?,
        Err(e) => {
            tracing::warn!(error = %e, "could not collect table");
            writeln!(out, "error: {e}")?;
        }
    }
    out.flush()
}

fn remove_stale_socket(path: &Path) -> Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(FlowstateError::Io {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    if !metadata.file_type().is_socket() {
        return Err(FlowstateError::Config {
            message: format!("{} exists and is not a socket", path.display()),
        });
    }
    if UnixStream::connect(path).is_ok() {
        return Err(FlowstateError::Io {
            path: path.to_path_buf(),
            source: io::Error::new(ErrorKind::AddrInUse, "socket is served by another process"),
        });
    }

    tracing::warn!(path = %path.display(), "removing stale socket");
    std::fs::remove_file(path).map_err(|e| FlowstateError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}
