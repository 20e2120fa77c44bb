//! External sources of connection-tracking output.
//!
//! A [`DumpSource`] produces one complete table listing per call. The
//! production implementation, [`CommandSource`], runs the conntrack tool as
//! a subprocess. Its stderr is drained on a separate thread so a chatty
//! child can never fill the pipe and stall while stdout is being consumed.

use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flowstate_common::config::ConntrackConfig;
use flowstate_common::error::{FlowstateError, Result};

use crate::reader::FlowReader;
use crate::update::FlowUpdate;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Consumer handed the output stream of a dump.
pub type DumpConsumer<'a> = dyn FnMut(&mut dyn BufRead) -> Result<()> + 'a;

/// Something that can list the whole connection-tracking table on demand.
pub trait DumpSource: Send + Sync {
    /// Human-readable name used in errors and logs.
    fn describe(&self) -> String;

    /// Runs one dump, passing its output stream to `consume`.
    ///
    /// # Errors
    ///
    /// Returns the consumer's error, or
    /// [`FlowstateError::SourceUnavailable`] if the source cannot be
    /// started, fails, or times out.
    fn dump(&self, consume: &mut DumpConsumer<'_>) -> Result<()>;
}

/// Runs an external command and streams its stdout.
#[derive(Debug, Clone)]
pub struct CommandSource {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandSource {
    /// Creates a source running `program` with `args`, without a timeout.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout: None,
        }
    }

    /// The one-shot dump command described by `config`.
    #[must_use]
    pub fn dump_from_config(config: &ConntrackConfig) -> Self {
        Self::new(config.program.clone(), config.dump_args.clone())
            .with_timeout(config.dump_timeout())
    }

    /// The event-stream command described by `config`.
    #[must_use]
    pub fn events_from_config(config: &ConntrackConfig) -> Self {
        Self::new(config.program.clone(), config.event_args.clone())
    }

    /// Kills the child if a dump takes longer than `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether the program can be found on `PATH`.
    #[must_use]
    pub fn is_available(&self) -> bool {
        which::which(&self.program).is_ok()
    }

    fn unavailable(&self, message: impl Into<String>) -> FlowstateError {
        FlowstateError::SourceUnavailable {
            command: self.describe(),
            message: message.into(),
        }
    }

    fn spawn(&self, stderr: Stdio) -> Result<Child> {
        tracing::debug!(command = %self.describe(), "spawning");
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(stderr)
            .spawn()
            .map_err(|e| self.unavailable(format!("failed to start: {e}")))
    }

    /// Starts the command as a never-ending event stream.
    ///
    /// # Errors
    ///
    /// Returns [`FlowstateError::SourceUnavailable`] if the command cannot
    /// be started.
    pub fn spawn_events(&self) -> Result<EventStream> {
        let mut child = self.spawn(Stdio::inherit())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.unavailable("stdout was not captured"))?;
        Ok(EventStream {
            command: self.describe(),
            reader: FlowReader::new(BufReader::new(stdout), self.describe()),
            child: Arc::new(Mutex::new(Some(child))),
        })
    }
}

impl DumpSource for CommandSource {
    fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn dump(&self, consume: &mut DumpConsumer<'_>) -> Result<()> {
        let started = Instant::now();
        let mut child = self.spawn(Stdio::piped())?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let child = Arc::new(Mutex::new(child));

        let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
            kill(&child);
            return Err(self.unavailable("stdio was not captured"));
        };

        let stderr_drain = drain(stderr);
        let watchdog = self.timeout.map(|t| Watchdog::arm(Arc::clone(&child), t));

        let consumed = consume(&mut BufReader::new(stdout));
        if consumed.is_err() {
            kill(&child);
        }

        let fired = watchdog.is_some_and(Watchdog::disarm);
        let deadline = self.timeout.map(|t| started + t);
        let status = match wait(&child, deadline) {
            Ok(Some(status)) => Some(status),
            Ok(None) => {
                kill(&child);
                reap(&child);
                None
            }
            Err(e) => {
                kill(&child);
                return Err(self.unavailable(format!("wait failed: {e}")));
            }
        };
        let stderr_text = stderr_drain.join().unwrap_or_default();

        let Some(status) = status.filter(|_| !fired) else {
            let elapsed = started.elapsed();
            return Err(self.unavailable(format!("timed out after {elapsed:.1?}")));
        };
        consumed?;
        if !status.success() {
            return Err(self.unavailable(format!("{status}: {}", stderr_text.trim())));
        }
        Ok(())
    }
}

/// Reads a pipe to exhaustion on its own thread.
fn drain(mut pipe: impl Read + Send + 'static) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut bytes) {
            tracing::debug!(error = %e, "stderr drain stopped early");
        }
        String::from_utf8_lossy(&bytes).into_owned()
    })
}

fn kill(child: &Mutex<Child>) {
    let mut child = child.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(e) = child.kill() {
        tracing::debug!(error = %e, "kill failed, child already gone");
    }
}

fn reap(child: &Mutex<Child>) {
    let mut child = child.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(e) = child.wait() {
        tracing::debug!(error = %e, "failed to reap killed child");
    }
}

/// Waits for the child to exit. `Ok(None)` if the deadline passed first.
fn wait(child: &Mutex<Child>, deadline: Option<Instant>) -> io::Result<Option<ExitStatus>> {
    let Some(deadline) = deadline else {
        let mut child = child.lock().unwrap_or_else(PoisonError::into_inner);
        return child.wait().map(Some);
    };
    loop {
        let status = child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_wait()?;
        if status.is_some() {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(WAIT_POLL_INTERVAL);
    }
}

/// Kills the child when a dump outlives its timeout while stdout is still
/// being read.
struct Watchdog {
    disarm: mpsc::Sender<()>,
    handle: JoinHandle<bool>,
}

impl Watchdog {
    fn arm(child: Arc<Mutex<Child>>, timeout: Duration) -> Self {
        let (disarm, disarmed) = mpsc::channel();
        let handle = thread::spawn(move || match disarmed.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(?timeout, "dump timed out, killing child");
                kill(&child);
                true
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
        });
        Self { disarm, handle }
    }

    /// Stops the watchdog. Returns whether it had already fired.
    fn disarm(self) -> bool {
        let _ = self.disarm.send(());
        self.handle.join().unwrap_or(false)
    }
}

/// A running event-stream command. The child is killed on drop.
#[derive(Debug)]
pub struct EventStream {
    command: String,
    reader: FlowReader<BufReader<ChildStdout>>,
    child: Arc<Mutex<Option<Child>>>,
}

impl EventStream {
    /// Reads the next update. `Ok(None)` once the command closes stdout.
    ///
    /// # Errors
    ///
    /// See [`FlowReader::read_update`].
    pub fn read_update(&mut self) -> Result<Option<FlowUpdate>> {
        self.reader.read_update()
    }

    /// Returns a handle that can stop the command from another thread,
    /// even while this stream is blocked in [`EventStream::read_update`].
    #[must_use]
    pub fn stopper(&self) -> EventStopper {
        EventStopper {
            child: Arc::clone(&self.child),
        }
    }

    /// Waits for the command to exit after its stream has ended. Returns
    /// `Ok` if the command was already stopped through an [`EventStopper`].
    ///
    /// # Errors
    ///
    /// Returns [`FlowstateError::SourceUnavailable`] on a non-zero exit.
    pub fn finish(self) -> Result<()> {
        let Some(mut child) = take_child(&self.child) else {
            return Ok(());
        };
        let status = child.wait().map_err(|e| FlowstateError::SourceUnavailable {
            command: self.command.clone(),
            message: format!("wait failed: {e}"),
        })?;
        if !status.success() {
            return Err(FlowstateError::SourceUnavailable {
                command: self.command.clone(),
                message: status.to_string(),
            });
        }
        Ok(())
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.stopper().stop();
    }
}

/// Kills the command behind an [`EventStream`]. The stream then sees end of
/// stream.
#[derive(Debug, Clone)]
pub struct EventStopper {
    child: Arc<Mutex<Option<Child>>>,
}

impl EventStopper {
    /// Kills and reaps the command. Does nothing if it was already stopped
    /// or finished.
    pub fn stop(&self) {
        if let Some(mut child) = take_child(&self.child) {
            if let Err(e) = child.kill() {
                tracing::debug!(error = %e, "kill failed, event command already gone");
            }
            if let Err(e) = child.wait() {
                tracing::debug!(error = %e, "failed to reap event command");
            }
        }
    }
}

fn take_child(child: &Mutex<Option<Child>>) -> Option<Child> {
    child.lock().unwrap_or_else(PoisonError::into_inner).take()
}
