//! Spawning a child whose stdio is bridged to closable endpoints.
//!
//! [`spawn`] resolves the program on `$PATH`, allocates the stdin and output
//! pipes, starts the child with fd 0 on the stdin pipe and fds 1 and 2 on the
//! output pipe, starts both relays and arms a background watcher that runs the
//! shutdown sequence even if nobody calls [`ProcessHandle::wait`].
//!
//! Ownership of the reader and writer moves to the handle only on success. On
//! failure both are returned untouched inside [`SpawnFailure`].

use std::ffi::OsStr;
use std::fmt;
use std::io::{self, PipeReader, PipeWriter};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::errors::ShutdownError;
use crate::io::endpoint::{ClosableReader, ClosableWriter};
use crate::io::pipes::PipePair;
use crate::io::process::{ChildProcess, OsProcess};
use crate::io::relay;
use crate::io::shutdown::{Resources, Shutdown};

pub const DEFAULT_RELAY_BUFFER_BYTES: usize = 8192;
pub const DEFAULT_EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Tuning knobs for [`spawn_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnOptions {
    /// Chunk size used by both relays.
    pub relay_buffer_bytes: usize,
    /// How often a blocked wait re-checks for a pending kill.
    pub exit_poll_interval: Duration,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            relay_buffer_bytes: DEFAULT_RELAY_BUFFER_BYTES,
            exit_poll_interval: DEFAULT_EXIT_POLL_INTERVAL,
        }
    }
}

/// Why a child could not be started.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("command line is empty")]
    EmptyCommand,

    #[error("lookup of {program} failed: {source}")]
    Lookup {
        program: String,
        #[source]
        source: which::Error,
    },

    #[error("pipe creation failed: {0}")]
    Pipe(#[source] io::Error),

    #[error("start of {} failed: {source}", path.display())]
    Start {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A failed spawn, carrying the caller's endpoints back unmodified.
pub struct SpawnFailure<R, W> {
    pub error: SpawnError,
    pub reader: R,
    pub writer: W,
}

impl<R, W> SpawnFailure<R, W> {
    pub fn into_error(self) -> SpawnError {
        self.error
    }
}

impl<R, W> fmt::Debug for SpawnFailure<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnFailure")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<R, W> fmt::Display for SpawnFailure<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

/// Spawn with default [`SpawnOptions`].
pub fn spawn<S, R, W>(
    cmdline: &[S],
    reader: R,
    writer: W,
) -> Result<ProcessHandle, SpawnFailure<R, W>>
where
    S: AsRef<OsStr>,
    R: ClosableReader + 'static,
    W: ClosableWriter + 'static,
{
    spawn_with(&SpawnOptions::default(), cmdline, reader, writer)
}

/// Start `cmdline[0]` with `cmdline[1..]` as arguments, bridging its stdin to
/// `reader` and its merged stdout/stderr to `writer`.
#[instrument(skip_all, fields(program = ?cmdline.first().map(|p| p.as_ref().to_os_string())))]
pub fn spawn_with<S, R, W>(
    options: &SpawnOptions,
    cmdline: &[S],
    reader: R,
    writer: W,
) -> Result<ProcessHandle, SpawnFailure<R, W>>
where
    S: AsRef<OsStr>,
    R: ClosableReader + 'static,
    W: ClosableWriter + 'static,
{
    let started = match start_child(cmdline) {
        Ok(started) => started,
        Err(error) => {
            warn!(err = %error, "spawn failed");
            return Err(SpawnFailure {
                error,
                reader,
                writer,
            });
        }
    };

    // Nothing below can fail: the handle now owns closing reader and writer.
    Ok(ProcessHandle::arm(options, started, reader, writer))
}

struct Started {
    child: Child,
    stdin_read: PipeReader,
    stdin_write: PipeWriter,
    output_read: PipeReader,
}

fn start_child<S: AsRef<OsStr>>(cmdline: &[S]) -> Result<Started, SpawnError> {
    let (program, args) = cmdline.split_first().ok_or(SpawnError::EmptyCommand)?;
    let program = program.as_ref();
    let path = which::which(program).map_err(|source| SpawnError::Lookup {
        program: program.to_string_lossy().into_owned(),
        source,
    })?;

    let PipePair {
        stdin_read,
        stdin_write,
        output_read,
        output_write,
    } = PipePair::new().map_err(SpawnError::Pipe)?;
    // The child gets a duplicate; the original stays with us for draining.
    let child_stdin = stdin_read.try_clone().map_err(SpawnError::Pipe)?;
    let child_stderr = output_write.try_clone().map_err(SpawnError::Pipe)?;

    let mut cmd = Command::new(&path);
    cmd.args(args)
        .stdin(child_stdin)
        .stdout(output_write)
        .stderr(child_stderr);
    let spawned = cmd.spawn();
    // The builder still holds our copies of the output write end. Until they
    // are gone the output relay can never see end-of-stream.
    drop(cmd);

    match spawned {
        Ok(child) => {
            debug!(pid = child.id(), path = %path.display(), "child started");
            Ok(Started {
                child,
                stdin_read,
                stdin_write,
                output_read,
            })
        }
        Err(source) => Err(SpawnError::Start { path, source }),
    }
}

struct Inner {
    pid: u32,
    process: Arc<dyn ChildProcess>,
    shutdown: Shutdown,
}

/// Handle to a spawned child. Clones share the same shutdown state.
#[derive(Clone)]
pub struct ProcessHandle {
    inner: Arc<Inner>,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.inner.pid)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl ProcessHandle {
    fn arm<R, W>(options: &SpawnOptions, started: Started, reader: R, writer: W) -> Self
    where
        R: ClosableReader + 'static,
        W: ClosableWriter + 'static,
    {
        let Started {
            child,
            stdin_read,
            stdin_write,
            output_read,
        } = started;
        let pid = child.id();
        let reader: Arc<dyn ClosableReader> = Arc::new(reader);
        let buf_size = options.relay_buffer_bytes;

        let resources = Resources {
            process: Arc::new(OsProcess::new(child, options.exit_poll_interval)),
            input_relay: relay::spawn_input(pid, Arc::clone(&reader), stdin_write, buf_size),
            output_relay: relay::spawn_output(pid, output_read, writer, buf_size),
            reader,
            stdin_drain: stdin_read,
        };
        let handle = Self::from_resources(resources);
        handle.watch_in_background();
        handle
    }

    pub(crate) fn from_resources(resources: Resources) -> Self {
        let process = Arc::clone(&resources.process);
        Self {
            inner: Arc::new(Inner {
                pid: process.id(),
                process,
                shutdown: Shutdown::new(resources),
            }),
        }
    }

    /// Run the shutdown sequence on a background thread so resources are
    /// released even if the caller never waits.
    fn watch_in_background(&self) {
        let handle = self.clone();
        let pid = self.inner.pid;
        let spawned = thread::Builder::new()
            .name(format!("pipebridge-wait-{pid}"))
            .spawn(move || {
                if let Err(err) = handle.wait() {
                    debug!(pid, err = %err, "background shutdown reported errors");
                }
            });
        if let Err(err) = spawned {
            warn!(
                pid,
                err = %err,
                "failed to start background watcher; shutdown runs on first wait"
            );
        }
    }

    pub fn id(&self) -> u32 {
        self.inner.pid
    }

    /// Block until the child exited, both relays drained and every resource
    /// is closed. Every call, concurrent ones included, returns the same value.
    pub fn wait(&self) -> Result<(), ShutdownError> {
        self.inner.shutdown.run().result
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`, returning
    /// `None`. Giving up does not cancel the shutdown, which keeps running on
    /// the background watcher.
    ///
    /// This never starts the shutdown itself. If the watcher thread could not
    /// be started (logged at `warn` by `spawn`), it returns `None` until some
    /// caller runs [`wait`](Self::wait).
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), ShutdownError>> {
        self.inner
            .shutdown
            .wait_timeout(timeout)
            .map(|completion| completion.result)
    }

    /// The shutdown result, if it is already available.
    pub fn try_wait(&self) -> Option<Result<(), ShutdownError>> {
        self.inner.shutdown.completed().map(|c| c.result)
    }

    pub fn is_finished(&self) -> bool {
        self.inner.shutdown.completed().is_some()
    }

    /// Exit status of the child, once shutdown completed and the wait succeeded.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.inner.shutdown.completed().and_then(|c| c.status)
    }

    /// Ask the child to terminate. The shutdown sequence then proceeds as for
    /// a natural exit.
    pub fn kill(&self) -> io::Result<()> {
        debug!(pid = self.inner.pid, "killing child");
        self.inner.process.kill()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CollectingWriter, ScriptedProcess, ScriptedReader};

    /// Handle over a scripted process, without the background watcher.
    fn unwatched_handle(process: &Arc<ScriptedProcess>) -> ProcessHandle {
        let PipePair {
            stdin_read,
            stdin_write,
            output_read,
            output_write,
        } = PipePair::new().expect("pipes");
        drop(output_write);
        let reader: Arc<dyn ClosableReader> = Arc::new(ScriptedReader::blocking(Vec::new()));
        ProcessHandle::from_resources(Resources {
            process: Arc::clone(process) as Arc<dyn ChildProcess>,
            reader: Arc::clone(&reader),
            stdin_drain: stdin_read,
            input_relay: relay::spawn_input(1, reader, stdin_write, 64),
            output_relay: relay::spawn_output(1, output_read, CollectingWriter::new(), 64),
        })
    }

    #[test]
    fn empty_command_is_rejected() {
        let cmdline: [&str; 0] = [];
        let failure = spawn(
            &cmdline,
            ScriptedReader::new(Vec::new()),
            CollectingWriter::new(),
        )
        .unwrap_err();
        assert!(matches!(failure.error, SpawnError::EmptyCommand));
    }

    #[test]
    fn missing_program_is_a_lookup_error() {
        let failure = spawn(
            &["pipebridge-definitely-not-installed"],
            ScriptedReader::new(Vec::new()),
            CollectingWriter::new(),
        )
        .unwrap_err();
        assert!(matches!(failure.error, SpawnError::Lookup { .. }));
        assert!(
            failure
                .to_string()
                .contains("pipebridge-definitely-not-installed")
        );
    }

    #[test]
    fn kill_is_forwarded_to_the_process() {
        let process = Arc::new(ScriptedProcess::new(Duration::ZERO));
        let handle = unwatched_handle(&process);

        handle.kill().expect("kill");
        assert_eq!(process.kills(), 1);

        handle.wait().expect("wait");
        assert_eq!(process.waits(), 1);
    }

    #[test]
    fn wait_timeout_does_not_start_shutdown_without_watcher() {
        let process = Arc::new(ScriptedProcess::new(Duration::ZERO));
        let handle = unwatched_handle(&process);

        assert!(handle.wait_timeout(Duration::from_millis(50)).is_none());
        assert_eq!(process.waits(), 0);
        assert!(!handle.is_finished());

        handle.wait().expect("wait");
        assert_eq!(handle.wait_timeout(Duration::ZERO), Some(Ok(())));
        assert_eq!(process.waits(), 1);
    }

    #[test]
    fn default_options() {
        let options = SpawnOptions::default();
        assert_eq!(options.relay_buffer_bytes, 8192);
        assert_eq!(options.exit_poll_interval, Duration::from_millis(50));
    }
}
