//! Exactly-once teardown of a spawned child and everything connected to it.
//!
//! The input relay copies from an external reader that may block forever, and
//! that reader may only be closed once the child has exited. The sequence in
//! [`run_sequence`] breaks the cycle:
//!
//! 1. wait for the child;
//! 2. close the external reader, which ends the input relay's blocked read;
//! 3. drain the retained stdin read end, so a relay stuck writing into a full
//!    pipe can finish instead of deadlocking;
//! 4. join the input relay, then drop the stdin read end;
//! 5. join the output relay, which reaches end-of-stream on its own because
//!    the exited child held the only remaining write end of the output pipe.
//!
//! Every step runs even if an earlier one failed; errors are aggregated. A
//! panic inside the sequence (from a caller-supplied endpoint, say) is caught
//! and published as a failed result so waiters are never stranded.

use std::io::{self, PipeReader};
use std::panic::{self, AssertUnwindSafe};
use std::process::ExitStatus;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, error, instrument, warn};

use crate::core::errors::{ErrorCollector, ShutdownError, ShutdownStep};
use crate::io::endpoint::ClosableReader;
use crate::io::process::ChildProcess;
use crate::io::relay::RelayTask;

/// Everything the shutdown sequence owns and consumes.
pub(crate) struct Resources {
    pub process: Arc<dyn ChildProcess>,
    pub reader: Arc<dyn ClosableReader>,
    pub stdin_drain: PipeReader,
    pub input_relay: RelayTask,
    pub output_relay: RelayTask,
}

/// Frozen result of a completed shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub status: Option<ExitStatus>,
    pub result: Result<(), ShutdownError>,
}

enum State {
    Pending(Resources),
    Running,
    Completed(Completion),
}

/// One-time guard around the shutdown sequence.
///
/// The first caller moves `Pending -> Running`, runs the sequence without
/// holding the lock, then publishes `Completed`. Callers arriving while it
/// runs block on the condition variable; later callers read the cached value.
pub(crate) struct Shutdown {
    state: Mutex<State>,
    done: Condvar,
}

impl Shutdown {
    pub fn new(resources: Resources) -> Self {
        Self {
            state: Mutex::new(State::Pending(resources)),
            done: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the sequence if nobody has, otherwise wait for its result.
    pub fn run(&self) -> Completion {
        let mut state = self.lock();
        let resources = loop {
            match std::mem::replace(&mut *state, State::Running) {
                State::Pending(resources) => break resources,
                State::Running => {
                    state = self.done.wait(state).unwrap_or_else(PoisonError::into_inner);
                }
                State::Completed(completion) => {
                    *state = State::Completed(completion.clone());
                    return completion;
                }
            }
        };
        drop(state);

        let pid = resources.process.id();
        let completion = panic::catch_unwind(AssertUnwindSafe(|| run_sequence(resources)))
            .unwrap_or_else(|_| {
                error!(pid, "shutdown sequence panicked");
                let mut errors = ErrorCollector::new();
                errors.record_error(
                    ShutdownStep::Sequence,
                    Some(io::Error::other("shutdown sequence panicked")),
                );
                Completion {
                    status: None,
                    result: errors.finish(),
                }
            });

        *self.lock() = State::Completed(completion.clone());
        self.done.notify_all();
        completion
    }

    /// Wait up to `timeout` for a run started elsewhere to complete.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Completion> {
        let state = self.lock();
        let (state, _) = self
            .done
            .wait_timeout_while(state, timeout, |s| !matches!(s, State::Completed(_)))
            .unwrap_or_else(PoisonError::into_inner);
        match &*state {
            State::Completed(completion) => Some(completion.clone()),
            _ => None,
        }
    }

    /// The result, if shutdown already completed.
    pub fn completed(&self) -> Option<Completion> {
        match &*self.lock() {
            State::Completed(completion) => Some(completion.clone()),
            _ => None,
        }
    }
}

#[instrument(skip_all, fields(pid = resources.process.id()))]
fn run_sequence(resources: Resources) -> Completion {
    let Resources {
        process,
        reader,
        mut stdin_drain,
        input_relay,
        output_relay,
    } = resources;
    let mut errors = ErrorCollector::new();

    let status = errors.record(ShutdownStep::Wait, process.wait());
    debug!(exit_code = ?status.and_then(|s| s.code()), "child reaped");

    errors.record(ShutdownStep::CloseReader, reader.close());

    let drained = errors.record(
        ShutdownStep::DrainStdin,
        io::copy(&mut stdin_drain, &mut io::sink()),
    );
    debug!(bytes = ?drained, "stdin pipe drained");

    let input = input_relay.join();
    errors.record_error(ShutdownStep::InputRelay, input.copy);
    drop(stdin_drain);

    let output = output_relay.join();
    errors.record_error(ShutdownStep::OutputRelay, output.copy);
    errors.record_error(ShutdownStep::CloseWriter, output.close);

    let result = errors.finish();
    if let Err(err) = &result {
        warn!(err = %err, "shutdown finished with errors");
    } else {
        debug!("shutdown finished");
    }
    Completion { status, result }
}
