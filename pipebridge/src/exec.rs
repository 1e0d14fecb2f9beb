//! `pipebridge exec`: one child bridged to a local input and output stream.
//!
//! Input is pumped into a [`ChannelReader`](crate::io::endpoint::ChannelReader)
//! by a helper thread, which keeps the close-interrupts-read guarantee even
//! though the underlying stream (usually stdin) cannot be interrupted.

use std::io::{self, Read, Write};
use std::process::ExitStatus;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::io::endpoint::{self, Feeder, FlushingWriter};
use crate::io::launch::{SpawnFailure, SpawnOptions, spawn_with};

const PUMP_CHUNK_BYTES: usize = 8192;

/// Parameters for one `exec` run.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Program and arguments.
    pub command: Vec<String>,
    /// Kill the child if it is still running after this long.
    pub timeout: Option<Duration>,
    pub options: SpawnOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub status: Option<ExitStatus>,
    pub timed_out: bool,
}

/// Run the child to completion with `input` as its stdin and `output` as its
/// merged stdout/stderr.
#[instrument(skip_all, fields(
    program = ?request.command.first(),
    timeout_secs = ?request.timeout.map(|t| t.as_secs()),
))]
pub fn run_exec<I, O>(request: &ExecRequest, input: I, output: O) -> Result<ExecOutcome>
where
    I: Read + Send + 'static,
    O: Write + Send + 'static,
{
    let (feeder, reader) = endpoint::channel();
    let handle = spawn_with(
        &request.options,
        request.command.as_slice(),
        reader,
        FlushingWriter::new(output),
    )
    .map_err(SpawnFailure::into_error)
    .context("spawn child")?;
    info!(pid = handle.id(), "child started");

    // Detached: the pump may stay blocked on an input that never ends.
    let pump_feeder = feeder.clone();
    if let Err(err) = thread::Builder::new()
        .name("pipebridge-input".to_string())
        .spawn(move || pump_input(input, &pump_feeder))
    {
        feeder.finish();
        return Err(err).context("start input pump");
    }

    let mut timed_out = false;
    if let Some(timeout) = request.timeout
        && handle.wait_timeout(timeout).is_none()
    {
        warn!(timeout_secs = timeout.as_secs(), "child timed out, killing");
        timed_out = true;
        handle.kill().context("kill child")?;
    }

    handle.wait().context("child shutdown")?;
    let status = handle.exit_status();
    debug!(exit_code = ?status.and_then(|s| s.code()), timed_out, "exec finished");
    Ok(ExecOutcome { status, timed_out })
}

/// Copy `input` into `feeder` until end-of-stream or until the reader side is
/// closed, then signal end-of-stream.
fn pump_input<I: Read>(mut input: I, feeder: &Feeder) {
    let mut chunk = [0u8; PUMP_CHUNK_BYTES];
    loop {
        match input.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                if !feeder.send(&chunk[..n]) {
                    debug!("child input closed, stopping pump");
                    return;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(err = %err, "reading input failed");
                break;
            }
        }
    }
    feeder.finish();
}
