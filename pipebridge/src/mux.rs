//! `pipebridge mux`: one child per channel.
//!
//! Each input line `<channel>\t<text>` is routed to the child owning that
//! channel, spawning it on first sight. Output lines come back prefixed with
//! their channel. Children are fire-and-forget: one that exits (or failed to
//! spawn) is never restarted and later messages for its channel are dropped.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::route::{expand_args, parse_line};
use crate::io::endpoint::{self, Feeder, PrefixedWriter};
use crate::io::launch::{ProcessHandle, SpawnOptions, spawn_with};

/// Parameters for one `mux` run.
#[derive(Debug, Clone)]
pub struct MuxRequest {
    /// Program and argument templates.
    pub command: Vec<String>,
    /// Replaced by the channel id in `command`.
    pub placeholder: String,
    pub options: SpawnOptions,
}

/// Counters reported when input ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MuxSummary {
    pub spawned: usize,
    pub spawn_failures: usize,
    pub skipped_lines: usize,
    pub dropped_messages: usize,
    pub shutdown_failures: usize,
}

struct Route {
    feeder: Feeder,
    handle: ProcessHandle,
}

/// Route `input` lines to per-channel children until end of input, then close
/// every child's input and wait for all of them.
///
/// Children are finished and waited even when reading `input` fails; the read
/// error is returned afterwards.
#[instrument(skip_all, fields(program = ?request.command.first()))]
pub fn run_mux<I, O>(request: &MuxRequest, input: I, output: O) -> Result<MuxSummary>
where
    I: BufRead,
    O: Write + Send + 'static,
{
    let out = Arc::new(Mutex::new(output));
    let mut routes: HashMap<String, Option<Route>> = HashMap::new();
    let mut summary = MuxSummary::default();

    let read = route_lines(request, input, &out, &mut routes, &mut summary);

    for route in routes.values().flatten() {
        route.feeder.finish();
    }
    for (channel, route) in &routes {
        let Some(route) = route else { continue };
        if let Err(err) = route.handle.wait() {
            warn!(channel = %channel, err = %err, "child shutdown reported errors");
            summary.shutdown_failures += 1;
        }
    }

    read.context("read mux input")?;
    info!(?summary, "mux input finished");
    Ok(summary)
}

fn route_lines<I, O>(
    request: &MuxRequest,
    mut input: I,
    out: &Arc<Mutex<O>>,
    routes: &mut HashMap<String, Option<Route>>,
    summary: &mut MuxSummary,
) -> io::Result<()>
where
    I: BufRead,
    O: Write + Send + 'static,
{
    let mut raw = Vec::new();
    loop {
        raw.clear();
        match input.read_until(b'\n', &mut raw) {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
        let bytes = raw.strip_suffix(b"\n").unwrap_or(&raw);
        let Ok(line) = std::str::from_utf8(bytes) else {
            warn!("skipping line that is not valid UTF-8");
            summary.skipped_lines += 1;
            continue;
        };
        let msg = match parse_line(line) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(err = %err, "skipping malformed line");
                summary.skipped_lines += 1;
                continue;
            }
        };

        let route = routes
            .entry(msg.channel.to_string())
            .or_insert_with(|| spawn_route(request, msg.channel, out, summary));
        let Some(route) = route else {
            summary.dropped_messages += 1;
            continue;
        };

        let mut payload = Vec::with_capacity(msg.text.len() + 1);
        payload.extend_from_slice(msg.text.as_bytes());
        payload.push(b'\n');
        if !route.feeder.send(&payload) {
            debug!(channel = msg.channel, "child exited, dropping message");
            summary.dropped_messages += 1;
        }
    }
}

fn spawn_route<O>(
    request: &MuxRequest,
    channel: &str,
    out: &Arc<Mutex<O>>,
    summary: &mut MuxSummary,
) -> Option<Route>
where
    O: Write + Send + 'static,
{
    let cmdline = expand_args(&request.command, &request.placeholder, channel);
    let (feeder, reader) = endpoint::channel();
    let writer = PrefixedWriter::new(channel, Arc::clone(out));
    match spawn_with(&request.options, cmdline.as_slice(), reader, writer) {
        Ok(handle) => {
            info!(channel, pid = handle.id(), "spawned child for channel");
            summary.spawned += 1;
            Some(Route { feeder, handle })
        }
        Err(failure) => {
            warn!(channel, err = %failure.error, "failed to spawn child for channel");
            summary.spawn_failures += 1;
            None
        }
    }
}
