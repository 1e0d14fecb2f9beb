//! `pipebridge stream`: strip channel tags from `mux`-style input.
//!
//! Each `<channel>\t<text>` line is written to the output as `text`, either
//! for every channel or only for the one selected.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result, ensure};
use tracing::{debug, instrument, warn};

use crate::core::route::{is_valid_channel, parse_line};

/// Counters reported when input ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub written: usize,
    pub filtered: usize,
    pub skipped_lines: usize,
}

/// Copy message text from `input` to `output` until end of input.
#[instrument(skip_all, fields(channel = ?channel))]
pub fn run_stream<I, O>(
    channel: Option<&str>,
    mut input: I,
    mut output: O,
) -> Result<StreamSummary>
where
    I: BufRead,
    O: Write,
{
    if let Some(channel) = channel {
        ensure!(is_valid_channel(channel), "invalid channel id '{}'", channel);
    }

    let mut summary = StreamSummary::default();
    let mut raw = Vec::new();
    loop {
        raw.clear();
        match input.read_until(b'\n', &mut raw) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err).context("read stream input"),
        }
        let bytes = raw.strip_suffix(b"\n").unwrap_or(&raw);
        let parsed = std::str::from_utf8(bytes)
            .map_err(anyhow::Error::from)
            .and_then(parse_line);
        let msg = match parsed {
            Ok(msg) => msg,
            Err(err) => {
                warn!(err = %err, "skipping malformed line");
                summary.skipped_lines += 1;
                continue;
            }
        };
        if channel.is_some_and(|c| c != msg.channel) {
            summary.filtered += 1;
            continue;
        }
        writeln!(output, "{}", msg.text).context("write stream output")?;
        output.flush().context("flush stream output")?;
        summary.written += 1;
    }

    debug!(?summary, "stream input finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn writes_text_of_every_channel() {
        let mut out = Vec::new();
        let input = Cursor::new("A\tone\nB\ttwo\n");

        let summary = run_stream(None, input, &mut out).expect("stream");

        assert_eq!(out, b"one\ntwo\n");
        assert_eq!(summary.written, 2);
    }

    #[test]
    fn filters_to_selected_channel() {
        let mut out = Vec::new();
        let input = Cursor::new("A\tone\nB\ttwo\nA\tthree\n");

        let summary = run_stream(Some("A"), input, &mut out).expect("stream");

        assert_eq!(out, b"one\nthree\n");
        assert_eq!(summary.filtered, 1);
    }

    #[test]
    fn malformed_and_non_utf8_lines_are_skipped() {
        let mut out = Vec::new();
        let input = Cursor::new(b"no tab\nA\t\xff\nA\tok\n".to_vec());

        let summary = run_stream(None, input, &mut out).expect("stream");

        assert_eq!(out, b"ok\n");
        assert_eq!(summary.skipped_lines, 2);
    }

    #[test]
    fn invalid_channel_filter_is_rejected() {
        let err = run_stream(Some("bad id"), Cursor::new(""), Vec::new()).expect_err("invalid");
        assert!(err.to_string().contains("invalid channel id"));
    }
}
