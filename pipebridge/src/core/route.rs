//! Channel routing rules for `pipebridge mux`.
//!
//! Input lines have the form `<channel>\t<text>`. The channel id selects (or
//! creates) the child process that receives `text`.

use std::sync::LazyLock;

use anyhow::{Result, bail};
use regex::Regex;

/// Placeholder replaced by the channel id in the arguments of spawned children.
pub const DEFAULT_PLACEHOLDER: &str = "{{.ChannelID}}";

static CHANNEL_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$").expect("valid regex"));

/// One routed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message<'a> {
    pub channel: &'a str,
    pub text: &'a str,
}

/// Split a mux input line into channel and text.
pub fn parse_line(line: &str) -> Result<Message<'_>> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let Some((channel, text)) = line.split_once('\t') else {
        bail!("missing tab separator");
    };
    if !is_valid_channel(channel) {
        bail!("invalid channel id '{}'", channel);
    }
    Ok(Message { channel, text })
}

/// Channel ids end up in child argv, so only a conservative alphabet is accepted.
pub fn is_valid_channel(id: &str) -> bool {
    CHANNEL_ID_RE.is_match(id)
}

/// Replace every occurrence of `placeholder` in `args` with `channel`.
pub fn expand_args(args: &[String], placeholder: &str, channel: &str) -> Vec<String> {
    args.iter()
        .map(|arg| arg.replace(placeholder, channel))
        .collect()
}
