//! Bridge a program's standard streams to closable byte streams.
//!
//! `exec` runs one program against this process's stdin/stdout. `mux` runs one
//! instance per channel read from stdin. `stream` prints the text of tagged
//! lines, optionally for one channel only.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, ensure};
use clap::{Parser, Subcommand};
use pipebridge::exec::{ExecRequest, run_exec};
use pipebridge::exit_codes;
use pipebridge::io::config::{BridgeConfig, DEFAULT_CONFIG_PATH, load_config};
use pipebridge::logging;
use pipebridge::mux::{MuxRequest, run_mux};
use pipebridge::stream::run_stream;

#[derive(Parser)]
#[command(
    name = "pipebridge",
    version,
    about = "Connect a program's standard streams to closable byte streams"
)]
struct Cli {
    /// Path to the TOML config file (missing file means defaults).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a program with stdin, stdout and stderr bridged to this process.
    Exec {
        /// Kill the program after this many seconds (overrides config).
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Program and arguments, after `--`.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Run one program instance per channel; input lines are `<channel>\t<text>`.
    Mux {
        /// Pattern replaced by the channel id in arguments (overrides config).
        #[arg(long)]
        placeholder: Option<String>,

        /// Program and argument templates, after `--`.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Print the text of `<channel>\t<text>` lines read from stdin.
    Stream {
        /// Only print messages from this channel.
        #[arg(short, long)]
        channel: Option<String>,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    match cli.command {
        Command::Exec {
            timeout_secs,
            command,
        } => cmd_exec(&config, timeout_secs, command),
        Command::Mux {
            placeholder,
            command,
        } => cmd_mux(&config, placeholder, command),
        Command::Stream { channel } => {
            run_stream(channel.as_deref(), io::stdin().lock(), io::stdout().lock())?;
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_exec(
    config: &BridgeConfig,
    timeout_secs: Option<u64>,
    command: Vec<String>,
) -> Result<i32> {
    let timeout = match timeout_secs {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => config.exec_timeout(),
    };
    let request = ExecRequest {
        command,
        timeout,
        options: config.spawn_options(),
    };
    let outcome = run_exec(&request, io::stdin(), io::stdout())?;
    if outcome.timed_out {
        return Ok(exit_codes::TIMED_OUT);
    }
    Ok(outcome
        .status
        .and_then(|status| status.code())
        .unwrap_or(exit_codes::FAILED))
}

fn cmd_mux(
    config: &BridgeConfig,
    placeholder: Option<String>,
    command: Vec<String>,
) -> Result<i32> {
    let request = MuxRequest {
        command,
        placeholder: placeholder.unwrap_or_else(|| config.mux.placeholder.clone()),
        options: config.spawn_options(),
    };
    ensure!(
        !request.placeholder.is_empty(),
        "--placeholder must be non-empty"
    );
    run_mux(&request, io::stdin().lock(), io::stdout())?;
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_exec_with_separator() {
        let cli = Cli::parse_from(["pipebridge", "exec", "--", "cat", "-n"]);
        match cli.command {
            Command::Exec {
                timeout_secs,
                command,
            } => {
                assert_eq!(timeout_secs, None);
                assert_eq!(command, vec!["cat", "-n"]);
            }
            other => panic!("expected exec, got {}", name(&other)),
        }
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn parse_exec_timeout() {
        let cli = Cli::parse_from([
            "pipebridge",
            "exec",
            "--timeout-secs",
            "5",
            "--",
            "sleep",
            "9",
        ]);
        assert!(matches!(
            cli.command,
            Command::Exec {
                timeout_secs: Some(5),
                ..
            }
        ));
    }

    #[test]
    fn parse_mux_placeholder() {
        let cli = Cli::parse_from([
            "pipebridge",
            "--config",
            "alt.toml",
            "mux",
            "--placeholder",
            "@CH@",
            "--",
            "./bot.sh",
            "@CH@",
        ]);
        assert_eq!(cli.config, PathBuf::from("alt.toml"));
        match cli.command {
            Command::Mux {
                placeholder,
                command,
            } => {
                assert_eq!(placeholder.as_deref(), Some("@CH@"));
                assert_eq!(command, vec!["./bot.sh", "@CH@"]);
            }
            other => panic!("expected mux, got {}", name(&other)),
        }
    }

    fn name(command: &Command) -> &'static str {
        match command {
            Command::Exec { .. } => "exec",
            Command::Mux { .. } => "mux",
            Command::Stream { .. } => "stream",
        }
    }

    #[test]
    fn parse_stream_channel() {
        let cli = Cli::parse_from(["pipebridge", "stream", "-c", "C42"]);
        match cli.command {
            Command::Stream { channel } => assert_eq!(channel.as_deref(), Some("C42")),
            other => panic!("expected stream, got {}", name(&other)),
        }
    }

    #[test]
    fn exec_requires_a_program() {
        assert!(Cli::try_parse_from(["pipebridge", "exec"]).is_err());
    }
}
