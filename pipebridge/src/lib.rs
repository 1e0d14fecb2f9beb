//! Child process I/O bridging.
//!
//! Spawns a program whose stdin is fed from a closable reader and whose
//! merged stdout/stderr is copied into a closable writer, then tears
//! everything down exactly once, in an order that cannot deadlock, no matter
//! which side finishes first.
//!
//! - **[`core`]**: Pure logic (error aggregation, mux routing rules).
//! - **[`io`]**: Pipes, processes, relay threads, the shutdown sequence and
//!   the endpoints they connect to.
//!
//! Orchestration modules ([`exec`], [`mux`]) implement the CLI commands.
//!
//! ```no_run
//! use pipebridge::io::endpoint::{FlushingWriter, channel};
//! use pipebridge::spawn;
//!
//! let (feeder, reader) = channel();
//! let handle = spawn(&["cat"], reader, FlushingWriter::new(std::io::stdout()))
//!     .map_err(|failure| failure.error)?;
//! feeder.send(b"hello\n");
//! feeder.finish();
//! handle.wait()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod core;
pub mod exec;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod mux;
pub mod stream;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use crate::core::errors::{ShutdownError, ShutdownStep, StepError};
pub use crate::io::endpoint::{ClosableReader, ClosableWriter};
pub use crate::io::launch::{
    ProcessHandle, SpawnError, SpawnFailure, SpawnOptions, spawn, spawn_with,
};
