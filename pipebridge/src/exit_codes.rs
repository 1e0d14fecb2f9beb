//! Stable exit codes for the `pipebridge` binary.
//!
//! `exec` otherwise exits with the child's own exit code.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid config, spawn failure, shutdown errors, or a child killed by a signal.
pub const FAILED: i32 = 1;
/// `exec` killed the child after `--timeout-secs` elapsed.
pub const TIMED_OUT: i32 = 124;
