//! Waiting on and killing a started child process.
//!
//! The shutdown sequence talks to the child only through [`ChildProcess`], so
//! tests can substitute a scripted process and count how often it is waited on.

use std::io;
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::Duration;

use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// A started child process.
pub trait ChildProcess: Send + Sync {
    fn id(&self) -> u32;

    /// Block until the process exits.
    fn wait(&self) -> io::Result<ExitStatus>;

    /// Ask the process to terminate. Does not wait for it.
    fn kill(&self) -> io::Result<()>;
}

/// [`ChildProcess`] backed by `std::process::Child`.
///
/// `Child::wait` needs exclusive access, which would lock out `kill` for the
/// lifetime of the child. Instead the waiter polls with `wait_timeout` and
/// releases the lock between polls; a kill that finds the lock held is left
/// for the waiter to deliver on its next poll.
#[derive(Debug)]
pub struct OsProcess {
    pid: u32,
    child: Mutex<Child>,
    kill_requested: AtomicBool,
    poll_interval: Duration,
}

impl OsProcess {
    pub fn new(child: Child, poll_interval: Duration) -> Self {
        Self {
            pid: child.id(),
            child: Mutex::new(child),
            kill_requested: AtomicBool::new(false),
            poll_interval,
        }
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, Child>> {
        self.child
            .lock()
            .map_err(|_| io::Error::other("child process lock poisoned"))
    }
}

impl ChildProcess for OsProcess {
    fn id(&self) -> u32 {
        self.pid
    }

    fn wait(&self) -> io::Result<ExitStatus> {
        loop {
            let mut child = self.lock()?;
            if self.kill_requested.swap(false, Ordering::SeqCst) {
                debug!(pid = self.pid, "delivering deferred kill");
                if let Err(err) = child.kill() {
                    warn!(pid = self.pid, err = %err, "failed to kill child");
                }
            }
            if let Some(status) = child.wait_timeout(self.poll_interval)? {
                debug!(pid = self.pid, exit_code = ?status.code(), "child exited");
                return Ok(status);
            }
        }
    }

    fn kill(&self) -> io::Result<()> {
        match self.child.try_lock() {
            Ok(mut child) => child.kill(),
            Err(TryLockError::WouldBlock) => {
                self.kill_requested.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(TryLockError::Poisoned(_)) => Err(io::Error::other("child process lock poisoned")),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;
    use std::sync::Arc;
    use std::thread;

    fn start(program: &str, args: &[&str]) -> OsProcess {
        let child = Command::new(program).args(args).spawn().expect("spawn");
        OsProcess::new(child, Duration::from_millis(10))
    }

    #[test]
    fn wait_reports_exit_code() {
        let process = start("sh", &["-c", "exit 5"]);
        let status = process.wait().expect("wait");
        assert_eq!(status.code(), Some(5));
    }

    #[test]
    fn wait_after_exit_returns_cached_status() {
        let process = start("true", &[]);
        let first = process.wait().expect("first wait");
        let second = process.wait().expect("second wait");
        assert_eq!(first, second);
    }

    #[test]
    fn kill_interrupts_blocked_wait() {
        let process = Arc::new(start("sleep", &["30"]));
        let waiter = {
            let process = Arc::clone(&process);
            thread::spawn(move || process.wait())
        };

        thread::sleep(Duration::from_millis(50));
        process.kill().expect("kill");

        let status = waiter.join().expect("join").expect("wait");
        assert!(!status.success());
    }
}
