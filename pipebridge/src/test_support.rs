//! Test-only endpoints and processes with observable close behaviour.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::io::endpoint::{ClosableReader, ClosableWriter};
use crate::io::process::ChildProcess;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct ReaderState {
    chunks: VecDeque<Vec<u8>>,
    block_at_end: bool,
    closed: bool,
    close_calls: usize,
}

#[derive(Debug, Default)]
struct ReaderShared {
    state: Mutex<ReaderState>,
    ready: Condvar,
}

/// Reader that yields scripted chunks, then either end-of-stream or (for
/// [`ScriptedReader::blocking`]) blocks until closed.
#[derive(Debug)]
pub struct ScriptedReader {
    shared: Arc<ReaderShared>,
    close_error: Option<io::ErrorKind>,
}

impl ScriptedReader {
    /// Yield `chunks`, then end-of-stream.
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self::build(chunks, false)
    }

    /// Yield `chunks`, then block like a remote source until closed.
    pub fn blocking(chunks: Vec<Vec<u8>>) -> Self {
        Self::build(chunks, true)
    }

    fn build(chunks: Vec<Vec<u8>>, block_at_end: bool) -> Self {
        let shared = ReaderShared {
            state: Mutex::new(ReaderState {
                chunks: chunks.into(),
                block_at_end,
                ..ReaderState::default()
            }),
            ready: Condvar::new(),
        };
        Self {
            shared: Arc::new(shared),
            close_error: None,
        }
    }

    /// Make `close` report an error (the reader is still closed).
    pub fn with_close_error(mut self, kind: io::ErrorKind) -> Self {
        self.close_error = Some(kind);
        self
    }

    pub fn probe(&self) -> ReaderProbe {
        ReaderProbe {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl ClosableReader for ScriptedReader {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let state = lock(&self.shared.state);
        let mut state = self
            .shared
            .ready
            .wait_while(state, |s| s.chunks.is_empty() && s.block_at_end && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Ok(0);
        }
        let Some(mut chunk) = state.chunks.pop_front() else {
            return Ok(0);
        };
        let n = buf.len().min(chunk.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            state.chunks.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    fn close(&self) -> io::Result<()> {
        let mut state = lock(&self.shared.state);
        state.closed = true;
        state.close_calls += 1;
        self.shared.ready.notify_all();
        match self.close_error {
            Some(kind) => Err(io::Error::new(kind, "scripted reader close failure")),
            None => Ok(()),
        }
    }
}

/// Observes a [`ScriptedReader`] after it was handed to the launcher.
#[derive(Debug, Clone)]
pub struct ReaderProbe {
    shared: Arc<ReaderShared>,
}

impl ReaderProbe {
    pub fn close_calls(&self) -> usize {
        lock(&self.shared.state).close_calls
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared.state).closed
    }
}

#[derive(Debug, Default)]
struct WriterShared {
    data: Mutex<Vec<u8>>,
    close_calls: AtomicUsize,
}

/// Writer that collects everything written and records `close` calls.
#[derive(Debug, Default)]
pub struct CollectingWriter {
    shared: Arc<WriterShared>,
    close_error: Option<io::ErrorKind>,
    close_gate: Option<Receiver<()>>,
}

impl CollectingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `close` report an error (the writer is still closed).
    pub fn with_close_error(mut self, kind: io::ErrorKind) -> Self {
        self.close_error = Some(kind);
        self
    }

    /// Make `close` block until the returned gate is released.
    pub fn with_close_gate(mut self) -> (Self, CloseGate) {
        let (tx, rx) = mpsc::channel();
        self.close_gate = Some(rx);
        (self, CloseGate { tx })
    }

    pub fn probe(&self) -> WriterProbe {
        WriterProbe {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Write for CollectingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.shared.close_calls.load(Ordering::SeqCst) > 0 {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "writer closed"));
        }
        lock(&self.shared.data).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ClosableWriter for CollectingWriter {
    fn close(&mut self) -> io::Result<()> {
        if let Some(gate) = self.close_gate.take() {
            // A dropped gate releases the writer as well.
            let _released = gate.recv();
        }
        self.shared.close_calls.fetch_add(1, Ordering::SeqCst);
        match self.close_error {
            Some(kind) => Err(io::Error::new(kind, "scripted writer close failure")),
            None => Ok(()),
        }
    }
}

/// Releases a [`CollectingWriter`] blocked in `close`.
#[derive(Debug)]
pub struct CloseGate {
    tx: Sender<()>,
}

impl CloseGate {
    pub fn release(self) {
        let _delivered = self.tx.send(());
    }
}

/// Observes a [`CollectingWriter`] after it was handed to the launcher.
#[derive(Debug, Clone)]
pub struct WriterProbe {
    shared: Arc<WriterShared>,
}

impl WriterProbe {
    pub fn contents(&self) -> Vec<u8> {
        lock(&self.shared.data).clone()
    }

    pub fn contents_string(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    pub fn close_calls(&self) -> usize {
        self.shared.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.close_calls() > 0
    }
}

/// Clonable in-memory sink for orchestration tests.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    data: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents_string(&self) -> String {
        String::from_utf8_lossy(&lock(&self.data)).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.data).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Child process stand-in that counts waits and exits after `delay`.
#[derive(Debug, Default)]
pub struct ScriptedProcess {
    waits: AtomicUsize,
    kills: AtomicUsize,
    delay: Duration,
    wait_error: Option<io::ErrorKind>,
}

impl ScriptedProcess {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn with_wait_error(mut self, kind: io::ErrorKind) -> Self {
        self.wait_error = Some(kind);
        self
    }

    pub fn waits(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

impl ChildProcess for ScriptedProcess {
    fn id(&self) -> u32 {
        4242
    }

    fn wait(&self) -> io::Result<ExitStatus> {
        self.waits.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        match self.wait_error {
            Some(kind) => Err(io::Error::new(kind, "scripted wait failure")),
            None => Ok(ExitStatus::default()),
        }
    }

    fn kill(&self) -> io::Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
