//! Closable byte-stream endpoints.
//!
//! [`ClosableReader`] and [`ClosableWriter`] are the only capabilities the
//! launcher needs from the outside world. This module also provides local
//! implementations: an in-memory [`ChannelReader`] fed through a [`Feeder`],
//! a [`FlushingWriter`] over any `Write`, and a [`PrefixedWriter`] that tags
//! every output line with a channel id.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// A readable byte stream whose `close` interrupts reads.
///
/// # Precondition
///
/// `close` must cause any read blocked in another thread, and every later
/// read, to return `Ok(0)`. The shutdown sequence closes the reader after the
/// child exits and relies on this to stop the input relay. Readers that cannot
/// guarantee it (raw OS pipes, for one) must not be handed to the launcher:
/// shutdown would block until their read returns on its own.
pub trait ClosableReader: Send + Sync {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn close(&self) -> io::Result<()>;
}

/// A writable byte stream closed once after the last write.
pub trait ClosableWriter: Write + Send {
    fn close(&mut self) -> io::Result<()>;
}

/// Adapts a shared [`ClosableReader`] to `std::io::Read`.
pub(crate) struct ReadAdapter<'a>(pub &'a dyn ClosableReader);

impl io::Read for ReadAdapter<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

#[derive(Debug, Default)]
struct ChannelState {
    buf: VecDeque<u8>,
    finished: bool,
    closed: bool,
    feeders: usize,
}

#[derive(Debug, Default)]
struct ChannelShared {
    state: Mutex<ChannelState>,
    ready: Condvar,
}

impl ChannelShared {
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create a connected feeder/reader pair.
pub fn channel() -> (Feeder, ChannelReader) {
    let shared = Arc::new(ChannelShared {
        state: Mutex::new(ChannelState {
            feeders: 1,
            ..ChannelState::default()
        }),
        ready: Condvar::new(),
    });
    (
        Feeder {
            shared: Arc::clone(&shared),
        },
        ChannelReader { shared },
    )
}

/// In-memory reader fed by a [`Feeder`].
///
/// Reads block until bytes arrive, the feeder finishes (explicitly or by the
/// last clone being dropped), or the reader is closed. Closing discards
/// buffered bytes and wakes blocked readers, so it satisfies the
/// [`ClosableReader`] precondition.
#[derive(Debug)]
pub struct ChannelReader {
    shared: Arc<ChannelShared>,
}

impl ClosableReader for ChannelReader {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let state = self.shared.lock();
        let mut state = self
            .shared
            .ready
            .wait_while(state, |s| s.buf.is_empty() && !s.finished && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Ok(0);
        }
        let n = buf.len().min(state.buf.len());
        for (dst, src) in buf.iter_mut().zip(state.buf.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn close(&self) -> io::Result<()> {
        let mut state = self.shared.lock();
        state.closed = true;
        state.buf.clear();
        self.shared.ready.notify_all();
        Ok(())
    }
}

/// Push side of a [`ChannelReader`]. Dropping the last clone finishes the
/// stream.
#[derive(Debug)]
pub struct Feeder {
    shared: Arc<ChannelShared>,
}

impl Clone for Feeder {
    fn clone(&self) -> Self {
        self.shared.lock().feeders += 1;
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for Feeder {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.feeders -= 1;
        if state.feeders == 0 {
            state.finished = true;
            self.shared.ready.notify_all();
        }
    }
}

impl Feeder {
    /// Queue bytes for the reader. Returns `false` once the reader is closed or
    /// the feeder finished, in which case the bytes are dropped.
    pub fn send(&self, bytes: &[u8]) -> bool {
        let mut state = self.shared.lock();
        if state.closed || state.finished {
            return false;
        }
        state.buf.extend(bytes);
        self.shared.ready.notify_all();
        true
    }

    /// Signal end-of-stream; the reader returns `Ok(0)` after draining.
    pub fn finish(&self) {
        let mut state = self.shared.lock();
        state.finished = true;
        self.shared.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

/// Writer whose close only flushes, for sinks the bridge must not own (stdout).
#[derive(Debug)]
pub struct FlushingWriter<W> {
    inner: W,
}

impl<W: Write> FlushingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: Write> Write for FlushingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write + Send> ClosableWriter for FlushingWriter<W> {
    fn close(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Line writer that prefixes every line with `<channel>\t` before handing it to
/// a shared sink. Partial lines are held until their newline arrives or the
/// writer is closed.
#[derive(Debug)]
pub struct PrefixedWriter<W> {
    prefix: String,
    pending: Vec<u8>,
    out: Arc<Mutex<W>>,
}

impl<W: Write> PrefixedWriter<W> {
    pub fn new(channel: &str, out: Arc<Mutex<W>>) -> Self {
        Self {
            prefix: format!("{channel}\t"),
            pending: Vec::new(),
            out,
        }
    }

    fn emit(&self, line: &[u8]) -> io::Result<()> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        out.write_all(self.prefix.as_bytes())?;
        out.write_all(line)?;
        if !line.ends_with(b"\n") {
            out.write_all(b"\n")?;
        }
        Ok(())
    }
}

impl<W: Write> Write for PrefixedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.emit(&line)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
    }
}

impl<W: Write + Send> ClosableWriter for PrefixedWriter<W> {
    fn close(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.emit(&line)?;
        }
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn reader_returns_fed_bytes_then_eof() {
        let (feeder, reader) = channel();
        assert!(feeder.send(b"abc"));
        feeder.finish();

        let mut buf = [0u8; 2];
        assert_eq!(reader.read(&mut buf).expect("read"), 2);
        assert_eq!(&buf, b"ab");
        assert_eq!(reader.read(&mut buf).expect("read"), 1);
        assert_eq!(buf[0], b'c');
        assert_eq!(reader.read(&mut buf).expect("read"), 0);
    }

    #[test]
    fn close_unblocks_pending_read() {
        let (feeder, reader) = channel();
        let reader = Arc::new(reader);
        let blocked = {
            let reader = Arc::clone(&reader);
            thread::spawn(move || {
                let mut buf = [0u8; 8];
                reader.read(&mut buf)
            })
        };

        thread::sleep(Duration::from_millis(50));
        reader.close().expect("close");

        let n = blocked.join().expect("join").expect("read");
        assert_eq!(n, 0);
        assert!(feeder.is_closed());
        assert!(!feeder.send(b"late"));
    }

    #[test]
    fn dropping_last_feeder_ends_stream() {
        let (feeder, reader) = channel();
        let second = feeder.clone();
        feeder.send(b"tail");
        drop(feeder);

        let reader = Arc::new(reader);
        let blocked = {
            let reader = Arc::clone(&reader);
            thread::spawn(move || {
                let mut out = Vec::new();
                let mut buf = [0u8; 8];
                loop {
                    match reader.read(&mut buf).expect("read") {
                        0 => return out,
                        n => out.extend_from_slice(&buf[..n]),
                    }
                }
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!blocked.is_finished());
        drop(second);
        assert_eq!(blocked.join().expect("join"), b"tail");
    }

    #[test]
    fn close_discards_buffered_bytes() {
        let (feeder, reader) = channel();
        feeder.send(b"unread");
        reader.close().expect("close");
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).expect("read"), 0);
    }

    #[test]
    fn prefixed_writer_tags_complete_lines() {
        let out = Arc::new(Mutex::new(Vec::new()));
        let mut writer = PrefixedWriter::new("C1", Arc::clone(&out));
        writer.write_all(b"one\ntw").expect("write");
        assert_eq!(out.lock().expect("lock").as_slice(), b"C1\tone\n");

        writer.write_all(b"o\nthree").expect("write");
        writer.close().expect("close");
        assert_eq!(
            out.lock().expect("lock").as_slice(),
            b"C1\tone\nC1\ttwo\nC1\tthree\n"
        );
    }

    #[test]
    fn flushing_writer_passes_bytes_through() {
        let mut writer = FlushingWriter::new(Vec::new());
        writer.write_all(b"hi").expect("write");
        writer.close().expect("close");
        assert_eq!(writer.inner, b"hi");
    }
}
