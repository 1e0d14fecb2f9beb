//! Relay workers copying bytes between the external endpoints and the pipes.
//!
//! Each relay runs on its own thread and reports exactly one [`RelayOutcome`]
//! through its join handle. Neither relay touches the external reader's close
//! or the retained stdin read end; both belong to the shutdown sequence.

use std::io::{self, PipeReader, PipeWriter, Read, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::io::endpoint::{ClosableReader, ClosableWriter, ReadAdapter};

/// Terminal result of one copy direction.
#[derive(Debug, Default)]
pub struct RelayOutcome {
    /// Error that ended the copy loop early.
    pub copy: Option<io::Error>,
    /// Error closing the external writer (output relay only).
    pub close: Option<io::Error>,
}

/// A relay thread, or the error that kept it from starting.
#[derive(Debug)]
pub enum RelayTask {
    Running(JoinHandle<RelayOutcome>),
    NotStarted(io::Error),
}

impl RelayTask {
    fn spawn<F>(name: String, work: F) -> Self
    where
        F: FnOnce() -> RelayOutcome + Send + 'static,
    {
        match thread::Builder::new().name(name.clone()).spawn(work) {
            Ok(handle) => RelayTask::Running(handle),
            Err(err) => {
                warn!(relay = %name, err = %err, "failed to start relay thread");
                RelayTask::NotStarted(err)
            }
        }
    }

    /// Block until the relay finished and take its outcome.
    pub fn join(self) -> RelayOutcome {
        match self {
            RelayTask::Running(handle) => handle.join().unwrap_or_else(|_| RelayOutcome {
                copy: Some(io::Error::other("relay thread panicked")),
                close: None,
            }),
            RelayTask::NotStarted(err) => RelayOutcome {
                copy: Some(err),
                close: None,
            },
        }
    }
}

/// Copy `reader` into `writer` in `buf_size` chunks until end-of-stream,
/// flushing after every chunk so interactive output is not held back.
pub fn copy_stream<R, W>(reader: &mut R, writer: &mut W, buf_size: usize) -> io::Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut chunk = vec![0u8; buf_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        writer.write_all(&chunk[..n])?;
        writer.flush()?;
        total += n as u64;
    }
}

/// Start the relay from the external reader into the child's stdin.
///
/// When the copy ends the write end of the stdin pipe is dropped, which is what
/// lets the child observe end-of-input.
pub fn spawn_input(
    pid: u32,
    reader: Arc<dyn ClosableReader>,
    stdin_write: PipeWriter,
    buf_size: usize,
) -> RelayTask {
    RelayTask::spawn(format!("pipebridge-stdin-{pid}"), move || {
        let mut stdin_write = stdin_write;
        let copied = copy_stream(&mut ReadAdapter(reader.as_ref()), &mut stdin_write, buf_size);
        drop(stdin_write);
        match copied {
            Ok(bytes) => {
                debug!(pid, bytes, "input relay finished");
                RelayOutcome::default()
            }
            Err(err) => {
                debug!(pid, err = %err, "input relay failed");
                RelayOutcome {
                    copy: Some(err),
                    close: None,
                }
            }
        }
    })
}

/// Start the relay from the child's merged stdout/stderr into the external
/// writer, closing the writer once the child's side reaches end-of-stream.
pub fn spawn_output<W>(pid: u32, output_read: PipeReader, writer: W, buf_size: usize) -> RelayTask
where
    W: ClosableWriter + 'static,
{
    RelayTask::spawn(format!("pipebridge-stdout-{pid}"), move || {
        let mut output_read = output_read;
        let mut writer = writer;
        let copied = copy_stream(&mut output_read, &mut writer, buf_size);
        drop(output_read);
        let closed = writer.close();
        debug!(pid, copied = ?copied.as_ref().ok(), "output relay finished");
        RelayOutcome {
            copy: copied.err(),
            close: closed.err(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::pipes::PipePair;
    use crate::test_support::{CollectingWriter, ScriptedReader};

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
        }
    }

    #[test]
    fn copy_stream_copies_everything_in_small_chunks() {
        let mut src: &[u8] = b"hello relay";
        let mut dst = Vec::new();
        let copied = copy_stream(&mut src, &mut dst, 3).expect("copy");
        assert_eq!(copied, 11);
        assert_eq!(dst, b"hello relay");
    }

    #[test]
    fn copy_stream_reports_read_errors() {
        let mut dst = Vec::new();
        let err = copy_stream(&mut FailingReader, &mut dst, 8).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn input_relay_closes_stdin_write_end() {
        let PipePair {
            mut stdin_read,
            stdin_write,
            ..
        } = PipePair::new().expect("pipes");
        let reader: Arc<dyn ClosableReader> =
            Arc::new(ScriptedReader::new(vec![b"a\n".to_vec(), b"b\n".to_vec()]));

        let task = spawn_input(1, reader, stdin_write, 16);

        let mut received = String::new();
        stdin_read.read_to_string(&mut received).expect("read to eof");
        assert_eq!(received, "a\nb\n");
        let outcome = task.join();
        assert!(outcome.copy.is_none());
    }

    #[test]
    fn output_relay_closes_writer_after_eof() {
        let PipePair {
            output_read,
            mut output_write,
            ..
        } = PipePair::new().expect("pipes");
        let writer = CollectingWriter::new();
        let probe = writer.probe();

        let task = spawn_output(1, output_read, writer, 4);
        output_write.write_all(b"child output").expect("write");
        drop(output_write);

        let outcome = task.join();
        assert!(outcome.copy.is_none());
        assert!(outcome.close.is_none());
        assert_eq!(probe.contents(), b"child output");
        assert_eq!(probe.close_calls(), 1);
    }

    #[test]
    fn output_relay_reports_close_error() {
        let PipePair {
            output_read,
            output_write,
            ..
        } = PipePair::new().expect("pipes");
        drop(output_write);
        let writer = CollectingWriter::new().with_close_error(io::ErrorKind::NotConnected);

        let outcome = spawn_output(1, output_read, writer, 4).join();
        let err = outcome.close.expect("close error");
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
