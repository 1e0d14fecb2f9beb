//! OS pipes connecting a child process to the relay workers.

use std::io::{self, PipeReader, PipeWriter};

/// The two pipes a spawned child needs.
///
/// `stdin_*` carries bytes from the external reader to the child's fd 0.
/// `output_*` carries the child's fds 1 and 2 to the external writer.
#[derive(Debug)]
pub struct PipePair {
    pub stdin_read: PipeReader,
    pub stdin_write: PipeWriter,
    pub output_read: PipeReader,
    pub output_write: PipeWriter,
}

impl PipePair {
    /// Allocate both pipes.
    ///
    /// If the second allocation fails the first pipe is dropped before the
    /// error is returned, so no descriptors leak.
    pub fn new() -> io::Result<Self> {
        let (stdin_read, stdin_write) = io::pipe()?;
        let (output_read, output_write) = io::pipe()?;
        Ok(Self {
            stdin_read,
            stdin_write,
            output_read,
            output_write,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn pipes_are_independent() {
        let PipePair {
            mut stdin_read,
            mut stdin_write,
            mut output_read,
            mut output_write,
        } = PipePair::new().expect("pipes");

        stdin_write.write_all(b"in").expect("write stdin");
        output_write.write_all(b"out").expect("write output");
        drop(stdin_write);
        drop(output_write);

        let mut stdin = String::new();
        stdin_read.read_to_string(&mut stdin).expect("read stdin");
        let mut output = String::new();
        output_read.read_to_string(&mut output).expect("read output");
        assert_eq!(stdin, "in");
        assert_eq!(output, "out");
    }

    #[test]
    fn write_end_clone_keeps_pipe_open() {
        let PipePair {
            mut output_read,
            output_write,
            ..
        } = PipePair::new().expect("pipes");
        let mut clone = output_write.try_clone().expect("clone");
        drop(output_write);

        clone.write_all(b"still open").expect("write via clone");
        drop(clone);

        let mut buf = String::new();
        output_read.read_to_string(&mut buf).expect("read");
        assert_eq!(buf, "still open");
    }
}
