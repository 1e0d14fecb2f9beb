//! Composite error produced by the shutdown sequence.
//!
//! Every step of the shutdown runs regardless of earlier failures, so the
//! result is a list rather than a single error. Entries are stored as plain
//! values (step, kind, message) which keeps the composite `Clone` and lets
//! tests compare two results by their causes.

use std::fmt;
use std::io;

/// A step of the shutdown sequence that can report an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownStep {
    /// Waiting for the child process to exit.
    Wait,
    /// Closing the external reader.
    CloseReader,
    /// Draining the retained read end of the stdin pipe.
    DrainStdin,
    /// Copying from the external reader into the child's stdin.
    InputRelay,
    /// Copying from the child's stdout/stderr into the external writer.
    OutputRelay,
    /// Closing the external writer.
    CloseWriter,
    /// The sequence itself, when it panicked part-way.
    Sequence,
}

impl ShutdownStep {
    pub fn label(self) -> &'static str {
        match self {
            ShutdownStep::Wait => "wait for child",
            ShutdownStep::CloseReader => "close reader",
            ShutdownStep::DrainStdin => "drain stdin pipe",
            ShutdownStep::InputRelay => "input relay",
            ShutdownStep::OutputRelay => "output relay",
            ShutdownStep::CloseWriter => "close writer",
            ShutdownStep::Sequence => "shutdown sequence",
        }
    }
}

impl fmt::Display for ShutdownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One error captured during shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepError {
    pub step: ShutdownStep,
    pub kind: io::ErrorKind,
    pub message: String,
}

impl StepError {
    pub fn new(step: ShutdownStep, err: &io::Error) -> Self {
        Self {
            step,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.message)
    }
}

/// Ordered, non-empty list of errors from one shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownError {
    errors: Vec<StepError>,
}

impl ShutdownError {
    pub fn errors(&self) -> &[StepError] {
        &self.errors
    }

    /// Steps that failed, in the order they ran.
    pub fn steps(&self) -> Vec<ShutdownStep> {
        self.errors.iter().map(|err| err.step).collect()
    }

    pub fn contains(&self, step: ShutdownStep) -> bool {
        self.errors.iter().any(|err| err.step == step)
    }
}

impl fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.errors.len() == 1 {
            "error"
        } else {
            "errors"
        };
        write!(f, "{} {} occurred during shutdown:", self.errors.len(), noun)?;
        for err in &self.errors {
            write!(f, "\n\t* {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ShutdownError {}

/// Accumulates step results; successful results are dropped.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    errors: Vec<StepError>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the error of `result`, if any, and hand back the success value.
    pub fn record<T>(&mut self, step: ShutdownStep, result: io::Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.errors.push(StepError::new(step, &err));
                None
            }
        }
    }

    pub fn record_error(&mut self, step: ShutdownStep, err: Option<io::Error>) {
        if let Some(err) = err {
            self.errors.push(StepError::new(step, &err));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(self) -> Result<(), ShutdownError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ShutdownError {
                errors: self.errors,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_without_errors_finishes_ok() {
        let mut errors = ErrorCollector::new();
        assert_eq!(errors.record(ShutdownStep::Wait, Ok(7)), Some(7));
        errors.record_error(ShutdownStep::InputRelay, None);
        assert!(errors.is_empty());
        assert!(errors.finish().is_ok());
    }

    #[test]
    fn collector_keeps_errors_in_order() {
        let mut errors = ErrorCollector::new();
        errors.record::<()>(
            ShutdownStep::CloseReader,
            Err(io::Error::other("reader gone")),
        );
        errors.record(ShutdownStep::DrainStdin, Ok(0u64));
        errors.record_error(
            ShutdownStep::CloseWriter,
            Some(io::Error::new(io::ErrorKind::BrokenPipe, "writer gone")),
        );

        let err = errors.finish().expect_err("errors recorded");
        assert_eq!(
            err.steps(),
            vec![ShutdownStep::CloseReader, ShutdownStep::CloseWriter]
        );
        assert_eq!(err.errors()[1].kind, io::ErrorKind::BrokenPipe);
        assert!(err.contains(ShutdownStep::CloseReader));
        assert!(!err.contains(ShutdownStep::Wait));
    }

    #[test]
    fn display_lists_every_cause() {
        let mut errors = ErrorCollector::new();
        errors.record::<()>(ShutdownStep::Wait, Err(io::Error::other("no child")));
        errors.record::<()>(ShutdownStep::OutputRelay, Err(io::Error::other("sink full")));
        let err = errors.finish().expect_err("errors recorded");

        assert_eq!(
            err.to_string(),
            "2 errors occurred during shutdown:\n\
             \t* wait for child: no child\n\
             \t* output relay: sink full"
        );
    }

    #[test]
    fn equal_causes_compare_equal() {
        let build = || {
            let mut errors = ErrorCollector::new();
            errors.record::<()>(ShutdownStep::CloseReader, Err(io::Error::other("boom")));
            errors.finish()
        };
        assert_eq!(build(), build());
    }
}
