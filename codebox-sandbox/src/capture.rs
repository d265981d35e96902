//! Output capture harness
//!
//! Scripts write to two channels. While a capture is active, writes are kept in
//! memory; otherwise they go to the process stdout/stderr. Captures nest with
//! stack discipline and are released by a guard on every exit path.

use crate::types::CapturedOutput;
use serde::Deserialize;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One of the two script output channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Shared handle to the output channels of a session
#[derive(Debug, Clone, Default)]
pub struct OutputCapture {
    frames: Arc<Mutex<Vec<CapturedOutput>>>,
}

impl OutputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    fn frames(&self) -> MutexGuard<'_, Vec<CapturedOutput>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write to a channel: the innermost active capture, or the process stream
    pub fn write(&self, stream: Stream, text: &str) {
        let mut frames = self.frames();
        if let Some(frame) = frames.last_mut() {
            match stream {
                Stream::Stdout => frame.stdout.push_str(text),
                Stream::Stderr => frame.stderr.push_str(text),
            }
            return;
        }
        drop(frames);

        let _ = match stream {
            Stream::Stdout => std::io::stdout().write_all(text.as_bytes()),
            Stream::Stderr => std::io::stderr().write_all(text.as_bytes()),
        };
    }

    pub fn is_active(&self) -> bool {
        !self.frames().is_empty()
    }

    /// Redirect both channels until the returned guard is finished or dropped
    pub fn begin(&self) -> CaptureGuard {
        let mut frames = self.frames();
        frames.push(CapturedOutput::default());
        CaptureGuard {
            capture: self.clone(),
            depth: frames.len(),
            released: false,
        }
    }

    /// Run `thunk` with both channels redirected.
    ///
    /// The thunk's result is returned untouched next to whatever it wrote,
    /// including output written before an error.
    pub fn run_with_capture<T>(&self, thunk: impl FnOnce() -> T) -> (CapturedOutput, T) {
        let guard = self.begin();
        let result = thunk();
        (guard.finish(), result)
    }

    fn release(&self, depth: usize) -> CapturedOutput {
        let mut frames = self.frames();
        // Inner captures that were leaked are folded into this one
        let mut output = CapturedOutput::default();
        while frames.len() >= depth {
            match frames.pop() {
                Some(frame) => {
                    output.stdout.insert_str(0, &frame.stdout);
                    output.stderr.insert_str(0, &frame.stderr);
                }
                None => break,
            }
        }
        output
    }
}

/// Active redirection; restores the previous channels when released
#[must_use = "dropping the guard ends the capture immediately"]
pub struct CaptureGuard {
    capture: OutputCapture,
    depth: usize,
    released: bool,
}

impl CaptureGuard {
    /// End the capture and return what was written
    pub fn finish(mut self) -> CapturedOutput {
        self.released = true;
        self.capture.release(self.depth)
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        if !self.released {
            self.capture.release(self.depth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_both_streams() {
        let capture = OutputCapture::new();
        let (output, value) = capture.run_with_capture(|| {
            capture.write(Stream::Stdout, "hello\n");
            capture.write(Stream::Stderr, "warn\n");
            42
        });

        assert_eq!(value, 42);
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.stderr, "warn\n");
        assert!(!capture.is_active());
    }

    #[test]
    fn test_error_keeps_partial_output() {
        let capture = OutputCapture::new();
        let (output, result): (_, Result<(), &str>) = capture.run_with_capture(|| {
            capture.write(Stream::Stdout, "before\n");
            Err("boom")
        });

        assert_eq!(result, Err("boom"));
        assert_eq!(output.stdout, "before\n");
        assert!(!capture.is_active());
    }

    #[test]
    fn test_panic_restores_channels() {
        let capture = OutputCapture::new();
        let inner = capture.clone();
        let outcome = std::panic::catch_unwind(move || {
            inner.run_with_capture(|| {
                inner.write(Stream::Stdout, "lost");
                panic!("thunk panicked");
            })
        });

        assert!(outcome.is_err());
        assert!(!capture.is_active());
    }

    #[test]
    fn test_nested_captures() {
        let capture = OutputCapture::new();
        let outer = capture.begin();
        capture.write(Stream::Stdout, "outer ");

        let (inner, _) = capture.run_with_capture(|| capture.write(Stream::Stdout, "inner"));
        assert_eq!(inner.stdout, "inner");

        capture.write(Stream::Stdout, "again");
        let output = outer.finish();
        assert_eq!(output.stdout, "outer again");
    }

    #[test]
    fn test_leaked_inner_capture_folds_into_outer() {
        let capture = OutputCapture::new();
        let outer = capture.begin();
        capture.write(Stream::Stderr, "a");
        std::mem::forget(capture.begin());
        capture.write(Stream::Stderr, "b");

        assert_eq!(outer.finish().stderr, "ab");
        assert!(!capture.is_active());
    }
}
