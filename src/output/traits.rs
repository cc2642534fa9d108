//! Output sink trait and error types
//!
//! This module defines the trait interface for the writable result channel a job
//! streams its JSON record array into.

use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write output: {0}")]
    Write(String),

    #[error("Output aborted: {0}")]
    Aborted(String),

    #[error("Output ended without being closed")]
    Truncated,

    #[error("Output consumer has gone away")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// A writable channel that ends in exactly one of `close` or `abort`
///
/// Both terminal methods consume the sink, so a finished sink cannot be written to
/// or ended a second time.
pub trait OutputSink: Send {
    /// Writes a chunk of bytes
    fn write(&mut self, bytes: &[u8]) -> OutputResult<()>;

    /// Ends the stream successfully
    fn close(self: Box<Self>) -> OutputResult<()>;

    /// Ends the stream with an error the consumer can observe
    fn abort(self: Box<Self>, message: &str);

    /// Whether the consumer has stopped listening
    fn is_closed(&self) -> bool {
        false
    }
}
