//! Error types for the error multiplexer.
//!
//! Errors read from input streams are consumer data and never show up here.
//! This type only covers the handler's own, non-fatal failure modes.

use thiserror::Error;

/// The main error type for the error multiplexer.
#[derive(Debug, Error)]
pub enum Error {
    /// Cancellation was already requested, either by the consumer, by a
    /// caller, or by exhaustion of every input stream.
    #[error("unable to cancel: handler already canceled")]
    AlreadyCanceled,

    /// No tokio runtime was configured and none is current.
    #[error("no tokio runtime available to spawn handler tasks: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

impl Error {
    /// Returns true for the redundant-cancellation condition.
    pub fn is_already_canceled(&self) -> bool {
        matches!(self, Error::AlreadyCanceled)
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;
