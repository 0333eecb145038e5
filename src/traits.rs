//! Core traits for the error multiplexer.
//!
//! The handler merges any number of error streams and drives a single
//! [`Consumer`] over the result. The consumer alone decides whether an error
//! is significant and whether processing should stop.

use async_trait::async_trait;

/// A consumer receives every error delivered by a handler and decides whether
/// to keep going.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use errmux::traits::Consumer;
///
/// struct CountUntil {
///     seen: usize,
///     max: usize,
/// }
///
/// #[async_trait]
/// impl Consumer for CountUntil {
///     type Error = std::io::Error;
///
///     async fn consume(&mut self, _error: Self::Error) -> bool {
///         self.seen += 1;
///         self.seen < self.max
///     }
///
///     fn final_error(&mut self) -> Option<Self::Error> {
///         None
///     }
/// }
/// ```
#[async_trait]
pub trait Consumer: Send + 'static {
    /// The type of errors this consumer accepts
    type Error: Send + 'static;

    /// Handle a single error. Returning `false` stops consumption.
    ///
    /// After the first `false` this method is never called again by the
    /// same handler. It runs on the consumption loop, so blocking here
    /// stalls draining of every input stream.
    async fn consume(&mut self, error: Self::Error) -> bool;

    /// Report the terminal result once processing has ended.
    ///
    /// Called by [`Handler::final_error`](crate::handler::Handler::final_error)
    /// after the cancellation signal is raised.
    fn final_error(&mut self) -> Option<Self::Error>;
}

#[async_trait]
impl<C: Consumer + ?Sized> Consumer for Box<C> {
    type Error = C::Error;

    async fn consume(&mut self, error: Self::Error) -> bool {
        (**self).consume(error).await
    }

    fn final_error(&mut self) -> Option<Self::Error> {
        (**self).final_error()
    }
}
