//! Utility functions and helper types.

use async_trait::async_trait;
use std::future::Future;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::traits::Consumer;

/// Create a bounded error channel whose receiving half is a stream a handler
/// can merge.
///
/// The stream closes once every sender has been dropped.
pub fn channel<E>(buffer: usize) -> (mpsc::Sender<E>, ReceiverStream<E>) {
    let (tx, rx) = mpsc::channel(buffer);
    (tx, ReceiverStream::new(rx))
}

/// Helper function to create a consumer from an async function.
///
/// The function's return value is the "keep going" answer. The final error is
/// always `None`.
pub fn consumer_from_fn<F, Fut, E>(f: F) -> FnConsumer<F, Fut, E>
where
    F: FnMut(E) -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send + 'static,
    E: Send + 'static,
{
    FnConsumer {
        f,
        _phantom: std::marker::PhantomData,
    }
}

/// A consumer created from a function
pub struct FnConsumer<F, Fut, E>
where
    F: FnMut(E) -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send + 'static,
    E: Send + 'static,
{
    pub f: F,
    _phantom: std::marker::PhantomData<fn(E) -> Fut>,
}

#[async_trait]
impl<F, Fut, E> Consumer for FnConsumer<F, Fut, E>
where
    F: FnMut(E) -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send + 'static,
    E: Send + 'static,
{
    type Error = E;

    async fn consume(&mut self, error: Self::Error) -> bool {
        (self.f)(error).await
    }

    fn final_error(&mut self) -> Option<Self::Error> {
        None
    }
}
