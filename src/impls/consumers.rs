//! Concrete consumer implementations.

use async_trait::async_trait;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;

use crate::traits::Consumer;

/// A pass-through consumer.
///
/// Accepts every error and reports the first one it saw as the final error.
pub struct DefaultConsumer<E> {
    first: Option<E>,
}

impl<E> DefaultConsumer<E> {
    /// Create a new default consumer
    pub fn new() -> Self {
        Self { first: None }
    }
}

#[async_trait]
impl<E: Send + 'static> Consumer for DefaultConsumer<E> {
    type Error = E;

    async fn consume(&mut self, error: Self::Error) -> bool {
        if self.first.is_none() {
            self.first = Some(error);
        }
        true
    }

    fn final_error(&mut self) -> Option<Self::Error> {
        self.first.take()
    }
}

impl<E> Default for DefaultConsumer<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A consumer that stops at the first error and reports it.
pub struct FailFastConsumer<E> {
    error: Option<E>,
}

impl<E> FailFastConsumer<E> {
    /// Create a new fail-fast consumer
    pub fn new() -> Self {
        Self { error: None }
    }
}

#[async_trait]
impl<E: Send + 'static> Consumer for FailFastConsumer<E> {
    type Error = E;

    async fn consume(&mut self, error: Self::Error) -> bool {
        self.error = Some(error);
        false
    }

    fn final_error(&mut self) -> Option<Self::Error> {
        self.error.take()
    }
}

impl<E> Default for FailFastConsumer<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A consumer that collects every error into a shared vector
pub struct CollectConsumer<E> {
    errors: Arc<TokioMutex<Vec<E>>>,
}

impl<E: Send + 'static> CollectConsumer<E> {
    /// Create a new collect consumer
    pub fn new() -> Self {
        Self {
            errors: Arc::new(TokioMutex::new(Vec::new())),
        }
    }

    /// Get a clone of the errors Arc for external access
    pub fn errors(&self) -> Arc<TokioMutex<Vec<E>>> {
        self.errors.clone()
    }

    /// Number of errors collected so far
    pub async fn len(&self) -> usize {
        self.errors.lock().await.len()
    }

    /// Whether nothing has been collected yet
    pub async fn is_empty(&self) -> bool {
        self.errors.lock().await.is_empty()
    }
}

impl<E: Clone> CollectConsumer<E> {
    /// Snapshot of the collected errors
    pub async fn snapshot(&self) -> Vec<E> {
        self.errors.lock().await.clone()
    }
}

#[async_trait]
impl<E: Send + 'static> Consumer for CollectConsumer<E> {
    type Error = E;

    async fn consume(&mut self, error: Self::Error) -> bool {
        self.errors.lock().await.push(error);
        true
    }

    fn final_error(&mut self) -> Option<Self::Error> {
        None
    }
}

impl<E: Send + 'static> Default for CollectConsumer<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for CollectConsumer<E> {
    fn clone(&self) -> Self {
        Self {
            errors: self.errors.clone(),
        }
    }
}

/// A consumer that logs every error and keeps going.
///
/// The last error logged is reported as the final error.
pub struct LogConsumer<E> {
    prefix: Option<String>,
    last: Option<E>,
}

impl<E> LogConsumer<E> {
    /// Create a new log consumer
    pub fn new() -> Self {
        Self {
            prefix: None,
            last: None,
        }
    }

    /// Create a new log consumer with a prefix
    pub fn with_prefix(prefix: String) -> Self {
        Self {
            prefix: Some(prefix),
            last: None,
        }
    }
}

#[async_trait]
impl<E: Display + Send + 'static> Consumer for LogConsumer<E> {
    type Error = E;

    async fn consume(&mut self, error: Self::Error) -> bool {
        match &self.prefix {
            Some(prefix) => tracing::warn!(%error, "{}", prefix),
            None => tracing::warn!(%error, "error reported"),
        }
        self.last = Some(error);
        true
    }

    fn final_error(&mut self) -> Option<Self::Error> {
        self.last.take()
    }
}

impl<E> Default for LogConsumer<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A consumer that stops once its inner consumer has accepted `limit` errors.
pub struct LimitConsumer<C> {
    inner: C,
    remaining: usize,
}

impl<C: Consumer> LimitConsumer<C> {
    /// Wrap `inner`, stopping after `limit` errors.
    ///
    /// A limit of zero stops on the first error without delivering it.
    pub fn new(inner: C, limit: usize) -> Self {
        Self {
            inner,
            remaining: limit,
        }
    }

    /// Errors still accepted before stopping
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Unwrap the inner consumer
    pub fn into_inner(self) -> C {
        self.inner
    }
}

#[async_trait]
impl<C: Consumer> Consumer for LimitConsumer<C> {
    type Error = C::Error;

    async fn consume(&mut self, error: Self::Error) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        self.inner.consume(error).await && self.remaining > 0
    }

    fn final_error(&mut self) -> Option<Self::Error> {
        self.inner.final_error()
    }
}
