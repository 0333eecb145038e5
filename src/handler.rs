//! Handler orchestration.
//!
//! A [`Handler`] owns a [`Consumer`], merges its input error streams and runs
//! the consumption loop. Callers observe completion with [`Handler::wait`] and
//! [`Handler::final_error`] and may stop early with [`Handler::cancel`].
//!
//! Three events trigger completion, all through the same cancel permit: the
//! consumer answering `false`, a caller cancelling, or every input stream
//! ending. Values that arrive after that are drained and discarded so no
//! producer is left blocked on a full channel.

use futures::stream::{BoxStream, Stream, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tracing::Instrument;

use crate::cancel::Handshake;
use crate::error::{Error, Result};
use crate::merge::merge;
use crate::traits::Consumer;

/// Configuration for handler execution
#[derive(Debug, Clone, Default)]
pub struct HandlerConfig {
    /// Name attached to the handler's tracing span
    pub name: Option<String>,
    /// Runtime to spawn workers on; the current runtime when unset
    pub runtime: Option<Handle>,
}

/// Lifecycle of a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum State {
    /// Errors are being delivered to the consumer
    Running,
    /// A stop condition fired; remaining errors are read and discarded
    Draining,
    /// The merged stream is exhausted and the cancellation signal is raised
    Finished,
}

/// Counters describing what happened to every error read so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Stats {
    /// Number of input streams
    pub streams: usize,
    /// Errors handed to the consumer
    pub delivered: u64,
    /// Errors read from the merged stream while draining
    pub discarded: u64,
    /// Errors a merger worker read after cancellation and never forwarded
    pub dropped: u64,
}

impl Stats {
    /// Errors that went through the merged stream
    pub fn forwarded(&self) -> u64 {
        self.delivered + self.discarded
    }
}

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Caller,
    Consumer,
    Exhausted,
}

impl Trigger {
    fn as_str(self) -> &'static str {
        match self {
            Trigger::Caller => "caller",
            Trigger::Consumer => "consumer",
            Trigger::Exhausted => "exhausted",
        }
    }
}

struct Shared<C: Consumer> {
    name: Option<String>,
    consumer: TokioMutex<C>,
    handshake: Handshake,
    streams: usize,
    delivered: AtomicU64,
    discarded: AtomicU64,
    dropped: Arc<AtomicU64>,
    finished: AtomicBool,
}

impl<C: Consumer> Shared<C> {
    fn request_cancel(&self, trigger: Trigger) -> Result<()> {
        self.handshake.try_cancel()?;
        #[cfg(feature = "metrics")]
        crate::metrics::record_cancellation(trigger.as_str());
        tracing::debug!(trigger = trigger.as_str(), "cancellation requested");
        Ok(())
    }

    fn is_draining(&self) -> bool {
        self.handshake.is_requested()
    }
}

/// Completes the handler when the consumption loop ends, including when the
/// loop's task is torn down after a consumer panic.
struct Completion<C: Consumer> {
    shared: Arc<Shared<C>>,
    exhausted: bool,
}

impl<C: Consumer> Drop for Completion<C> {
    fn drop(&mut self) {
        if !self.exhausted {
            tracing::warn!("consumption loop aborted, releasing waiters");
        }
        // Exhaustion alone must still release wait().
        if self.shared.request_cancel(Trigger::Exhausted).is_err() {
            tracing::debug!("merged stream exhausted after cancellation was requested");
        }
        self.shared.finished.store(true, Ordering::Release);

        tracing::debug!(
            delivered = self.shared.delivered.load(Ordering::Relaxed),
            discarded = self.shared.discarded.load(Ordering::Relaxed),
            "merged stream exhausted"
        );
    }
}

/// Handles multiple concurrent error streams on behalf of a single consumer.
///
/// Clones share the same underlying handler, so any number of tasks may
/// [`wait`](Handler::wait) on it.
///
/// # Examples
///
/// ```rust
/// use errmux::prelude::*;
///
/// #[tokio::main]
/// async fn main() {
///     let (tx_a, a) = channel(1);
///     let (tx_b, b) = channel(1);
///
///     let handler = Handler::new(FailFastConsumer::new(), [a, b]);
///
///     tx_a.send("disk full").await.unwrap();
///     drop(tx_a);
///     drop(tx_b);
///
///     assert_eq!(handler.final_error().await, Some("disk full"));
/// }
/// ```
pub struct Handler<C: Consumer> {
    shared: Arc<Shared<C>>,
}

impl<C: Consumer> Handler<C> {
    /// Create a handler over `streams` and start it on the current runtime.
    ///
    /// Every value is read from each stream until the stream ends or the
    /// handler is cancelled.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime, like `tokio::spawn`. Use
    /// [`Handler::builder`] for a fallible alternative.
    pub fn new<I, S>(consumer: C, streams: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Stream<Item = C::Error> + Send + 'static,
    {
        let streams = streams.into_iter().map(|s| s.boxed()).collect();
        Self::start(consumer, streams, None, Handle::current())
    }

    /// Start configuring a handler for `consumer`.
    pub fn builder(consumer: C) -> Builder<C> {
        Builder::new(consumer)
    }

    fn start(
        consumer: C,
        streams: Vec<BoxStream<'static, C::Error>>,
        name: Option<String>,
        runtime: Handle,
    ) -> Self {
        let handshake = Handshake::new();
        let dropped = Arc::new(AtomicU64::new(0));
        let stream_count = streams.len();

        let span = tracing::info_span!(
            "errmux",
            handler = name.as_deref().unwrap_or("-"),
            streams = stream_count
        );

        let merged = {
            let _enter = span.enter();
            merge(&runtime, handshake.token(), streams, dropped.clone())
        };

        let shared = Arc::new(Shared {
            name,
            consumer: TokioMutex::new(consumer),
            handshake: handshake.clone(),
            streams: stream_count,
            delivered: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            dropped,
            finished: AtomicBool::new(false),
        });

        runtime.spawn(handshake.raise_when_released().instrument(span.clone()));
        runtime.spawn(Self::consume_all(shared.clone(), merged).instrument(span));

        Self { shared }
    }

    /// Consumption loop. Runs exactly once per handler.
    async fn consume_all(shared: Arc<Shared<C>>, merged: mpsc::Receiver<C::Error>) {
        let mut completion = Completion {
            shared: shared.clone(),
            exhausted: false,
        };
        // Declared after the guard so the receiver is released first.
        let mut merged = merged;
        let mut stopped = false;

        while let Some(error) = merged.recv().await {
            if stopped || shared.is_draining() {
                shared.discarded.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "metrics")]
                crate::metrics::record_discarded();
                tracing::trace!("discarding error while draining");
                continue;
            }

            let keep_going = shared.consumer.lock().await.consume(error).await;
            shared.delivered.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "metrics")]
            crate::metrics::record_delivered();

            if !keep_going {
                stopped = true;
                if shared.request_cancel(Trigger::Consumer).is_err() {
                    tracing::debug!("consumer stopped after cancellation was requested");
                }
            }
        }
        completion.exhausted = true;
    }

    /// Wait until error processing is finished.
    ///
    /// Once this returns the consumer is not asked to consume any new error.
    /// A `consume` call that began just before cancellation may still be
    /// completing; [`Handler::final_error`] waits for it.
    pub async fn wait(&self) {
        self.shared.handshake.canceled().await
    }

    /// Wait for completion and return the consumer's final error.
    ///
    /// All rules of [`Handler::wait`] apply. The consumer is asked once per
    /// call, so most consumers only return their error the first time.
    pub async fn final_error(&self) -> Option<C::Error> {
        self.wait().await;
        self.shared.consumer.lock().await.final_error()
    }

    /// Cancel error handling.
    ///
    /// Returns `true` if this call triggered cancellation and `false` if the
    /// handler was already cancelled or finished.
    pub fn cancel(&self) -> bool {
        match self.try_cancel() {
            Ok(()) => true,
            Err(e) => {
                tracing::info!(handler = self.name().unwrap_or("-"), "{}", e);
                false
            }
        }
    }

    /// Cancel error handling, reporting a redundant request as
    /// [`Error::AlreadyCanceled`].
    pub fn try_cancel(&self) -> Result<()> {
        self.shared.request_cancel(Trigger::Caller)
    }

    /// Non-blocking check of the cancellation signal.
    pub fn is_canceled(&self) -> bool {
        self.shared.handshake.is_canceled()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        if self.shared.finished.load(Ordering::Acquire) && self.shared.handshake.is_canceled() {
            State::Finished
        } else if self.shared.is_draining() {
            State::Draining
        } else {
            State::Running
        }
    }

    /// Snapshot of the handler's counters.
    pub fn stats(&self) -> Stats {
        Stats {
            streams: self.shared.streams,
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            discarded: self.shared.discarded.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
        }
    }

    /// Name given to the handler, if any.
    pub fn name(&self) -> Option<&str> {
        self.shared.name.as_deref()
    }
}

impl<C: Consumer> Clone for Handler<C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<C: Consumer> fmt::Debug for Handler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Builder for a [`Handler`] with explicit configuration.
pub struct Builder<C: Consumer> {
    consumer: C,
    streams: Vec<BoxStream<'static, C::Error>>,
    config: HandlerConfig,
}

impl<C: Consumer> Builder<C> {
    /// Create a builder for `consumer` with no streams
    pub fn new(consumer: C) -> Self {
        Self {
            consumer,
            streams: Vec::new(),
            config: HandlerConfig::default(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: HandlerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the handler name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    /// Set the runtime handler tasks are spawned on
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.config.runtime = Some(runtime);
        self
    }

    /// Add one input stream
    pub fn stream<S>(mut self, stream: S) -> Self
    where
        S: Stream<Item = C::Error> + Send + 'static,
    {
        self.streams.push(stream.boxed());
        self
    }

    /// Add several input streams of the same type
    pub fn streams<I, S>(mut self, streams: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Stream<Item = C::Error> + Send + 'static,
    {
        self.streams.extend(streams.into_iter().map(|s| s.boxed()));
        self
    }

    /// Spawn the handler.
    ///
    /// Fails with [`Error::NoRuntime`] when no runtime was configured and
    /// none is current.
    pub fn spawn(self) -> Result<Handler<C>> {
        let runtime = match self.config.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(Error::NoRuntime)?,
        };
        Ok(Handler::start(
            self.consumer,
            self.streams,
            self.config.name,
            runtime,
        ))
    }
}
