//! Cancellation and completion handshake.
//!
//! A single cancel permit gates a completion latch. Consuming the permit
//! counts the latch down to zero; a background waiter observes that and
//! raises the shared [`CancellationToken`] exactly once. Observers of the
//! token therefore never see it raised before the latch has reached zero.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// One-shot countdown latch.
#[derive(Debug)]
pub struct Latch {
    count: AtomicUsize,
    zero: Notify,
}

impl Latch {
    /// Create a latch that opens after `count` calls to [`Latch::count_down`].
    pub fn new(count: usize) -> Self {
        Self {
            count: AtomicUsize::new(count),
            zero: Notify::new(),
        }
    }

    /// Decrement the latch. Extra calls once it is open are ignored.
    pub fn count_down(&self) {
        let previous = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.zero.notify_waiters();
        }
    }

    /// Current count.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Wait until the latch reaches zero. Any number of tasks may wait.
    pub async fn wait(&self) {
        // Register before checking the count so an opening in between is seen.
        let notified = self.zero.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.count() == 0 {
            return;
        }
        notified.await;
    }
}

/// Shared handshake state: the cancel permit, the completion latch and the
/// cancellation signal it raises.
#[derive(Debug, Clone)]
pub struct Handshake {
    permit: Arc<Semaphore>,
    latch: Arc<Latch>,
    token: CancellationToken,
}

impl Handshake {
    /// Create a handshake with the permit available and the signal lowered.
    pub fn new() -> Self {
        Self {
            permit: Arc::new(Semaphore::new(1)),
            latch: Arc::new(Latch::new(1)),
            token: CancellationToken::new(),
        }
    }

    /// Race for the single cancel permit.
    ///
    /// Exactly one caller wins and counts the latch down; every other caller
    /// gets [`Error::AlreadyCanceled`]. The signal itself is raised later by
    /// [`Handshake::raise_when_released`].
    pub fn try_cancel(&self) -> Result<()> {
        match self.permit.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.latch.count_down();
                Ok(())
            }
            Err(_) => Err(Error::AlreadyCanceled),
        }
    }

    /// Whether the cancel permit has been consumed.
    pub fn is_requested(&self) -> bool {
        self.permit.available_permits() == 0
    }

    /// Non-blocking check of the cancellation signal.
    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for the cancellation signal.
    pub async fn canceled(&self) {
        self.token.cancelled().await
    }

    /// Read-only view of the cancellation signal for merger workers.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Body of the handshake waiter task: wait for the latch, then raise the
    /// signal.
    pub async fn raise_when_released(self) {
        self.latch.wait().await;
        self.token.cancel();
        tracing::debug!("cancellation signal raised");
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}
