//! Fan-in of many error streams into one merged stream.
//!
//! Every input stream gets a dedicated worker task. Workers forward values in
//! the order their stream produced them; no order is imposed across streams.
//! The merged channel has one slot per input, so when cancellation lands
//! while every worker is mid-forward, all of them can still complete their
//! send and exit instead of being stranded.

use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Capacity of the merged channel for `streams` inputs.
///
/// One slot per input. Tokio channels cannot have zero capacity, so an empty
/// merge still gets a single slot; it closes immediately regardless.
pub fn merged_capacity(streams: usize) -> usize {
    streams.max(1)
}

/// Merge `streams` into a single receiver, spawning one worker per stream on
/// `runtime`.
///
/// A worker stops when its stream ends, or when it reads a value while
/// `token` is already cancelled; that value is dropped and counted in
/// `dropped`. The receiver reports closed once every worker has exited.
///
/// A worker waiting on a stream that never yields and never ends cannot see
/// cancellation, so it will not exit. Callers must ensure their streams end.
pub fn merge<E>(
    runtime: &Handle,
    token: CancellationToken,
    streams: Vec<BoxStream<'static, E>>,
    dropped: Arc<AtomicU64>,
) -> mpsc::Receiver<E>
where
    E: Send + 'static,
{
    let (tx, rx) = mpsc::channel(merged_capacity(streams.len()));

    for (index, stream) in streams.into_iter().enumerate() {
        let worker = forward(stream, tx.clone(), token.clone(), dropped.clone());
        runtime.spawn(worker.instrument(tracing::debug_span!("merge_worker", stream = index)));
    }

    // Only worker clones remain, so the channel closes with the last worker.
    drop(tx);
    rx
}

async fn forward<E>(
    mut stream: BoxStream<'static, E>,
    tx: mpsc::Sender<E>,
    token: CancellationToken,
    dropped: Arc<AtomicU64>,
) {
    let mut forwarded = 0u64;

    while let Some(error) = stream.next().await {
        // Non-blocking check strictly before the send; never select on both.
        if token.is_cancelled() {
            dropped.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "metrics")]
            crate::metrics::record_dropped();
            tracing::debug!(forwarded, "cancellation observed, worker exiting");
            return;
        }

        if tx.send(error).await.is_err() {
            tracing::debug!(forwarded, "merged stream receiver gone, worker exiting");
            return;
        }
        forwarded += 1;
    }

    tracing::debug!(forwarded, "input stream closed, worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::time::Duration;
    use tokio::time::timeout;

    use crate::util::channel;

    fn boxed<E: Send + 'static>(items: Vec<E>) -> BoxStream<'static, E> {
        stream::iter(items).boxed()
    }

    async fn drain<E>(mut rx: mpsc::Receiver<E>) -> Vec<E> {
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    #[test]
    fn capacity_matches_stream_count() {
        assert_eq!(merged_capacity(0), 1);
        assert_eq!(merged_capacity(1), 1);
        assert_eq!(merged_capacity(7), 7);
    }

    #[tokio::test]
    async fn merges_every_value() {
        let streams = vec![boxed(vec![1, 2, 3]), boxed(vec![10, 20]), boxed(vec![])];
        let rx = merge(
            &Handle::current(),
            CancellationToken::new(),
            streams,
            Arc::new(AtomicU64::new(0)),
        );

        let mut merged = drain(rx).await;
        merged.sort();
        assert_eq!(merged, vec![1, 2, 3, 10, 20]);
    }

    #[tokio::test]
    async fn preserves_order_within_a_stream() {
        let streams = vec![
            boxed((0..50).map(|i| (0, i)).collect()),
            boxed((0..50).map(|i| (1, i)).collect()),
        ];
        let rx = merge(
            &Handle::current(),
            CancellationToken::new(),
            streams,
            Arc::new(AtomicU64::new(0)),
        );

        let merged = drain(rx).await;
        assert_eq!(merged.len(), 100);
        for source in 0..2 {
            let seq: Vec<_> = merged
                .iter()
                .filter(|(s, _)| *s == source)
                .map(|(_, i)| *i)
                .collect();
            assert_eq!(seq, (0..50).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn no_streams_closes_immediately() {
        let rx = merge::<i32>(
            &Handle::current(),
            CancellationToken::new(),
            Vec::new(),
            Arc::new(AtomicU64::new(0)),
        );
        assert!(drain(rx).await.is_empty());
    }

    #[tokio::test]
    async fn cancelled_worker_drops_and_exits() {
        let token = CancellationToken::new();
        let dropped = Arc::new(AtomicU64::new(0));
        let (tx, stream) = channel::<&'static str>(1);
        let mut rx = merge(
            &Handle::current(),
            token.clone(),
            vec![stream.boxed()],
            dropped.clone(),
        );

        tx.send("before").await.unwrap();
        assert_eq!(rx.recv().await, Some("before"));

        token.cancel();
        tx.send("after").await.unwrap();

        // The worker drops "after" and exits, closing the merged stream and
        // releasing its input.
        assert_eq!(timeout(Duration::from_secs(5), rx.recv()).await.unwrap(), None);
        timeout(Duration::from_secs(5), tx.closed()).await.unwrap();
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn in_flight_forwards_complete_after_cancel() {
        let token = CancellationToken::new();
        let streams: Vec<_> = (0..4).map(|i| boxed(vec![i])).collect();
        let rx = merge(
            &Handle::current(),
            token.clone(),
            streams,
            Arc::new(AtomicU64::new(0)),
        );

        // With nobody reading, all four values fit in the merged buffer.
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let mut merged = timeout(Duration::from_secs(5), drain(rx)).await.unwrap();
        merged.sort();
        assert_eq!(merged, vec![0, 1, 2, 3]);
    }
}
