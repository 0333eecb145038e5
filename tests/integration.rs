//! Integration tests for the error multiplexer

use futures::{stream, StreamExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_test::{assert_pending, task};

use errmux::prelude::*;

const DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("worker {worker} failed")]
struct WorkerError {
    worker: usize,
}

async fn run_until_finished<C: Consumer>(handler: &Handler<C>) {
    timeout(DEADLINE, async {
        handler.wait().await;
        while handler.state() != State::Finished {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("handler did not finish");
}

#[tokio::test]
async fn test_range_all() {
    for _ in 0..100 {
        let mut streams = Vec::new();
        let mut expected = HashSet::new();
        for worker in 0..3 {
            let (tx, errors) = channel(1);
            tx.send(WorkerError { worker }).await.unwrap();
            drop(tx);
            streams.push(errors);
            expected.insert(WorkerError { worker });
        }

        let collect = CollectConsumer::new();
        let handler = Handler::new(collect.clone(), streams);
        timeout(DEADLINE, handler.wait()).await.unwrap();

        let seen: HashSet<_> = collect.snapshot().await.into_iter().collect();
        assert_eq!(seen, expected);
    }
}

#[tokio::test]
async fn test_cancel_with_idle_stream() {
    for _ in 0..100 {
        let (tx_a, a) = channel(1);
        let (tx_b, b) = channel(1);
        let handler = Handler::new(DefaultConsumer::new(), [a, b]);

        let canceller = handler.clone();
        tokio::spawn(async move {
            tx_a.send(WorkerError { worker: 0 }).await.unwrap();
            canceller.cancel();
        });

        timeout(DEADLINE, handler.wait()).await.unwrap();

        // Stream B's worker reads this, sees the signal and exits, releasing
        // the channel instead of forwarding.
        let _ = tx_b.send(WorkerError { worker: 1 }).await;
        timeout(DEADLINE, tx_b.closed()).await.unwrap();

        assert!(handler.stats().delivered <= 1);
        let final_error = handler.final_error().await;
        assert!(final_error.is_none() || final_error == Some(WorkerError { worker: 0 }));
    }
}

#[tokio::test]
async fn test_consumer_stop_takes_effect_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let consumer = consumer_from_fn(move |_: WorkerError| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { false }
    });

    let streams: Vec<_> = (0..4)
        .map(|worker| stream::iter((0..25).map(move |_| WorkerError { worker })))
        .collect();
    let handler = Handler::new(consumer, streams);
    run_until_finished(&handler).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let stats = handler.stats();
    assert_eq!(stats.delivered, 1);
    assert!(stats.forwarded() + stats.dropped <= 100);
}

#[tokio::test]
async fn test_every_read_error_accounted_once() {
    for _ in 0..50 {
        let reads = Arc::new(AtomicUsize::new(0));
        let streams: Vec<_> = (0..4)
            .map(|worker| {
                let reads = reads.clone();
                stream::iter((0..25).map(move |_| WorkerError { worker })).inspect(move |_| {
                    reads.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        let handler = Handler::new(LimitConsumer::new(DefaultConsumer::new(), 5), streams);
        run_until_finished(&handler).await;

        let stats = handler.stats();
        assert_eq!(stats.delivered, 5);
        assert_eq!(
            stats.delivered + stats.discarded + stats.dropped,
            reads.load(Ordering::SeqCst) as u64
        );
    }
}

#[tokio::test]
async fn test_collected_errors_shared_handle() {
    let collect = CollectConsumer::new();
    let errors = collect.errors();
    let handler = Handler::new(
        collect,
        [stream::iter(vec![WorkerError { worker: 3 }, WorkerError { worker: 4 }])],
    );
    run_until_finished(&handler).await;

    let seen = errors.lock().await;
    assert_eq!(*seen, vec![WorkerError { worker: 3 }, WorkerError { worker: 4 }]);
}

#[tokio::test]
async fn test_limit_consumer() {
    let collect = CollectConsumer::new();
    let handler = Handler::new(
        LimitConsumer::new(collect.clone(), 3),
        [stream::iter(0..10)],
    );
    run_until_finished(&handler).await;

    assert_eq!(collect.snapshot().await, vec![0, 1, 2]);
    assert_eq!(handler.stats().delivered, 3);
}

#[tokio::test]
async fn test_draining_releases_producers() {
    let (tx, errors) = channel(1);
    let handler = Handler::new(FailFastConsumer::new(), [errors]);

    // Every send either lands or fails once the worker has exited; none
    // stays blocked after the consumer stopped.
    let producer = tokio::spawn(async move {
        let mut sent = 0;
        for worker in 0..1000 {
            if tx.send(WorkerError { worker }).await.is_err() {
                break;
            }
            sent += 1;
        }
        sent
    });

    let sent = timeout(DEADLINE, producer).await.unwrap().unwrap();
    assert!(sent >= 1);
    assert_eq!(
        handler.final_error().await,
        Some(WorkerError { worker: 0 })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_waiters_unblock_together() {
    let (_tx, errors) = channel::<WorkerError>(1);
    let handler = Handler::new(DefaultConsumer::new(), [errors]);
    let released = Arc::new(AtomicUsize::new(0));

    let waiters: Vec<_> = (0..8)
        .map(|_| {
            let handler = handler.clone();
            let released = released.clone();
            tokio::spawn(async move {
                handler.wait().await;
                assert!(handler.is_canceled());
                released.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(released.load(Ordering::SeqCst), 0);

    assert!(handler.cancel());
    for waiter in waiters {
        timeout(DEADLINE, waiter).await.unwrap().unwrap();
    }
    assert_eq!(released.load(Ordering::SeqCst), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cancel_single_winner() {
    let (_tx, errors) = channel::<WorkerError>(1);
    let handler = Handler::new(DefaultConsumer::new(), [errors]);

    let attempts: Vec<_> = (0..16)
        .map(|_| {
            let handler = handler.clone();
            tokio::spawn(async move { handler.cancel() })
        })
        .collect();

    let mut winners = 0;
    for attempt in attempts {
        if attempt.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    timeout(DEADLINE, handler.wait()).await.unwrap();
}

#[tokio::test]
async fn test_final_error_blocks_until_done() {
    let (tx, errors) = channel(1);
    let handler = Handler::new(DefaultConsumer::new(), [errors]);

    tx.send(WorkerError { worker: 7 }).await.unwrap();
    while handler.stats().delivered == 0 {
        tokio::task::yield_now().await;
    }

    {
        let mut final_error = task::spawn(handler.final_error());
        assert_pending!(final_error.poll());
    }

    drop(tx);
    let final_error = timeout(DEADLINE, handler.final_error()).await.unwrap();
    assert_eq!(final_error, Some(WorkerError { worker: 7 }));
}

#[tokio::test]
async fn test_state_transitions() {
    let (tx, errors) = channel::<WorkerError>(1);
    let handler = Handler::builder(DefaultConsumer::new())
        .name("states")
        .stream(errors)
        .spawn()
        .unwrap();
    assert_eq!(handler.state(), State::Running);

    assert!(handler.cancel());
    assert_eq!(handler.state(), State::Draining);

    drop(tx);
    run_until_finished(&handler).await;
    assert_eq!(handler.state(), State::Finished);
    assert!(!handler.cancel());
}

#[tokio::test]
async fn test_mixed_stream_types() {
    let (tx, channel_errors) = channel(1);
    let collect = CollectConsumer::new();
    let handler = Handler::builder(collect.clone())
        .stream(channel_errors)
        .stream(stream::iter(vec![WorkerError { worker: 1 }]))
        .streams(vec![stream::empty::<WorkerError>()])
        .spawn()
        .unwrap();

    tx.send(WorkerError { worker: 0 }).await.unwrap();
    drop(tx);
    run_until_finished(&handler).await;

    let mut workers: Vec<_> = collect
        .snapshot()
        .await
        .into_iter()
        .map(|e| e.worker)
        .collect();
    workers.sort();
    assert_eq!(workers, vec![0, 1]);
    assert_eq!(handler.stats().streams, 3);
}
