//! Abort every worker on the first reported error.

use std::time::Duration;
use tokio::time::sleep;

use errmux::prelude::*;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let mut streams = Vec::new();
    for worker in 0..4u64 {
        let (tx, errors) = channel(1);
        streams.push(errors);

        tokio::spawn(async move {
            sleep(Duration::from_millis(25 * (worker + 1))).await;
            // Send fails once the handler has stopped reading this stream.
            let _ = tx.send(format!("worker {} gave up", worker)).await;
        });
    }

    let handler = Handler::new(FailFastConsumer::new(), streams);
    let watcher = handler.clone();
    tokio::spawn(async move {
        watcher.wait().await;
        println!("all workers told to stop");
    });

    if let Some(error) = handler.final_error().await {
        println!("aborted: {}", error);
    }

    // Redundant requests are informational only.
    assert!(!handler.cancel());
}
