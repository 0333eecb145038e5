//! Several workers report errors through their own channels while a single
//! consumer logs them.

use std::time::Duration;
use tokio::time::sleep;

use errmux::prelude::*;

#[derive(Debug, thiserror::Error)]
#[error("worker {worker}: job {job} failed")]
struct JobError {
    worker: usize,
    job: usize,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let mut streams = Vec::new();
    for worker in 0..3 {
        let (tx, errors) = channel(1);
        streams.push(errors);

        tokio::spawn(async move {
            for job in 0..5 {
                sleep(Duration::from_millis(10 * (worker as u64 + 1))).await;
                if job % 2 == 1 && tx.send(JobError { worker, job }).await.is_err() {
                    break;
                }
            }
        });
    }

    let handler = Handler::builder(LogConsumer::with_prefix("job failed".to_string()))
        .name("basic")
        .streams(streams)
        .spawn()
        .expect("inside a tokio runtime");

    match handler.final_error().await {
        Some(error) => println!("last error: {}", error),
        None => println!("no errors"),
    }
    println!("{:?}", handler.stats());
}
