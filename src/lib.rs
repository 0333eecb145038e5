//! # Error multiplexing for concurrent workers
//!
//! This crate fans in any number of independently produced error streams into
//! a single consumption point, drives a caller-supplied consumer over them and
//! provides cooperative, race-free cancellation and completion signaling.
//!
//! ## Core Concepts
//!
//! - **Consumer**: Decides, per error, whether to keep going and reports a final error
//! - **Merger**: One worker task per input stream feeding a merged channel
//! - **Handshake**: One-shot cancel permit that raises a broadcast signal
//! - **Handler**: Runs the consumer over the merged stream and exposes `wait`,
//!   `final_error` and `cancel`
//!
//! Input streams must eventually end (or keep producing) for a handler to
//! shut down completely: a worker blocked on an idle stream cannot observe
//! cancellation.
//!
//! ## Example
//!
//! ```rust
//! use errmux::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (tx, errors) = channel::<String>(4);
//!     let collect = CollectConsumer::new();
//!     let handler = Handler::new(collect.clone(), [errors]);
//!
//!     tx.send("timeout".to_string()).await.unwrap();
//!     drop(tx);
//!
//!     handler.wait().await;
//!     assert_eq!(collect.snapshot().await, vec!["timeout".to_string()]);
//! }
//! ```

pub mod cancel;
pub mod error;
pub mod handler;
pub mod impls;
pub mod merge;
pub mod traits;
pub mod util;

// Re-export commonly used items
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::handler::{Builder, Handler, HandlerConfig, State, Stats};
    pub use crate::impls::consumers::*;
    pub use crate::traits::Consumer;
    pub use crate::util::{channel, consumer_from_fn};
}

// Re-export main error type
pub use error::{Error, Result};

// Feature flags for optional dependencies
#[cfg(feature = "metrics")]
mod metrics;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
