//! Concrete consumer implementations.

pub mod consumers;

pub use consumers::*;
