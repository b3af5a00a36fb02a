//! Digest generation: batching, output classification and the summary
//! lifecycle.

mod batcher;
mod classify;
mod lifecycle;

pub use batcher::Batch;
pub use lifecycle::{DeliveryOutcome, Generation, SummaryLifecycle, TickReport};
