//! Error taxonomy for the collection pipeline.
//!
//! Only `FatalConfig` ever reaches `main`. Everything else is contained at
//! the page or record where it happened: the engine logs it, bumps a counter
//! in [`RunStats`](crate::collector::RunStats) and moves on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectError {
    /// Transient retries exhausted, or a non-transient HTTP failure, for one
    /// catalog page. The page is skipped and the run continues.
    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// A single row could not be read from or written to the store. The
    /// record is skipped; the rest of the batch proceeds.
    #[error("store write failed: {0}")]
    StoreWrite(String),

    /// Webhook delivery failed for one restock event. The event keeps
    /// `notified = false` and is retried on the next run.
    #[error("notification delivery failed: {0}")]
    NotifyDelivery(String),

    /// Required configuration is missing or unusable. The run aborts before
    /// any page is processed.
    #[error("configuration error: {0}")]
    FatalConfig(String),
}
