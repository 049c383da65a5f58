//! Connection to the message queue the feed is delivered on.
//!
//! The pipeline only needs two operations: wait for the next message, and
//! acknowledge an offset once it and everything before it on its partition
//! is durably stored. Offsets are never committed automatically;
//! [`OffsetTracker`] decides which offset may be committed.

#[cfg(feature = "kafka")]
mod kafka;
mod memory;
mod offsets;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "kafka")]
pub use kafka::KafkaFeed;
pub use memory::MemoryFeed;
pub use offsets::OffsetTracker;

/// One message from the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub key: Option<Vec<u8>>,
    /// The JSON capsule.
    pub value: Vec<u8>,
    pub partition: i32,
    /// Monotonic within a partition.
    pub offset: i64,
}

/// Errors talking to the queue.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("could not connect to feed: {0}")]
    Connect(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("commit of partition {partition} offset {offset} failed: {reason}")]
    Commit {
        partition: i32,
        offset: i64,
        reason: String,
    },
}

/// A source of feed messages.
#[async_trait]
pub trait FeedConnection: Send + Sync + 'static {
    /// Wait for the next message.
    ///
    /// Returns `Ok(None)` as soon as `cancel` fires, without consuming a
    /// message.
    async fn fetch(&self, cancel: &CancellationToken) -> Result<Option<Envelope>, FeedError>;

    /// Acknowledge `offset` and everything before it on `partition`.
    async fn commit(&self, partition: i32, offset: i64) -> Result<(), FeedError>;
}
