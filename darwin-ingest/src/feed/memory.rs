//! An in-process feed for tests and replays.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::{Envelope, FeedConnection, FeedError};

#[derive(Debug, Default)]
struct State {
    pending: VecDeque<Envelope>,
    committed: Vec<(i32, i64)>,
    next_offset: i64,
}

/// A feed backed by a queue in memory. All messages are on partition 0.
#[derive(Debug, Default)]
pub struct MemoryFeed {
    state: Mutex<State>,
    arrived: Notify,
    fetches: AtomicUsize,
    fetches_after_cancel: AtomicUsize,
    failing_fetches: AtomicUsize,
    failing_commits: AtomicUsize,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a message value and return its offset.
    pub fn push(&self, value: impl Into<Vec<u8>>) -> i64 {
        let offset = {
            let mut state = self.state();
            let offset = state.next_offset;
            state.next_offset += 1;
            state.pending.push_back(Envelope {
                key: None,
                value: value.into(),
                partition: 0,
                offset,
            });
            offset
        };
        self.arrived.notify_one();
        offset
    }

    /// Messages not yet fetched.
    pub fn pending(&self) -> usize {
        self.state().pending.len()
    }

    /// Offsets committed so far, in commit order.
    pub fn committed(&self) -> Vec<i64> {
        self.state().committed.iter().map(|&(_, offset)| offset).collect()
    }

    /// Total calls to `fetch`.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Calls to `fetch` made after cancellation had already fired.
    pub fn fetches_after_cancel(&self) -> usize {
        self.fetches_after_cancel.load(Ordering::SeqCst)
    }

    /// Make the next `n` fetches fail.
    pub fn fail_next_fetches(&self, n: usize) {
        self.failing_fetches.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` commits fail.
    pub fn fail_next_commits(&self, n: usize) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }
}

/// Decrement `counter` if it is positive; true if it was.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl FeedConnection for MemoryFeed {
    async fn fetch(&self, cancel: &CancellationToken) -> Result<Option<Envelope>, FeedError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            self.fetches_after_cancel.fetch_add(1, Ordering::SeqCst);
            return Ok(None);
        }
        if take_one(&self.failing_fetches) {
            return Err(FeedError::Fetch("injected fetch failure".into()));
        }

        loop {
            let next = self.state().pending.pop_front();
            if let Some(envelope) = next {
                return Ok(Some(envelope));
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(None),
                () = self.arrived.notified() => {}
            }
        }
    }

    async fn commit(&self, partition: i32, offset: i64) -> Result<(), FeedError> {
        if take_one(&self.failing_commits) {
            return Err(FeedError::Commit {
                partition,
                offset,
                reason: "injected commit failure".into(),
            });
        }
        self.state().committed.push((partition, offset));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn fetches_in_order_and_records_commits() {
        let feed = MemoryFeed::new();
        let cancel = CancellationToken::new();
        assert_eq!(feed.push("a"), 0);
        assert_eq!(feed.push("b"), 1);

        let first = feed.fetch(&cancel).await.unwrap().unwrap();
        let second = feed.fetch(&cancel).await.unwrap().unwrap();
        assert_eq!(first.value, b"a");
        assert_eq!(second.offset, 1);

        feed.commit(second.partition, second.offset).await.unwrap();
        assert_eq!(feed.committed(), vec![1]);
        assert_eq!(feed.pending(), 0);
    }

    #[tokio::test]
    async fn fetch_waits_for_a_message() {
        let feed = Arc::new(MemoryFeed::new());
        let cancel = CancellationToken::new();

        let waiter = {
            let feed = Arc::clone(&feed);
            let cancel = cancel.clone();
            tokio::spawn(async move { feed.fetch(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        feed.push("late");

        let envelope = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(envelope.value, b"late");
    }

    #[tokio::test]
    async fn cancel_interrupts_a_blocked_fetch() {
        let feed = Arc::new(MemoryFeed::new());
        let cancel = CancellationToken::new();

        let waiter = {
            let feed = Arc::clone(&feed);
            let cancel = cancel.clone();
            tokio::spawn(async move { feed.fetch(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        assert!(waiter.await.unwrap().unwrap().is_none());
        assert_eq!(feed.fetches_after_cancel(), 0);

        feed.push("kept");
        assert!(feed.fetch(&cancel).await.unwrap().is_none());
        assert_eq!(feed.fetches_after_cancel(), 1);
        assert_eq!(feed.pending(), 1);
    }

    #[tokio::test]
    async fn injected_failures() {
        let feed = MemoryFeed::new();
        let cancel = CancellationToken::new();
        feed.push("x");
        feed.fail_next_fetches(1);
        feed.fail_next_commits(1);

        assert!(matches!(feed.fetch(&cancel).await, Err(FeedError::Fetch(_))));
        let envelope = feed.fetch(&cancel).await.unwrap().unwrap();
        assert!(feed.commit(0, envelope.offset).await.is_err());
        assert!(feed.commit(0, envelope.offset).await.is_ok());
        assert_eq!(feed.committed(), vec![0]);
    }
}
