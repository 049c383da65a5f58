//! The ingestion pipeline: one fetch loop feeding a pool of workers.
//!
//! ```text
//! feed.fetch ──▶ bounded queue ──▶ worker 0..N ──▶ interpreter ──▶ feed.commit
//! ```
//!
//! The fetch loop blocks when the queue is full. On cancellation it stops
//! fetching and closes the queue; workers finish everything already queued
//! and then exit.
//!
//! Workers finish out of order, and committing an offset acknowledges every
//! earlier one on the partition. An [`OffsetTracker`] shared by the fetch
//! loop and the workers only releases an offset once it and every earlier
//! fetched offset has been stored. A failed message is never released, so
//! it and everything after it are redelivered on the next start and the
//! ones already stored are skipped as duplicates.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::feed::{Envelope, FeedConnection, OffsetTracker};
use crate::interpret::{Interpreter, Outcome};
use crate::store::Store;

/// Pause after a failed fetch before trying again.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Counts from one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Messages taken from the feed.
    pub fetched: usize,
    /// Messages stored, or skipped as duplicates.
    pub committed: usize,
    /// Messages that could not be processed.
    pub failed: usize,
    /// Offset commits the feed rejected.
    pub commit_failures: usize,
}

impl PipelineReport {
    fn absorb(&mut self, other: PipelineReport) {
        self.fetched += other.fetched;
        self.committed += other.committed;
        self.failed += other.failed;
        self.commit_failures += other.commit_failures;
    }
}

/// A fetch loop and worker pool over one feed and one store.
pub struct Pipeline<F, S: Store> {
    feed: Arc<F>,
    interpreter: Arc<Interpreter<S>>,
    workers: usize,
    queue_capacity: Option<usize>,
    retry_delay: Duration,
}

impl<F, S: Store> std::fmt::Debug for Pipeline<F, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("workers", &self.workers)
            .field("queue_capacity", &self.queue_capacity())
            .finish_non_exhaustive()
    }
}

impl<F, S: Store> Pipeline<F, S> {
    fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.workers * 4)
    }
}

impl<F, S> Pipeline<F, S>
where
    F: FeedConnection,
    S: Store,
{
    /// A pipeline with one worker and the default queue size.
    pub fn new(feed: Arc<F>, interpreter: Arc<Interpreter<S>>) -> Self {
        Self {
            feed,
            interpreter,
            workers: 1,
            queue_capacity: None,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Set the number of workers (at least one).
    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = n.max(1);
        self
    }

    /// Set the queue capacity. Defaults to four slots per worker.
    pub fn with_queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = Some(n.max(1));
        self
    }

    /// Set the pause after a failed fetch.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Run until `cancel` fires and every queued message has been handled.
    pub async fn run(self, cancel: CancellationToken) -> PipelineReport {
        let (tx, rx) = mpsc::channel::<Envelope>(self.queue_capacity());
        let rx = Arc::new(Mutex::new(rx));
        let offsets = Arc::new(Mutex::new(OffsetTracker::new()));

        info!(
            workers = self.workers,
            queue_capacity = self.queue_capacity(),
            "pipeline starting"
        );

        let handles: Vec<_> = (0..self.workers)
            .map(|id| {
                tokio::spawn(worker(
                    id,
                    Arc::clone(&rx),
                    Arc::clone(&offsets),
                    Arc::clone(&self.feed),
                    Arc::clone(&self.interpreter),
                ))
            })
            .collect();

        let fetched = self.fetch_loop(tx, &offsets, &cancel).await;

        let mut report = PipelineReport {
            fetched,
            ..PipelineReport::default()
        };
        for result in join_all(handles).await {
            match result {
                Ok(tally) => report.absorb(tally),
                Err(e) => error!(error = %e, "worker task failed"),
            }
        }

        let unacknowledged = offsets.lock().await.held();
        info!(
            fetched = report.fetched,
            committed = report.committed,
            failed = report.failed,
            commit_failures = report.commit_failures,
            unacknowledged = unacknowledged,
            "pipeline stopped"
        );
        report
    }

    /// Fetch and enqueue until cancelled. Dropping `tx` on return closes the
    /// queue.
    async fn fetch_loop(
        &self,
        tx: mpsc::Sender<Envelope>,
        offsets: &Mutex<OffsetTracker>,
        cancel: &CancellationToken,
    ) -> usize {
        let mut fetched = 0;
        while !cancel.is_cancelled() {
            match self.feed.fetch(cancel).await {
                Ok(Some(envelope)) => {
                    fetched += 1;
                    debug!(
                        partition = envelope.partition,
                        offset = envelope.offset,
                        "fetched message"
                    );
                    offsets
                        .lock()
                        .await
                        .start(envelope.partition, envelope.offset);
                    if tx.send(envelope).await.is_err() {
                        error!("all workers have stopped");
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "fetch failed");
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }
        debug!(fetched, "fetch loop stopped");
        fetched
    }
}

async fn worker<F, S>(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Envelope>>>,
    offsets: Arc<Mutex<OffsetTracker>>,
    feed: Arc<F>,
    interpreter: Arc<Interpreter<S>>,
) -> PipelineReport
where
    F: FeedConnection,
    S: Store,
{
    let mut tally = PipelineReport::default();
    loop {
        let next = rx.lock().await.recv().await;
        let Some(envelope) = next else {
            break;
        };

        let (partition, offset) = (envelope.partition, envelope.offset);
        match interpreter.process(&envelope).await {
            Ok(outcome) => {
                tally.committed += 1;
                if let Outcome::Duplicate { message_id } = &outcome {
                    debug!(worker = id, %message_id, "duplicate message");
                }
                // Held across the commit so commits go out in offset order.
                let mut offsets = offsets.lock().await;
                let Some(release) = offsets.stored(partition, offset) else {
                    continue;
                };
                if let Err(e) = feed.commit(partition, release).await {
                    tally.commit_failures += 1;
                    warn!(
                        worker = id,
                        partition,
                        offset = release,
                        error = %e,
                        "offset commit failed"
                    );
                }
            }
            Err(e) => {
                tally.failed += 1;
                offsets.lock().await.failed(partition, offset);
                warn!(
                    worker = id,
                    partition,
                    offset,
                    error = %e,
                    "message not processed; later offsets held back"
                );
            }
        }
    }
    debug!(worker = id, "worker stopped");
    tally
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::MemoryFeed;
    use crate::store::{MemoryStore, MemoryTransaction, StoreError};
    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    const SCHEDULE: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/data/samples/schedule.xml"
    ));
    const STATUS: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/data/samples/failure.xml"
    ));

    fn capsule(message_id: &str, xml: &str) -> Vec<u8> {
        serde_json::json!({
            "messageID": message_id,
            "properties": {"PushPortSequence": {"string": "1"}},
            "bytes": xml,
        })
        .to_string()
        .into_bytes()
    }

    /// A memory store whose transactions wait for a permit before opening.
    struct GatedStore {
        inner: MemoryStore,
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl Store for GatedStore {
        type Tx = MemoryTransaction;

        async fn begin(&self) -> Result<MemoryTransaction, StoreError> {
            self.gate.acquire().await.unwrap().forget();
            self.inner.begin().await
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn drains_buffered_messages_on_shutdown() {
        let feed = Arc::new(MemoryFeed::new());
        let gate = Arc::new(Semaphore::new(0));
        let store = GatedStore {
            inner: MemoryStore::new(),
            gate: Arc::clone(&gate),
        };
        let memory = store.inner.clone();
        let interpreter = Arc::new(Interpreter::new(store));

        for i in 0..5 {
            feed.push(capsule(&format!("ID:{i}"), STATUS));
        }

        let cancel = CancellationToken::new();
        let pipeline = Pipeline::new(Arc::clone(&feed), interpreter)
            .with_workers(2)
            .with_queue_capacity(8);
        let run = tokio::spawn(pipeline.run(cancel.clone()));

        // Everything fetched, workers blocked, fetch loop parked in fetch.
        wait_until(|| feed.pending() == 0).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(memory.commits(), 0);

        cancel.cancel();
        feed.push(capsule("ID:late", STATUS));
        gate.add_permits(5);

        let report = run.await.unwrap();
        assert_eq!(report.fetched, 5);
        assert_eq!(report.committed, 5);
        assert_eq!(report.failed, 0);

        let committed = feed.committed();
        assert!(committed.windows(2).all(|w| w[0] < w[1]), "{committed:?}");
        assert_eq!(committed.last(), Some(&4));
        assert_eq!(memory.snapshot().statuses.len(), 5);

        assert_eq!(feed.fetches_after_cancel(), 0);
        assert_eq!(feed.pending(), 1);
    }

    #[tokio::test]
    async fn bad_message_does_not_stop_the_pipeline() {
        let feed = Arc::new(MemoryFeed::new());
        let interpreter = Arc::new(Interpreter::new(MemoryStore::new()));

        feed.push(b"not a capsule".to_vec());
        feed.push(capsule("ID:1", SCHEDULE));

        let cancel = CancellationToken::new();
        let run = tokio::spawn(
            Pipeline::new(Arc::clone(&feed), Arc::clone(&interpreter)).run(cancel.clone()),
        );
        wait_until(|| interpreter.store().snapshot().schedules.len() == 1).await;
        cancel.cancel();

        let report = run.await.unwrap();
        assert_eq!(report.fetched, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.committed, 1);
        // Offset 1 is stored but acknowledging it would skip offset 0.
        assert!(feed.committed().is_empty());
    }

    #[tokio::test]
    async fn failed_offset_holds_back_later_commits() {
        let feed = Arc::new(MemoryFeed::new());
        let interpreter = Arc::new(Interpreter::new(MemoryStore::new()));

        feed.push(capsule("ID:0", STATUS));
        feed.push(capsule("ID:1", "<Pport><uR>"));
        feed.push(capsule("ID:2", STATUS));
        feed.push(capsule("ID:3", STATUS));

        let cancel = CancellationToken::new();
        let pipeline = Pipeline::new(Arc::clone(&feed), Arc::clone(&interpreter)).with_workers(2);
        let run = tokio::spawn(pipeline.run(cancel.clone()));
        wait_until(|| interpreter.store().snapshot().statuses.len() == 3).await;
        cancel.cancel();

        let report = run.await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.committed, 3);
        assert_eq!(feed.committed(), vec![0]);
    }

    #[tokio::test]
    async fn fetch_errors_are_retried() {
        let feed = Arc::new(MemoryFeed::new());
        let interpreter = Arc::new(Interpreter::new(MemoryStore::new()));
        feed.fail_next_fetches(2);
        feed.push(capsule("ID:1", STATUS));

        let cancel = CancellationToken::new();
        let pipeline = Pipeline::new(Arc::clone(&feed), interpreter)
            .with_retry_delay(Duration::from_millis(5));
        let run = tokio::spawn(pipeline.run(cancel.clone()));
        wait_until(|| feed.committed().len() == 1).await;
        cancel.cancel();

        let report = run.await.unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(report.committed, 1);
        assert!(feed.fetches() >= 3);
    }

    #[tokio::test]
    async fn failed_offset_commit_is_counted() {
        let feed = Arc::new(MemoryFeed::new());
        let interpreter = Arc::new(Interpreter::new(MemoryStore::new()));
        feed.fail_next_commits(1);
        feed.push(capsule("ID:1", STATUS));
        feed.push(capsule("ID:2", STATUS));

        let cancel = CancellationToken::new();
        let run = tokio::spawn(
            Pipeline::new(Arc::clone(&feed), Arc::clone(&interpreter)).run(cancel.clone()),
        );
        wait_until(|| feed.committed().len() == 1).await;
        cancel.cancel();

        let report = run.await.unwrap();
        assert_eq!(report.commit_failures, 1);
        assert_eq!(report.committed, 2);
        // The next commit covers the offset whose commit failed.
        assert_eq!(feed.committed(), vec![1]);
        assert_eq!(interpreter.store().snapshot().messages.len(), 2);
    }

    #[test]
    fn default_queue_is_four_per_worker() {
        let feed = Arc::new(MemoryFeed::new());
        let interpreter = Arc::new(Interpreter::new(MemoryStore::new()));
        let pipeline = Pipeline::new(feed, interpreter).with_workers(3);
        assert_eq!(pipeline.queue_capacity(), 12);
        assert_eq!(pipeline.with_queue_capacity(0).queue_capacity(), 1);
    }
}
