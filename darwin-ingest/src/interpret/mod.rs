//! Turning decoded feed messages into stored records.
//!
//! The [`Interpreter`] handles one queue message at a time:
//!
//! 1. Parse the capsule and decode the embedded document
//! 2. Open a [`UnitOfWork`]; a message already in the message log is
//!    skipped
//! 3. Map every update in the document into queued writes, resolving times
//!    and locating the stops forecasts refer to
//! 4. Record the message, apply the writes and commit
//!
//! A failure at any step leaves the store untouched, so the caller must not
//! advance the queue offset.

mod error;
pub mod forecast;
pub mod matcher;
pub mod schedule;
mod unit;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::darwin::{Content, MessageCapsule, PushPortDocument, decode, decode_reference};
use crate::feed::Envelope;
use crate::files::{FileStore, FileStoreError};
use crate::store::{MessageRecord, Store};

pub use error::{MatchError, ProcessError};
pub use matcher::select_stop;
pub use unit::{UnitOfWork, UnitState};

/// What happened to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The message was stored, with this many writes besides its log entry.
    Stored { message_id: String, writes: usize },
    /// The message log already held the message; nothing was written.
    Duplicate { message_id: String },
}

/// Maps feed messages into a [`Store`].
pub struct Interpreter<S: Store> {
    store: S,
    files: Option<Arc<dyn FileStore>>,
}

impl<S: Store> std::fmt::Debug for Interpreter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("files", &self.files.is_some())
            .finish_non_exhaustive()
    }
}

impl<S: Store> Interpreter<S> {
    pub fn new(store: S) -> Self {
        Self { store, files: None }
    }

    /// Fetch reference files named in timetable notices from `files`.
    pub fn with_files(mut self, files: Arc<dyn FileStore>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Process one queue message.
    ///
    /// Failures after the capsule is parsed are logged with the message id.
    pub async fn process(&self, envelope: &Envelope) -> Result<Outcome, ProcessError> {
        let capsule = MessageCapsule::parse(&envelope.value)?;
        let result = self.process_capsule(envelope, &capsule).await;
        if let Err(e) = &result {
            warn!(
                message_id = %capsule.message_id,
                sequence = capsule.sequence,
                partition = envelope.partition,
                offset = envelope.offset,
                error = %e,
                "message rolled back"
            );
        }
        result
    }

    async fn process_capsule(
        &self,
        envelope: &Envelope,
        capsule: &MessageCapsule,
    ) -> Result<Outcome, ProcessError> {
        let document = decode(capsule.payload.as_bytes())?;
        let message_id = capsule.message_id.as_str();

        let mut unit = UnitOfWork::open(&self.store, message_id).await?;
        let seen = match unit.already_processed(message_id).await {
            Ok(seen) => seen,
            Err(e) => {
                unit.rollback().await;
                return Err(e.into());
            }
        };
        if seen {
            debug!(message_id, offset = envelope.offset, "skipping duplicate message");
            unit.commit(None).await?;
            return Ok(Outcome::Duplicate {
                message_id: capsule.message_id.clone(),
            });
        }

        if let Err(e) = self.map_document(&mut unit, &document).await {
            unit.rollback().await;
            return Err(e);
        }

        let record = MessageRecord {
            message_id: capsule.message_id.clone(),
            sequence: capsule.sequence,
            partition: envelope.partition,
            offset: envelope.offset,
            timestamp: document.timestamp,
            kind: document.content.kind().to_string(),
        };
        let writes = unit.commit(Some(&record)).await?;

        debug!(
            message_id,
            sequence = capsule.sequence,
            kind = %record.kind,
            writes,
            "stored message"
        );
        Ok(Outcome::Stored {
            message_id: capsule.message_id.clone(),
            writes,
        })
    }

    /// Import a reference data file in its own unit of work, keyed by the
    /// file's path. Returns the number of rows upserted.
    pub async fn import_reference(&self, path: &str) -> Result<usize, ProcessError> {
        let files = self.files.as_deref().ok_or(FileStoreError::NotConfigured)?;

        let mut unit = UnitOfWork::open(&self.store, path).await?;
        if let Err(e) = load_reference(&mut unit, files, path).await {
            unit.rollback().await;
            return Err(e);
        }
        let writes = unit.commit(None).await?;

        info!(path, rows = writes, "imported reference data");
        Ok(writes)
    }

    async fn map_document(
        &self,
        unit: &mut UnitOfWork<S::Tx>,
        document: &PushPortDocument,
    ) -> Result<(), ProcessError> {
        match &document.content {
            Content::Update(response) | Content::Snapshot(response) => {
                unit.map_response(response).await
            }
            Content::Status(status) => {
                warn!(
                    code = status.code.as_deref().unwrap_or(""),
                    text = %status.text,
                    "status message from feed"
                );
                unit.map_status(status);
                Ok(())
            }
            Content::TimetableNotice(notice) => {
                info!(timetable_id = %notice.timetable_id, "new timetable files published");
                unit.map_timetable_notice(notice);
                match (self.files.as_deref(), notice.reference_file.as_deref()) {
                    (Some(files), Some(path)) => load_reference(unit, files, path).await,
                    (None, Some(path)) => {
                        debug!(path, "no file store configured; reference file not imported");
                        Ok(())
                    }
                    (_, None) => Ok(()),
                }
            }
        }
    }
}

async fn load_reference<T>(
    unit: &mut UnitOfWork<T>,
    files: &dyn FileStore,
    path: &str,
) -> Result<(), ProcessError>
where
    T: crate::store::Transaction,
{
    let bytes = files.fetch(path).await?;
    let data = decode_reference(&bytes)?;
    debug!(
        path,
        locations = data.locations.len(),
        operators = data.operators.len(),
        "decoded reference data"
    );
    unit.map_reference(&data);
    Ok(())
}

#[cfg(test)]
mod tests;
