//! Interpreter error types.

use crate::darwin::{CapsuleError, DecodeError};
use crate::domain::{Rid, Tiploc, TimeError};
use crate::files::FileStoreError;
use crate::store::StoreError;

/// Failure to find the stop an update refers to.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    /// No stored stop fits the update.
    #[error("no stop of {rid} at {tiploc} matches")]
    NoMatchingLocation { rid: Rid, tiploc: Tiploc },

    /// More than one stored stop fits, and nothing tells them apart.
    #[error("{candidates} stops of {rid} at {tiploc} match")]
    AmbiguousLocation {
        rid: Rid,
        tiploc: Tiploc,
        candidates: usize,
    },
}

/// Failure processing one message or file.
///
/// Any of these means nothing from the message was stored.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The queue message is not a valid capsule
    #[error(transparent)]
    Capsule(#[from] CapsuleError),

    /// The embedded document could not be decoded
    #[error("malformed document: {0}")]
    MalformedDocument(#[from] DecodeError),

    #[error(transparent)]
    Location(#[from] MatchError),

    #[error(transparent)]
    Time(#[from] TimeError),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Files(#[from] FileStoreError),
}
