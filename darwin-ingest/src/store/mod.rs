//! Storage ports.
//!
//! The interpreter writes through these traits and never sees SQL. A
//! [`Store`] opens transactions; each transaction implements one repository
//! trait per entity family and is committed or rolled back as a whole.
//!
//! Two implementations are provided:
//! - [`PgStore`]: PostgreSQL via `sqlx`
//! - [`MemoryStore`]: in-process, for tests and dry runs

mod batch;
mod keys;
mod memory;
mod postgres;
mod records;

use async_trait::async_trait;

use crate::darwin::{
    Alarm, Association, FormationLoading, HeadcodeChange, LocationRef, ReasonRef,
    ScheduleFormations, ServiceLoading, StationMessage, StatusUpdate, TimetableNotice, TocRef,
    TrainAlert, TrainOrder,
};
use crate::domain::{Rid, Tiploc};

pub use batch::{Write, WriteBatch};
pub use memory::{MemoryState, MemoryStore, MemoryTransaction};
pub use postgres::{PgStore, PgTransaction};
pub use records::{
    ForecastRecord, MessageRecord, PhaseRecord, ScheduleRecord, StopRecord,
};

/// Errors from the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The database rejected a statement or the connection failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be turned back into a record.
    #[error("invalid stored value: {0}")]
    Corrupt(String),

    /// The transaction could not be committed.
    #[error("commit failed: {0}")]
    Commit(String),
}

/// Opens transactions.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: Transaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// One storage transaction.
///
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait Transaction:
    ScheduleRepository
    + ForecastRepository
    + AssociationRepository
    + FormationRepository
    + NoticeRepository
    + ReferenceRepository
    + MessageLog
    + Send
    + Sized
{
    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Schedules and their stops.
#[async_trait]
pub trait ScheduleRepository {
    /// Stored stops of `rid` at `tiploc`, in schedule order.
    async fn stops_at(&mut self, rid: &Rid, tiploc: Tiploc)
    -> Result<Vec<StopRecord>, StoreError>;

    /// Replace a schedule and all of its stops.
    async fn replace_schedule(
        &mut self,
        schedule: &ScheduleRecord,
        stops: &[StopRecord],
    ) -> Result<(), StoreError>;

    /// Mark a schedule inactive. Unknown RIDs are ignored.
    async fn deactivate_schedule(&mut self, rid: &Rid) -> Result<(), StoreError>;
}

/// Forecast and actual times.
#[async_trait]
pub trait ForecastRepository {
    async fn insert_forecast(&mut self, forecast: &ForecastRecord) -> Result<(), StoreError>;
}

/// Associations between services.
#[async_trait]
pub trait AssociationRepository {
    async fn insert_association(
        &mut self,
        message_id: &str,
        association: &Association,
    ) -> Result<(), StoreError>;
}

/// Formations and loadings.
#[async_trait]
pub trait FormationRepository {
    async fn insert_formations(
        &mut self,
        message_id: &str,
        formations: &ScheduleFormations,
    ) -> Result<(), StoreError>;

    async fn insert_service_loading(
        &mut self,
        message_id: &str,
        loading: &ServiceLoading,
    ) -> Result<(), StoreError>;

    async fn insert_formation_loading(
        &mut self,
        message_id: &str,
        loading: &FormationLoading,
    ) -> Result<(), StoreError>;
}

/// Messages, alerts, orders and system notices.
#[async_trait]
pub trait NoticeRepository {
    async fn insert_station_message(
        &mut self,
        message_id: &str,
        message: &StationMessage,
    ) -> Result<(), StoreError>;

    /// `position` counts the train orders before this one in the message.
    async fn insert_train_order(
        &mut self,
        message_id: &str,
        position: usize,
        order: &TrainOrder,
    ) -> Result<(), StoreError>;

    async fn insert_train_alert(
        &mut self,
        message_id: &str,
        alert: &TrainAlert,
    ) -> Result<(), StoreError>;

    async fn insert_headcode_change(
        &mut self,
        message_id: &str,
        position: usize,
        change: &HeadcodeChange,
    ) -> Result<(), StoreError>;

    async fn insert_alarm(&mut self, message_id: &str, alarm: &Alarm) -> Result<(), StoreError>;

    async fn insert_timetable_notice(
        &mut self,
        message_id: &str,
        notice: &TimetableNotice,
    ) -> Result<(), StoreError>;

    async fn insert_status(
        &mut self,
        message_id: &str,
        status: &StatusUpdate,
    ) -> Result<(), StoreError>;
}

/// Which reason list a reason belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonKind {
    LateRunning,
    Cancellation,
}

impl ReasonKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonKind::LateRunning => "late",
            ReasonKind::Cancellation => "cancel",
        }
    }
}

/// Shared reference data. Upserts: the latest file wins.
#[async_trait]
pub trait ReferenceRepository {
    async fn upsert_location(&mut self, location: &LocationRef) -> Result<(), StoreError>;

    async fn upsert_operator(&mut self, operator: &TocRef) -> Result<(), StoreError>;

    async fn upsert_reason(&mut self, kind: ReasonKind, reason: &ReasonRef)
    -> Result<(), StoreError>;
}

/// Record of processed messages, used to skip redeliveries.
#[async_trait]
pub trait MessageLog {
    async fn message_seen(&mut self, message_id: &str) -> Result<bool, StoreError>;

    async fn record_message(&mut self, message: &MessageRecord) -> Result<(), StoreError>;
}
