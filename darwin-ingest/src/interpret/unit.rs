//! The unit of work: one message (or one file) mapped into one transaction.
//!
//! Mapping only queues writes. Nothing reaches the store until
//! [`UnitOfWork::commit`], which records the message, applies the queued
//! writes and commits the transaction in one go. A unit that fails anywhere
//! is rolled back whole.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::darwin::{ReferenceData, Response, StatusUpdate, TimetableNotice};
use crate::domain::Rid;
use crate::store::{
    MessageRecord, ReasonKind, StopRecord, Store, StoreError, Transaction, Write, WriteBatch,
};

use super::error::ProcessError;
use super::forecast::map_forecast_location;
use super::matcher::locate;
use super::schedule::map_schedule;

/// Where an open unit of work is in its life.
///
/// A unit ends by being consumed: [`UnitOfWork::commit`] on success,
/// [`UnitOfWork::rollback`] otherwise. A failed commit rolls back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    /// Transaction open, nothing mapped yet.
    Opened,
    /// At least one mapping step has completed.
    Mapped,
}

/// A transaction plus the writes queued for it.
pub struct UnitOfWork<T: Transaction> {
    tx: T,
    batch: WriteBatch,
    /// Stops of schedules mapped in this unit, for forecasts that follow.
    pending_stops: HashMap<Rid, Vec<StopRecord>>,
    state: UnitState,
}

impl<T: Transaction> std::fmt::Debug for UnitOfWork<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("source", &self.batch.source())
            .field("writes", &self.batch.len())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<T: Transaction> UnitOfWork<T> {
    /// Begin a transaction for writes from `source`.
    pub async fn open<S>(store: &S, source: &str) -> Result<Self, StoreError>
    where
        S: Store<Tx = T>,
    {
        Ok(Self {
            tx: store.begin().await?,
            batch: WriteBatch::new(source),
            pending_stops: HashMap::new(),
            state: UnitState::Opened,
        })
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    /// Writes queued so far.
    pub fn batch(&self) -> &WriteBatch {
        &self.batch
    }

    /// Whether the message log already holds `message_id`.
    pub async fn already_processed(&mut self, message_id: &str) -> Result<bool, StoreError> {
        self.tx.message_seen(message_id).await
    }

    /// Queue the writes for an update or snapshot response.
    ///
    /// Kinds are mapped in a fixed order, schedules first, so forecasts in
    /// the same response can find stops of schedules it carries.
    pub async fn map_response(&mut self, response: &Response) -> Result<(), ProcessError> {
        let source = self.batch.source().to_string();

        for schedule in &response.schedules {
            let (record, stops) = map_schedule(schedule, &source)?;
            debug!(rid = %record.rid, stops = stops.len(), "mapped schedule");
            self.pending_stops.insert(record.rid.clone(), stops.clone());
            self.batch.push(Write::ReplaceSchedule {
                schedule: record,
                stops,
            });
        }

        for deactivation in &response.deactivations {
            self.batch.push(Write::Deactivate(deactivation.rid.clone()));
        }

        for association in &response.associations {
            self.batch.push(Write::Association(association.clone()));
        }

        for formations in &response.formations {
            self.batch.push(Write::Formations(formations.clone()));
        }

        for status in &response.forecasts {
            for location in &status.locations {
                let stop = locate(
                    &mut self.tx,
                    &self.pending_stops,
                    &status.rid,
                    location.tiploc,
                    &location.signature,
                )
                .await?;
                let record = map_forecast_location(status, location, &stop, &source)?;
                self.batch.push(Write::Forecast(record));
            }
        }

        for loading in &response.service_loadings {
            self.batch.push(Write::ServiceLoading(loading.clone()));
        }
        for loading in &response.formation_loadings {
            self.batch.push(Write::FormationLoading(loading.clone()));
        }
        for message in &response.station_messages {
            self.batch.push(Write::StationMessage(message.clone()));
        }
        for order in &response.train_orders {
            self.batch.push(Write::TrainOrder(order.clone()));
        }
        for alert in &response.train_alerts {
            self.batch.push(Write::TrainAlert(alert.clone()));
        }
        for change in &response.headcode_changes {
            self.batch.push(Write::HeadcodeChange(change.clone()));
        }
        for alarm in &response.alarms {
            self.batch.push(Write::Alarm(alarm.clone()));
        }

        self.state = UnitState::Mapped;
        Ok(())
    }

    pub fn map_timetable_notice(&mut self, notice: &TimetableNotice) {
        self.batch.push(Write::TimetableNotice(notice.clone()));
        self.state = UnitState::Mapped;
    }

    pub fn map_status(&mut self, status: &StatusUpdate) {
        self.batch.push(Write::Status(status.clone()));
        self.state = UnitState::Mapped;
    }

    /// Queue upserts for shared reference data.
    pub fn map_reference(&mut self, data: &ReferenceData) {
        for location in &data.locations {
            self.batch.push(Write::Location(location.clone()));
        }
        for operator in &data.operators {
            self.batch.push(Write::Operator(operator.clone()));
        }
        for reason in &data.late_running_reasons {
            self.batch
                .push(Write::Reason(ReasonKind::LateRunning, reason.clone()));
        }
        for reason in &data.cancellation_reasons {
            self.batch
                .push(Write::Reason(ReasonKind::Cancellation, reason.clone()));
        }
        self.state = UnitState::Mapped;
    }

    /// Record `message` (if any), apply every queued write and commit.
    ///
    /// Returns the number of writes applied. On failure the transaction is
    /// rolled back.
    pub async fn commit(mut self, message: Option<&MessageRecord>) -> Result<usize, ProcessError> {
        let applied = match self.apply(message).await {
            Ok(applied) => applied,
            Err(e) => {
                self.rollback().await;
                return Err(e.into());
            }
        };
        let source = self.batch.source().to_string();
        self.tx.commit().await?;
        debug!(%source, writes = applied, "unit of work committed");
        Ok(applied)
    }

    async fn apply(&mut self, message: Option<&MessageRecord>) -> Result<usize, StoreError> {
        if let Some(message) = message {
            self.tx.record_message(message).await?;
        }
        let fresh = WriteBatch::new(self.batch.source());
        let batch = std::mem::replace(&mut self.batch, fresh);
        batch.flush(&mut self.tx).await
    }

    /// Discard everything. Rollback failures are logged, not returned:
    /// the transaction is gone either way.
    pub async fn rollback(self) {
        let source = self.batch.source().to_string();
        match self.tx.rollback().await {
            Ok(()) => debug!(%source, "unit of work rolled back"),
            Err(e) => warn!(%source, error = %e, "rollback failed"),
        }
    }
}
