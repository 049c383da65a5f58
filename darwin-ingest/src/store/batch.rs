//! Queued writes for one unit of work.

use tracing::debug;

use crate::darwin::{
    Alarm, Association, FormationLoading, HeadcodeChange, LocationRef, ReasonRef,
    ScheduleFormations, ServiceLoading, StationMessage, StatusUpdate, TimetableNotice, TocRef,
    TrainAlert, TrainOrder,
};
use crate::domain::Rid;

use super::records::{ForecastRecord, ScheduleRecord, StopRecord};
use super::{ReasonKind, StoreError, Transaction};

/// One pending write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    ReplaceSchedule {
        schedule: ScheduleRecord,
        stops: Vec<StopRecord>,
    },
    Deactivate(Rid),
    Forecast(ForecastRecord),
    Association(Association),
    Formations(ScheduleFormations),
    ServiceLoading(ServiceLoading),
    FormationLoading(FormationLoading),
    StationMessage(StationMessage),
    TrainOrder(TrainOrder),
    TrainAlert(TrainAlert),
    HeadcodeChange(HeadcodeChange),
    Alarm(Alarm),
    TimetableNotice(TimetableNotice),
    Status(StatusUpdate),
    Location(LocationRef),
    Operator(TocRef),
    Reason(ReasonKind, ReasonRef),
}

/// Writes collected while mapping a message, applied in order on flush.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    source: String,
    writes: Vec<Write>,
}

impl WriteBatch {
    /// A batch for writes originating from `source` (a message id or a file
    /// path). Message-keyed rows are keyed by it.
    pub fn new(source: impl Into<String>) -> Self {
        WriteBatch {
            source: source.into(),
            writes: Vec::new(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn push(&mut self, write: Write) {
        self.writes.push(write);
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    /// Apply every write to `tx`, stopping at the first failure.
    pub async fn flush<T: Transaction>(self, tx: &mut T) -> Result<usize, StoreError> {
        let source = self.source.as_str();
        let (mut orders, mut headcodes) = (0, 0);
        for write in &self.writes {
            match write {
                Write::ReplaceSchedule { schedule, stops } => {
                    tx.replace_schedule(schedule, stops).await?
                }
                Write::Deactivate(rid) => tx.deactivate_schedule(rid).await?,
                Write::Forecast(forecast) => tx.insert_forecast(forecast).await?,
                Write::Association(a) => tx.insert_association(source, a).await?,
                Write::Formations(f) => tx.insert_formations(source, f).await?,
                Write::ServiceLoading(l) => tx.insert_service_loading(source, l).await?,
                Write::FormationLoading(l) => tx.insert_formation_loading(source, l).await?,
                Write::StationMessage(m) => tx.insert_station_message(source, m).await?,
                Write::TrainOrder(o) => {
                    tx.insert_train_order(source, orders, o).await?;
                    orders += 1;
                }
                Write::TrainAlert(a) => tx.insert_train_alert(source, a).await?,
                Write::HeadcodeChange(c) => {
                    tx.insert_headcode_change(source, headcodes, c).await?;
                    headcodes += 1;
                }
                Write::Alarm(a) => tx.insert_alarm(source, a).await?,
                Write::TimetableNotice(n) => tx.insert_timetable_notice(source, n).await?,
                Write::Status(s) => tx.insert_status(source, s).await?,
                Write::Location(l) => tx.upsert_location(l).await?,
                Write::Operator(o) => tx.upsert_operator(o).await?,
                Write::Reason(kind, r) => tx.upsert_reason(*kind, r).await?,
            }
        }
        debug!(source, writes = self.writes.len(), "flushed write batch");
        Ok(self.writes.len())
    }
}
