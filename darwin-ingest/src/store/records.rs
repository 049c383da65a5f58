//! Rows written by the interpreter.
//!
//! Times here are absolute instants. Kinds that need no interpretation
//! (associations, loadings, messages and so on) are stored as decoded, keyed
//! by the message that carried them.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

use crate::darwin::{DisruptionReason, PlatformInfo, ServiceAttributes, StopKind};
use crate::domain::{Rid, Tiploc, Uid};

/// One processed feed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub message_id: String,
    pub sequence: u64,
    pub partition: i32,
    pub offset: i64,
    /// The document's creation time.
    pub timestamp: DateTime<FixedOffset>,
    /// Content kind, e.g. "update".
    pub kind: String,
}

/// Service-level schedule data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRecord {
    pub rid: Rid,
    pub uid: Uid,
    pub ssd: NaiveDate,
    pub headcode: String,
    pub rsid: Option<String>,
    pub toc: String,
    pub attributes: ServiceAttributes,
    pub cancel_reason: Option<DisruptionReason>,
    /// Message that last replaced this schedule.
    pub message_id: String,
}

/// One stop of a stored schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopRecord {
    pub rid: Rid,
    /// Position in the schedule, from 0.
    pub sequence: i32,
    pub kind: StopKind,
    pub tiploc: Tiploc,
    pub working_arrival: Option<DateTime<Utc>>,
    pub working_departure: Option<DateTime<Utc>>,
    pub working_passing: Option<DateTime<Utc>>,
    pub public_arrival: Option<DateTime<Utc>>,
    pub public_departure: Option<DateTime<Utc>>,
    pub activities: Vec<String>,
    pub planned_activities: Vec<String>,
    pub cancelled: bool,
    pub cancel_reason: Option<DisruptionReason>,
    pub platform: Option<String>,
    /// The formation named on this stop, if any.
    pub formation_id: Option<String>,
    /// The formation in use at this stop after rippling.
    pub effective_formation_id: Option<String>,
    pub route_delay: i32,
    pub false_destination: Option<Tiploc>,
}

/// Forecast or actual times for one phase of a stop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseRecord {
    pub estimated: Option<DateTime<Utc>>,
    pub working_estimated: Option<DateTime<Utc>>,
    pub actual: Option<DateTime<Utc>>,
    pub estimated_minimum: Option<DateTime<Utc>>,
    pub actual_removed: bool,
    pub unknown_delay: bool,
    pub delayed: bool,
    pub source: Option<String>,
    pub source_instance: Option<String>,
}

/// A forecast for one stop, as carried by one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastRecord {
    pub message_id: String,
    pub rid: Rid,
    pub stop_sequence: i32,
    pub tiploc: Tiploc,
    pub arrival: Option<PhaseRecord>,
    pub departure: Option<PhaseRecord>,
    pub passing: Option<PhaseRecord>,
    pub platform: Option<PlatformInfo>,
    pub suppressed: bool,
    pub length: u32,
    pub detach_front: bool,
    pub late_reason: Option<DisruptionReason>,
    pub reverse_formation: bool,
}
