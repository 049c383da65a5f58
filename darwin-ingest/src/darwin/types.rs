//! Typed Push Port messages.
//!
//! These types mirror the Push Port XML schema closely, but with validated
//! identifiers and times. Attributes the schema gives a default for are plain
//! fields holding that default; see [`super::defaults`]. Optional attributes
//! without a default are `Option`.

use chrono::{DateTime, FixedOffset, NaiveDate};

use crate::domain::{Crs, Rid, Tiploc, TrainTime, Uid};

/// One decoded `Pport` document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushPortDocument {
    /// When Darwin created the document.
    pub timestamp: DateTime<FixedOffset>,

    /// Schema version, e.g. "16.0".
    pub version: String,

    /// The single content element.
    pub content: Content,
}

/// The content of a document. Exactly one is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// New timetable files are available (`TimeTableId`).
    TimetableNotice(TimetableNotice),
    /// A status report from Darwin (`FailureResp`).
    Status(StatusUpdate),
    /// Live updates (`uR`).
    Update(Response),
    /// Snapshot data (`sR`).
    Snapshot(Response),
}

impl Content {
    /// Short name used in logs and the message log.
    pub fn kind(&self) -> &'static str {
        match self {
            Content::TimetableNotice(_) => "timetable",
            Content::Status(_) => "status",
            Content::Update(_) => "update",
            Content::Snapshot(_) => "snapshot",
        }
    }
}

/// Notice that new timetable files have been published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimetableNotice {
    pub timetable_id: String,
    /// Name of the timetable (schedules) file.
    pub timetable_file: Option<String>,
    /// Name of the reference data file.
    pub reference_file: Option<String>,
}

/// A status report, typically a failure to fulfil a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub code: Option<String>,
    pub request_source: Option<String>,
    pub request_id: Option<String>,
    pub text: String,
}

/// Where an update came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOrigin {
    pub update_origin: Option<String>,
    pub request_source: Option<String>,
    pub request_id: Option<String>,
}

/// An update or snapshot response.
///
/// Each kind is independent; any of them may be empty, and a response with
/// nothing at all is valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub origin: UpdateOrigin,
    pub schedules: Vec<Schedule>,
    pub deactivations: Vec<Deactivation>,
    pub associations: Vec<Association>,
    pub formations: Vec<ScheduleFormations>,
    pub forecasts: Vec<TrainStatus>,
    pub service_loadings: Vec<ServiceLoading>,
    pub formation_loadings: Vec<FormationLoading>,
    pub station_messages: Vec<StationMessage>,
    pub train_orders: Vec<TrainOrder>,
    pub train_alerts: Vec<TrainAlert>,
    pub headcode_changes: Vec<HeadcodeChange>,
    pub alarms: Vec<Alarm>,
}

impl Response {
    /// Total number of updates across all kinds.
    pub fn len(&self) -> usize {
        self.schedules.len()
            + self.deactivations.len()
            + self.associations.len()
            + self.formations.len()
            + self.forecasts.len()
            + self.service_loadings.len()
            + self.formation_loadings.len()
            + self.station_messages.len()
            + self.train_orders.len()
            + self.train_alerts.len()
            + self.headcode_changes.len()
            + self.alarms.len()
    }

    /// Returns true if the response carries no updates.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The times that identify a visit to a location.
///
/// Used both as a stop's schedule times and as the signature an update uses
/// to point at a stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeSignature {
    pub working_arrival: Option<TrainTime>,
    pub working_departure: Option<TrainTime>,
    pub working_passing: Option<TrainTime>,
    pub public_arrival: Option<TrainTime>,
    pub public_departure: Option<TrainTime>,
}

/// A reason for a delay or cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisruptionReason {
    pub code: u32,
    /// Where the disruption happened.
    pub tiploc: Option<Tiploc>,
    /// Whether it happened near, rather than at, the TIPLOC.
    pub near: bool,
}

/// Service-level attributes of a schedule that have schema defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAttributes {
    pub status: String,
    pub category: String,
    pub passenger: bool,
    pub active: bool,
    pub deleted: bool,
    pub charter: bool,
}

/// A full train schedule.
///
/// Darwin always resends the complete stop list, so a schedule replaces any
/// earlier one for the same RID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub rid: Rid,
    pub uid: Uid,
    /// Scheduled start date.
    pub ssd: NaiveDate,
    /// Train identity ("headcode").
    pub headcode: String,
    /// Retail service id.
    pub rsid: Option<String>,
    /// Operator code.
    pub toc: String,
    pub attributes: ServiceAttributes,
    pub cancel_reason: Option<DisruptionReason>,
    pub stops: Vec<Stop>,
}

/// The seven kinds of schedule location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopKind {
    Origin,
    OperationalOrigin,
    Intermediate,
    OperationalIntermediate,
    IntermediatePassing,
    Destination,
    OperationalDestination,
}

impl StopKind {
    /// Map a schedule child element name to a stop kind.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "OR" => Some(StopKind::Origin),
            "OPOR" => Some(StopKind::OperationalOrigin),
            "IP" => Some(StopKind::Intermediate),
            "OPIP" => Some(StopKind::OperationalIntermediate),
            "PP" => Some(StopKind::IntermediatePassing),
            "DT" => Some(StopKind::Destination),
            "OPDT" => Some(StopKind::OperationalDestination),
            _ => None,
        }
    }

    /// The element name for this kind.
    pub fn tag(self) -> &'static str {
        match self {
            StopKind::Origin => "OR",
            StopKind::OperationalOrigin => "OPOR",
            StopKind::Intermediate => "IP",
            StopKind::OperationalIntermediate => "OPIP",
            StopKind::IntermediatePassing => "PP",
            StopKind::Destination => "DT",
            StopKind::OperationalDestination => "OPDT",
        }
    }

    /// Whether passengers can use this stop (public times are allowed).
    pub fn is_public(self) -> bool {
        matches!(
            self,
            StopKind::Origin | StopKind::Intermediate | StopKind::Destination
        )
    }
}

/// Per-stop attributes that have schema defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopAttributes {
    /// Activity codes; `["none"]` when the stop has no activity.
    pub activities: Vec<String>,
    pub planned_activities: Vec<String>,
    pub cancelled: bool,
    /// Route delay in minutes.
    pub route_delay: i32,
}

/// One location in a schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stop {
    pub kind: StopKind,
    pub tiploc: Tiploc,
    pub times: TimeSignature,
    pub attributes: StopAttributes,
    pub platform: Option<String>,
    /// Formation this stop uses, if it names one itself.
    pub formation_id: Option<String>,
    pub false_destination: Option<Tiploc>,
}

/// A schedule that is no longer active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deactivation {
    pub rid: Rid,
}

/// One side of an association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociatedService {
    pub rid: Rid,
    pub signature: TimeSignature,
}

/// A join, split, next-working or link between two services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub tiploc: Tiploc,
    /// "JJ", "VV", "NP" or "LK".
    pub category: String,
    pub cancelled: bool,
    pub deleted: bool,
    pub main: AssociatedService,
    pub associated: AssociatedService,
}

/// Whether a toilet is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToiletStatus {
    Unknown,
    InService,
    NotInService,
}

impl ToiletStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ToiletStatus::Unknown => "Unknown",
            ToiletStatus::InService => "InService",
            ToiletStatus::NotInService => "NotInService",
        }
    }
}

/// A coach's toilet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toilet {
    /// "Standard", "Accessible", "None" or "Unknown".
    pub kind: String,
    pub status: ToiletStatus,
}

/// One coach of a formation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coach {
    pub number: String,
    pub class: Option<String>,
    pub toilet: Toilet,
}

/// A train formation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formation {
    pub fid: String,
    pub source: Option<String>,
    pub source_instance: Option<String>,
    pub coaches: Vec<Coach>,
}

/// The formations used by a schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleFormations {
    pub rid: Rid,
    pub formations: Vec<Formation>,
}

/// Forecast or actual data for one phase (arrival, departure or pass).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseForecast {
    pub estimated: Option<TrainTime>,
    pub working_estimated: Option<TrainTime>,
    pub actual: Option<TrainTime>,
    pub estimated_minimum: Option<TrainTime>,
    pub actual_removed: bool,
    pub unknown_delay: bool,
    pub delayed: bool,
    pub source: Option<String>,
    pub source_instance: Option<String>,
}

/// Platform data for a forecast location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub platform: String,
    pub suppressed: bool,
    pub cis_suppressed: bool,
    /// "P" (planned), "A" (automatic) or "M" (manual).
    pub source: String,
    pub confirmed: bool,
}

/// Forecast data for one location of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastLocation {
    pub tiploc: Tiploc,
    pub signature: TimeSignature,
    pub arrival: Option<PhaseForecast>,
    pub departure: Option<PhaseForecast>,
    pub passing: Option<PhaseForecast>,
    pub platform: Option<PlatformInfo>,
    pub suppressed: bool,
    /// Train length in coaches; 0 when unknown.
    pub length: u32,
    pub detach_front: bool,
    pub late_reason: Option<DisruptionReason>,
}

/// A train status (`TS`) update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainStatus {
    pub rid: Rid,
    pub uid: Uid,
    pub ssd: NaiveDate,
    pub reverse_formation: bool,
    pub late_reason: Option<DisruptionReason>,
    pub locations: Vec<ForecastLocation>,
}

/// A loading value and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadingValue<T> {
    pub value: T,
    /// "Typical" or "Expected".
    pub kind: String,
    pub source: Option<String>,
    pub source_instance: Option<String>,
}

/// Loading of a whole service at a location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceLoading {
    pub rid: Rid,
    pub tiploc: Tiploc,
    pub signature: TimeSignature,
    pub category: Option<LoadingValue<String>>,
    pub percentage: Option<LoadingValue<u32>>,
}

/// Loading of one coach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoachLoading {
    pub coach: String,
    pub percentage: u32,
    pub source: Option<String>,
    pub source_instance: Option<String>,
}

/// Per-coach loading of a formation at a location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormationLoading {
    pub fid: String,
    pub rid: Rid,
    pub tiploc: Tiploc,
    pub signature: TimeSignature,
    pub coaches: Vec<CoachLoading>,
}

/// A station message (`OW`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationMessage {
    pub id: i64,
    pub category: String,
    pub severity: u8,
    pub suppress: bool,
    pub stations: Vec<Crs>,
    /// Message text with markup removed.
    pub text: String,
}

/// One entry in a train order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainOrderItem {
    /// A service identified by RID and the times of its visit.
    Service { rid: Rid, signature: TimeSignature },
    /// A service identified only by headcode.
    Headcode(String),
}

/// The order trains will depart a platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainOrderSet {
    pub first: TrainOrderItem,
    pub second: Option<TrainOrderItem>,
    pub third: Option<TrainOrderItem>,
}

/// Set or clear a train order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainOrderAction {
    Set(TrainOrderSet),
    Clear,
}

/// A train order at a platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainOrder {
    pub tiploc: Tiploc,
    pub crs: Crs,
    pub platform: Option<String>,
    pub action: TrainOrderAction,
}

/// A service a train alert applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertService {
    pub rid: Rid,
    pub uid: Uid,
    pub ssd: NaiveDate,
    pub locations: Vec<Tiploc>,
}

/// A train alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainAlert {
    pub id: String,
    pub services: Vec<AlertService>,
    pub send_by_sms: bool,
    pub send_by_email: bool,
    pub send_by_twitter: bool,
    pub source: String,
    pub text: String,
    pub audience: String,
    pub kind: String,
}

/// A correction to the headcode shown in a signalling berth (`trackingID`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadcodeChange {
    pub berth_area: String,
    pub berth: String,
    pub incorrect_headcode: String,
    pub correct_headcode: String,
}

/// What has failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlarmFailure {
    /// A train describer area has failed.
    TdArea(String),
    /// The whole train describer feed has failed.
    TdFeed,
    /// The Tyrell feed has failed.
    TyrellFeed,
}

/// A Darwin system alarm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alarm {
    Set { id: i64, failure: AlarmFailure },
    Clear { id: i64 },
}

impl Alarm {
    pub fn id(&self) -> i64 {
        match self {
            Alarm::Set { id, .. } | Alarm::Clear { id } => *id,
        }
    }
}
