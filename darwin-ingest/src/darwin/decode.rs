//! Decoding of Push Port XML into typed messages.
//!
//! Decoding is pure: the same bytes always give the same document or the same
//! error. Unknown elements and attributes are skipped so that newer schema
//! versions still decode.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};

use crate::domain::{Crs, Rid, Tiploc, TrainTime, Uid};

use super::defaults::ApplyDefaults;
use super::error::DecodeError;
use super::types::{
    Alarm, AlarmFailure, AlertService, AssociatedService, Association, Coach, CoachLoading,
    Content, Deactivation, DisruptionReason, ForecastLocation, Formation, FormationLoading,
    HeadcodeChange, LoadingValue, PhaseForecast, PlatformInfo, PushPortDocument, Response,
    Schedule, ScheduleFormations, ServiceAttributes, ServiceLoading, StationMessage,
    StatusUpdate, Stop, StopAttributes, StopKind, TimeSignature, TimetableNotice, Toilet,
    ToiletStatus, TrainAlert, TrainOrder, TrainOrderAction, TrainOrderItem, TrainOrderSet,
    TrainStatus, UpdateOrigin,
};
use super::xml::{Element, parse_bool};

/// Decode one Push Port document.
///
/// # Examples
///
/// ```
/// use darwin_ingest::darwin::{Content, decode};
///
/// let xml = br#"<Pport ts="2024-03-12T08:00:00+00:00" version="16.0"><uR/></Pport>"#;
/// let doc = decode(xml).unwrap();
/// assert!(matches!(doc.content, Content::Update(ref r) if r.is_empty()));
///
/// assert!(decode(b"<Pport ts=\"2024-03-12T08:00:00Z\" version=\"16.0\"/>").is_err());
/// ```
pub fn decode(bytes: &[u8]) -> Result<PushPortDocument, DecodeError> {
    let root = Element::parse(bytes)?;
    if root.name != "Pport" {
        return Err(DecodeError::Structure(format!(
            "expected <Pport>, found <{}>",
            root.name
        )));
    }

    let timestamp = root.parse_required("ts", parse_timestamp)?;
    let version = root.required_attr("version")?.to_string();

    let element = root.exactly_one_of(
        &["uR", "sR", "TimeTableId", "FailureResp"],
        "uR, sR, TimeTableId, FailureResp",
    )?;
    let content = match element.name.as_str() {
        "uR" => Content::Update(response(element)?),
        "sR" => Content::Snapshot(response(element)?),
        "TimeTableId" => Content::TimetableNotice(TimetableNotice {
            timetable_id: element.text(),
            timetable_file: element.string_attr("ttfile"),
            reference_file: element.string_attr("ttreffile"),
        }),
        _ => Content::Status(StatusUpdate {
            code: element.string_attr("code"),
            request_source: element.string_attr("requestSource"),
            request_id: element.string_attr("requestID"),
            text: element.text(),
        }),
    };

    let mut document = PushPortDocument {
        timestamp,
        version,
        content,
    };
    document.apply_defaults();
    Ok(document)
}

/// Parse the document timestamp. Darwin normally sends an offset; a bare
/// local timestamp is taken as UTC.
fn parse_timestamp(s: &str) -> Result<DateTime<FixedOffset>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).or_else(|err| {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc().fixed_offset())
            .map_err(|_| err)
    })
}

fn parse_date(s: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
}

fn response(e: &Element) -> Result<Response, DecodeError> {
    let mut response = Response {
        origin: UpdateOrigin {
            update_origin: e.string_attr("updateOrigin"),
            request_source: e.string_attr("requestSource"),
            request_id: e.string_attr("requestID"),
        },
        ..Response::default()
    };

    for child in e.children() {
        match child.name.as_str() {
            "schedule" => response.schedules.push(schedule(child)?),
            "deactivated" => response.deactivations.push(Deactivation {
                rid: child.parse_required("rid", Rid::parse)?,
            }),
            "association" => response.associations.push(association(child)?),
            "scheduleFormations" => response.formations.push(schedule_formations(child)?),
            "TS" => response.forecasts.push(train_status(child)?),
            "serviceLoading" => response.service_loadings.push(service_loading(child)?),
            "formationLoading" => response.formation_loadings.push(formation_loading(child)?),
            "OW" => response.station_messages.push(station_message(child)?),
            "trainOrder" => response.train_orders.push(train_order(child)?),
            "trainAlert" => response.train_alerts.push(train_alert(child)?),
            "trackingID" => response.headcode_changes.push(headcode_change(child)?),
            "alarm" => response.alarms.push(alarm(child)?),
            _ => {}
        }
    }

    Ok(response)
}

fn time_attr(e: &Element, name: &'static str) -> Result<Option<TrainTime>, DecodeError> {
    e.parse_attr(name, TrainTime::parse)
}

/// Read the working and public times an element carries.
fn signature(e: &Element) -> Result<TimeSignature, DecodeError> {
    Ok(TimeSignature {
        working_arrival: time_attr(e, "wta")?,
        working_departure: time_attr(e, "wtd")?,
        working_passing: time_attr(e, "wtp")?,
        public_arrival: time_attr(e, "pta")?,
        public_departure: time_attr(e, "ptd")?,
    })
}

fn disruption_reason(e: &Element) -> Result<DisruptionReason, DecodeError> {
    Ok(DisruptionReason {
        code: e.parse_text("code", str::parse::<u32>)?,
        tiploc: e.parse_attr("tiploc", Tiploc::parse)?,
        near: e.bool_attr("near", false)?,
    })
}

fn schedule(e: &Element) -> Result<Schedule, DecodeError> {
    let rid = e.parse_required("rid", Rid::parse)?;
    let defaults = ServiceAttributes::default();
    let attributes = ServiceAttributes {
        status: e.string_attr("status").unwrap_or(defaults.status),
        category: e.string_attr("trainCat").unwrap_or(defaults.category),
        passenger: e.bool_attr("isPassengerSvc", defaults.passenger)?,
        active: e.bool_attr("isActive", defaults.active)?,
        deleted: e.bool_attr("deleted", defaults.deleted)?,
        charter: e.bool_attr("isCharter", defaults.charter)?,
    };

    let mut stops = Vec::new();
    let mut cancel_reason = None;
    for child in e.children() {
        if let Some(kind) = StopKind::from_tag(&child.name) {
            stops.push(stop(kind, child)?);
        } else if child.name == "cancelReason" {
            cancel_reason = Some(disruption_reason(child)?);
        }
    }

    if stops.len() < 2 {
        return Err(DecodeError::Structure(format!(
            "schedule {rid} has {} stops, at least 2 are required",
            stops.len()
        )));
    }

    Ok(Schedule {
        uid: e.parse_required("uid", Uid::parse)?,
        ssd: e.parse_required("ssd", parse_date)?,
        headcode: e.required_attr("trainId")?.to_string(),
        rsid: e.string_attr("rsid"),
        toc: e.required_attr("toc")?.to_string(),
        rid,
        attributes,
        cancel_reason,
        stops,
    })
}

/// Split an activity attribute into its two-character codes.
fn activity_codes(s: &str) -> Vec<String> {
    s.chars()
        .collect::<Vec<_>>()
        .chunks(2)
        .map(|pair| pair.iter().collect::<String>().trim().to_string())
        .filter(|code| !code.is_empty())
        .collect()
}

fn stop(kind: StopKind, e: &Element) -> Result<Stop, DecodeError> {
    let read = signature(e)?;
    let need = |value: Option<TrainTime>, attribute: &'static str| {
        value.ok_or_else(|| DecodeError::MissingAttribute {
            element: e.name.clone(),
            attribute,
        })
    };

    // Each kind keeps only the times it may carry.
    let times = match kind {
        StopKind::Origin => TimeSignature {
            working_departure: Some(need(read.working_departure, "wtd")?),
            working_passing: None,
            ..read
        },
        StopKind::OperationalOrigin => TimeSignature {
            working_arrival: read.working_arrival,
            working_departure: Some(need(read.working_departure, "wtd")?),
            ..TimeSignature::default()
        },
        StopKind::Intermediate => TimeSignature {
            working_arrival: Some(need(read.working_arrival, "wta")?),
            working_departure: Some(need(read.working_departure, "wtd")?),
            working_passing: None,
            ..read
        },
        StopKind::OperationalIntermediate => TimeSignature {
            working_arrival: Some(need(read.working_arrival, "wta")?),
            working_departure: Some(need(read.working_departure, "wtd")?),
            ..TimeSignature::default()
        },
        StopKind::IntermediatePassing => TimeSignature {
            working_passing: Some(need(read.working_passing, "wtp")?),
            ..TimeSignature::default()
        },
        StopKind::Destination => TimeSignature {
            working_arrival: Some(need(read.working_arrival, "wta")?),
            working_passing: None,
            ..read
        },
        StopKind::OperationalDestination => TimeSignature {
            working_arrival: Some(need(read.working_arrival, "wta")?),
            working_departure: read.working_departure,
            ..TimeSignature::default()
        },
    };

    let defaults = StopAttributes::default();
    let attributes = StopAttributes {
        activities: e
            .attr("act")
            .map(activity_codes)
            .unwrap_or(defaults.activities),
        planned_activities: e
            .attr("planAct")
            .map(activity_codes)
            .unwrap_or(defaults.planned_activities),
        cancelled: e.bool_attr("can", defaults.cancelled)?,
        route_delay: e.number_attr("rdelay")?.unwrap_or(defaults.route_delay),
    };

    Ok(Stop {
        kind,
        tiploc: e.parse_required("tpl", Tiploc::parse)?,
        times,
        attributes,
        platform: e.string_attr("plat"),
        formation_id: e.string_attr("fid"),
        false_destination: e.parse_attr("fd", Tiploc::parse)?,
    })
}

fn associated_service(e: &Element) -> Result<AssociatedService, DecodeError> {
    Ok(AssociatedService {
        rid: e.parse_required("rid", Rid::parse)?,
        signature: signature(e)?,
    })
}

fn association(e: &Element) -> Result<Association, DecodeError> {
    Ok(Association {
        tiploc: e.parse_required("tiploc", Tiploc::parse)?,
        category: e.required_attr("category")?.to_string(),
        cancelled: e.bool_attr("isCancelled", false)?,
        deleted: e.bool_attr("isDeleted", false)?,
        main: associated_service(e.required_child("main")?)?,
        associated: associated_service(e.required_child("assoc")?)?,
    })
}

fn schedule_formations(e: &Element) -> Result<ScheduleFormations, DecodeError> {
    let formations = e
        .children_named("formation")
        .map(formation)
        .collect::<Result<_, _>>()?;

    Ok(ScheduleFormations {
        rid: e.parse_required("rid", Rid::parse)?,
        formations,
    })
}

fn formation(e: &Element) -> Result<Formation, DecodeError> {
    let coaches = match e.child("coaches") {
        Some(coaches) => coaches
            .children_named("coach")
            .map(coach)
            .collect::<Result<_, _>>()?,
        None => Vec::new(),
    };

    Ok(Formation {
        fid: e.required_attr("fid")?.to_string(),
        source: e.string_attr("src"),
        source_instance: e.string_attr("srcInst"),
        coaches,
    })
}

fn toilet_status(s: &str) -> Result<ToiletStatus, String> {
    match s.trim() {
        "" | "InService" => Ok(ToiletStatus::InService),
        "NotInService" => Ok(ToiletStatus::NotInService),
        "Unknown" => Ok(ToiletStatus::Unknown),
        other => Err(format!("unknown toilet status {other:?}")),
    }
}

fn coach(e: &Element) -> Result<Coach, DecodeError> {
    let toilet = match e.child("toilet") {
        Some(toilet) => Toilet {
            kind: toilet.text(),
            status: toilet
                .parse_attr("status", toilet_status)?
                .unwrap_or(ToiletStatus::InService),
        },
        None => Toilet::default(),
    };

    Ok(Coach {
        number: e.required_attr("coachNumber")?.to_string(),
        class: e.string_attr("coachClass"),
        toilet,
    })
}

fn phase(e: &Element) -> Result<PhaseForecast, DecodeError> {
    Ok(PhaseForecast {
        estimated: time_attr(e, "et")?,
        working_estimated: time_attr(e, "wet")?,
        actual: time_attr(e, "at")?,
        estimated_minimum: time_attr(e, "etmin")?,
        actual_removed: e.bool_attr("atRemoved", false)?,
        unknown_delay: e.bool_attr("etUnknown", false)?,
        delayed: e.bool_attr("delayed", false)?,
        source: e.string_attr("src"),
        source_instance: e.string_attr("srcInst"),
    })
}

fn platform(e: &Element) -> Result<PlatformInfo, DecodeError> {
    let defaults = PlatformInfo::default();
    Ok(PlatformInfo {
        platform: e.text(),
        suppressed: e.bool_attr("platsup", defaults.suppressed)?,
        cis_suppressed: e.bool_attr("cisPlatsup", defaults.cis_suppressed)?,
        source: e.string_attr("platsrc").unwrap_or(defaults.source),
        confirmed: e.bool_attr("conf", defaults.confirmed)?,
    })
}

/// Parse an optional child's text, falling back to `default`.
fn child_value<T, E: ToString>(
    e: &Element,
    name: &'static str,
    parse: impl FnOnce(&str) -> Result<T, E>,
    default: T,
) -> Result<T, DecodeError> {
    match e.child(name) {
        Some(child) => child.parse_text(name, parse),
        None => Ok(default),
    }
}

fn child_text(e: &Element, name: &str) -> String {
    e.child(name).map(Element::text).unwrap_or_default()
}

fn optional<T>(
    e: &Element,
    name: &str,
    decode: impl FnOnce(&Element) -> Result<T, DecodeError>,
) -> Result<Option<T>, DecodeError> {
    e.child(name).map(decode).transpose()
}

fn forecast_location(e: &Element) -> Result<ForecastLocation, DecodeError> {
    Ok(ForecastLocation {
        tiploc: e.parse_required("tpl", Tiploc::parse)?,
        signature: signature(e)?,
        arrival: optional(e, "arr", phase)?,
        departure: optional(e, "dep", phase)?,
        passing: optional(e, "pass", phase)?,
        platform: optional(e, "plat", platform)?,
        suppressed: child_value(e, "suppr", parse_bool, false)?,
        length: child_value(e, "length", str::parse::<u32>, 0)?,
        detach_front: child_value(e, "detachFront", parse_bool, false)?,
        late_reason: optional(e, "LateReason", disruption_reason)?,
    })
}

fn train_status(e: &Element) -> Result<TrainStatus, DecodeError> {
    let locations = e
        .children_named("Location")
        .map(forecast_location)
        .collect::<Result<_, _>>()?;

    Ok(TrainStatus {
        rid: e.parse_required("rid", Rid::parse)?,
        uid: e.parse_required("uid", Uid::parse)?,
        ssd: e.parse_required("ssd", parse_date)?,
        reverse_formation: e.bool_attr("isReverseFormation", false)?,
        late_reason: optional(e, "LateReason", disruption_reason)?,
        locations,
    })
}

fn loading_value<T>(
    e: &Element,
    parse: impl FnOnce(&str) -> Result<T, String>,
) -> Result<LoadingValue<T>, DecodeError> {
    Ok(LoadingValue {
        value: e.parse_text("value", parse)?,
        kind: e.string_attr("type").unwrap_or_default(),
        source: e.string_attr("src"),
        source_instance: e.string_attr("srcInst"),
    })
}

fn service_loading(e: &Element) -> Result<ServiceLoading, DecodeError> {
    Ok(ServiceLoading {
        rid: e.parse_required("rid", Rid::parse)?,
        tiploc: e.parse_required("tpl", Tiploc::parse)?,
        signature: signature(e)?,
        category: optional(e, "loadingCategory", |c| {
            loading_value(c, |s| Ok(s.to_string()))
        })?,
        percentage: optional(e, "loadingPercentage", |p| {
            loading_value(p, |s| s.parse::<u32>().map_err(|err| err.to_string()))
        })?,
    })
}

fn formation_loading(e: &Element) -> Result<FormationLoading, DecodeError> {
    let coaches = e
        .children_named("loading")
        .map(|loading| -> Result<CoachLoading, DecodeError> {
            Ok(CoachLoading {
                coach: loading.required_attr("coachNumber")?.to_string(),
                percentage: loading.parse_text("percentage", str::parse::<u32>)?,
                source: loading.string_attr("src"),
                source_instance: loading.string_attr("srcInst"),
            })
        })
        .collect::<Result<_, _>>()?;

    Ok(FormationLoading {
        fid: e.required_attr("fid")?.to_string(),
        rid: e.parse_required("rid", Rid::parse)?,
        tiploc: e.parse_required("tpl", Tiploc::parse)?,
        signature: signature(e)?,
        coaches,
    })
}

fn station_message(e: &Element) -> Result<StationMessage, DecodeError> {
    let stations = e
        .children_named("Station")
        .map(|station| station.parse_required("crs", Crs::parse))
        .collect::<Result<_, _>>()?;

    Ok(StationMessage {
        id: e.parse_required("id", str::parse::<i64>)?,
        category: e.required_attr("cat")?.to_string(),
        severity: e.parse_required("sev", str::parse::<u8>)?,
        suppress: e.bool_attr("suppress", false)?,
        stations,
        text: e.required_child("Msg")?.flattened_text(),
    })
}

fn train_order_item(e: &Element) -> Result<TrainOrderItem, DecodeError> {
    let item = e.exactly_one_of(&["rid", "trainID"], "rid, trainID")?;
    if item.name == "rid" {
        Ok(TrainOrderItem::Service {
            rid: item.parse_text("rid", Rid::parse)?,
            signature: signature(item)?,
        })
    } else {
        Ok(TrainOrderItem::Headcode(item.text()))
    }
}

fn train_order(e: &Element) -> Result<TrainOrder, DecodeError> {
    let choice = e.exactly_one_of(&["set", "clear"], "set, clear")?;
    let action = if choice.name == "set" {
        TrainOrderAction::Set(TrainOrderSet {
            first: train_order_item(choice.required_child("first")?)?,
            second: optional(choice, "second", train_order_item)?,
            third: optional(choice, "third", train_order_item)?,
        })
    } else {
        TrainOrderAction::Clear
    };

    Ok(TrainOrder {
        tiploc: e.parse_required("tiploc", Tiploc::parse)?,
        crs: e.parse_required("crs", Crs::parse)?,
        platform: e.string_attr("platform"),
        action,
    })
}

fn alert_service(e: &Element) -> Result<AlertService, DecodeError> {
    let locations = e
        .children_named("Location")
        .map(|location| location.parse_text("tiploc", Tiploc::parse))
        .collect::<Result<_, _>>()?;

    Ok(AlertService {
        rid: e.parse_required("RID", Rid::parse)?,
        uid: e.parse_required("UID", Uid::parse)?,
        ssd: e.parse_required("SSD", parse_date)?,
        locations,
    })
}

fn train_alert(e: &Element) -> Result<TrainAlert, DecodeError> {
    let services = match e.child("AlertServices") {
        Some(services) => services
            .children_named("AlertService")
            .map(alert_service)
            .collect::<Result<_, _>>()?,
        None => Vec::new(),
    };

    Ok(TrainAlert {
        id: e.required_child("AlertID")?.text(),
        services,
        send_by_sms: child_value(e, "SendAlertBySMS", parse_bool, false)?,
        send_by_email: child_value(e, "SendAlertByEmail", parse_bool, false)?,
        send_by_twitter: child_value(e, "SendAlertByTwitter", parse_bool, false)?,
        source: child_text(e, "Source"),
        text: e
            .child("AlertText")
            .map(Element::flattened_text)
            .unwrap_or_default(),
        audience: child_text(e, "Audience"),
        kind: child_text(e, "AlertType"),
    })
}

fn headcode_change(e: &Element) -> Result<HeadcodeChange, DecodeError> {
    let berth = e.required_child("berth")?;
    Ok(HeadcodeChange {
        berth_area: berth.required_attr("area")?.to_string(),
        berth: berth.text(),
        incorrect_headcode: e.required_child("incorrectTrainID")?.text(),
        correct_headcode: e.required_child("correctTrainID")?.text(),
    })
}

fn alarm(e: &Element) -> Result<Alarm, DecodeError> {
    let choice = e.exactly_one_of(&["set", "clear"], "set, clear")?;
    if choice.name == "clear" {
        return Ok(Alarm::Clear {
            id: choice.parse_text("id", str::parse::<i64>)?,
        });
    }

    let failure = choice.exactly_one_of(
        &["tdAreaFail", "tdFeedFail", "tyrellFeedFail"],
        "tdAreaFail, tdFeedFail, tyrellFeedFail",
    )?;
    let failure = match failure.name.as_str() {
        "tdAreaFail" => AlarmFailure::TdArea(failure.text()),
        "tdFeedFail" => AlarmFailure::TdFeed,
        _ => AlarmFailure::TyrellFeed,
    };

    Ok(Alarm::Set {
        id: choice.parse_required("id", str::parse::<i64>)?,
        failure,
    })
}
