//! Item keys for message-keyed rows.
//!
//! A message-keyed row is unique on `(message_id, item_key)`; a second row
//! with the same pair is dropped. Every store derives its keys here, so each
//! key has to carry whatever tells two items of one message apart. Items
//! with no identity of their own are told apart by their position among
//! items of the same kind in the message.

use crate::darwin::{
    Alarm, Association, Formation, FormationLoading, HeadcodeChange, ServiceLoading,
    StationMessage, StatusUpdate, TimeSignature, TimetableNotice, TrainAlert, TrainOrder,
};
use crate::domain::TrainTime;

use super::records::ForecastRecord;

/// `wta/wtd/wtp/pta/ptd`, with `-` for an absent time.
pub fn signature(signature: &TimeSignature) -> String {
    let part = |t: Option<TrainTime>| t.map_or_else(|| "-".to_string(), |t| t.to_string());
    format!(
        "{}/{}/{}/{}/{}",
        part(signature.working_arrival),
        part(signature.working_departure),
        part(signature.working_passing),
        part(signature.public_arrival),
        part(signature.public_departure),
    )
}

pub fn forecast(forecast: &ForecastRecord) -> String {
    format!("{}:{}", forecast.rid, forecast.stop_sequence)
}

pub fn association(association: &Association) -> String {
    format!(
        "{}:{}@{}:{}@{}",
        association.tiploc,
        association.main.rid,
        signature(&association.main.signature),
        association.associated.rid,
        signature(&association.associated.signature),
    )
}

pub fn formation(formation: &Formation) -> String {
    formation.fid.clone()
}

pub fn service_loading(loading: &ServiceLoading) -> String {
    format!(
        "{}:{}@{}",
        loading.rid,
        loading.tiploc,
        signature(&loading.signature)
    )
}

pub fn formation_loading(loading: &FormationLoading) -> String {
    format!(
        "{}:{}:{}@{}",
        loading.fid,
        loading.rid,
        loading.tiploc,
        signature(&loading.signature)
    )
}

pub fn station_message(message: &StationMessage) -> String {
    message.id.to_string()
}

/// Orders for one platform may be cleared and set again in one message.
pub fn train_order(order: &TrainOrder, position: usize) -> String {
    format!(
        "{}:{}#{position}",
        order.tiploc,
        order.platform.as_deref().unwrap_or_default()
    )
}

pub fn train_alert(alert: &TrainAlert) -> String {
    alert.id.clone()
}

pub fn headcode_change(change: &HeadcodeChange, position: usize) -> String {
    format!("{}:{}#{position}", change.berth_area, change.berth)
}

pub fn alarm(alarm: &Alarm) -> String {
    alarm.id().to_string()
}

pub fn timetable_notice(notice: &TimetableNotice) -> String {
    notice.timetable_id.clone()
}

pub fn status(status: &StatusUpdate) -> String {
    status.code.clone().unwrap_or_default()
}
