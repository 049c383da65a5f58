//! Schedules to records.

use crate::darwin::Schedule;
use crate::domain::{TimeCursor, TimeError};
use crate::store::{ScheduleRecord, StopRecord};

/// Turn a decoded schedule into its service record and numbered stops.
///
/// Times are resolved walking the stops in order, each stop's times taken
/// as arrival, public arrival, pass, departure, public departure. Formation
/// ids are then rippled along the stops.
pub fn map_schedule(
    schedule: &Schedule,
    message_id: &str,
) -> Result<(ScheduleRecord, Vec<StopRecord>), TimeError> {
    let record = ScheduleRecord {
        rid: schedule.rid.clone(),
        uid: schedule.uid,
        ssd: schedule.ssd,
        headcode: schedule.headcode.clone(),
        rsid: schedule.rsid.clone(),
        toc: schedule.toc.clone(),
        attributes: schedule.attributes.clone(),
        cancel_reason: schedule.cancel_reason.clone(),
        message_id: message_id.to_string(),
    };

    let mut cursor = TimeCursor::new(schedule.ssd);
    let mut stops = Vec::with_capacity(schedule.stops.len());

    for (sequence, stop) in (0..).zip(&schedule.stops) {
        let times = &stop.times;
        let working_arrival = cursor.advance(times.working_arrival)?;
        let public_arrival = cursor.advance(times.public_arrival)?;
        let working_passing = cursor.advance(times.working_passing)?;
        let working_departure = cursor.advance(times.working_departure)?;
        let public_departure = cursor.advance(times.public_departure)?;

        let cancelled = stop.attributes.cancelled;
        stops.push(StopRecord {
            rid: schedule.rid.clone(),
            sequence,
            kind: stop.kind,
            tiploc: stop.tiploc,
            working_arrival,
            working_departure,
            working_passing,
            public_arrival,
            public_departure,
            activities: stop.attributes.activities.clone(),
            planned_activities: stop.attributes.planned_activities.clone(),
            cancelled,
            cancel_reason: if cancelled {
                schedule.cancel_reason.clone()
            } else {
                None
            },
            platform: stop.platform.clone(),
            formation_id: stop.formation_id.clone(),
            effective_formation_id: None,
            route_delay: stop.attributes.route_delay,
            false_destination: stop.false_destination,
        });
    }

    ripple_formations(&mut stops);
    Ok((record, stops))
}

/// Carry formation ids forward to stops that do not name one.
///
/// A cancelled stop keeps only the formation it names itself, and nothing
/// is carried past it.
pub fn ripple_formations(stops: &mut [StopRecord]) {
    let mut carried: Option<String> = None;
    for stop in stops {
        if stop.cancelled {
            stop.effective_formation_id = stop.formation_id.clone();
            carried = None;
        } else {
            let effective = stop.formation_id.clone().or_else(|| carried.clone());
            stop.effective_formation_id = effective.clone();
            carried = effective;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::darwin::decode;
    use crate::darwin::{Content, StopKind};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn schedule_from(xml: &[u8]) -> Schedule {
        let document = decode(xml).unwrap();
        match document.content {
            Content::Update(mut response) => response.schedules.remove(0),
            other => panic!("unexpected content {other:?}"),
        }
    }

    fn sample() -> Schedule {
        schedule_from(include_bytes!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/data/samples/schedule.xml"
        )))
    }

    #[test]
    fn maps_sample_schedule() {
        let (record, stops) = map_schedule(&sample(), "m1").unwrap();

        assert_eq!(record.rid.as_str(), "202403128712345");
        assert_eq!(record.message_id, "m1");
        assert_eq!(stops.len(), 6);
        assert_eq!(
            stops.iter().map(|s| s.sequence).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4, 5]
        );

        let reading = &stops[2];
        assert_eq!(reading.kind, StopKind::Intermediate);
        assert_eq!(
            reading.working_arrival,
            Some(Utc.with_ymd_and_hms(2024, 3, 12, 8, 40, 0).unwrap())
        );
        assert_eq!(reading.route_delay, 2);
        assert_eq!(reading.cancel_reason, None);

        let swindon = &stops[4];
        assert!(swindon.cancelled);
        assert_eq!(swindon.cancel_reason.as_ref().map(|r| r.code), Some(104));
    }

    #[test]
    fn overnight_schedule_moves_to_next_day() {
        let schedule = schedule_from(include_bytes!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/data/samples/minimal_schedule.xml"
        )));
        let (record, stops) = map_schedule(&schedule, "m2").unwrap();

        assert_eq!(record.ssd, NaiveDate::from_ymd_opt(2024, 3, 12).unwrap());
        assert_eq!(
            stops[0].working_departure,
            Some(Utc.with_ymd_and_hms(2024, 3, 12, 23, 50, 0).unwrap())
        );
        assert_eq!(
            stops[1].working_arrival,
            Some(Utc.with_ymd_and_hms(2024, 3, 13, 0, 25, 30).unwrap())
        );
        assert_eq!(stops[1].activities, vec!["none".to_string()]);
    }

    #[test]
    fn formation_rippling() {
        let mut schedule = sample();
        schedule.stops.truncate(4);
        for stop in &mut schedule.stops {
            stop.formation_id = None;
            stop.attributes.cancelled = false;
        }
        schedule.stops[0].formation_id = Some("F1".into());
        schedule.stops[2].attributes.cancelled = true;

        let (_, stops) = map_schedule(&schedule, "m1").unwrap();
        let effective: Vec<Option<&str>> = stops
            .iter()
            .map(|s| s.effective_formation_id.as_deref())
            .collect();
        assert_eq!(effective, vec![Some("F1"), Some("F1"), None, None]);
    }

    #[test]
    fn cancelled_stop_keeps_its_own_formation() {
        let mut schedule = sample();
        for stop in &mut schedule.stops {
            stop.formation_id = None;
            stop.attributes.cancelled = false;
        }
        schedule.stops[0].formation_id = Some("F1".into());
        schedule.stops[2].formation_id = Some("F2".into());
        schedule.stops[2].attributes.cancelled = true;
        schedule.stops[4].formation_id = Some("F3".into());

        let (_, stops) = map_schedule(&schedule, "m1").unwrap();
        let effective: Vec<Option<&str>> = stops
            .iter()
            .map(|s| s.effective_formation_id.as_deref())
            .collect();
        assert_eq!(
            effective,
            vec![Some("F1"), Some("F1"), Some("F2"), None, Some("F3"), Some("F3")]
        );
    }
}
