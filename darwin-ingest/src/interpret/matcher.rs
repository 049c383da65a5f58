//! Finding the stop an update refers to.
//!
//! Updates name a stop by TIPLOC plus the scheduled times of the visit.
//! Most services call at a TIPLOC once, but loops and reversals mean some
//! visit it several times; the times then pick out the right visit.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::darwin::TimeSignature;
use crate::domain::{Rid, Tiploc, TrainTime};
use crate::store::{ScheduleRepository, StopRecord};

use super::error::{MatchError, ProcessError};

/// Pick the stop matching `signature` from the stops of `rid` at `tiploc`.
///
/// A lone candidate is returned without looking at times. Otherwise only
/// working arrival, departure and passing times are compared, and only
/// where both the signature and the candidate have one; they must agree to
/// the minute in UK local time. A candidate qualifies when at least one
/// field was compared and every compared field agreed.
pub fn select_stop(
    mut candidates: Vec<StopRecord>,
    rid: &Rid,
    tiploc: Tiploc,
    signature: &TimeSignature,
) -> Result<StopRecord, MatchError> {
    match candidates.len() {
        0 => {
            return Err(MatchError::NoMatchingLocation {
                rid: rid.clone(),
                tiploc,
            });
        }
        1 => return Ok(candidates.remove(0)),
        _ => {}
    }

    let total = candidates.len();
    let mut anything_compared = false;
    let mut qualifying = Vec::new();

    for candidate in candidates {
        let pairs = [
            (signature.working_arrival, candidate.working_arrival),
            (signature.working_departure, candidate.working_departure),
            (signature.working_passing, candidate.working_passing),
        ];
        let compared: Vec<(TrainTime, DateTime<Utc>)> = pairs
            .into_iter()
            .filter_map(|(wanted, stored)| Some((wanted?, stored?)))
            .collect();

        if compared.is_empty() {
            continue;
        }
        anything_compared = true;

        if compared
            .iter()
            .all(|(wanted, stored)| wanted.same_minute_as(*stored))
        {
            qualifying.push(candidate);
        }
    }

    match qualifying.len() {
        1 => Ok(qualifying.remove(0)),
        0 if anything_compared => Err(MatchError::NoMatchingLocation {
            rid: rid.clone(),
            tiploc,
        }),
        0 => Err(MatchError::AmbiguousLocation {
            rid: rid.clone(),
            tiploc,
            candidates: total,
        }),
        n => Err(MatchError::AmbiguousLocation {
            rid: rid.clone(),
            tiploc,
            candidates: n,
        }),
    }
}

/// Locate a stop, preferring stops mapped earlier in the same unit of work
/// over stored ones.
pub async fn locate<R>(
    repo: &mut R,
    pending: &HashMap<Rid, Vec<StopRecord>>,
    rid: &Rid,
    tiploc: Tiploc,
    signature: &TimeSignature,
) -> Result<StopRecord, ProcessError>
where
    R: ScheduleRepository + Send,
{
    let candidates = match pending.get(rid) {
        Some(stops) => stops
            .iter()
            .filter(|stop| stop.tiploc == tiploc)
            .cloned()
            .collect(),
        None => repo.stops_at(rid, tiploc).await?,
    };
    Ok(select_stop(candidates, rid, tiploc, signature)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::darwin::StopKind;
    use chrono::TimeZone;

    fn rid() -> Rid {
        Rid::parse("202403128712345").unwrap()
    }

    fn tiploc() -> Tiploc {
        Tiploc::parse("CLPHMJC").unwrap()
    }

    /// A stop with the given UTC working arrival (March: UTC equals UK time).
    fn stop(sequence: i32, arrival: Option<(u32, u32)>) -> StopRecord {
        StopRecord {
            rid: rid(),
            sequence,
            kind: StopKind::Intermediate,
            tiploc: tiploc(),
            working_arrival: arrival
                .map(|(h, m)| Utc.with_ymd_and_hms(2024, 3, 12, h, m, 30).unwrap()),
            working_departure: None,
            working_passing: None,
            public_arrival: None,
            public_departure: None,
            activities: vec!["T".into()],
            planned_activities: vec![],
            cancelled: false,
            cancel_reason: None,
            platform: None,
            formation_id: None,
            effective_formation_id: None,
            route_delay: 0,
            false_destination: None,
        }
    }

    fn arriving(time: &str) -> TimeSignature {
        TimeSignature {
            working_arrival: Some(TrainTime::parse(time).unwrap()),
            ..TimeSignature::default()
        }
    }

    #[test]
    fn single_candidate_needs_no_times() {
        let found = select_stop(
            vec![stop(3, Some((9, 0)))],
            &rid(),
            tiploc(),
            &arriving("17:45"),
        )
        .unwrap();
        assert_eq!(found.sequence, 3);
    }

    #[test]
    fn no_candidates() {
        let err = select_stop(vec![], &rid(), tiploc(), &TimeSignature::default()).unwrap_err();
        assert!(matches!(err, MatchError::NoMatchingLocation { .. }));
    }

    #[test]
    fn working_arrival_picks_the_visit() {
        let stops = vec![stop(2, Some((9, 10))), stop(7, Some((10, 40)))];
        let found = select_stop(stops, &rid(), tiploc(), &arriving("10:40")).unwrap();
        assert_eq!(found.sequence, 7);
    }

    #[test]
    fn seconds_are_ignored() {
        let stops = vec![stop(2, Some((9, 10))), stop(7, Some((10, 40)))];
        let found = select_stop(stops, &rid(), tiploc(), &arriving("09:10:00")).unwrap();
        assert_eq!(found.sequence, 2);
    }

    #[test]
    fn nothing_to_compare_is_ambiguous() {
        let stops = vec![stop(2, Some((9, 10))), stop(7, Some((10, 40)))];
        let err = select_stop(stops, &rid(), tiploc(), &TimeSignature::default()).unwrap_err();
        assert_eq!(
            err,
            MatchError::AmbiguousLocation {
                rid: rid(),
                tiploc: tiploc(),
                candidates: 2
            }
        );
    }

    #[test]
    fn public_times_are_not_compared() {
        let stops = vec![stop(2, Some((9, 10))), stop(7, Some((10, 40)))];
        let signature = TimeSignature {
            public_arrival: Some(TrainTime::parse("10:40").unwrap()),
            ..TimeSignature::default()
        };
        let err = select_stop(stops, &rid(), tiploc(), &signature).unwrap_err();
        assert!(matches!(err, MatchError::AmbiguousLocation { .. }));
    }

    #[test]
    fn mismatched_time_finds_nothing() {
        let stops = vec![stop(2, Some((9, 10))), stop(7, Some((10, 40)))];
        let err = select_stop(stops, &rid(), tiploc(), &arriving("11:00")).unwrap_err();
        assert!(matches!(err, MatchError::NoMatchingLocation { .. }));
    }

    #[test]
    fn identical_visits_are_ambiguous() {
        let stops = vec![stop(2, Some((9, 10))), stop(7, Some((9, 10)))];
        let err = select_stop(stops, &rid(), tiploc(), &arriving("09:10")).unwrap_err();
        assert!(matches!(
            err,
            MatchError::AmbiguousLocation { candidates: 2, .. }
        ));
    }

    #[test]
    fn compares_in_uk_local_time() {
        // 12 July: UK time is UTC+1.
        let mut summer = stop(2, None);
        summer.working_arrival = Some(Utc.with_ymd_and_hms(2024, 7, 12, 9, 10, 0).unwrap());
        let stops = vec![summer, stop(7, Some((12, 0)))];

        let found = select_stop(stops, &rid(), tiploc(), &arriving("10:10")).unwrap();
        assert_eq!(found.sequence, 2);
    }

    #[tokio::test]
    async fn pending_stops_shadow_stored_ones() {
        let store = crate::store::MemoryStore::new();
        let mut tx = crate::store::Store::begin(&store).await.unwrap();

        let mut pending = HashMap::new();
        pending.insert(rid(), vec![stop(4, Some((9, 10)))]);
        let found = locate(&mut tx, &pending, &rid(), tiploc(), &arriving("09:10"))
            .await
            .unwrap();
        assert_eq!(found.sequence, 4);

        let err = locate(&mut tx, &HashMap::new(), &rid(), tiploc(), &arriving("09:10"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessError::Location(MatchError::NoMatchingLocation { .. })
        ));
    }
}
