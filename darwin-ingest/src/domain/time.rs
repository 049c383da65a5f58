//! Train time handling for the Push Port feed.
//!
//! Darwin provides times as "HH:MM" or "HH:MM:SS" strings with no date. This
//! module parses them and resolves them into absolute instants, handling
//! services that cross midnight.

use chrono::{
    DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;
use std::fmt;

/// The civil timezone every Darwin time-of-day is expressed in.
pub const FEED_TIMEZONE: Tz = chrono_tz::Europe::London;

/// A candidate more than this far before the previous time has crossed
/// midnight forwards.
const FORWARD_ROLLOVER_HOURS: i64 = 6;

/// A candidate more than this far after the previous time has crossed
/// midnight backwards.
const BACKWARD_ROLLOVER_HOURS: i64 = 18;

/// Error returned when parsing or resolving an invalid time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid time: {reason}")]
pub struct TimeError {
    reason: &'static str,
}

impl TimeError {
    fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

/// A time of day as sent by Darwin, without a date.
///
/// Working times carry seconds ("10:24:30"), public times do not ("10:25").
/// The original precision is kept so the value displays as it was received.
///
/// # Examples
///
/// ```
/// use darwin_ingest::domain::TrainTime;
///
/// let t = TrainTime::parse("10:24:30").unwrap();
/// assert_eq!((t.hour(), t.minute(), t.second()), (10, 24, 30));
/// assert_eq!(t.to_string(), "10:24:30");
///
/// assert!(TrainTime::parse("10:24").is_ok());
/// assert!(TrainTime::parse("1024").is_err());
/// assert!(TrainTime::parse("24:00").is_err());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrainTime {
    hour: u8,
    minute: u8,
    second: u8,
    with_seconds: bool,
}

impl TrainTime {
    /// Parse a time from "HH:MM" or "HH:MM:SS".
    pub fn parse(s: &str) -> Result<Self, TimeError> {
        let bytes = s.as_bytes();

        let with_seconds = match bytes.len() {
            5 => false,
            8 => true,
            _ => return Err(TimeError::new("expected HH:MM or HH:MM:SS format")),
        };

        if bytes[2] != b':' || (with_seconds && bytes[5] != b':') {
            return Err(TimeError::new("expected colon separators"));
        }

        let hour =
            parse_two_digits(&bytes[0..2]).ok_or_else(|| TimeError::new("invalid hour digits"))?;
        if hour > 23 {
            return Err(TimeError::new("hour must be 0-23"));
        }

        let minute = parse_two_digits(&bytes[3..5])
            .ok_or_else(|| TimeError::new("invalid minute digits"))?;
        if minute > 59 {
            return Err(TimeError::new("minute must be 0-59"));
        }

        let second = if with_seconds {
            let second = parse_two_digits(&bytes[6..8])
                .ok_or_else(|| TimeError::new("invalid second digits"))?;
            if second > 59 {
                return Err(TimeError::new("second must be 0-59"));
            }
            second
        } else {
            0
        };

        Ok(Self {
            hour,
            minute,
            second,
            with_seconds,
        })
    }

    /// Returns the hour (0-23).
    pub fn hour(&self) -> u32 {
        self.hour.into()
    }

    /// Returns the minute (0-59).
    pub fn minute(&self) -> u32 {
        self.minute.into()
    }

    /// Returns the second (0-59); always 0 for "HH:MM" times.
    pub fn second(&self) -> u32 {
        self.second.into()
    }

    /// Converts to a NaiveTime.
    pub fn to_naive_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour(), self.minute(), self.second())
            .unwrap_or(NaiveTime::MIN)
    }

    /// Whether `instant`, viewed in the feed's timezone, falls in the same
    /// hour and minute as this time. Seconds are ignored.
    pub fn same_minute_as(&self, instant: DateTime<Utc>) -> bool {
        let local = instant.with_timezone(&FEED_TIMEZONE);
        local.hour() == self.hour() && local.minute() == self.minute()
    }
}

impl fmt::Debug for TrainTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrainTime({self})")
    }
}

impl fmt::Display for TrainTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)?;
        if self.with_seconds {
            write!(f, ":{:02}", self.second)?;
        }
        Ok(())
    }
}

/// Parse two ASCII digit bytes into a u8.
fn parse_two_digits(bytes: &[u8]) -> Option<u8> {
    if bytes.len() != 2 {
        return None;
    }
    let d1 = (bytes[0] as char).to_digit(10)?;
    let d2 = (bytes[1] as char).to_digit(10)?;
    Some((d1 * 10 + d2) as u8)
}

/// Place a time of day on a date in the feed's timezone.
///
/// Times falling in the spring-forward gap move one hour later; times in the
/// autumn overlap take the earlier instant.
fn localise(date: NaiveDate, time: TrainTime) -> Result<DateTime<Utc>, TimeError> {
    let naive = date.and_time(time.to_naive_time());

    match FEED_TIMEZONE.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => FEED_TIMEZONE
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| TimeError::new("time does not exist in the feed timezone")),
    }
}

/// Resolve a Darwin time of day into an absolute instant.
///
/// `nominal` is the date the time is assumed to fall on (normally the
/// schedule's start date). `previous` is the last instant resolved on the
/// same schedule, in chronological order. Relative to it, a candidate more
/// than 6 hours earlier has crossed midnight forwards and moves to the next
/// day; a candidate more than 18 hours later has crossed midnight backwards
/// and moves to the previous day. Both bounds are exclusive.
///
/// # Examples
///
/// ```
/// use darwin_ingest::domain::{TrainTime, resolve};
/// use chrono::NaiveDate;
///
/// let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
/// let late = resolve(None, TrainTime::parse("23:59").unwrap(), date).unwrap();
/// let after_midnight = resolve(Some(late), TrainTime::parse("00:05").unwrap(), date).unwrap();
///
/// assert_eq!(after_midnight.date_naive(), date.succ_opt().unwrap());
/// ```
pub fn resolve(
    previous: Option<DateTime<Utc>>,
    time: TrainTime,
    nominal: NaiveDate,
) -> Result<DateTime<Utc>, TimeError> {
    let candidate = localise(nominal, time)?;

    let Some(previous) = previous else {
        return Ok(candidate);
    };

    let delta = candidate.signed_duration_since(previous);

    if delta < -Duration::hours(FORWARD_ROLLOVER_HOURS) {
        let next = nominal
            .succ_opt()
            .ok_or_else(|| TimeError::new("date overflow"))?;
        localise(next, time)
    } else if delta > Duration::hours(BACKWARD_ROLLOVER_HOURS) {
        let prev = nominal
            .pred_opt()
            .ok_or_else(|| TimeError::new("date underflow"))?;
        localise(prev, time)
    } else {
        Ok(candidate)
    }
}

/// Walks the times of one schedule in chronological order, carrying the
/// previously resolved instant forward.
#[derive(Debug, Clone)]
pub struct TimeCursor {
    nominal: NaiveDate,
    previous: Option<DateTime<Utc>>,
}

impl TimeCursor {
    /// Start a walk on the given nominal date.
    pub fn new(nominal: NaiveDate) -> Self {
        Self {
            nominal,
            previous: None,
        }
    }

    /// Resolve the next time, if any. Absent times leave the cursor alone.
    pub fn advance(&mut self, time: Option<TrainTime>) -> Result<Option<DateTime<Utc>>, TimeError> {
        let Some(time) = time else {
            return Ok(None);
        };
        let resolved = resolve(self.previous, time, self.nominal)?;
        self.previous = Some(resolved);
        Ok(Some(resolved))
    }

    /// The last instant resolved.
    pub fn previous(&self) -> Option<DateTime<Utc>> {
        self.previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn tt(s: &str) -> TrainTime {
        TrainTime::parse(s).unwrap()
    }

    /// An instant on 15 January (GMT, so local == UTC).
    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, h, m, 0).unwrap()
    }

    #[test]
    fn parse_valid_times() {
        let t = tt("00:00");
        assert_eq!((t.hour(), t.minute(), t.second()), (0, 0, 0));

        let t = tt("23:59:30");
        assert_eq!((t.hour(), t.minute(), t.second()), (23, 59, 30));
    }

    #[test]
    fn parse_invalid_format() {
        assert!(TrainTime::parse("1430").is_err());
        assert!(TrainTime::parse("14:3").is_err());
        assert!(TrainTime::parse("14:300").is_err());
        assert!(TrainTime::parse("14-30").is_err());
        assert!(TrainTime::parse("14:30-00").is_err());
        assert!(TrainTime::parse("ab:cd").is_err());
        assert!(TrainTime::parse("").is_err());
    }

    #[test]
    fn parse_invalid_values() {
        assert!(TrainTime::parse("24:00").is_err());
        assert!(TrainTime::parse("12:60").is_err());
        assert!(TrainTime::parse("12:00:60").is_err());
    }

    #[test]
    fn display_keeps_precision() {
        assert_eq!(tt("09:05").to_string(), "09:05");
        assert_eq!(tt("09:05:30").to_string(), "09:05:30");
        assert_eq!(format!("{:?}", tt("09:05")), "TrainTime(09:05)");
    }

    #[test]
    fn same_minute_ignores_seconds() {
        assert!(tt("10:24:30").same_minute_as(at(15, 10, 24)));
        assert!(tt("10:24").same_minute_as(at(15, 10, 24) + Duration::seconds(45)));
        assert!(!tt("10:25").same_minute_as(at(15, 10, 24)));
    }

    #[test]
    fn same_minute_uses_local_time_in_summer() {
        // 09:24 UTC is 10:24 BST
        let instant = Utc.with_ymd_and_hms(2024, 7, 1, 9, 24, 0).unwrap();
        assert!(tt("10:24").same_minute_as(instant));
    }

    #[test]
    fn resolve_without_previous_is_candidate() {
        assert_eq!(resolve(None, tt("10:00"), date(2024, 1, 15)).unwrap(), at(15, 10, 0));
    }

    #[test]
    fn resolve_applies_summer_time() {
        let resolved = resolve(None, tt("10:00"), date(2024, 7, 1)).unwrap();
        assert_eq!(resolved, Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap());
    }

    #[test]
    fn resolve_crosses_midnight_forwards() {
        let d = date(2024, 1, 15);
        let first = resolve(Some(at(15, 23, 0)), tt("23:59"), d).unwrap();
        let second = resolve(Some(first), tt("00:05"), d).unwrap();

        assert_eq!(first, at(15, 23, 59));
        assert_eq!(second, at(16, 0, 5));
    }

    #[test]
    fn resolve_crosses_midnight_backwards() {
        // A service starting just after midnight on the 16th, asked about a
        // time on the evening before.
        let resolved = resolve(Some(at(16, 0, 30)), tt("23:45"), date(2024, 1, 16)).unwrap();
        assert_eq!(resolved, at(15, 23, 45));
    }

    #[test]
    fn forward_boundary() {
        let d = date(2024, 1, 15);
        let previous = at(15, 12, 0);

        // -5h59m: same day
        assert_eq!(resolve(Some(previous), tt("06:01"), d).unwrap(), at(15, 6, 1));
        // exactly -6h: same day
        assert_eq!(resolve(Some(previous), tt("06:00"), d).unwrap(), at(15, 6, 0));
        // -6h01m: next day
        assert_eq!(resolve(Some(previous), tt("05:59"), d).unwrap(), at(16, 5, 59));
    }

    #[test]
    fn backward_boundary() {
        let d = date(2024, 1, 15);
        let previous = at(15, 2, 0);

        // +17h59m: same day
        assert_eq!(resolve(Some(previous), tt("19:59"), d).unwrap(), at(15, 19, 59));
        // exactly +18h: same day
        assert_eq!(resolve(Some(previous), tt("20:00"), d).unwrap(), at(15, 20, 0));
        // +18h01m: previous day
        assert_eq!(resolve(Some(previous), tt("20:01"), d).unwrap(), at(14, 20, 1));
    }

    #[test]
    fn resolve_in_spring_gap_moves_forward() {
        // 01:30 does not exist on 31 March 2024 in London.
        let resolved = resolve(None, tt("01:30"), date(2024, 3, 31)).unwrap();
        assert_eq!(resolved, Utc.with_ymd_and_hms(2024, 3, 31, 1, 30, 0).unwrap());
    }

    #[test]
    fn resolve_in_autumn_overlap_takes_earlier() {
        // 01:30 happens twice on 27 October 2024; the BST one is 00:30 UTC.
        let resolved = resolve(None, tt("01:30"), date(2024, 10, 27)).unwrap();
        assert_eq!(resolved, Utc.with_ymd_and_hms(2024, 10, 27, 0, 30, 0).unwrap());
    }

    #[test]
    fn cursor_walks_overnight_schedule() {
        let mut cursor = TimeCursor::new(date(2024, 1, 15));

        let times = ["23:00", "23:30:30", "00:15", "01:00"];
        let resolved: Vec<_> = times
            .iter()
            .map(|t| cursor.advance(Some(tt(t))).unwrap().unwrap())
            .collect();

        assert_eq!(resolved[0].date_naive(), date(2024, 1, 15));
        assert_eq!(resolved[1].date_naive(), date(2024, 1, 15));
        assert_eq!(resolved[2].date_naive(), date(2024, 1, 16));
        assert_eq!(resolved[3].date_naive(), date(2024, 1, 16));
        assert_eq!(cursor.previous(), Some(resolved[3]));
    }

    #[test]
    fn cursor_skips_absent_times() {
        let mut cursor = TimeCursor::new(date(2024, 1, 15));
        cursor.advance(Some(tt("23:50"))).unwrap();

        assert_eq!(cursor.advance(None).unwrap(), None);
        assert_eq!(cursor.previous(), Some(at(15, 23, 50)));
    }
}
