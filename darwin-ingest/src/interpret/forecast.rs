//! Train status updates to forecast records.

use chrono::{DateTime, NaiveDate, Utc};

use crate::darwin::{ForecastLocation, PhaseForecast, TrainStatus};
use crate::domain::{TimeError, TrainTime, resolve};
use crate::store::{ForecastRecord, PhaseRecord, StopRecord};

/// Build the forecast record for one location of `status`, given the stop
/// it was matched to.
///
/// Each forecast time is resolved against the stop's scheduled time for the
/// same phase, so a forecast just after midnight for a stop scheduled just
/// before lands on the right day.
pub fn map_forecast_location(
    status: &TrainStatus,
    location: &ForecastLocation,
    stop: &StopRecord,
    message_id: &str,
) -> Result<ForecastRecord, TimeError> {
    let fallback = anchor(stop);
    let phase = |forecast: &Option<PhaseForecast>, scheduled: Option<DateTime<Utc>>| {
        forecast
            .as_ref()
            .map(|f| map_phase(f, scheduled.or(fallback), status.ssd))
            .transpose()
    };

    Ok(ForecastRecord {
        message_id: message_id.to_string(),
        rid: status.rid.clone(),
        stop_sequence: stop.sequence,
        tiploc: location.tiploc,
        arrival: phase(
            &location.arrival,
            stop.working_arrival.or(stop.public_arrival),
        )?,
        departure: phase(
            &location.departure,
            stop.working_departure.or(stop.public_departure),
        )?,
        passing: phase(&location.passing, stop.working_passing)?,
        platform: location.platform.clone(),
        suppressed: location.suppressed,
        length: location.length,
        detach_front: location.detach_front,
        late_reason: location
            .late_reason
            .clone()
            .or_else(|| status.late_reason.clone()),
        reverse_formation: status.reverse_formation,
    })
}

/// The first scheduled time of a stop, used when the phase itself has none.
fn anchor(stop: &StopRecord) -> Option<DateTime<Utc>> {
    stop.working_arrival
        .or(stop.public_arrival)
        .or(stop.working_passing)
        .or(stop.working_departure)
        .or(stop.public_departure)
}

fn map_phase(
    forecast: &PhaseForecast,
    scheduled: Option<DateTime<Utc>>,
    ssd: NaiveDate,
) -> Result<PhaseRecord, TimeError> {
    let at = |time: Option<TrainTime>| time.map(|t| resolve(scheduled, t, ssd)).transpose();

    Ok(PhaseRecord {
        estimated: at(forecast.estimated)?,
        working_estimated: at(forecast.working_estimated)?,
        actual: at(forecast.actual)?,
        estimated_minimum: at(forecast.estimated_minimum)?,
        actual_removed: forecast.actual_removed,
        unknown_delay: forecast.unknown_delay,
        delayed: forecast.delayed,
        source: forecast.source.clone(),
        source_instance: forecast.source_instance.clone(),
    })
}
