use std::collections::BTreeMap;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use log::{debug, warn};

use crate::handlers::ned::reader::GridSeries;
use crate::models::forecast_models::GridPoint;
use crate::models::ned_models::Sample;

// --------------------------------------------------------------------------------------------------------------

pub fn floor_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::hours(1)).unwrap_or(ts)
}

/// Average samples per clock hour. Hourly input passes through unchanged,
/// 10/15-minute input collapses into one value per hour.
pub fn bucket_hourly(samples: &[Sample]) -> BTreeMap<DateTime<Utc>, f64> {
    let mut sums: BTreeMap<DateTime<Utc>, (f64, u32)> = BTreeMap::new();

    for sample in samples.iter().filter(|s| s.value.is_finite()) {
        let entry = sums.entry(floor_to_hour(sample.timestamp)).or_insert((0.0, 0));
        entry.0 += sample.value;
        entry.1 += 1;
    }

    sums.into_iter()
        .map(|(hour, (sum, count))| (hour, sum / f64::from(count)))
        .collect()
}

/// Hourly means of a state-change series where each state holds until the next change
/// and the last one until `end`. Each hour is weighted by how long every state was active in it.
/// `states` must be sorted by timestamp.
pub fn hold_hourly(states: &[Sample], end: DateTime<Utc>) -> BTreeMap<DateTime<Utc>, f64> {
    let states: Vec<&Sample> = states.iter().filter(|s| s.value.is_finite()).collect();
    let mut sums: BTreeMap<DateTime<Utc>, (f64, f64)> = BTreeMap::new();

    for (i, state) in states.iter().enumerate() {
        let until = states.get(i + 1).map_or(end, |next| next.timestamp).min(end);
        let mut from = state.timestamp;

        while from < until {
            let slice_end = (floor_to_hour(from) + TimeDelta::hours(1)).min(until);
            let seconds   = (slice_end - from).num_milliseconds() as f64 / 1000.0;
            let entry     = sums.entry(floor_to_hour(from)).or_insert((0.0, 0.0));
            entry.0 += state.value * seconds;
            entry.1 += seconds;
            from = slice_end;
        }
    }

    sums.into_iter()
        .filter(|(_, (_, seconds))| *seconds > 0.0)
        .map(|(hour, (weighted, seconds))| (hour, weighted / seconds))
        .collect()
}

/// Join the four bucketed series on hour and derive the residual load.
/// Hours where any component is missing are dropped.
pub fn combine(grid: &GridSeries) -> Vec<GridPoint> {
    let onshore     = bucket_hourly(&grid.wind_onshore);
    let offshore    = bucket_hourly(&grid.wind_offshore);
    let solar       = bucket_hourly(&grid.solar);
    let consumption = bucket_hourly(&grid.consumption);

    let points: Vec<GridPoint> = consumption
        .iter()
        .filter_map(|(hour, consumption_gw)| {
            Some(GridPoint::new(
                *hour,
                *onshore.get(hour)?,
                *offshore.get(hour)?,
                *solar.get(hour)?,
                *consumption_gw,
            ))
        })
        .collect();

    let dropped = consumption.len() - points.len();
    if dropped > 0 {
        warn!("[Align] Dropped {} hour(s) with incomplete generation data", dropped);
    }
    debug!("[Align] {} aligned hours", points.len());
    points
}

/// Restlast keyed by hour, the shape the calibrator pairs prices against.
pub fn restlast_by_hour(points: &[GridPoint]) -> BTreeMap<DateTime<Utc>, f64> {
    points.iter().map(|p| (p.timestamp, p.restlast_gw)).collect()
}
