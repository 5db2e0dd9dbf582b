use chrono::{DateTime, Duration, Utc};
use log::debug;

use crate::handlers::forecast::aligner::floor_to_hour;
use crate::models::forecast_models::{GridPoint, PriceModel, PricePoint, PriceStats};

// --------------------------------------------------------------------------------------------------------------

/// Relative widening of the band per day of look-ahead.
pub const UNCERTAINTY_GROWTH_PER_DAY: f64 = 0.15;
/// Band when no calibration residual is known yet, as a share of |price|.
pub const DEFAULT_RELATIVE_UNCERTAINTY: f64 = 0.15;
/// Lower bound on the uncalibrated band, in price units.
pub const MIN_UNCERTAINTY: f64 = 0.5;

// --------------------------------------------------------------------------------------------------------------

/// Apply the price model to every aligned hour.
/// `base_uncertainty` is the calibration RMSE when one was accepted.
pub fn forecast_prices(
    points: &[GridPoint],
    model: PriceModel,
    base_uncertainty: Option<f64>,
    now: DateTime<Utc>,
) -> Vec<PricePoint> {
    let prices: Vec<PricePoint> = points
        .iter()
        .map(|point| {
            let price       = model.apply(point.restlast_gw);
            let hours_ahead = ((point.timestamp - now).num_minutes() as f64 / 60.0).max(0.0);
            let base        = base_uncertainty
                .unwrap_or_else(|| (price.abs() * DEFAULT_RELATIVE_UNCERTAINTY).max(MIN_UNCERTAINTY));
            let half_width  = base * (1.0 + UNCERTAINTY_GROWTH_PER_DAY * hours_ahead / 24.0);

            PricePoint {
                timestamp:   point.timestamp,
                price,
                lower:       price - half_width,
                upper:       price + half_width,
                restlast_gw: point.restlast_gw,
            }
        })
        .collect();

    debug!("[Forecast] {} price points (multiplier={:.4}, offset={:.4})", prices.len(), model.multiplier, model.offset);
    prices
}

/// Min/max/avg over the next `hours`, starting with the current hour.
pub fn price_stats(prices: &[PricePoint], now: DateTime<Utc>, hours: i64) -> Option<PriceStats> {
    let start = floor_to_hour(now);
    let end   = start + Duration::hours(hours);
    let window: Vec<f64> = prices
        .iter()
        .filter(|p| p.timestamp >= start && p.timestamp < end)
        .map(|p| p.price)
        .collect();

    if window.is_empty() {
        return None;
    }

    Some(PriceStats {
        hours: window.len(),
        min:   window.iter().copied().fold(f64::INFINITY, f64::min),
        max:   window.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        avg:   window.iter().sum::<f64>() / window.len() as f64,
    })
}

/// The item whose timestamp is closest to `now`.
pub fn closest_to<T>(items: &[T], now: DateTime<Utc>, timestamp: impl Fn(&T) -> DateTime<Utc>) -> Option<&T> {
    items.iter().min_by_key(|item| (timestamp(item) - now).num_seconds().abs())
}
