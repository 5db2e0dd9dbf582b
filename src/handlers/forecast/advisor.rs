use chrono::{DateTime, Duration, Utc};
use log::{debug, info};

use crate::handlers::forecast::aligner::floor_to_hour;
use crate::models::forecast_models::{Advice, ChargeAdvice, ChargeWindow, Horizon, PricePoint, WindowStatus};

// --------------------------------------------------------------------------------------------------------------

/// Start index and mean price of the cheapest run of `hours` time-contiguous points.
/// Ties go to the earliest run. `prices` must be sorted by timestamp without duplicates.
pub fn cheapest_window(prices: &[PricePoint], hours: usize) -> Option<(usize, f64)> {
    if hours == 0 || prices.len() < hours {
        return None;
    }

    let span = Duration::hours(hours as i64 - 1);
    let mut best: Option<(usize, f64)> = None;

    for (start, run) in prices.windows(hours).enumerate() {
        // Sorted and unique, so first-to-last spanning exactly hours-1 means no gaps.
        if run[hours - 1].timestamp - run[0].timestamp != span {
            continue;
        }
        let mean = run.iter().map(|p| p.price).sum::<f64>() / hours as f64;
        match best {
            Some((_, best_mean)) if mean >= best_mean => {}
            _ => best = Some((start, mean)),
        }
    }

    best
}

/// Points whose hour falls inside the horizon, relative to the current hour.
fn horizon_slice(prices: &[PricePoint], horizon: Horizon, now: DateTime<Utc>) -> &[PricePoint] {
    let origin     = floor_to_hour(now);
    let (from, to) = horizon.hour_range();
    let start      = origin + Duration::hours(from);
    let end        = origin + Duration::hours(to);

    let first = prices.partition_point(|p| p.timestamp < start);
    let last  = prices.partition_point(|p| p.timestamp < end);
    &prices[first..last.max(first)]
}

/// Cheapest window of `hours` that starts and ends inside `horizon`.
pub fn best_window(prices: &[PricePoint], hours: u32, horizon: Horizon, now: DateTime<Utc>) -> Option<ChargeWindow> {
    let slice = horizon_slice(prices, horizon, now);
    let (start, mean) = cheapest_window(slice, hours as usize)?;
    let run = &slice[start..start + hours as usize];

    Some(ChargeWindow {
        horizon,
        start:          run[0].timestamp,
        end:            run[0].timestamp + Duration::hours(i64::from(hours)),
        duration_hours: hours,
        average_price:  mean,
        average_upper:  run.iter().map(|p| p.upper).sum::<f64>() / run.len() as f64,
        prices:         run.iter().map(|p| p.price).collect(),
    })
}

// --------------------------------------------------------------------------------------------------------------

/// Compare the cheapest window of each horizon and decide whether to charge soon or wait.
///
/// A later horizon only wins when it beats the near window by at least `min_savings_percent`.
/// If that later window's upper band still reaches the near window's mean price the
/// forecast is too vague to justify waiting, and the advice becomes `Uncertain`.
pub fn advise(prices: &[PricePoint], hours: u32, min_savings_percent: f64, now: DateTime<Utc>) -> ChargeAdvice {
    let near = match best_window(prices, hours, Horizon::Near, now) {
        Some(window) => window,
        None => {
            info!("[Advice] Not enough forecast hours for a {} h window", hours);
            return ChargeAdvice::no_data();
        }
    };
    let mid = best_window(prices, hours, Horizon::Mid, now);
    let far = best_window(prices, hours, Horizon::Far, now);

    let baseline  = near.average_price;
    let threshold = baseline.abs() * min_savings_percent / 100.0;

    let worth_waiting = |w: &&ChargeWindow| {
        let gain = near.average_price - w.average_price;
        gain > 0.0 && gain >= threshold
    };
    let candidate = [mid.as_ref(), far.as_ref()]
        .into_iter()
        .flatten()
        .filter(worth_waiting)
        .fold(None::<&ChargeWindow>, |best, w| match best {
            Some(b) if b.average_price <= w.average_price => Some(b),
            _ => Some(w),
        });

    let (advice, next_window) = match candidate {
        Some(later) if later.average_upper >= near.average_price => {
            debug!(
                "[Advice] {:?} window at {:.2} beats near {:.2}, but its upper band {:.2} overlaps",
                later.horizon, later.average_price, near.average_price, later.average_upper
            );
            (Advice::Uncertain, near.clone())
        }
        Some(later) => {
            let advice = match later.horizon {
                Horizon::Far => Advice::Wait4To7Days,
                _            => Advice::Wait2To3Days,
            };
            (advice, later.clone())
        }
        None => (Advice::ChargeNow, near.clone()),
    };

    // Zero whenever the advice stays with the near window.
    let savings         = baseline - next_window.average_price;
    let savings_percent = if baseline.abs() > f64::EPSILON { savings / baseline.abs() * 100.0 } else { 0.0 };

    info!(
        "[Advice] {} → {} .. {} avg {:.2} (near {:.2}, saves {:.2} / {:.1}%)",
        advice.as_str(),
        next_window.start.format("%a %d %H:%M"),
        next_window.end.format("%H:%M"),
        next_window.average_price,
        baseline,
        savings,
        savings_percent,
    );

    ChargeAdvice {
        advice,
        windows: [Some(near), mid, far].into_iter().flatten().collect(),
        next_window: Some(next_window),
        baseline_price: baseline,
        savings,
        savings_percent,
    }
}

/// Charging while inside the recommended window, waiting before it, nothing after or without one.
pub fn window_status(advice: &ChargeAdvice, now: DateTime<Utc>) -> WindowStatus {
    match &advice.next_window {
        Some(w) if w.start <= now && now < w.end => WindowStatus::Charging,
        Some(w) if now < w.start                 => WindowStatus::Waiting,
        _                                        => WindowStatus::NoWindow,
    }
}
