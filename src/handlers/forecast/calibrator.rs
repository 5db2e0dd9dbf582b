use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::handlers::forecast::aligner::hold_hourly;
use crate::models::forecast_models::{Calibration, LinearFit, PriceModel};
use crate::models::ned_models::Sample;

// --------------------------------------------------------------------------------------------------------------

/// Fewer paired hours than this and the fit is noise.
pub const MIN_CALIBRATION_SAMPLES: usize = 24;
/// The fit must explain at least this share of the price variance.
pub const MIN_R_SQUARED: f64 = 0.1;

// --------------------------------------------------------------------------------------------------------------

/// Pair hourly mean prices with the restlast of the same hour as (restlast_gw, price).
/// `prices` are recorder state changes, each one valid until the next or until `end`.
pub fn pair_samples(
    restlast_by_hour: &BTreeMap<DateTime<Utc>, f64>,
    prices: &[Sample],
    end: DateTime<Utc>,
) -> Vec<(f64, f64)> {
    hold_hourly(prices, end)
        .into_iter()
        .filter_map(|(hour, price)| restlast_by_hour.get(&hour).map(|restlast| (*restlast, price)))
        .collect()
}

/// Closed-form ordinary least squares of y on x.
/// Returns None for fewer than two points, constant x, or a non-finite result.
pub fn fit_linear(pairs: &[(f64, f64)]) -> Option<LinearFit> {
    if pairs.len() < 2 {
        return None;
    }

    let n      = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;

    let (sxx, sxy, syy) = pairs.iter().fold((0.0, 0.0, 0.0), |(sxx, sxy, syy), (x, y)| {
        let dx = x - mean_x;
        let dy = y - mean_y;
        (sxx + dx * dx, sxy + dx * dy, syy + dy * dy)
    });

    if sxx <= f64::EPSILON {
        return None;
    }

    let slope     = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let ss_res: f64 = pairs
        .iter()
        .map(|(x, y)| {
            let residual = y - (slope * x + intercept);
            residual * residual
        })
        .sum();

    // Constant prices: nothing to explain.
    let r_squared = if syy > f64::EPSILON { 1.0 - ss_res / syy } else { 0.0 };
    let rmse      = (ss_res / n).sqrt();

    if !(slope.is_finite() && intercept.is_finite() && r_squared.is_finite() && rmse.is_finite()) {
        return None;
    }

    Some(LinearFit { slope, intercept, r_squared, rmse, samples: pairs.len() })
}

/// Fit and gate. A rejected fit leaves `current` in place.
pub fn calibrate(pairs: &[(f64, f64)], current: PriceModel, now: DateTime<Utc>) -> Calibration {
    let rejected = |reason: String, r_squared: Option<f64>, rmse: Option<f64>| {
        warn!("[Calibration] Rejected: {}. Keeping multiplier={:.4} offset={:.4}", reason, current.multiplier, current.offset);
        Calibration {
            calibrated_at: now,
            accepted:      false,
            samples:       pairs.len(),
            r_squared,
            rmse,
            model:         current,
            reason:        Some(reason),
        }
    };

    if pairs.len() < MIN_CALIBRATION_SAMPLES {
        return rejected(
            format!("only {} paired hours, need {}", pairs.len(), MIN_CALIBRATION_SAMPLES),
            None,
            None,
        );
    }

    let fit = match fit_linear(pairs) {
        Some(fit) => fit,
        None      => return rejected("degenerate input (constant restlast)".to_string(), None, None),
    };

    if fit.r_squared <= MIN_R_SQUARED {
        return rejected(
            format!("R² {:.3} not above {:.2}", fit.r_squared, MIN_R_SQUARED),
            Some(fit.r_squared),
            Some(fit.rmse),
        );
    }

    let model = fit.model();
    info!(
        "[Calibration] Accepted: multiplier {:.4} → {:.4}, offset {:.4} → {:.4} (R²={:.3}, RMSE={:.3}, n={})",
        current.multiplier, model.multiplier, current.offset, model.offset, fit.r_squared, fit.rmse, fit.samples,
    );

    Calibration {
        calibrated_at: now,
        accepted:      true,
        samples:       fit.samples,
        r_squared:     Some(fit.r_squared),
        rmse:          Some(fit.rmse),
        model,
        reason:        None,
    }
}
