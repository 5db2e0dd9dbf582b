use chrono::{DateTime, Utc};
use serde::Serialize;

// --------------------------------------------------------------------------------------------------------------
// Pipeline models: combined grid hours, price model, forecast and charge advice.
// Everything here ends up in the JSON report the service writes each cycle.
// --------------------------------------------------------------------------------------------------------------

/// One aligned hour of the Dutch grid, all values in GW.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridPoint {
    pub timestamp:        DateTime<Utc>,
    pub wind_onshore_gw:  f64,
    pub wind_offshore_gw: f64,
    pub solar_gw:         f64,
    pub consumption_gw:   f64,
    /// consumption - (wind onshore + wind offshore + solar)
    pub restlast_gw:      f64,
}

impl GridPoint {
    pub fn new(
        timestamp: DateTime<Utc>,
        wind_onshore_gw: f64,
        wind_offshore_gw: f64,
        solar_gw: f64,
        consumption_gw: f64,
    ) -> Self {
        let renewables = wind_onshore_gw + wind_offshore_gw + solar_gw;
        Self {
            timestamp,
            wind_onshore_gw,
            wind_offshore_gw,
            solar_gw,
            consumption_gw,
            restlast_gw: consumption_gw - renewables,
        }
    }
}

// --------------------------------------------------------------------------------------------------------------

/// price = multiplier * restlast_gw + offset
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceModel {
    pub multiplier: f64,
    pub offset:     f64,
}

impl PriceModel {
    pub fn new(multiplier: f64, offset: f64) -> Self {
        Self { multiplier, offset }
    }

    pub fn apply(&self, restlast_gw: f64) -> f64 {
        self.multiplier * restlast_gw + self.offset
    }
}

/// Result of an ordinary least squares fit of price against restlast.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinearFit {
    pub slope:     f64,
    pub intercept: f64,
    pub r_squared: f64,
    /// Root mean square of the residuals, in price units.
    pub rmse:      f64,
    pub samples:   usize,
}

impl LinearFit {
    pub fn model(&self) -> PriceModel {
        PriceModel::new(self.slope, self.intercept)
    }
}

/// What happened at the last calibration attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Calibration {
    pub calibrated_at: DateTime<Utc>,
    pub accepted:      bool,
    pub samples:       usize,
    pub r_squared:     Option<f64>,
    pub rmse:          Option<f64>,
    /// Model in effect after this attempt (the previous one when rejected).
    pub model:         PriceModel,
    /// Why the fit was not used.
    pub reason:        Option<String>,
}

// --------------------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PricePoint {
    pub timestamp:   DateTime<Utc>,
    pub price:       f64,
    pub lower:       f64,
    pub upper:       f64,
    pub restlast_gw: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceStats {
    pub hours: usize,
    pub min:   f64,
    pub max:   f64,
    pub avg:   f64,
}

// --------------------------------------------------------------------------------------------------------------

/// Look-ahead buckets the advisor compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Horizon {
    /// Today and tomorrow: 0..48 h
    Near,
    /// 2-3 days out: 48..96 h
    Mid,
    /// 4-7 days out: 96..168 h
    Far,
}

impl Horizon {
    /// Start (inclusive) and end (exclusive) in hours from now.
    pub fn hour_range(&self) -> (i64, i64) {
        match self {
            Horizon::Near => (0, 48),
            Horizon::Mid  => (48, 96),
            Horizon::Far  => (96, 168),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargeWindow {
    pub horizon:        Horizon,
    pub start:          DateTime<Utc>,
    /// Exclusive: start + duration_hours.
    pub end:            DateTime<Utc>,
    pub duration_hours: u32,
    pub average_price:  f64,
    /// Mean of the upper uncertainty band over the window.
    pub average_upper:  f64,
    pub prices:         Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Advice {
    ChargeNow,
    #[serde(rename = "wait_2_3_days")]
    Wait2To3Days,
    #[serde(rename = "wait_4_7_days")]
    Wait4To7Days,
    Uncertain,
    NoData,
}

impl Advice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Advice::ChargeNow    => "charge_now",
            Advice::Wait2To3Days => "wait_2_3_days",
            Advice::Wait4To7Days => "wait_4_7_days",
            Advice::Uncertain    => "uncertain",
            Advice::NoData       => "no_data",
        }
    }
}

/// Where "now" sits relative to the next recommended window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    Charging,
    Waiting,
    NoWindow,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargeAdvice {
    pub advice:          Advice,
    /// Cheapest window per horizon, in horizon order.
    pub windows:         Vec<ChargeWindow>,
    /// The window the advice points at.
    pub next_window:     Option<ChargeWindow>,
    /// Mean price of the cheapest near window, what charging today or tomorrow costs.
    pub baseline_price:  f64,
    /// baseline_price minus the mean price of next_window. Zero unless the advice is to wait.
    pub savings:         f64,
    pub savings_percent: f64,
}

impl ChargeAdvice {
    pub fn no_data() -> Self {
        Self {
            advice:          Advice::NoData,
            windows:         Vec::new(),
            next_window:     None,
            baseline_price:  0.0,
            savings:         0.0,
            savings_percent: 0.0,
        }
    }
}

// --------------------------------------------------------------------------------------------------------------

/// Everything one refresh cycle produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastReport {
    pub generated_at:        DateTime<Utc>,
    pub model:               PriceModel,
    pub calibration:         Option<Calibration>,
    pub current_restlast_gw: Option<f64>,
    pub current_price:       Option<f64>,
    pub stats_24h:           Option<PriceStats>,
    pub window_status:       WindowStatus,
    pub charge_advice:       ChargeAdvice,
    pub grid:                Vec<GridPoint>,
    pub price_forecast:      Vec<PricePoint>,
}
