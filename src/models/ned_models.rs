use chrono::{DateTime, Utc};
use serde::Deserialize;

// --------------------------------------------------------------------------------------------------------------
// NED (Nationaal Energie Dashboard) open data API models
//
// Read:  GET /v1/utilizations?point=0&type=<t>&granularity=<g>&granularitytimezone=1
//            &classification=<c>&activity=<a>&validfrom[after]=<date>&validfrom[strictly_before]=<date>
//        Response: JSON-LD (hydra) collection, records under "hydra:member".
// --------------------------------------------------------------------------------------------------------------

/// Grid series we need for the residual load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    WindOnshore,
    Solar,
    WindOffshore,
    Consumption,
}

impl DataType {
    pub fn api_value(&self) -> u32 {
        match self {
            DataType::WindOnshore  => 1,
            DataType::Solar        => 2,
            DataType::WindOffshore => 51,
            DataType::Consumption  => 59,
        }
    }

    /// Consumption is booked under the consumption activity, everything else is production.
    pub fn activity(&self) -> Activity {
        match self {
            DataType::Consumption => Activity::Consumption,
            _                     => Activity::Production,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::WindOnshore  => "wind_onshore",
            DataType::Solar        => "solar",
            DataType::WindOffshore => "wind_offshore",
            DataType::Consumption  => "consumption",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Production,
    Consumption,
}

impl Activity {
    pub fn api_value(&self) -> u32 {
        match self {
            Activity::Production  => 1,
            Activity::Consumption => 2,
        }
    }
}

/// Forecast for the days ahead, Current for what actually happened (used for calibration).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Forecast,
    Current,
}

impl Classification {
    pub fn api_value(&self) -> u32 {
        match self {
            Classification::Forecast => 1,
            Classification::Current  => 2,
        }
    }
}

/// Timestamps are interpreted in CET by the API when this is set.
pub const GRANULARITY_TIMEZONE_CET: u32 = 1;

// --------------------------------------------------------------------------------------------------------------

/// One page of GET /utilizations.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct UtilizationPage {
    #[serde(rename = "hydra:member", default)]
    pub members: Vec<Utilization>,
    #[serde(rename = "hydra:view", default)]
    pub view: Option<HydraView>,
}

impl UtilizationPage {
    pub fn next_page(&self) -> Option<&str> {
        self.view.as_ref().and_then(|v| v.next.as_deref())
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct HydraView {
    #[serde(rename = "hydra:next")]
    pub next: Option<String>,
}

/// A single utilization record. `capacity` is the average power over the interval in kW.
#[derive(Deserialize, Debug, Clone)]
pub struct Utilization {
    pub validfrom: DateTime<Utc>,
    pub capacity:  f64,
}

// --------------------------------------------------------------------------------------------------------------

/// A timestamped value, already converted to the unit the pipeline works in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value:     f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// kW as reported by NED to GW as used by the price model.
pub fn kw_to_gw(kw: f64) -> f64 {
    kw / 1_000_000.0
}
