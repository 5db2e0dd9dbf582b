use serde::Deserialize;
use std::fs;

use crate::error::{NedEpexError, Result};

// --------------------------------------------------------------------------------------------------------------

/// Environment variable that overrides the default config file location.
pub const CONFIG_PATH_ENV: &str = "NED_EPEX_CONFIG";
const DEFAULT_CONFIG_FILE:  &str = "config.json";
/// Upper bound on the calibration look-back.
pub const MAX_CALIBRATION_DAYS: u32 = 60;

// --------------------------------------------------------------------------------------------------------------

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    // --- NED API ---

    /// NED open data API base, e.g. "https://api.ned.nl/v1"
    pub ned_api_base: String,
    /// Personal API key, sent as the X-AUTH-TOKEN header.
    pub ned_api_token: String,
    pub ned_timeout_seconds: u64,
    /// NED granularity code. 5 = hourly, 4 = 15 minutes, 3 = 10 minutes.
    pub granularity: u8,

    // --- scheduling ---

    /// Full pipeline cadence. NED forecasts refresh hourly.
    pub update_interval_seconds: u64,
    /// How far ahead to fetch and forecast (24..=168 hours).
    pub forecast_hours: u32,
    /// Length of the contiguous charging block we look for (1..=24 hours).
    pub charge_window_hours: u32,

    // --- price model ---

    /// Starting slope of price = multiplier * restlast_gw + offset.
    pub epex_multiplier: f64,
    pub epex_offset: f64,

    // --- calibration (history recorder) ---

    /// Recorder base URL, e.g. "http://homeassistant.local:8123"
    pub history_url: String,
    /// Long-lived bearer token for the recorder.
    pub history_token: String,
    /// Entity holding observed day-ahead prices. Calibration is disabled when unset.
    pub price_entity_id: Option<String>,
    pub calibration_days: u32,
    pub calibration_interval_hours: u32,

    // --- advice ---

    /// A later window must be at least this much cheaper (%) before we advise waiting.
    pub min_savings_percent: f64,

    // --- output ---

    /// Where the latest forecast report is written as JSON.
    pub output_path: String,

    // --- logging ---

    /// Log level: "Trace", "Debug", "Info", "Warn", "Error"
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // NED API
            ned_api_base:        "https://api.ned.nl/v1".to_string(),
            ned_api_token:       String::new(),
            ned_timeout_seconds: 30,
            granularity:         5,
            // scheduling
            update_interval_seconds: 3600,
            forecast_hours:          168,
            charge_window_hours:     4,
            // price model
            epex_multiplier: 1.27,
            epex_offset:     1.5,
            // calibration
            history_url:                "http://127.0.0.1:8123".to_string(),
            history_token:              String::new(),
            price_entity_id:            None,
            calibration_days:           14,
            calibration_interval_hours: 24,
            // advice
            min_savings_percent: 10.0,
            // output
            output_path: "ned_epex_forecast.json".to_string(),
            // logging
            log_level: "Info".to_string(),
        }
    }
}

impl Config {
    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.ned_api_token.trim().is_empty() {
            return Err(NedEpexError::Config("ned_api_token must be set".into()));
        }
        if !(24..=168).contains(&self.forecast_hours) {
            return Err(NedEpexError::Config(format!(
                "forecast_hours must be within 24..=168, got {}", self.forecast_hours
            )));
        }
        if !(1..=24).contains(&self.charge_window_hours) {
            return Err(NedEpexError::Config(format!(
                "charge_window_hours must be within 1..=24, got {}", self.charge_window_hours
            )));
        }
        if !(3..=5).contains(&self.granularity) {
            return Err(NedEpexError::Config(format!(
                "granularity must be 3 (10 min), 4 (15 min) or 5 (hourly), got {}", self.granularity
            )));
        }
        if self.update_interval_seconds == 0 || self.ned_timeout_seconds == 0 {
            return Err(NedEpexError::Config("intervals and timeouts must be positive".into()));
        }
        if !self.epex_multiplier.is_finite() || !self.epex_offset.is_finite() {
            return Err(NedEpexError::Config("epex_multiplier and epex_offset must be finite".into()));
        }
        if self.min_savings_percent < 0.0 {
            return Err(NedEpexError::Config("min_savings_percent must not be negative".into()));
        }
        if !(1..=MAX_CALIBRATION_DAYS).contains(&self.calibration_days) {
            return Err(NedEpexError::Config(format!(
                "calibration_days must be within 1..={}, got {}", MAX_CALIBRATION_DAYS, self.calibration_days
            )));
        }
        if self.price_entity_id.is_some() {
            if self.calibration_interval_hours == 0 {
                return Err(NedEpexError::Config("calibration_interval_hours must be positive".into()));
            }
            if self.history_token.trim().is_empty() {
                return Err(NedEpexError::Config(
                    "history_token is required when price_entity_id is set".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn calibration_enabled(&self) -> bool {
        self.price_entity_id.is_some()
    }
}

// --------------------------------------------------------------------------------------------------------------

pub fn parse_config(json: &str) -> Result<Config> {
    let config: Config = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
}

pub fn load_config() -> Result<Config> {
    let config_file = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    let config_data = fs::read_to_string(&config_file).map_err(|e| {
        NedEpexError::Config(format!("Failed to read configuration file '{}': {}", config_file, e))
    })?;
    parse_config(&config_data)
}
