use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, trace};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use crate::configuration::config::Config;
use crate::error::{NedEpexError, Result};
use crate::models::ned_models::Sample;

// --------------------------------------------------------------------------------------------------------------

const SERVICE: &str = "recorder";

/// Source of historical sensor states. The recorder owns persistence; we only read.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Numeric states of `entity_id` between `start` and `end`, oldest first.
    async fn fetch_history(&self, entity_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Sample>>;
}

// --------------------------------------------------------------------------------------------------------------

/// One state row as returned by /api/history/period with minimal_response.
/// Only the first row carries entity_id/last_updated; the rest have state + last_changed.
#[derive(Deserialize, Debug, Clone)]
struct HistoryState {
    state:        String,
    last_changed: Option<DateTime<Utc>>,
    last_updated: Option<DateTime<Utc>>,
}

impl HistoryState {
    fn to_sample(&self) -> Option<Sample> {
        let value: f64 = self.state.trim().parse().ok().filter(|v: &f64| v.is_finite())?;
        let timestamp  = self.last_changed.or(self.last_updated)?;
        Some(Sample::new(timestamp, value))
    }
}

/// Home Assistant REST history client.
#[derive(Clone)]
pub struct RecorderClient {
    client:   Client,
    base_url: String,
    token:    String,
}

impl RecorderClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.history_url.as_str(),
            config.history_token.as_str(),
            Duration::from_secs(config.ned_timeout_seconds),
        )
    }

    fn history_url(&self, entity_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Url> {
        let start_str = start.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let end_str   = end.format("%Y-%m-%dT%H:%M:%SZ").to_string();

        Url::parse_with_params(
            &format!("{}/api/history/period/{}", self.base_url, start_str),
            &[
                ("filter_entity_id", entity_id),
                ("end_time",         end_str.as_str()),
                ("minimal_response", ""),
                ("no_attributes",    ""),
            ],
        )
        .map_err(|e| NedEpexError::Config(format!("Invalid history URL '{}': {}", self.base_url, e)))
    }
}

#[async_trait]
impl HistoryProvider for RecorderClient {
    async fn fetch_history(&self, entity_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Sample>> {
        let url = self.history_url(entity_id, start, end)?;
        debug!("[History] GET {}", url);

        let response = self.client.get(url).bearer_auth(&self.token).send().await?;
        let status   = response.status();

        match status {
            StatusCode::OK => {
                let body = response.text().await?;
                // One inner array per entity; we filtered on a single one.
                let history: Vec<Vec<HistoryState>> = serde_json::from_str(&body)?;
                let rows = history.into_iter().next().unwrap_or_default();

                let mut samples: Vec<Sample> = rows
                    .iter()
                    .filter_map(|row| {
                        let sample = row.to_sample();
                        if sample.is_none() {
                            trace!("[History] Skipping state '{}'", row.state);
                        }
                        sample
                    })
                    .collect();
                samples.sort_by_key(|s| s.timestamp);

                info!("[History] {} numeric state(s) for {} ({} rows)", samples.len(), entity_id, rows.len());
                Ok(samples)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                error!("[History] Recorder rejected our token (HTTP {})", status);
                Err(NedEpexError::Auth { service: SERVICE, status: status.as_u16() })
            }
            _ => {
                let message = response.text().await.unwrap_or_default();
                Err(NedEpexError::Api { service: SERVICE, status: status.as_u16(), message })
            }
        }
    }
}
