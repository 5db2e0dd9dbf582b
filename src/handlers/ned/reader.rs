use std::time::Duration;

use chrono::{DateTime, Days, Utc};
use log::{debug, error, info, warn};
use reqwest::{Client, Response, StatusCode, Url};

use crate::configuration::config::Config;
use crate::error::{NedEpexError, Result};
use crate::models::ned_models::{
    kw_to_gw, Classification, DataType, Sample, UtilizationPage, GRANULARITY_TIMEZONE_CET,
};

// --------------------------------------------------------------------------------------------------------------

const SERVICE:        &str = "NED";
const AUTH_HEADER:    &str = "X-AUTH-TOKEN";
const ACCEPT_LD_JSON: &str = "application/ld+json";

/// A week of hourly data fits in one page; 15-minute data needs a few.
const ITEMS_PER_PAGE: u32   = 200;
const MAX_PAGES:      usize = 20;
const MAX_ATTEMPTS:   u32   = 3;

// --------------------------------------------------------------------------------------------------------------

/// The four series the residual load is built from, values in GW.
#[derive(Debug, Clone, Default)]
pub struct GridSeries {
    pub wind_onshore:  Vec<Sample>,
    pub wind_offshore: Vec<Sample>,
    pub solar:         Vec<Sample>,
    pub consumption:   Vec<Sample>,
}

impl GridSeries {
    pub fn is_empty(&self) -> bool {
        self.wind_onshore.is_empty()
            || self.wind_offshore.is_empty()
            || self.solar.is_empty()
            || self.consumption.is_empty()
    }
}

// --------------------------------------------------------------------------------------------------------------

#[derive(Clone)]
pub struct NedClient {
    client:      Client,
    base_url:    String,
    token:       String,
    granularity: u8,
    retry_delay: Duration,
}

impl NedClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, granularity: u8, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            granularity,
            retry_delay: Duration::from_millis(500),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.ned_api_base.as_str(),
            config.ned_api_token.as_str(),
            config.granularity,
            Duration::from_secs(config.ned_timeout_seconds),
        )
    }

    /// Backoff before the first retry; doubles on every further attempt.
    #[cfg(test)]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    // ----------------------------------------------------------------------------------------------------------

    /// Build the first-page URL for one series.
    /// The API filters on whole CET dates, so we ask for a day extra on both sides and trim locally.
    fn series_url(
        &self,
        data_type: DataType,
        classification: Classification,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Url> {
        let after  = from.date_naive().checked_sub_days(Days::new(1)).unwrap_or(from.date_naive());
        let before = to.date_naive().checked_add_days(Days::new(1)).unwrap_or(to.date_naive());

        let params = [
            ("point",                     "0".to_string()),
            ("type",                      data_type.api_value().to_string()),
            ("granularity",               self.granularity.to_string()),
            ("granularitytimezone",       GRANULARITY_TIMEZONE_CET.to_string()),
            ("classification",            classification.api_value().to_string()),
            ("activity",                  data_type.activity().api_value().to_string()),
            ("validfrom[after]",          after.format("%Y-%m-%d").to_string()),
            ("validfrom[strictly_before]", before.format("%Y-%m-%d").to_string()),
            ("itemsPerPage",              ITEMS_PER_PAGE.to_string()),
        ];

        Url::parse_with_params(&format!("{}/utilizations", self.base_url), &params)
            .map_err(|e| NedEpexError::Config(format!("Invalid NED API base '{}': {}", self.base_url, e)))
    }

    /// GET with exponential backoff on transport errors. HTTP error statuses are not retried here.
    async fn send_with_retry(&self, url: &Url) -> Result<Response> {
        let mut attempt = 0;
        let mut delay   = self.retry_delay;

        loop {
            attempt += 1;
            let result = self
                .client
                .get(url.clone())
                .header(AUTH_HEADER, &self.token)
                .header(reqwest::header::ACCEPT, ACCEPT_LD_JSON)
                .send()
                .await;

            match result {
                Ok(resp) => return Ok(resp),
                Err(e) if attempt >= MAX_ATTEMPTS => {
                    error!("[NED] Request failed after {} attempts: {}", attempt, e);
                    return Err(NedEpexError::Http(e));
                }
                Err(e) => {
                    warn!("[NED] Request failed (attempt {}/{}): {}. Retrying in {:?}", attempt, MAX_ATTEMPTS, e, delay);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    async fn get_page(&self, url: &Url) -> Result<UtilizationPage> {
        let response = self.send_with_retry(url).await?;
        let status   = response.status();

        match status {
            s if s.is_success() => {
                let body = response.text().await?;
                Ok(serde_json::from_str::<UtilizationPage>(&body)?)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                error!("[NED] API token rejected (HTTP {})", status);
                Err(NedEpexError::Auth { service: SERVICE, status: status.as_u16() })
            }
            _ => {
                let message = response.text().await.unwrap_or_default();
                Err(NedEpexError::Api { service: SERVICE, status: status.as_u16(), message })
            }
        }
    }

    // ----------------------------------------------------------------------------------------------------------

    /// Fetch one series for [from, to), following hydra pagination. Values are returned in GW, sorted by time.
    pub async fn fetch_series(
        &self,
        data_type: DataType,
        classification: Classification,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Sample>> {
        let first = self.series_url(data_type, classification, from, to)?;
        let mut url = Some(first.clone());
        let mut samples = Vec::new();
        let mut pages = 0;

        while let Some(current) = url.take() {
            let page = self.get_page(&current).await?;
            pages += 1;

            samples.extend(
                page.members
                    .iter()
                    .filter(|u| u.validfrom >= from && u.validfrom < to)
                    .map(|u| Sample::new(u.validfrom, kw_to_gw(u.capacity))),
            );

            match page.next_page() {
                Some(_) if pages >= MAX_PAGES => {
                    warn!("[NED] {} has more than {} pages, truncating", data_type.as_str(), MAX_PAGES);
                }
                Some(next) => {
                    url = Some(first.join(next).map_err(|e| NedEpexError::Api {
                        service: SERVICE,
                        status:  200,
                        message: format!("Bad hydra:next link '{}': {}", next, e),
                    })?);
                }
                None => {}
            }
        }

        samples.sort_by_key(|s| s.timestamp);
        debug!("[NED] {} = {} samples over {} page(s)", data_type.as_str(), samples.len(), pages);
        Ok(samples)
    }

    /// Fetch all four grid series concurrently. The first failure aborts the lot.
    pub async fn fetch_grid(
        &self,
        classification: Classification,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<GridSeries> {
        let (wind_onshore, wind_offshore, solar, consumption) = futures::try_join!(
            self.fetch_series(DataType::WindOnshore,  classification, from, to),
            self.fetch_series(DataType::WindOffshore, classification, from, to),
            self.fetch_series(DataType::Solar,        classification, from, to),
            self.fetch_series(DataType::Consumption,  classification, from, to),
        )?;

        info!(
            "[NED] {:?} {} → {}: onshore={} offshore={} solar={} consumption={}",
            classification,
            from.format("%Y-%m-%d %H:%M"),
            to.format("%Y-%m-%d %H:%M"),
            wind_onshore.len(),
            wind_offshore.len(),
            solar.len(),
            consumption.len(),
        );

        Ok(GridSeries { wind_onshore, wind_offshore, solar, consumption })
    }

    /// Check the token with a one-day wind onshore forecast request.
    /// An empty result still counts as a valid token; some keys only see a subset of series.
    pub async fn validate_token(&self, now: DateTime<Utc>) -> Result<usize> {
        let url  = self.series_url(DataType::WindOnshore, Classification::Forecast, now, now + chrono::Duration::hours(24))?;
        let page = self.get_page(&url).await?;

        if page.members.is_empty() {
            warn!("[NED] Token accepted but the check returned no records");
        } else {
            info!("[NED] Token accepted, check returned {} records", page.members.len());
        }
        Ok(page.members.len())
    }
}
