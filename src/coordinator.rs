use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};

use crate::configuration::config::Config;
use crate::error::{NedEpexError, Result};
use crate::handlers::forecast::advisor::{advise, window_status};
use crate::handlers::forecast::aligner::{combine, floor_to_hour, restlast_by_hour};
use crate::handlers::forecast::calibrator::{calibrate, pair_samples};
use crate::handlers::forecast::forecaster::{closest_to, forecast_prices, price_stats};
use crate::handlers::history::reader::HistoryProvider;
use crate::handlers::ned::reader::NedClient;
use crate::models::forecast_models::{Calibration, ForecastReport, PriceModel};
use crate::models::ned_models::Classification;

// --------------------------------------------------------------------------------------------------------------

/// Runs one fetch → combine → calibrate → forecast → advise cycle per refresh and keeps
/// the price model and last report between cycles.
pub struct Coordinator {
    config:      Config,
    ned:         NedClient,
    history:     Box<dyn HistoryProvider>,
    model:       PriceModel,
    /// Residual spread of the fit behind `model`; None while the configured model is in use.
    model_rmse:  Option<f64>,
    calibration: Option<Calibration>,
    last_report: Option<ForecastReport>,
}

impl Coordinator {
    pub fn new(config: Config, ned: NedClient, history: Box<dyn HistoryProvider>) -> Self {
        let model = PriceModel::new(config.epex_multiplier, config.epex_offset);
        Self {
            config,
            ned,
            history,
            model,
            model_rmse:  None,
            calibration: None,
            last_report: None,
        }
    }

    pub fn model(&self) -> PriceModel {
        self.model
    }

    pub fn last_report(&self) -> Option<&ForecastReport> {
        self.last_report.as_ref()
    }

    pub async fn refresh(&mut self) -> Result<&ForecastReport> {
        self.refresh_at(Utc::now()).await
    }

    /// One full pipeline run as of `now`. Fetch failures propagate, calibration failures do not.
    pub async fn refresh_at(&mut self, now: DateTime<Utc>) -> Result<&ForecastReport> {
        let from = floor_to_hour(now);
        let to   = from + Duration::hours(i64::from(self.config.forecast_hours));

        let grid = self.ned.fetch_grid(Classification::Forecast, from, to).await?;
        if grid.is_empty() {
            return Err(NedEpexError::NoData(format!("NED returned an empty series for {} .. {}", from, to)));
        }

        let points = combine(&grid);
        if points.is_empty() {
            return Err(NedEpexError::NoData(format!(
                "no complete forecast hours between {} and {}", from, to
            )));
        }

        if self.calibration_due(now) {
            self.run_calibration(now).await;
        }

        let prices  = forecast_prices(&points, self.model, self.model_rmse, now);
        let advice  = advise(&prices, self.config.charge_window_hours, self.config.min_savings_percent, now);
        let status  = window_status(&advice, now);

        let report = ForecastReport {
            generated_at:        now,
            model:               self.model,
            calibration:         self.calibration.clone(),
            current_restlast_gw: closest_to(&points, now, |p| p.timestamp).map(|p| p.restlast_gw),
            current_price:       closest_to(&prices, now, |p| p.timestamp).map(|p| p.price),
            stats_24h:           price_stats(&prices, now, 24),
            window_status:       status,
            charge_advice:       advice,
            grid:                points,
            price_forecast:      prices,
        };

        info!(
            "[Coordinator] {} hours forecast, price now {:?}, advice={} status={:?}",
            report.price_forecast.len(),
            report.current_price.map(|p| (p * 100.0).round() / 100.0),
            report.charge_advice.advice.as_str(),
            report.window_status,
        );

        Ok(&*self.last_report.insert(report))
    }

    // ----------------------------------------------------------------------------------------------------------

    fn calibration_due(&self, now: DateTime<Utc>) -> bool {
        if !self.config.calibration_enabled() {
            return false;
        }
        match &self.calibration {
            None    => true,
            Some(c) => now - c.calibrated_at >= Duration::hours(i64::from(self.config.calibration_interval_hours)),
        }
    }

    /// Refit the price model on the last `calibration_days` of observed restlast and prices.
    /// Any failure is logged and the current model stays.
    async fn run_calibration(&mut self, now: DateTime<Utc>) {
        let entity_id = match &self.config.price_entity_id {
            Some(id) => id.clone(),
            None     => return,
        };
        let end   = floor_to_hour(now);
        let start = end - Duration::days(i64::from(self.config.calibration_days));

        info!("[Calibration] Refitting on {} from {} to {}", entity_id, start, end);

        let (history, actual) = futures::join!(
            self.history.fetch_history(&entity_id, start, end),
            self.ned.fetch_grid(Classification::Current, start, end),
        );

        let (prices, actual) = match (history, actual) {
            (Ok(prices), Ok(actual)) => (prices, actual),
            (Err(e), _) | (_, Err(e)) => {
                warn!("[Calibration] Skipped, could not load history: {}", e);
                // Retry next cycle only if the failure may go away by itself.
                if !e.is_transient() {
                    self.calibration = Some(Calibration {
                        calibrated_at: now,
                        accepted:      false,
                        samples:       0,
                        r_squared:     None,
                        rmse:          None,
                        model:         self.model,
                        reason:        Some(e.to_string()),
                    });
                }
                return;
            }
        };

        let restlast = restlast_by_hour(&combine(&actual));
        let pairs    = pair_samples(&restlast, &prices, end);
        debug!("[Calibration] {} price states, {} restlast hours, {} pairs", prices.len(), restlast.len(), pairs.len());

        let calibration = calibrate(&pairs, self.model, now);
        if calibration.accepted {
            self.model      = calibration.model;
            self.model_rmse = calibration.rmse;
        }
        self.calibration = Some(calibration);
    }

    // ----------------------------------------------------------------------------------------------------------

    /// Write the last report as pretty JSON, via a temp file so readers never see half a document.
    pub fn write_report(&self, path: impl AsRef<Path>) -> Result<()> {
        let report = self
            .last_report
            .as_ref()
            .ok_or_else(|| NedEpexError::NoData("no report to write yet".into()))?;

        let path = path.as_ref();
        let tmp  = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(report)?)?;
        std::fs::rename(&tmp, path)?;
        debug!("[Coordinator] Report written to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::forecast_models::Advice;
    use crate::models::ned_models::Sample;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use mockito::{Matcher, Mock, Server, ServerGuard};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 0, 20, 0).unwrap()
    }

    /// Canned recorder: price = 2 * restlast + 3 for every hour of the calibration window.
    struct FakeRecorder {
        prices: Vec<Sample>,
        calls:  Arc<AtomicUsize>,
    }

    #[async_trait]
    impl HistoryProvider for FakeRecorder {
        async fn fetch_history(&self, _entity_id: &str, _start: DateTime<Utc>, _end: DateTime<Utc>) -> Result<Vec<Sample>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.prices.clone())
        }
    }

    /// Hourly restlast used for both the forecast week and the past fortnight:
    /// consumption 10 GW minus renewables that cycle through 0..=8 GW.
    fn renewables_at(hour: i64) -> f64 {
        (hour.rem_euclid(9)) as f64
    }

    fn members(type_: &str, start: DateTime<Utc>, hours: i64) -> String {
        let records: Vec<_> = (0..hours)
            .map(|h| {
                let ts = start + Duration::hours(h);
                let kw = match type_ {
                    "59" => 10_000_000.0,
                    "1"  => renewables_at(h) * 1_000_000.0,
                    _    => 0.0,
                };
                json!({"validfrom": ts.to_rfc3339(), "capacity": kw})
            })
            .collect();
        json!({"hydra:member": records}).to_string()
    }

    /// Mocks are removed when dropped, so the caller holds on to them.
    async fn mock_ned(server: &mut ServerGuard, classification: &str, start: DateTime<Utc>, hours: i64) -> Vec<Mock> {
        let mut mocks = Vec::new();
        for type_ in ["1", "51", "2", "59"] {
            let mock = server
                .mock("GET", "/utilizations")
                .match_query(Matcher::AllOf(vec![
                    Matcher::UrlEncoded("type".into(), type_.into()),
                    Matcher::UrlEncoded("classification".into(), classification.into()),
                ]))
                .with_status(200)
                .with_body(members(type_, start, hours))
                .create_async()
                .await;
            mocks.push(mock);
        }
        mocks
    }

    fn config(server_url: String, calibrate: bool) -> Config {
        Config {
            ned_api_base:    server_url,
            ned_api_token:   "secret".into(),
            history_token:   "t".into(),
            price_entity_id: calibrate.then(|| "sensor.epex_price".to_string()),
            ..Config::default()
        }
    }

    fn coordinator(config: Config, prices: Vec<Sample>, calls: Arc<AtomicUsize>) -> Coordinator {
        let ned = NedClient::from_config(&config).unwrap().with_retry_delay(std::time::Duration::from_millis(10));
        Coordinator::new(config, ned, Box::new(FakeRecorder { prices, calls }))
    }

    #[tokio::test]
    async fn refresh_without_calibration_uses_configured_model() {
        let mut server = Server::new_async().await;
        let from = floor_to_hour(now());
        let _forecast = mock_ned(&mut server, "1", from, 168).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let mut coordinator = coordinator(config(server.url(), false), Vec::new(), calls.clone());
        let report = coordinator.refresh_at(now()).await.unwrap().clone();

        assert_eq!(report.grid.len(), 168);
        assert_eq!(report.price_forecast.len(), 168);
        assert_eq!(report.model, PriceModel::new(1.27, 1.5));
        assert!(report.calibration.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // first hour: restlast 10 - 0 = 10 GW
        assert_eq!(report.current_restlast_gw, Some(10.0));
        assert!((report.current_price.unwrap() - 14.2).abs() < 1e-9);
        assert_eq!(report.stats_24h.unwrap().hours, 24);
        assert_ne!(report.charge_advice.advice, Advice::NoData);
    }

    #[tokio::test]
    async fn refresh_recalibrates_once_per_interval() {
        let mut server = Server::new_async().await;
        let from = floor_to_hour(now());
        let history_start = from - Duration::days(14);
        let _forecast = mock_ned(&mut server, "1", from, 168).await;
        let _actual = mock_ned(&mut server, "2", history_start, 14 * 24).await;

        let prices: Vec<Sample> = (0..14 * 24)
            .map(|h| {
                let restlast = 10.0 - renewables_at(h);
                Sample::new(history_start + Duration::hours(h), 2.0 * restlast + 3.0)
            })
            .collect();

        let calls = Arc::new(AtomicUsize::new(0));
        let mut coordinator = coordinator(config(server.url(), true), prices, calls.clone());

        let report = coordinator.refresh_at(now()).await.unwrap().clone();
        let calibration = report.calibration.unwrap();
        assert!(calibration.accepted);
        assert!((report.model.multiplier - 2.0).abs() < 1e-6);
        assert!((report.model.offset - 3.0).abs() < 1e-6);
        assert!((report.current_price.unwrap() - 23.0).abs() < 1e-6);

        // an hour later: not due again
        coordinator.refresh_at(now() + Duration::hours(1)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_recorder_keeps_default_model() {
        struct BrokenRecorder;

        #[async_trait]
        impl HistoryProvider for BrokenRecorder {
            async fn fetch_history(&self, _: &str, _: DateTime<Utc>, _: DateTime<Utc>) -> Result<Vec<Sample>> {
                Err(NedEpexError::Auth { service: "recorder", status: 401 })
            }
        }

        let mut server = Server::new_async().await;
        let from = floor_to_hour(now());
        let _forecast = mock_ned(&mut server, "1", from, 168).await;
        let _actual = mock_ned(&mut server, "2", from - Duration::days(14), 14 * 24).await;

        let config = config(server.url(), true);
        let ned = NedClient::from_config(&config).unwrap();
        let mut coordinator = Coordinator::new(config, ned, Box::new(BrokenRecorder));

        let report = coordinator.refresh_at(now()).await.unwrap();
        assert_eq!(report.model, PriceModel::new(1.27, 1.5));
        let calibration = report.calibration.as_ref().unwrap();
        assert!(!calibration.accepted);
        assert!(calibration.reason.as_ref().unwrap().contains("recorder"));
    }

    #[tokio::test]
    async fn auth_failure_aborts_refresh() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/utilizations")
            .match_query(Matcher::Any)
            .with_status(403)
            .create_async()
            .await;

        let mut coordinator = coordinator(config(server.url(), false), Vec::new(), Arc::new(AtomicUsize::new(0)));
        let result = coordinator.refresh_at(now()).await;

        assert!(matches!(result, Err(NedEpexError::Auth { status: 403, .. })));
        assert!(coordinator.last_report().is_none());
    }

    #[tokio::test]
    async fn report_is_written_as_json() {
        let mut server = Server::new_async().await;
        let _forecast = mock_ned(&mut server, "1", floor_to_hour(now()), 48).await;

        let mut config = config(server.url(), false);
        config.forecast_hours = 48;
        let mut coordinator = coordinator(config, Vec::new(), Arc::new(AtomicUsize::new(0)));

        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("ned_epex_forecast.json");
        assert!(coordinator.write_report(&path).is_err());
        assert!(!path.exists());

        coordinator.refresh_at(now()).await.unwrap();
        coordinator.write_report(&path).unwrap();

        let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["price_forecast"].as_array().unwrap().len(), 48);
        assert!(written["charge_advice"]["advice"].is_string());
        assert!(!path.with_extension("json.tmp").exists());
    }

    /// Hands out one canned answer per call, then empty history.
    struct ScriptedRecorder {
        answers: std::sync::Mutex<Vec<Result<Vec<Sample>>>>,
        calls:   Arc<AtomicUsize>,
    }

    #[async_trait]
    impl HistoryProvider for ScriptedRecorder {
        async fn fetch_history(&self, _: &str, _: DateTime<Utc>, _: DateTime<Utc>) -> Result<Vec<Sample>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut answers = self.answers.lock().unwrap();
            if answers.is_empty() {
                Ok(Vec::new())
            } else {
                answers.remove(0)
            }
        }
    }

    /// Prices that follow the restlast of the mocked history, with +-0.5 noise.
    fn noisy_prices(history_start: DateTime<Utc>) -> Vec<Sample> {
        (0..14 * 24)
            .map(|h| {
                let restlast = 10.0 - renewables_at(h);
                let noise    = if h % 2 == 0 { 0.5 } else { -0.5 };
                Sample::new(history_start + Duration::hours(h), 2.0 * restlast + 3.0 + noise)
            })
            .collect()
    }

    fn scripted(config: Config, answers: Vec<Result<Vec<Sample>>>, calls: Arc<AtomicUsize>) -> Coordinator {
        let ned = NedClient::from_config(&config).unwrap().with_retry_delay(std::time::Duration::from_millis(10));
        let recorder = ScriptedRecorder { answers: std::sync::Mutex::new(answers), calls };
        Coordinator::new(config, ned, Box::new(recorder))
    }

    #[tokio::test]
    async fn transient_history_failure_is_retried_next_cycle() {
        let mut server = Server::new_async().await;
        let from = floor_to_hour(now());
        let history_start = from - Duration::days(14);
        let _forecast = mock_ned(&mut server, "1", from, 168).await;
        let _actual = mock_ned(&mut server, "2", history_start, 14 * 24).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let answers = vec![
            Err(NedEpexError::Api { service: "recorder", status: 503, message: "starting".into() }),
            Ok(noisy_prices(history_start)),
        ];
        let mut coordinator = scripted(config(server.url(), true), answers, calls.clone());

        let report = coordinator.refresh_at(now()).await.unwrap();
        assert!(report.calibration.is_none());
        assert_eq!(report.model, PriceModel::new(1.27, 1.5));

        // half an hour later, well inside the calibration interval
        let report = coordinator.refresh_at(now() + Duration::minutes(30)).await.unwrap();
        assert!(report.calibration.as_ref().unwrap().accepted);
        assert!((report.model.multiplier - 2.0).abs() < 0.05);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejected_recalibration_keeps_the_accepted_band() {
        let mut server = Server::new_async().await;
        let from = floor_to_hour(now());
        let history_start = from - Duration::days(14);
        let _forecast = mock_ned(&mut server, "1", from, 168).await;
        let _actual = mock_ned(&mut server, "2", history_start, 14 * 24).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let answers = vec![Ok(noisy_prices(history_start)), Ok(Vec::new())];
        let mut coordinator = scripted(config(server.url(), true), answers, calls.clone());

        let first = coordinator.refresh_at(now()).await.unwrap().clone();
        let rmse  = first.calibration.as_ref().and_then(|c| c.rmse).unwrap();
        assert!((rmse - 0.5).abs() < 0.05);

        // next interval: the recorder has nothing, so the fit is rejected
        let later  = now() + Duration::hours(24);
        let second = coordinator.refresh_at(later).await.unwrap();
        assert!(!second.calibration.as_ref().unwrap().accepted);
        assert_eq!(second.model, first.model);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // same hour as the first forecast point: band is the accepted RMSE scaled by look-ahead
        let point = second.price_forecast.iter().find(|p| p.timestamp == from + Duration::hours(24)).unwrap();
        let hours_ahead = (point.timestamp - later).num_minutes() as f64 / 60.0;
        let expected = rmse * (1.0 + 0.15 * hours_ahead.max(0.0) / 24.0);
        assert!(((point.upper - point.price) - expected).abs() < 1e-9);
    }
}
