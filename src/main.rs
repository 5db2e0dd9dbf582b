use std::time::Instant;
use log::LevelFilter;
use tokio::time::{sleep, Duration};

// --------------------------------------------------------------------------------------------------------------

mod configuration;
use configuration::config::load_config;

mod error;
mod models;

mod handlers;
use handlers::history::reader::RecorderClient;
use handlers::ned::reader::NedClient;

mod coordinator;
use coordinator::Coordinator;

// --------------------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let config = match load_config() {
        Ok(c)  => c,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    // Initialise logger.
    if let Err(e) = env_logger::Builder::new()
        .filter_level(config.log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info))
        .try_init()
    {
        eprintln!("Failed to initialise logger: {}", e);
        std::process::exit(1);
    }

    log::info!("=== NED EPEX Forecast starting ===");
    log::info!("NED API:       {}", config.ned_api_base);
    log::info!("Forecast:      {} h, charge window {} h", config.forecast_hours, config.charge_window_hours);
    log::info!("Price model:   {:.4} * restlast + {:.4}", config.epex_multiplier, config.epex_offset);
    match &config.price_entity_id {
        Some(entity) => log::info!(
            "Calibration:   {} via {}, {} days every {} h",
            entity, config.history_url, config.calibration_days, config.calibration_interval_hours
        ),
        None => log::info!("Calibration:   disabled (no price_entity_id)"),
    }
    log::info!("Update interval: {}s", config.update_interval_seconds);

    let (ned, recorder) = match (NedClient::from_config(&config), RecorderClient::from_config(&config)) {
        (Ok(ned), Ok(recorder)) => (ned, recorder),
        (Err(e), _) | (_, Err(e)) => {
            log::error!("Cannot build HTTP clients: {}", e);
            std::process::exit(1);
        }
    };

    // A rejected token will not fix itself; anything else we retry in the loop.
    match ned.validate_token(chrono::Utc::now()).await {
        Ok(_) => {}
        Err(e) if e.is_transient() => log::warn!("[NED] Token check inconclusive: {}", e),
        Err(e) => {
            log::error!("[NED] Token check failed: {}", e);
            std::process::exit(1);
        }
    }

    let output_path = config.output_path.clone();
    let interval    = Duration::from_secs(config.update_interval_seconds);
    let mut coordinator = Coordinator::new(config, ned, Box::new(recorder));

    // ----------------------------------------------------------------------------------------------------------
    // Fixed-interval loop: fetch → combine → calibrate → forecast → advise → write report → sleep.
    // A failed cycle leaves the previous report file in place.
    loop {
        let cycle_start = Instant::now();

        match coordinator.refresh().await {
            Ok(report) => {
                if let Some(stats) = &report.stats_24h {
                    log::info!(
                        "[EPEX] next {}h: min={:.2} avg={:.2} max={:.2}",
                        stats.hours, stats.min, stats.avg, stats.max,
                    );
                }
                if let Err(e) = coordinator.write_report(&output_path) {
                    log::error!("[Coordinator] Could not write {}: {}", output_path, e);
                }
            }
            Err(e) => {
                if e.is_transient() {
                    log::warn!("[Coordinator] Refresh failed, retrying next cycle: {}", e);
                } else {
                    log::error!("[Coordinator] Refresh failed: {}", e);
                }
                if let Some(last) = coordinator.last_report() {
                    log::info!("[Coordinator] Keeping report from {}", last.generated_at);
                }
            }
        }

        let model = coordinator.model();
        log::debug!("[Coordinator] Model in use: {:.4} * restlast + {:.4}", model.multiplier, model.offset);

        // Sleep for whatever time remains in the interval.
        let elapsed = cycle_start.elapsed();
        if elapsed < interval {
            let remaining = interval - elapsed;
            log::info!("[Coordinator] Cycle done in {:?}. Sleeping {:?}.", elapsed, remaining);
            sleep(remaining).await;
        } else {
            log::warn!(
                "[Coordinator] Cycle took {:?}, overran interval {:?} - skipping sleep.",
                elapsed, interval
            );
        }
    }
}
