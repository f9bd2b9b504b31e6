pub mod cli;
pub mod core;
pub mod providers;

use anyhow::Result;
use chrono::NaiveDate;
use tracing::{debug, info};

use crate::core::config::AppConfig;
use crate::core::store::SeriesStore;
use crate::providers::seed;

/// Commands the application can run once parsing and logging are done.
pub enum AppCommand {
    Funds,
    Compare {
        series: Vec<String>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        rows: usize,
        json: bool,
    },
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("navlens starting...");

    let mut config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    config.apply_env_overrides();
    debug!("Loaded config: {config:#?}");

    let mut store = match &config.seed_file {
        Some(path) => SeriesStore::from_points(seed::load_nav_csv(path)?),
        None => SeriesStore::new(),
    };

    match command {
        AppCommand::Funds => cli::funds::run(&store),
        AppCommand::Compare {
            series,
            start,
            end,
            rows,
            json,
        } => cli::compare::run(&mut store, &config, &series, start, end, rows, json).await,
    }
}
