pub mod cli;
pub mod db;
pub mod error;
pub mod metrics;
pub mod models;
pub mod monitor;
pub mod readings;
pub mod sensing;
pub mod session;
pub mod settings;
mod utils;

use clap::Parser;

pub use db::Database;
pub use error::MonitorError;
pub use monitor::{MonitorController, MonitorEvent};
pub use session::{SessionController, SessionRequest, StatusReport};
pub use settings::{MonitorSettings, SettingsStore};

pub async fn run() -> anyhow::Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    log::info!("moodwatch starting up...");

    cli::execute(cli::Cli::parse()).await
}
