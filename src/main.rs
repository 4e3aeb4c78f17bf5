use std::process::ExitCode;
use std::time::Duration;

use beacon::analysis::HttpProvider;
use beacon::config::Config;
use beacon::db::AlertDb;
use beacon::push::HttpPush;
use beacon::scheduler::Scheduler;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Configuration problems are the one fatal error class: a scheduler with
    // no generator or push endpoint would tick forever doing nothing useful.
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let provider = match HttpProvider::new(&config.generator, config.generator_api_key()) {
        Ok(provider) => provider,
        Err(e) => {
            log::error!("Failed to build generator client: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let push = match HttpPush::new(&config.push) {
        Ok(push) => push,
        Err(e) => {
            log::error!("Failed to build push client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Eagerly open the store once so schema migrations (and their
    // pre-migration backup) happen at startup rather than mid-tick. A
    // failure here is not fatal; the loop retries every tick.
    match config.database_path {
        Some(ref path) => AlertDb::open_at(path.into()),
        None => AlertDb::open(),
    }
    .map(drop)
    .unwrap_or_else(|e| log::warn!("Alert store not available yet: {}", e));

    let scheduler = Scheduler::new(config, Box::new(provider), Box::new(push));
    scheduler.start();

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to wait for shutdown signal: {}", e);
    }
    log::info!("Shutdown signal received");
    scheduler.stop(Duration::from_secs(10));

    ExitCode::SUCCESS
}
