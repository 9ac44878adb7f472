/*
blogbrief - polls a blog feed and posts a brief of every new article to a chat webhook.
Runs once and exits, or repeats on an interval with --interval-minutes.
*/

use anyhow::Result;
use clap::Parser;
use common::{init_db_pool, run_migrations, Config};
use std::path::PathBuf;
use tokio::select;
use tokio::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use blogbrief::processing::Pipeline;

#[derive(Parser, Debug)]
#[command(name = "blogbrief", about = "Summarize new blog posts into a chat webhook")]
struct Args {
    /// Path to a TOML config file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Poll every N minutes until Ctrl-C instead of running once
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    interval_minutes: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = load_config(args.config).await.map_err(|e| {
        error!("failed to load configuration: {:#}", e);
        e
    })?;

    let db_pool = init_db_pool(&config.database.path).await.map_err(|e| {
        error!(db_path = %config.database.path, "failed to initialize database pool: {:#}", e);
        e
    })?;
    run_migrations(&db_pool).await?;
    info!(db_path = %config.database.path, "state store ready");

    let pipeline = Pipeline::new(&config, db_pool)?;

    let Some(minutes) = args.interval_minutes else {
        pipeline.run_once().await.map_err(|e| {
            error!("run failed: {}", e);
            e
        })?;
        return Ok(());
    };

    info!(interval_minutes = minutes, feed = %config.feed.url, "starting poll loop");
    let mut interval = tokio::time::interval(Duration::from_secs(minutes * 60));
    loop {
        select! {
            _ = interval.tick() => {
                if let Err(e) = pipeline.run_once().await {
                    error!("run failed, retrying next interval: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    Ok(())
}

/// Defaults, then `blogbrief.default.toml` and the override file, then `.env` and the
/// process environment.
async fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let default_path = PathBuf::from("blogbrief.default.toml");

    let override_path = match config_path {
        Some(p) => {
            if !p.exists() {
                anyhow::bail!("Config file not found: {}", p.display());
            }
            Some(p)
        }
        None => Some(PathBuf::from("blogbrief.toml")).filter(|p| p.exists()),
    };

    let mut config = Config::load_with_defaults(
        Some(default_path.as_path()).filter(|p| p.exists()),
        override_path.as_deref(),
    )
    .await?;
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    dotenv::dotenv().ok();
    config.apply_env(|key| std::env::var(key).ok())?;
    Ok(config)
}
