mod bootstrap;
mod health;

use std::time::Duration;

use anyhow::Result;
use reimburse_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use reimburse_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // logging needs the loaded config, so config errors surface on stderr only
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
        app.intake.clone(),
    )
    .await?;

    let policy = app.workflow.policy();
    tracing::info!(
        event_name = "system.server.started",
        approval_threshold = policy.approval_threshold,
        queue_capacity = app.intake.capacity(),
        requeued = app.startup_requeue.enqueued,
        "reimburse-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(event_name = "system.server.stopping", "reimburse-server stopping");

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, app.shutdown()).await {
        Ok(summary) => tracing::info!(
            event_name = "system.server.stopped",
            processed = summary.processed,
            succeeded = summary.succeeded,
            abandoned = summary.abandoned,
            dropped_on_stop = summary.dropped_on_stop,
            "settlement worker drained"
        ),
        Err(_) => tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            grace_secs = grace.as_secs(),
            "in-flight settlement did not finish before the shutdown deadline"
        ),
    }

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
