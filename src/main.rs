use std::time::Duration;

use anyhow::Context;
use learning_progress::config::{ServerConfig, load_environment};
use learning_progress::db::{clean_expired_sessions, run_migrations};
use learning_progress::init_rocket;
use learning_progress::telemetry::{init_tracing, shutdown_telemetry};
use rocket::fairing::AdHoc;
use rocket::tokio;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::{error, info};

const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    // Exporter settings may come from the env files, so load them first.
    let env_result = load_environment();
    init_tracing();
    if let Err(e) = env_result {
        error!("Failed to load environment: {:#}", e);
    }

    let config = ServerConfig::from_env();

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to SQLite database")?;

    run_migrations(&pool)
        .await
        .context("Database migration failed")?;
    info!("Migrations completed successfully");

    let pool_clone = pool.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool_clone).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired sessions: {}", e);
                }
            }

            tokio::time::sleep(SESSION_CLEANUP_INTERVAL).await;
        }
    });

    init_rocket(pool, config)
        .attach(AdHoc::on_shutdown("Telemetry shutdown", |_| {
            Box::pin(async { shutdown_telemetry() })
        }))
        .launch()
        .await
        .map_err(|e| anyhow::anyhow!("Rocket failed to launch: {}", e))?;

    Ok(())
}
