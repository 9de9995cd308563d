//! # DineHub Worker
//!
//! Runs the subscription sweeps for the DineHub billing engine:
//! - expires (or auto-renews) subscriptions whose window has lapsed
//! - reminds owners of subscriptions about to expire
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p dinehub-worker
//! ```

use dinehub_shared::billing::SubscriptionLifecycle;
use dinehub_shared::db::migrations::run_migrations;
use dinehub_shared::db::pool::{close_pool, create_pool, DatabaseConfig};
use dinehub_shared::notify::notifier_from_settings;
use dinehub_worker::config::Config;
use dinehub_worker::scheduler::SweepScheduler;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dinehub_worker=debug,dinehub_shared=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("DineHub Worker v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    let pool = create_pool(DatabaseConfig {
        max_connections: config.max_connections,
        ..DatabaseConfig::with_url(config.database_url.clone())
    })
    .await?;
    run_migrations(&pool).await?;

    let notifier = notifier_from_settings(
        config.notify_webhook_url.as_deref(),
        config.notify_webhook_secret.as_deref(),
    )?;

    let scheduler = SweepScheduler::new(
        SubscriptionLifecycle::new(pool.clone(), notifier),
        config.scheduler.clone(),
    );

    let token = scheduler.shutdown_token();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        tracing::info!("Shutdown signal received");
        token.cancel();
    });

    scheduler.run().await?;

    close_pool(pool).await;
    tracing::info!("Worker stopped");
    Ok(())
}
