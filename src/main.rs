// SPDX-License-Identifier: GPL-3.0-only

use anyhow::Context;
use brightify::{BrightnessCoordinator, Config};

#[macro_use]
extern crate tracing;

fn setup_logs() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

    let fmt_layer = fmt::layer().with_target(false);
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new(format!(
        "warn,{}=info",
        env!("CARGO_CRATE_NAME")
    )));

    let subscriber = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(tracing_journald::layer().ok());

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("can't install log subscriber: {}", e);
        return;
    }
    // rusb and serialport log through the `log` facade
    if let Err(e) = tracing_log::LogTracer::init() {
        warn!("can't forward log records: {}", e);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logs();

    let path = Config::default_path().context("no user config directory")?;
    let config = Config::load(&path);
    let coordinator = BrightnessCoordinator::with_system(config);

    let monitors = coordinator.rescan().await;
    if monitors.is_empty() {
        warn!("No controllable monitors found");
    }

    for monitor in &monitors {
        info!(
            display_id = %monitor.id,
            brightness = ?monitor.brightness,
            "{} via {} is {:?}",
            monitor.name.as_deref().unwrap_or("Unknown"),
            monitor.transport,
            monitor.health
        );
        if coordinator.config().is_auto_enabled(&monitor.id) {
            if let Err(e) = coordinator.enable_auto(&monitor.id).await {
                warn!(display_id = %monitor.id, "can't enable auto brightness: {}", e);
            }
        }
    }

    if let Err(e) = coordinator.start_engine().await {
        error!("can't start auto brightness: {}", e);
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for ctrl-c")?;

    info!("Shutting down");
    coordinator.shutdown().await;
    Ok(())
}
