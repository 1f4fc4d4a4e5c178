//! `multisite` binary
//!
//! Loads options from `multisite.toml`, `.env` and `MULTISITE_*` variables,
//! serves every tenant on one port and exits with status 0 when the
//! recycling policy asks for a restart.

use multisite::multisite_config::ENV_PREFIX;
use multisite::prelude::*;
use std::future::Future;
use tokio::sync::watch;
use tracing::{error, info};

const CONFIG_FILE: &str = "multisite.toml";

fn log_config(config: &ConfigService) -> Result<LogConfig, Box<dyn std::error::Error>> {
    let manager = config.manager();
    let level: LogLevel = manager.get_or("log_level", "info".to_string()).parse()?;
    let format: LogFormat = manager.get_or("log_format", "compact".to_string()).parse()?;
    Ok(LogConfig::new().level(level).format(format))
}

/// Resolves once the recycle signal is `true`; never if the sender is gone
async fn recycle_requested(mut recycle: watch::Receiver<bool>) {
    loop {
        let exit = *recycle.borrow_and_update();
        if exit {
            return;
        }
        if recycle.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Ctrl-C, or the recycle signal
fn shutdown_signal(recycle: watch::Receiver<bool>) -> impl Future<Output = ()> + Send {
    async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received ctrl-c"),
            _ = recycle_requested(recycle) => info!("request budget spent, recycling process"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigService::builder()
        .with_prefix(ENV_PREFIX)
        .add_optional_file(CONFIG_FILE, FileFormat::Toml)
        .load_dotenv(None)
        .load_env()
        .build()?;

    let _log_guard = log_config(&config)?.init()?;
    let options = config.options()?;
    let port = options.port;
    let drain_timeout = options.drain_timeout();

    let multisite = Arc::new(Multisite::from_options(options).await?);
    let server = Server::new(multisite.clone()).with_drain_timeout(drain_timeout);

    info!(port, "starting multisite");
    let served = server.listen(port, shutdown_signal(multisite.recycle_signal())).await;

    if let Err(e) = multisite.destroy().await {
        error!(error = %e, "shutdown was not clean");
    }
    served?;

    info!("multisite stopped");
    Ok(())
}
