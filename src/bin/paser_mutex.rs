//! Entry point for one process in the house/paser coordination group.
//! Parses configuration, wires up `tracing`, and runs the driver loop until
//! the watchdog fires or the process receives Ctrl-C.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use paser_mutex::config::{Args, Config};
use paser_mutex::driver;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_args(Args::parse())?;
    let terminate = Arc::new(AtomicBool::new(false));

    let ctrl_c_terminate = terminate.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_terminate.store(true, Ordering::Relaxed);
        }
    });

    driver::run(config, terminate).await
}
