//! steamshelf entry point: prints the installed Steam apps.

mod config;
mod output;

use anyhow::Context;
use steamshelf_steam::InventoryService;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let config = config::Config::load()?;

    // Logs go to stderr so stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting steamshelf");
    tracing::debug!(?config, "configuration loaded");

    let inventory = InventoryService::new()
        .get_installed_apps()
        .context("failed to list installed Steam apps")?;

    for skipped in &inventory.skipped {
        tracing::warn!("skipped {skipped}");
    }

    println!("{}", output::render(&inventory, &config)?);
    Ok(())
}
