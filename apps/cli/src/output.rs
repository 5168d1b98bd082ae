//! Inventory rendering for stdout.

use serde::Serialize;
use steamshelf_steam::{InstallPath, InstalledApp, Inventory, LibraryFolder};

use crate::config::{Config, OutputFormat, SortOrder};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report<'a> {
    install_path: &'a InstallPath,
    libraries: &'a [LibraryFolder],
    apps: Vec<&'a InstalledApp>,
    skipped: Vec<String>,
}

/// Renders the inventory in the configured format.
pub fn render(inventory: &Inventory, config: &Config) -> anyhow::Result<String> {
    let apps = sorted_apps(&inventory.apps, config.sort);

    match config.output {
        OutputFormat::Json => {
            let report = Report {
                install_path: &inventory.install_path,
                libraries: &inventory.libraries,
                apps,
                skipped: inventory.skipped.iter().map(ToString::to_string).collect(),
            };
            let json = if config.pretty {
                serde_json::to_string_pretty(&report)?
            } else {
                serde_json::to_string(&report)?
            };
            Ok(json)
        }
        OutputFormat::Plain => Ok(apps
            .iter()
            .map(|app| {
                format!(
                    "{}\t{}\t{}\t{}",
                    app.app_id,
                    app.name,
                    app.state_flags,
                    app.install_path().display()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")),
    }
}

fn sorted_apps(apps: &[InstalledApp], order: SortOrder) -> Vec<&InstalledApp> {
    let mut apps: Vec<&InstalledApp> = apps.iter().collect();
    match order {
        SortOrder::None => {}
        SortOrder::AppId => apps.sort_by_key(|a| a.app_id),
        SortOrder::Name => apps.sort_by_cached_key(|a| a.name.to_lowercase()),
    }
    apps
}
