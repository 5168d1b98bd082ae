//! Installed-app inventory across every Steam library.

use std::path::PathBuf;

use crate::SteamError;
use crate::library::{LibraryFolder, list_libraries};
use crate::locator::{InstallLocator, InstallPath};
use crate::manifest::{InstalledApp, ManifestFailure, scan_library};

/// Something left out of an inventory, with the reason.
#[derive(Debug, thiserror::Error)]
pub enum Skipped {
    #[error("manifest {0}")]
    Manifest(#[from] ManifestFailure),

    #[error("library {}: {error}", .path.display())]
    Library {
        path: PathBuf,
        #[source]
        error: SteamError,
    },
}

/// Snapshot of everything installed, taken at call time.
#[derive(Debug)]
pub struct Inventory {
    pub install_path: InstallPath,
    pub libraries: Vec<LibraryFolder>,
    /// Apps in library order, then manifest order within a library.
    pub apps: Vec<InstalledApp>,
    pub skipped: Vec<Skipped>,
}

impl Inventory {
    /// Returns true if every library and manifest was read.
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Entry point for listing installed Steam apps.
#[derive(Debug)]
pub struct InventoryService {
    locator: InstallLocator,
}

impl InventoryService {
    /// Creates a service for the OS this binary runs on.
    pub fn new() -> Self {
        Self::with_locator(InstallLocator::current())
    }

    pub fn with_locator(locator: InstallLocator) -> Self {
        Self { locator }
    }

    /// Locates Steam and lists every installed app.
    ///
    /// Fails if Steam cannot be located or its library index cannot be
    /// read. Unreadable libraries and manifests are listed in
    /// [`Inventory::skipped`] instead.
    pub fn get_installed_apps(&self) -> Result<Inventory, SteamError> {
        let install_path = self.locator.locate()?;
        inventory_at(&install_path)
    }
}

impl Default for InventoryService {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the inventory for an already known Steam root.
pub fn inventory_at(install_path: &InstallPath) -> Result<Inventory, SteamError> {
    let libraries = list_libraries(install_path)?;

    let mut apps = Vec::new();
    let mut skipped = Vec::new();
    for library in &libraries {
        match scan_library(&library.path) {
            Ok(report) => {
                apps.extend(report.apps);
                skipped.extend(report.failures.into_iter().map(Skipped::Manifest));
            }
            Err(error) => {
                tracing::warn!(
                    library = %library.path.display(),
                    error = %error,
                    "skipping unreadable library"
                );
                skipped.push(Skipped::Library {
                    path: library.path.clone(),
                    error,
                });
            }
        }
    }

    tracing::info!(
        libraries = libraries.len(),
        apps = apps.len(),
        skipped = skipped.len(),
        "inventory complete"
    );

    Ok(Inventory {
        install_path: install_path.clone(),
        libraries,
        apps,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::InstallLocationError;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_library_index(root: &Path, libraries: &[&Path]) {
        let mut text = String::from("\"libraryfolders\"\n{\n");
        for (i, lib) in libraries.iter().enumerate() {
            let path = lib.to_string_lossy().replace('\\', "\\\\");
            text.push_str(&format!("\t\"{i}\"\n\t{{\n\t\t\"path\"\t\t\"{path}\"\n\t}}\n"));
        }
        text.push_str("}\n");
        fs::create_dir_all(root.join("steamapps")).unwrap();
        fs::write(root.join("steamapps").join("libraryfolders.vdf"), text).unwrap();
    }

    fn write_manifest(library: &Path, app_id: u32, name: &str) {
        let dir = library.join("steamapps");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(format!("appmanifest_{app_id}.acf")),
            format!("\"AppState\"\n{{\n\t\"appid\"\t\t\"{app_id}\"\n\t\"name\"\t\t\"{name}\"\n}}\n"),
        )
        .unwrap();
    }

    #[test]
    fn missing_library_is_skipped_not_fatal() {
        let root = TempDir::new().unwrap();
        let gone = root.path().join("unplugged");
        write_library_index(root.path(), &[root.path(), gone.as_path()]);
        write_manifest(root.path(), 10, "Alpha");

        let inventory = inventory_at(&InstallPath::new(root.path())).unwrap();
        assert_eq!(inventory.libraries.len(), 2);
        assert_eq!(inventory.apps.len(), 1);
        assert_eq!(inventory.skipped.len(), 1);
        assert!(!inventory.is_complete());
        assert!(matches!(
            &inventory.skipped[0],
            Skipped::Library { path, error: SteamError::ScanRead { .. } } if path == &gone
        ));
    }

    #[test]
    fn apps_follow_library_order() {
        let root = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write_library_index(root.path(), &[root.path(), second.path()]);
        write_manifest(second.path(), 1, "Second");
        write_manifest(root.path(), 2, "First");

        let inventory = inventory_at(&InstallPath::new(root.path())).unwrap();
        let names: Vec<&str> = inventory.apps.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["First", "Second"]);
        assert!(inventory.is_complete());
    }

    #[test]
    fn locate_failure_propagates() {
        let root = TempDir::new().unwrap();
        let service = InventoryService::with_locator(InstallLocator::with_candidates([root.path()]));
        let err = service.get_installed_apps().unwrap_err();
        assert!(matches!(
            err,
            SteamError::InstallLocation(InstallLocationError::NotFound)
        ));
    }

    #[test]
    fn catalog_failure_propagates() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("steam.sh"), b"").unwrap();
        let service = InventoryService::with_locator(InstallLocator::with_candidates([root.path()]));
        let err = service.get_installed_apps().unwrap_err();
        assert!(matches!(err, SteamError::CatalogRead { .. }));
    }
}
