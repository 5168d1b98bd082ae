pub mod inventory;
pub mod library;
pub mod locator;
#[cfg(windows)]
mod locator_windows;
pub mod manifest;
pub mod vdf;

use std::path::PathBuf;

// Re-export primary types.
pub use inventory::{Inventory, InventoryService, Skipped, inventory_at};
pub use library::{CatalogFormatError, LibraryFolder, list_libraries, parse_library_folders};
pub use locator::{InstallLocationError, InstallLocator, InstallPath, OsKind, RegistrySource};
pub use manifest::{
    AppStateFlags, FailureReason, InstalledApp, ManifestFailure, ScanReport, load_manifest,
    scan_library,
};
pub use vdf::{ParseError, ParseErrorKind, Record, Value};

/// Errors for Steam discovery operations.
#[derive(Debug, thiserror::Error)]
pub enum SteamError {
    #[error(transparent)]
    InstallLocation(#[from] InstallLocationError),

    #[error("failed to read library index {}: {source}", .path.display())]
    CatalogRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid library index {}: {source}", .path.display())]
    CatalogFormat {
        path: PathBuf,
        source: CatalogFormatError,
    },

    #[error("failed to list {}: {source}", .path.display())]
    ScanRead {
        path: PathBuf,
        source: std::io::Error,
    },
}
