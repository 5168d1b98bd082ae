use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Registry keys under HKLM that may hold the Steam install path, in
/// lookup order. The first is the 32-bit compatibility view.
pub const REGISTRY_KEYS: &[&str] = &[r"SOFTWARE\WOW6432Node\Valve\Steam", r"SOFTWARE\Valve\Steam"];

/// Registry value holding the Steam install path.
pub const REGISTRY_VALUE: &str = "InstallPath";

/// File whose presence marks a Steam root on Linux.
pub const MARKER_FILE: &str = "steam.sh";

/// Operating system family, used to pick a lookup strategy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OsKind {
    Windows,
    Linux,
    Other(String),
}

impl OsKind {
    /// Returns the OS this binary was built for.
    pub fn current() -> Self {
        Self::from_name(std::env::consts::OS)
    }

    /// Maps a `std::env::consts::OS` style name to an `OsKind`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "windows" => OsKind::Windows,
            "linux" => OsKind::Linux,
            other => OsKind::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for OsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsKind::Windows => write!(f, "windows"),
            OsKind::Linux => write!(f, "linux"),
            OsKind::Other(name) => write!(f, "{name}"),
        }
    }
}

/// Absolute path of the Steam root directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct InstallPath(PathBuf);

impl InstallPath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Returns `<root>/steamapps`.
    pub fn steamapps_dir(&self) -> PathBuf {
        self.0.join("steamapps")
    }

    /// Returns `<root>/steamapps/libraryfolders.vdf`.
    pub fn library_folders_file(&self) -> PathBuf {
        self.steamapps_dir().join("libraryfolders.vdf")
    }
}

impl AsRef<Path> for InstallPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for InstallPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Read-only access to string values under `HKEY_LOCAL_MACHINE`.
pub trait RegistrySource {
    /// Returns `Ok(None)` when the key or the value does not exist.
    fn read_string(&self, subkey: &str, value: &str) -> io::Result<Option<String>>;
}

/// Failure of a single lookup strategy. Logged, then reduced to
/// [`InstallLocationError`].
#[derive(Debug, thiserror::Error)]
pub enum LocateError {
    #[error("InstallPath value not found")]
    InstallPathNotFound,

    #[error("registry access failed: {0}")]
    RegistryAccess(#[source] io::Error),

    #[error("unsupported platform: {0}")]
    Unsupported(OsKind),
}

/// Why the Steam install directory could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstallLocationError {
    #[error("steam lookup is not supported on {os}")]
    UnsupportedPlatform { os: OsKind },

    #[error("steam installation not found")]
    NotFound,

    #[error("steam install location could not be read")]
    AccessDenied,
}

impl From<LocateError> for InstallLocationError {
    fn from(e: LocateError) -> Self {
        match e {
            LocateError::InstallPathNotFound => InstallLocationError::NotFound,
            LocateError::RegistryAccess(_) => InstallLocationError::AccessDenied,
            LocateError::Unsupported(os) => InstallLocationError::UnsupportedPlatform { os },
        }
    }
}

/// How the install directory is looked up. Exactly one per platform.
pub enum Strategy {
    /// Query the registry for [`REGISTRY_VALUE`].
    Registry(Box<dyn RegistrySource + Send + Sync>),
    /// Probe directories in priority order for [`MARKER_FILE`].
    Probe(Vec<PathBuf>),
    Unsupported(OsKind),
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Registry(_) => f.write_str("Registry"),
            Strategy::Probe(candidates) => f.debug_tuple("Probe").field(candidates).finish(),
            Strategy::Unsupported(os) => f.debug_tuple("Unsupported").field(os).finish(),
        }
    }
}

/// Resolves the Steam root directory.
#[derive(Debug)]
pub struct InstallLocator {
    strategy: Strategy,
}

impl InstallLocator {
    /// Creates a locator for the OS this binary runs on.
    pub fn current() -> Self {
        Self::for_platform(OsKind::current())
    }

    /// Creates a locator with the default strategy for `os`.
    pub fn for_platform(os: OsKind) -> Self {
        let strategy = match os {
            OsKind::Windows => Strategy::Registry(system_registry()),
            OsKind::Linux => Strategy::Probe(default_candidates(home_dir().as_deref())),
            other => Strategy::Unsupported(other),
        };
        Self { strategy }
    }

    /// Creates a registry-backed locator over a custom source.
    pub fn with_registry(source: impl RegistrySource + Send + Sync + 'static) -> Self {
        Self {
            strategy: Strategy::Registry(Box::new(source)),
        }
    }

    /// Creates a probing locator over custom candidate directories.
    pub fn with_candidates<P: Into<PathBuf>>(candidates: impl IntoIterator<Item = P>) -> Self {
        Self {
            strategy: Strategy::Probe(candidates.into_iter().map(Into::into).collect()),
        }
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Resolves the install directory. Re-queried on every call.
    pub fn locate(&self) -> Result<InstallPath, InstallLocationError> {
        match self.try_locate() {
            Ok(path) => {
                tracing::info!(path = %path, "steam installation located");
                Ok(path)
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to locate steam installation");
                Err(e.into())
            }
        }
    }

    fn try_locate(&self) -> Result<InstallPath, LocateError> {
        match &self.strategy {
            Strategy::Registry(source) => query_registry(source.as_ref()),
            Strategy::Probe(candidates) => probe(candidates),
            Strategy::Unsupported(os) => Err(LocateError::Unsupported(os.clone())),
        }
    }
}

fn query_registry(source: &dyn RegistrySource) -> Result<InstallPath, LocateError> {
    for subkey in REGISTRY_KEYS {
        match source
            .read_string(subkey, REGISTRY_VALUE)
            .map_err(LocateError::RegistryAccess)?
        {
            Some(path) if !path.trim().is_empty() => return Ok(InstallPath::new(path)),
            _ => tracing::debug!(subkey, "no {REGISTRY_VALUE} under registry key"),
        }
    }
    Err(LocateError::InstallPathNotFound)
}

fn probe(candidates: &[PathBuf]) -> Result<InstallPath, LocateError> {
    for dir in candidates {
        if fs::metadata(dir.join(MARKER_FILE)).is_ok() {
            return Ok(InstallPath::new(dir.clone()));
        }
        tracing::debug!(candidate = %dir.display(), "no {MARKER_FILE} in candidate");
    }
    Err(LocateError::InstallPathNotFound)
}

/// Linux candidate directories in priority order.
pub fn default_candidates(home: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(home) = home {
        candidates.push(home.join(".steam").join("steam"));
        candidates.push(home.join(".local").join("share").join("Steam"));
    }
    candidates.push(PathBuf::from("/usr/lib/steam"));
    candidates.push(PathBuf::from("/usr/share/steam"));
    if let Some(home) = home {
        // Flatpak install.
        candidates.push(
            home.join(".var")
                .join("app")
                .join("com.valvesoftware.Steam")
                .join(".steam")
                .join("steam"),
        );
    }
    candidates
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}

#[cfg(windows)]
fn system_registry() -> Box<dyn RegistrySource + Send + Sync> {
    Box::new(crate::locator_windows::WindowsRegistry)
}

#[cfg(not(windows))]
fn system_registry() -> Box<dyn RegistrySource + Send + Sync> {
    Box::new(NoRegistry)
}

/// Stand-in when asked for the registry strategy on a host without one.
#[cfg(not(windows))]
struct NoRegistry;

#[cfg(not(windows))]
impl RegistrySource for NoRegistry {
    fn read_string(&self, _subkey: &str, _value: &str) -> io::Result<Option<String>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "registry not available on this host",
        ))
    }
}
