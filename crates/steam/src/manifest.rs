//! App manifests (`steamapps/appmanifest_<appid>.acf`).
//!
//! Each manifest describes one installed app. A library scan collects
//! every manifest it can read; the ones it cannot are reported alongside
//! the results instead of failing the whole scan.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::SteamError;
use crate::vdf::{self, ParseError, Record, Value};

/// Substring that marks an app manifest file name.
pub const MANIFEST_MARKER: &str = "appmanifest_";

/// Top-level section of an app manifest.
pub const APP_STATE_KEY: &str = "AppState";

/// Deepest `AppState` section accepted, counting `AppState` itself.
/// Real manifests stay below five levels.
pub const MAX_APP_STATE_DEPTH: usize = 32;

/// The `StateFlags` bitmask of an app manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct AppStateFlags(u32);

impl AppStateFlags {
    pub const UNINSTALLED: u32 = 1;
    pub const UPDATE_REQUIRED: u32 = 1 << 1;
    pub const FULLY_INSTALLED: u32 = 1 << 2;
    pub const ENCRYPTED: u32 = 1 << 3;
    pub const LOCKED: u32 = 1 << 4;
    pub const FILES_MISSING: u32 = 1 << 5;
    pub const APP_RUNNING: u32 = 1 << 6;
    pub const FILES_CORRUPT: u32 = 1 << 7;
    pub const UPDATE_RUNNING: u32 = 1 << 8;
    pub const UPDATE_PAUSED: u32 = 1 << 9;
    pub const UPDATE_STARTED: u32 = 1 << 10;
    pub const UNINSTALLING: u32 = 1 << 11;
    pub const BACKUP_RUNNING: u32 = 1 << 12;
    pub const RECONFIGURING: u32 = 1 << 16;
    pub const VALIDATING: u32 = 1 << 17;
    pub const ADDING_FILES: u32 = 1 << 18;
    pub const PREALLOCATING: u32 = 1 << 19;
    pub const DOWNLOADING: u32 = 1 << 20;
    pub const STAGING: u32 = 1 << 21;
    pub const COMMITTING: u32 = 1 << 22;
    pub const UPDATE_STOPPING: u32 = 1 << 23;

    const NAMES: &'static [(u32, &'static str)] = &[
        (Self::UNINSTALLED, "Uninstalled"),
        (Self::UPDATE_REQUIRED, "UpdateRequired"),
        (Self::FULLY_INSTALLED, "FullyInstalled"),
        (Self::ENCRYPTED, "Encrypted"),
        (Self::LOCKED, "Locked"),
        (Self::FILES_MISSING, "FilesMissing"),
        (Self::APP_RUNNING, "AppRunning"),
        (Self::FILES_CORRUPT, "FilesCorrupt"),
        (Self::UPDATE_RUNNING, "UpdateRunning"),
        (Self::UPDATE_PAUSED, "UpdatePaused"),
        (Self::UPDATE_STARTED, "UpdateStarted"),
        (Self::UNINSTALLING, "Uninstalling"),
        (Self::BACKUP_RUNNING, "BackupRunning"),
        (Self::RECONFIGURING, "Reconfiguring"),
        (Self::VALIDATING, "Validating"),
        (Self::ADDING_FILES, "AddingFiles"),
        (Self::PREALLOCATING, "Preallocating"),
        (Self::DOWNLOADING, "Downloading"),
        (Self::STAGING, "Staging"),
        (Self::COMMITTING, "Committing"),
        (Self::UPDATE_STOPPING, "UpdateStopping"),
    ];

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every bit in `flags` is set.
    pub const fn contains(self, flags: u32) -> bool {
        self.0 & flags == flags
    }

    pub const fn is_fully_installed(self) -> bool {
        self.contains(Self::FULLY_INSTALLED)
    }

    pub const fn needs_update(self) -> bool {
        self.contains(Self::UPDATE_REQUIRED)
    }

    /// Names of the known flags that are set, lowest bit first.
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMES
            .iter()
            .filter(move |(bit, _)| self.0 & bit != 0)
            .map(|(_, name)| *name)
    }
}

impl fmt::Display for AppStateFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.names().collect();
        if names.is_empty() {
            write!(f, "Invalid")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// One installed app, as recorded by its manifest.
///
/// `installed_depots`, `user_config` and `mounted_config` are kept as raw
/// records; their layout differs between apps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledApp {
    pub app_id: u32,
    pub name: String,
    pub install_dir: String,

    pub state_flags: AppStateFlags,
    pub build_id: u64,
    pub last_updated: i64,
    pub last_played: i64,

    pub size_on_disk: i64,
    pub staging_size: i64,
    pub bytes_to_download: i64,
    pub bytes_downloaded: i64,
    pub bytes_to_stage: i64,
    pub bytes_staged: i64,

    pub universe: u32,
    pub launcher_path: String,
    pub last_owner: u64,
    pub update_result: i64,
    pub target_build_id: u64,
    pub auto_update_behavior: i64,
    pub allow_other_downloads_while_running: i64,
    pub scheduled_auto_update: i64,

    pub installed_depots: Record,
    pub user_config: Record,
    pub mounted_config: Record,

    /// Library root the manifest was found in.
    pub library_path: PathBuf,
    pub manifest_path: PathBuf,
}

impl InstalledApp {
    /// Builds an app from the `AppState` section of a manifest.
    ///
    /// `appid` is required. Everything else falls back to zero or empty.
    /// The sub-records are moved out of `state`, not copied.
    pub fn from_record(mut state: Record) -> Result<Self, FailureReason> {
        let app_id = state
            .get_u64("appid")
            .and_then(|id| u32::try_from(id).ok())
            .ok_or(FailureReason::InvalidAppId)?;

        let installed_depots = take_record(&mut state, "InstalledDepots");
        let user_config = take_record(&mut state, "UserConfig");
        let mounted_config = take_record(&mut state, "MountedConfig");

        let string = |key: &str| state.get_str(key).unwrap_or_default().to_owned();
        let int = |key: &str| state.get_i64(key).unwrap_or(0);
        let uint = |key: &str| state.get_u64(key).unwrap_or(0);

        Ok(Self {
            app_id,
            name: string("name"),
            install_dir: string("installdir"),
            state_flags: AppStateFlags::from_bits(
                u32::try_from(uint("StateFlags")).unwrap_or_default(),
            ),
            build_id: uint("buildid"),
            last_updated: int("LastUpdated"),
            last_played: int("LastPlayed"),
            size_on_disk: int("SizeOnDisk"),
            staging_size: int("StagingSize"),
            bytes_to_download: int("BytesToDownload"),
            bytes_downloaded: int("BytesDownloaded"),
            bytes_to_stage: int("BytesToStage"),
            bytes_staged: int("BytesStaged"),
            universe: u32::try_from(uint("universe")).unwrap_or_default(),
            launcher_path: string("LauncherPath"),
            last_owner: uint("LastOwner"),
            update_result: int("UpdateResult"),
            target_build_id: uint("TargetBuildID"),
            auto_update_behavior: int("AutoUpdateBehavior"),
            allow_other_downloads_while_running: int("AllowOtherDownloadsWhileRunning"),
            scheduled_auto_update: int("ScheduledAutoUpdate"),
            installed_depots,
            user_config,
            mounted_config,
            library_path: PathBuf::new(),
            manifest_path: PathBuf::new(),
        })
    }

    /// Returns `<library>/steamapps/common/<installdir>`.
    pub fn install_path(&self) -> PathBuf {
        self.library_path
            .join("steamapps")
            .join("common")
            .join(&self.install_dir)
    }
}

fn take_record(state: &mut Record, key: &str) -> Record {
    match state.remove(key) {
        Some(Value::Record(record)) => record,
        _ => Record::new(),
    }
}

/// Why a single manifest was skipped.
#[derive(Debug, thiserror::Error)]
pub enum FailureReason {
    #[error("read failed: {0}")]
    Read(#[from] io::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("missing \"AppState\" section")]
    MissingAppState,

    #[error("\"AppState\" nests {depth} levels deep, limit is {}", MAX_APP_STATE_DEPTH)]
    TooDeep { depth: usize },

    #[error("not a regular file")]
    NotAFile,

    #[error("missing or invalid appid")]
    InvalidAppId,
}

/// A manifest that could not be turned into an [`InstalledApp`].
#[derive(Debug, thiserror::Error)]
#[error("{}: {reason}", .path.display())]
pub struct ManifestFailure {
    pub path: PathBuf,
    #[source]
    pub reason: FailureReason,
}

/// Result of scanning one library: the apps found and the manifests skipped.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub library_path: PathBuf,
    pub apps: Vec<InstalledApp>,
    pub failures: Vec<ManifestFailure>,
}

impl ScanReport {
    /// Returns true if no manifest was skipped.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Reads and parses a single manifest file.
///
/// Bytes that are not valid UTF-8 are replaced with U+FFFD rather than
/// failing the manifest, so a damaged name still yields an app.
pub fn load_manifest(path: &Path) -> Result<InstalledApp, ManifestFailure> {
    let fail = |reason: FailureReason| ManifestFailure {
        path: path.to_path_buf(),
        reason,
    };

    let data = fs::read(path).map_err(|e| fail(e.into()))?;
    let mut root = vdf::parse(&String::from_utf8_lossy(&data)).map_err(|e| fail(e.into()))?;
    let Some(Value::Record(state)) = root.remove(APP_STATE_KEY) else {
        return Err(fail(FailureReason::MissingAppState));
    };
    let depth = state.depth();
    if depth > MAX_APP_STATE_DEPTH {
        return Err(fail(FailureReason::TooDeep { depth }));
    }

    let mut app = InstalledApp::from_record(state).map_err(fail)?;
    app.manifest_path = path.to_path_buf();
    // <library>/steamapps/appmanifest_<id>.acf
    app.library_path = path
        .parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_default();
    Ok(app)
}

/// Scans `<library_path>/steamapps` for app manifests.
///
/// Fails only if the directory cannot be listed. Manifests that cannot be
/// read or parsed end up in [`ScanReport::failures`], as do matching
/// entries that are not regular files (a dangling symlink, say).
/// Directories are ignored. Entries are visited in file name order so
/// repeated scans of an unchanged library agree.
pub fn scan_library(library_path: &Path) -> Result<ScanReport, SteamError> {
    let dir = library_path.join("steamapps");
    let scan_err = |source: io::Error| SteamError::ScanRead {
        path: dir.clone(),
        source,
    };

    // Each candidate carries the reason it was rejected while listing, if any.
    let mut candidates: Vec<(PathBuf, Option<FailureReason>)> = Vec::new();
    for entry in fs::read_dir(&dir).map_err(scan_err)? {
        let entry = entry.map_err(scan_err)?;
        if !entry.file_name().to_string_lossy().contains(MANIFEST_MARKER) {
            continue;
        }
        let path = entry.path();
        let rejected = match entry.file_type() {
            Ok(kind) if kind.is_dir() => continue,
            Ok(kind) if kind.is_file() => None,
            // Symlinks and the like: judge by what they point at.
            Ok(_) => match fs::metadata(&path) {
                Ok(meta) if meta.is_dir() => continue,
                Ok(meta) if meta.is_file() => None,
                Ok(_) => Some(FailureReason::NotAFile),
                Err(e) => Some(FailureReason::Read(e)),
            },
            Err(e) => Some(FailureReason::Read(e)),
        };
        candidates.push((path, rejected));
    }
    candidates.sort_by(|a, b| a.0.cmp(&b.0));

    let mut report = ScanReport {
        library_path: library_path.to_path_buf(),
        ..ScanReport::default()
    };

    for (path, rejected) in candidates {
        let loaded = match rejected {
            Some(reason) => Err(ManifestFailure { path, reason }),
            None => load_manifest(&path),
        };
        match loaded {
            Ok(app) => {
                tracing::debug!(app_id = app.app_id, name = %app.name, "manifest parsed");
                report.apps.push(app);
            }
            Err(failure) => {
                tracing::warn!(
                    path = %failure.path.display(),
                    error = %failure.reason,
                    "skipping unreadable manifest"
                );
                report.failures.push(failure);
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FULL_MANIFEST: &str = r#"
"AppState"
{
	"appid"		"228980"
	"universe"		"1"
	"LauncherPath"		"C:\\Program Files (x86)\\Steam\\steam.exe"
	"name"		"Steamworks Common Redistributables"
	"StateFlags"		"4"
	"installdir"		"Steamworks Shared"
	"LastUpdated"		"1712345678"
	"LastPlayed"		"1712000000"
	"SizeOnDisk"		"444415954"
	"StagingSize"		"0"
	"buildid"		"13571447"
	"LastOwner"		"76561198000000000"
	"UpdateResult"		"0"
	"BytesToDownload"		"1024"
	"BytesDownloaded"		"512"
	"BytesToStage"		"2048"
	"BytesStaged"		"1024"
	"TargetBuildID"		"13571447"
	"AutoUpdateBehavior"		"0"
	"AllowOtherDownloadsWhileRunning"		"0"
	"ScheduledAutoUpdate"		"0"
	"InstalledDepots"
	{
		"228983"
		{
			"manifest"		"8124929965194586177"
			"size"		"157286400"
		}
	}
	"UserConfig"
	{
		"language"		"english"
	}
	"MountedConfig"
	{
		"language"		"english"
	}
}
"#;

    fn manifest(app_id: u32, name: &str) -> String {
        format!(
            "\"AppState\"\n{{\n\t\"appid\"\t\t\"{app_id}\"\n\t\"name\"\t\t\"{name}\"\n\t\"installdir\"\t\t\"{name}\"\n}}\n"
        )
    }

    fn app_state(text: &str) -> Record {
        match vdf::parse(text).unwrap().remove(APP_STATE_KEY) {
            Some(Value::Record(state)) => state,
            other => panic!("no AppState section: {other:?}"),
        }
    }

    fn library_with(files: &[(&str, &str)]) -> TempDir {
        let tmp = TempDir::new().unwrap();
        let steamapps = tmp.path().join("steamapps");
        fs::create_dir_all(&steamapps).unwrap();
        for (name, content) in files {
            fs::write(steamapps.join(name), content).unwrap();
        }
        tmp
    }

    #[test]
    fn full_manifest_fields() {
        let app = InstalledApp::from_record(app_state(FULL_MANIFEST)).unwrap();

        assert_eq!(app.app_id, 228980);
        assert_eq!(app.name, "Steamworks Common Redistributables");
        assert_eq!(app.install_dir, "Steamworks Shared");
        assert_eq!(app.universe, 1);
        assert_eq!(app.launcher_path, r"C:\Program Files (x86)\Steam\steam.exe");
        assert!(app.state_flags.is_fully_installed());
        assert_eq!(app.build_id, 13571447);
        assert_eq!(app.last_updated, 1712345678);
        assert_eq!(app.last_played, 1712000000);
        assert_eq!(app.size_on_disk, 444415954);
        assert_eq!(app.bytes_to_download, 1024);
        assert_eq!(app.bytes_downloaded, 512);
        assert_eq!(app.bytes_to_stage, 2048);
        assert_eq!(app.bytes_staged, 1024);
        assert_eq!(app.last_owner, 76561198000000000);
        assert_eq!(app.target_build_id, 13571447);

        let depot = app.installed_depots.get_record("228983").unwrap();
        assert_eq!(depot.get_str("size"), Some("157286400"));
        assert_eq!(app.user_config.get_str("language"), Some("english"));
        assert_eq!(app.mounted_config.len(), 1);
    }

    #[test]
    fn sparse_manifest_defaults() {
        let app = InstalledApp::from_record(app_state(&manifest(70, "Half-Life"))).unwrap();
        assert_eq!(app.app_id, 70);
        assert_eq!(app.build_id, 0);
        assert_eq!(app.size_on_disk, 0);
        assert_eq!(app.state_flags.bits(), 0);
        assert!(app.installed_depots.is_empty());
        assert!(app.user_config.is_empty());
    }

    #[test]
    fn appid_is_required() {
        let state = app_state(r#""AppState" { "name" "Nameless" }"#);
        let err = InstalledApp::from_record(state).unwrap_err();
        assert!(matches!(err, FailureReason::InvalidAppId));

        let state = app_state(r#""AppState" { "appid" "abc" }"#);
        let err = InstalledApp::from_record(state).unwrap_err();
        assert!(matches!(err, FailureReason::InvalidAppId));
    }

    #[test]
    fn scan_skips_malformed_manifest() {
        let lib = library_with(&[
            ("appmanifest_10.acf", manifest(10, "Alpha").as_str()),
            ("appmanifest_20.acf", "\"AppState\"\n{\n\t\"appid\"\t\"20\"\n"),
            ("appmanifest_30.acf", manifest(30, "Gamma").as_str()),
        ]);

        let report = scan_library(lib.path()).unwrap();
        assert_eq!(report.apps.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert!(!report.is_clean());

        let ids: Vec<u32> = report.apps.iter().map(|a| a.app_id).collect();
        assert_eq!(ids, vec![10, 30]);

        let failure = &report.failures[0];
        assert!(failure.path.ends_with("appmanifest_20.acf"));
        assert!(matches!(failure.reason, FailureReason::Parse(_)));
    }

    #[test]
    fn scan_reports_missing_app_state() {
        let lib = library_with(&[("appmanifest_5.acf", r#""Other" { "appid" "5" }"#)]);
        let report = scan_library(lib.path()).unwrap();
        assert!(report.apps.is_empty());
        assert!(matches!(
            report.failures[0].reason,
            FailureReason::MissingAppState
        ));
    }

    #[test]
    fn scan_ignores_other_files() {
        let lib = library_with(&[
            ("appmanifest_10.acf", manifest(10, "Alpha").as_str()),
            ("libraryfolders.vdf", "\"libraryfolders\" { }"),
            ("notes.txt", "not a manifest {"),
        ]);
        fs::create_dir_all(lib.path().join("steamapps").join("common")).unwrap();

        let report = scan_library(lib.path()).unwrap();
        assert_eq!(report.apps.len(), 1);
        assert!(report.is_clean());
    }

    #[test]
    fn scan_sets_provenance() {
        let lib = library_with(&[("appmanifest_10.acf", manifest(10, "Alpha").as_str())]);
        let report = scan_library(lib.path()).unwrap();
        let app = &report.apps[0];
        assert_eq!(app.library_path, lib.path());
        assert_eq!(
            app.manifest_path,
            lib.path().join("steamapps").join("appmanifest_10.acf")
        );
        assert_eq!(
            app.install_path(),
            lib.path().join("steamapps").join("common").join("Alpha")
        );
        assert_eq!(report.library_path, lib.path());
    }

    #[test]
    fn scan_survives_deeply_nested_manifest() {
        let depth = 200_000;
        let nested = format!("{}{}", "\"k\"{".repeat(depth), "}".repeat(depth));
        let lib = library_with(&[
            ("appmanifest_10.acf", manifest(10, "Alpha").as_str()),
            ("appmanifest_99.acf", nested.as_str()),
        ]);

        let report = scan_library(lib.path()).unwrap();
        assert_eq!(report.apps.len(), 1);
        assert_eq!(report.apps[0].name, "Alpha");
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            report.failures[0].reason,
            FailureReason::MissingAppState
        ));
    }

    #[test]
    fn overly_deep_app_state_is_rejected() {
        let depth = 100_000;
        let text = format!(
            "\"AppState\" {{ \"appid\" \"7\" \"UserConfig\" {{ {}{} }} }}",
            "\"k\" {".repeat(depth),
            "}".repeat(depth)
        );
        let lib = library_with(&[("appmanifest_7.acf", text.as_str())]);

        let report = scan_library(lib.path()).unwrap();
        assert!(report.apps.is_empty());
        assert!(matches!(
            report.failures[0].reason,
            FailureReason::TooDeep { depth: d } if d == depth + 2
        ));
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_is_reported() {
        let lib = library_with(&[("appmanifest_10.acf", manifest(10, "Alpha").as_str())]);
        let steamapps = lib.path().join("steamapps");
        std::os::unix::fs::symlink(
            lib.path().join("gone.acf"),
            steamapps.join("appmanifest_7.acf"),
        )
        .unwrap();

        let report = scan_library(lib.path()).unwrap();
        assert_eq!(report.apps.len(), 1);
        assert_eq!(report.failures.len(), 1);
        let failure = &report.failures[0];
        assert!(failure.path.ends_with("appmanifest_7.acf"));
        assert!(matches!(failure.reason, FailureReason::Read(_)));
    }

    #[test]
    fn manifest_named_directory_is_ignored() {
        let lib = library_with(&[("appmanifest_10.acf", manifest(10, "Alpha").as_str())]);
        fs::create_dir(lib.path().join("steamapps").join("appmanifest_11.acf")).unwrap();

        let report = scan_library(lib.path()).unwrap();
        assert_eq!(report.apps.len(), 1);
        assert!(report.is_clean());
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let lib = TempDir::new().unwrap();
        let steamapps = lib.path().join("steamapps");
        fs::create_dir_all(&steamapps).unwrap();
        fs::write(
            steamapps.join("appmanifest_3.acf"),
            b"\"AppState\" { \"appid\" \"3\" \"name\" \"Caf\xe9\" }",
        )
        .unwrap();

        let report = scan_library(lib.path()).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.apps[0].name, "Caf\u{fffd}");
    }

    #[test]
    fn scan_missing_directory_fails() {
        let tmp = TempDir::new().unwrap();
        let err = scan_library(tmp.path()).unwrap_err();
        assert!(matches!(err, SteamError::ScanRead { .. }));
    }

    #[test]
    fn load_missing_manifest_is_read_failure() {
        let tmp = TempDir::new().unwrap();
        let failure = load_manifest(&tmp.path().join("appmanifest_1.acf")).unwrap_err();
        assert!(matches!(failure.reason, FailureReason::Read(_)));
    }

    #[test]
    fn state_flags_names() {
        let flags = AppStateFlags::from_bits(
            AppStateFlags::FULLY_INSTALLED | AppStateFlags::UPDATE_REQUIRED,
        );
        assert!(flags.is_fully_installed());
        assert!(flags.needs_update());
        assert_eq!(flags.to_string(), "UpdateRequired|FullyInstalled");
        assert_eq!(AppStateFlags::default().to_string(), "Invalid");
    }

    #[test]
    fn app_json_field_names() {
        let app = InstalledApp::from_record(app_state(FULL_MANIFEST)).unwrap();
        let json = serde_json::to_value(&app).unwrap();
        assert_eq!(json["appId"], 228980);
        assert_eq!(json["stateFlags"], 4);
        assert_eq!(json["installedDepots"]["228983"]["size"], "157286400");
    }
}
