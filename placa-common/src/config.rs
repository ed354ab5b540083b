//! Configuration loading and root folder resolution
//!
//! Configuration comes from an optional TOML file. A missing file is never
//! fatal: the compiled defaults apply and a warning is logged. A file that
//! exists but cannot be parsed is a startup error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "PLACA_ROOT_FOLDER";

/// Environment variable pointing at an explicit config file
pub const CONFIG_FILE_ENV: &str = "PLACA_CONFIG";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "placa.db";

/// Default violation cooldown in seconds
pub const DEFAULT_COOLDOWN_SECS: u64 = 10;

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Folder holding the ledger database
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub enforcement: EnforcementConfig,

    /// Pins the clock to a fixed instant (`YYYY-MM-DDTHH:MM:SS`, local time)
    #[serde(default)]
    pub demo_datetime: Option<String>,

    /// Restriction calendar; the built-in tables apply when absent
    #[serde(default)]
    pub calendar: Option<CalendarSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnforcementConfig {
    /// Minimum seconds between two persisted violations for the same plate
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
        }
    }
}

fn default_cooldown_secs() -> u64 {
    DEFAULT_COOLDOWN_SECS
}

/// Raw restriction calendar as written in TOML
///
/// Validation (weekday names, dates, digits, window order) happens when the
/// enforcer builds its rule tables; nothing here is trusted yet.
///
/// ```toml
/// [calendar]
/// holidays = ["2025-12-25"]
///
/// [calendar.window]
/// start = "07:30"
/// end = "19:00"
///
/// [calendar.weekdays]
/// monday = [0, 1]
///
/// [calendar.overrides]
/// "2025-11-18" = [2, 3]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalendarSection {
    pub window: WindowSection,
    #[serde(default)]
    pub weekdays: BTreeMap<String, Vec<u8>>,
    #[serde(default)]
    pub overrides: BTreeMap<String, Vec<u8>>,
    #[serde(default)]
    pub holidays: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowSection {
    pub start: String,
    pub end: String,
}

/// Load the TOML configuration
///
/// Priority: explicit path (CLI or `PLACA_CONFIG`) → user config dir →
/// `/etc/placa/config.toml`. An explicit path that does not exist is an
/// error; missing default locations fall back to `TomlConfig::default()`.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<(TomlConfig, Option<PathBuf>)> {
    let explicit = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from));

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let config = read_toml_config(&path)?;
        return Ok((config, Some(path)));
    }

    match default_config_path() {
        Some(path) => {
            let config = read_toml_config(&path)?;
            Ok((config, Some(path)))
        }
        None => {
            warn!("No config file found, using compiled defaults");
            Ok((TomlConfig::default(), None))
        }
    }
}

/// Parse one TOML config file
pub fn read_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    info!("Loaded config file: {}", path.display());
    Ok(config)
}

fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("placa").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/placa/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Root folder resolution in priority order:
/// 1. Command-line argument
/// 2. `PLACA_ROOT_FOLDER` environment variable
/// 3. TOML `root_folder`
/// 4. OS-dependent compiled default
#[derive(Debug, Clone, Default)]
pub struct RootFolderResolver {
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(cli_arg: Option<PathBuf>, toml: &TomlConfig) -> Self {
        Self {
            cli_arg,
            toml_root: toml.root_folder.clone(),
        }
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_root {
            return path.clone();
        }

        default_root_folder()
    }
}

/// Creates the root folder and locates files within it
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/placa (or /var/lib/placa for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("placa"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/placa"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/placa
        dirs::data_dir()
            .map(|d| d.join("placa"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/placa"))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\placa
        dirs::data_local_dir()
            .map(|d| d.join("placa"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\placa"))
    } else {
        PathBuf::from("./placa_data")
    }
}
