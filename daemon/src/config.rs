use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_LOCALE: &str = "C";
pub const DEFAULT_SESSION_ENV_VAR: &str = "XDG_CURRENT_DESKTOP";
pub const MIN_COUNTDOWN_SECS: u32 = 1;
pub const MAX_COUNTDOWN_SECS: u32 = 600;
pub const DEFAULT_COUNTDOWN_SECS: u32 = 30;
pub const DEFAULT_WARMUP_VISIBLE_MS: u64 = 1000;
pub const DEFAULT_LOG_LEVEL: &str = "info";
/// 5 MB per log file, two generations.
pub const DEFAULT_LOG_FILE_SIZE_LIMIT: u64 = 5_000_000;
pub const DEFAULT_LOG_FILE_COUNT: u32 = 2;

/// Root configuration structure. Deserialized from
/// /etc/vanished-root-handler/config.toml.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub desktop: DesktopConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub privilege: PrivilegeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device event source and root device lookup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Command whose stdout carries udisks add/remove notifications.
    pub command: Vec<String>,
    /// Value of `LC_ALL` for the command so its output is not translated.
    pub locale: String,
    /// Reduce a partition (`sdb1`) to its disk (`sdb`) before matching.
    pub match_whole_disk: bool,
    /// Mount points checked in order for the device backing the live system.
    pub medium_mounts: Vec<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            command: vec!["udisksctl".to_string(), "monitor".to_string()],
            locale: DEFAULT_LOCALE.to_string(),
            match_whole_disk: true,
            medium_mounts: ["/run/live/medium", "/lib/live/mount/medium", "/"]
                .iter()
                .map(PathBuf::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DesktopConfig {
    /// Environment variable naming the XDG desktop session.
    pub session_env_var: String,
    /// Window manager info command, parsed for a `Name: <wm>` line.
    pub window_manager_query: Vec<String>,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            session_env_var: DEFAULT_SESSION_ENV_VAR.to_string(),
            window_manager_query: vec!["wmctrl".to_string(), "-m".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Seconds until the automatic reboot. Clamped to [1, 600].
    pub countdown_secs: u32,
    /// How long the warm-up window stays visible.
    pub warmup_visible_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            countdown_secs: DEFAULT_COUNTDOWN_SECS,
            warmup_visible_ms: DEFAULT_WARMUP_VISIBLE_MS,
        }
    }
}

impl RecoveryConfig {
    pub fn effective_countdown_secs(&self) -> u32 {
        self.countdown_secs.clamp(MIN_COUNTDOWN_SECS, MAX_COUNTDOWN_SECS)
    }
}

/// Pre-authorized helper programs run through the privilege broker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrivilegeConfig {
    pub broker: String,
    pub reboot_helper: String,
    pub poweroff_helper: String,
    /// Invoked once at startup so the broker is loaded before the root vanishes.
    pub prime_helper: String,
}

impl Default for PrivilegeConfig {
    fn default() -> Self {
        Self {
            broker: "pkexec".to_string(),
            reboot_helper: "vanished_root_handler_reboot".to_string(),
            poweroff_helper: "vanished_root_handler_poweroff".to_string(),
            prime_helper: "vanished_root_handler_dummy".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter for both sinks; `RUST_LOG` overrides it.
    pub level: String,
    /// Log file directory. Defaults to the system temp directory.
    pub directory: Option<PathBuf>,
    pub file_size_limit: u64,
    pub file_count: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            directory: None,
            file_size_limit: DEFAULT_LOG_FILE_SIZE_LIMIT,
            file_count: DEFAULT_LOG_FILE_COUNT,
        }
    }
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}
