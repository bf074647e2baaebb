/// Canonical file locations for the vanished root handler.
///
///   - /etc/vanished-root-handler/config.toml  Installed with the live system, read at startup.
///   - <temp dir>/vanished-root-handler.log     Written by the daemon (see `logging`).
///
/// The config location can be overridden with `--config`.
use std::path::PathBuf;

const CONFIG_DIR: &str = "/etc/vanished-root-handler";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Returns the system configuration directory: /etc/vanished-root-handler
pub fn config_dir() -> PathBuf {
    PathBuf::from(CONFIG_DIR)
}

/// Returns the full path to the config file: /etc/vanished-root-handler/config.toml
pub fn config_file_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}
