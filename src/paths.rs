//! Where phrasecast keeps its files.
//!
//! The database lives under the platform data directory and the TOML config
//! under the platform config directory, both in a `phrasecast` subfolder:
//! `~/.local/share/phrasecast/` and `~/.config/phrasecast/` on Linux,
//! `~/Library/Application Support/phrasecast/` for both on macOS.
//!
//! `PHRASECAST_DATA_DIR` and `PHRASECAST_CONFIG_DIR` replace the resolved
//! directory outright. Without a home directory both fall back to a
//! `.phrasecast` folder in the working directory.

use std::ffi::OsString;
use std::path::PathBuf;

const APP_DIR: &str = "phrasecast";
const DATA_DIR_ENV: &str = "PHRASECAST_DATA_DIR";
const CONFIG_DIR_ENV: &str = "PHRASECAST_CONFIG_DIR";

/// Directory holding the key-value database.
#[must_use]
pub fn data_dir() -> PathBuf {
    resolve(std::env::var_os(DATA_DIR_ENV), dirs::data_dir())
}

/// Directory holding `config.toml`.
#[must_use]
pub fn config_dir() -> PathBuf {
    resolve(std::env::var_os(CONFIG_DIR_ENV), dirs::config_dir())
}

/// `config_dir()/config.toml`.
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// `data_dir()/phrasecast.db`.
#[must_use]
pub fn database_file() -> PathBuf {
    data_dir().join("phrasecast.db")
}

fn resolve(env_override: Option<OsString>, platform_base: Option<PathBuf>) -> PathBuf {
    match (env_override, platform_base) {
        (Some(dir), _) if !dir.is_empty() => PathBuf::from(dir),
        (_, Some(base)) => base.join(APP_DIR),
        (_, None) => PathBuf::from(".").join(format!(".{APP_DIR}")),
    }
}
