//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. the path given on the command line (`--config`)
//! 2. `$DEVINBOX_CONFIG` (environment variable)
//! 3. `./devinbox.toml`
//! 4. Built-in defaults
//!
//! All values are read once at startup; there is no hot reload.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DevinboxError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SMTP listener settings.
    pub smtp: SmtpConfig,
    /// Database and attachment storage settings.
    pub storage: StorageConfig,
    /// Logging settings.
    pub log: LogConfig,
}

/// SMTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// Socket address the listener binds to.
    pub listen: String,
    /// Base domain served; mail is accepted for `*@<slug>.<base_domain>`.
    pub base_domain: String,
    /// Maximum accepted DATA payload in bytes.
    pub max_message_bytes: usize,
    /// Idle timeout per connection, in seconds.
    pub idle_timeout_secs: u64,
}

/// Database and attachment storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file.
    pub database_path: PathBuf,
    /// Root directory for attachment blobs.
    pub attachment_root: PathBuf,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default tracing filter, overridable with `RUST_LOG`.
    pub filter: String,
}

// ── Default implementations ─────────────────────────────────────

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:2525".to_string(),
            base_domain: "devinbox.local".to_string(),
            max_message_bytes: 10 * 1024 * 1024,
            idle_timeout_secs: 300,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("devinbox.db"),
            attachment_root: PathBuf::from("uploads/attachments"),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Load configuration, trying `explicit` first, then `$DEVINBOX_CONFIG`,
/// then `./devinbox.toml`, then defaults.
///
/// An explicitly named file that is missing or malformed is an error;
/// fallback locations are skipped silently when absent.
pub fn load(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return read_file(path);
    }

    if let Ok(path) = std::env::var("DEVINBOX_CONFIG") {
        return read_file(Path::new(&path));
    }

    let local = Path::new("devinbox.toml");
    if local.exists() {
        return read_file(local);
    }

    Ok(Config::default())
}

fn read_file(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| DevinboxError::Config(format!("cannot read '{}': {e}", path.display())))?;
    toml::from_str(&text)
        .map_err(|e| DevinboxError::Config(format!("cannot parse '{}': {e}", path.display())))
}
