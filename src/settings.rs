//! Admin tool settings
//!
//! Optional `conf/autolycus.yaml` inside the installation. Every field has a
//! default, so a missing file (or an empty one) is the normal case.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::install::{Installation, SERVERS};

/// File name of the settings file inside `conf/`.
pub const SETTINGS_FILE: &str = "autolycus.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminSettings {
    /// Server executables to supervise, in start order
    #[serde(default = "default_servers")]
    pub servers: Vec<String>,

    /// Seconds to wait after SIGTERM before killing a server
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Seconds to wait for the database to accept connections
    #[serde(default = "default_db_wait")]
    pub db_wait_secs: u64,

    /// `group_id` given to accounts created with `--admin`
    #[serde(default = "default_gm_group_id")]
    pub gm_group_id: i32,
}

fn default_servers() -> Vec<String> {
    SERVERS.iter().map(|s| s.to_string()).collect()
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_db_wait() -> u64 {
    60
}

fn default_gm_group_id() -> i32 {
    99
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            stop_timeout_secs: default_stop_timeout(),
            db_wait_secs: default_db_wait(),
            gm_group_id: default_gm_group_id(),
        }
    }
}

impl AdminSettings {
    /// Load `conf/autolycus.yaml` from the installation, or defaults if absent.
    pub fn load(install: &Installation) -> Result<Self> {
        let path = install.conf_dir().join(SETTINGS_FILE);
        if !path.exists() {
            tracing::debug!("[settings] {} not present, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        Self::from_str(&contents)
            .with_context(|| format!("Invalid settings in {}", path.display()))
    }

    pub fn from_str(contents: &str) -> Result<Self> {
        // an empty document deserializes to unit, not a map
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: AdminSettings =
            serde_yaml::from_str(contents).context("Failed to parse YAML")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.servers.is_empty(), "servers cannot be empty");
        anyhow::ensure!(
            self.servers.iter().all(|s| !s.is_empty() && !s.contains(['/', '\\'])),
            "server names must be plain executable names"
        );
        anyhow::ensure!(self.stop_timeout_secs > 0, "stop_timeout_secs must be positive");
        anyhow::ensure!(self.db_wait_secs > 0, "db_wait_secs must be positive");
        Ok(())
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn db_wait(&self) -> Duration {
        Duration::from_secs(self.db_wait_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = AdminSettings::from_str("").unwrap();
        assert_eq!(settings.servers, vec!["map-server", "char-server", "login-server"]);
        assert_eq!(settings.stop_timeout(), Duration::from_secs(10));
        assert_eq!(settings.db_wait(), Duration::from_secs(60));
        assert_eq!(settings.gm_group_id, 99);
    }

    #[test]
    fn test_partial_override() {
        let settings = AdminSettings::from_str("stop_timeout_secs: 3\n").unwrap();
        assert_eq!(settings.stop_timeout_secs, 3);
        assert_eq!(settings.servers.len(), 3);
    }

    #[test]
    fn test_custom_servers() {
        let settings = AdminSettings::from_str(
            "servers:\n  - char-server\n  - login-server\ngm_group_id: 10\n",
        )
        .unwrap();
        assert_eq!(settings.servers, vec!["char-server", "login-server"]);
        assert_eq!(settings.gm_group_id, 10);
    }

    #[test]
    fn test_empty_server_list_rejected() {
        let err = AdminSettings::from_str("servers: []\n").unwrap_err();
        assert!(format!("{err:#}").contains("servers cannot be empty"));
    }

    #[test]
    fn test_path_in_server_name_rejected() {
        assert!(AdminSettings::from_str("servers: [\"../bin/sh\"]\n").is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(AdminSettings::from_str("stop_timeout_secs: 0\n").is_err());
    }

    #[test]
    fn test_wrong_type() {
        assert!(AdminSettings::from_str("db_wait_secs: soon\n").is_err());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let install = Installation::new("/nonexistent/hercules");
        assert_eq!(AdminSettings::load(&install).unwrap(), AdminSettings::default());
    }
}
