//! Layout of a server installation on disk
//!
//! ```text
//! <root>/
//!   conf/                  config files, conf/import/ overrides
//!   login-server[.exe]     server executables
//!   login-server.pid       written by `start`, removed by `stop`
//!   version_info.ini       build metadata
//!   sql-files/upgrades/    YYYY-MM-DD--HH-MM.sql
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::conf::ConfigStore;

/// Placeholder for any version field that could not be read.
pub const UNKNOWN: &str = "unknown";

/// The three game server processes, in start order.
pub const SERVERS: [&str; 3] = ["map-server", "char-server", "login-server"];

#[derive(Debug, Clone)]
pub struct Installation {
    root: PathBuf,
}

impl Installation {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn conf_dir(&self) -> PathBuf {
        self.root.join("conf")
    }

    pub fn config_store(&self) -> ConfigStore {
        ConfigStore::new(self.conf_dir())
    }

    pub fn pid_file(&self, server: &str) -> PathBuf {
        self.root.join(format!("{server}.pid"))
    }

    pub fn executable(&self, server: &str) -> PathBuf {
        self.root
            .join(format!("{server}{}", std::env::consts::EXE_SUFFIX))
    }

    pub fn version_info_file(&self) -> PathBuf {
        self.root.join("version_info.ini")
    }

    pub fn upgrades_dir(&self) -> PathBuf {
        self.root.join("sql-files").join("upgrades")
    }

    pub fn version_info(&self) -> VersionInfo {
        VersionInfo::load(&self.version_info_file())
    }
}

/// Build metadata from `version_info.ini`, section `[version_info]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub git_version: String,
    pub packet_version: String,
    pub build_date: String,
    pub server_mode: String,
    pub arch: String,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            git_version: UNKNOWN.to_string(),
            packet_version: UNKNOWN.to_string(),
            build_date: UNKNOWN.to_string(),
            server_mode: UNKNOWN.to_string(),
            arch: UNKNOWN.to_string(),
        }
    }
}

impl VersionInfo {
    /// Read the file, falling back to `unknown` for anything missing.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content, path),
            Err(_) => {
                tracing::warn!("[install] [no_version_info] Failed to find {}", path.display());
                Self::default()
            }
        }
    }

    /// Parse INI text. `source` only labels warnings.
    pub fn parse(content: &str, source: &Path) -> Self {
        let mut info = Self::default();
        let Some(section) = ini_section(content, "version_info") else {
            tracing::warn!(
                "[install] [no_version_info] version_info section not found in {}",
                source.display()
            );
            return info;
        };

        let fields: [(&str, &mut String); 5] = [
            ("git_version", &mut info.git_version),
            ("packet_version", &mut info.packet_version),
            ("build_date", &mut info.build_date),
            ("server_mode", &mut info.server_mode),
            ("arch", &mut info.arch),
        ];
        for (key, slot) in fields {
            match section.get(key) {
                Some(value) => *slot = value.clone(),
                None => tracing::warn!(
                    "[install] [no_version_info] Failed to find entry {key} in {}",
                    source.display()
                ),
            }
        }
        info
    }

    pub fn has_build_date(&self) -> bool {
        self.build_date != UNKNOWN && !self.build_date.is_empty()
    }
}

/// Key/value pairs of one `[section]`; `None` if the section is absent.
/// Keys are lowercased, `=` and `:` both separate, `;` and `#` start comments.
fn ini_section(content: &str, name: &str) -> Option<HashMap<String, String>> {
    let mut current: Option<String> = None;
    let mut found: Option<HashMap<String, String>> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let header = header.trim().to_string();
            if header == name {
                found.get_or_insert_with(HashMap::new);
            }
            current = Some(header);
            continue;
        }
        if current.as_deref() != Some(name) {
            continue;
        }
        let Some(split) = line.find(['=', ':']) else {
            continue;
        };
        let key = line[..split].trim().to_ascii_lowercase();
        let value = line[split + 1..].trim().to_string();
        if let Some(section) = found.as_mut() {
            section.insert(key, value);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    const INI: &str = "\
[other]
arch = wrong

[version_info]
git_version = 1a2b3c
packet_version = 20190530
build_date = 2020-04-12_10-30-00
server_mode = Renewal
arch = x86_64
";

    #[test]
    fn test_paths() {
        let install = Installation::new("/srv/hercules");
        assert_eq!(install.conf_dir(), Path::new("/srv/hercules/conf"));
        assert_eq!(install.pid_file("map-server"), Path::new("/srv/hercules/map-server.pid"));
        assert_eq!(
            install.upgrades_dir(),
            Path::new("/srv/hercules/sql-files/upgrades")
        );
        assert!(install
            .executable("char-server")
            .to_string_lossy()
            .starts_with("/srv/hercules/char-server"));
    }

    #[test]
    fn test_parse_version_info() {
        let info = VersionInfo::parse(INI, Path::new("version_info.ini"));
        assert_eq!(info.git_version, "1a2b3c");
        assert_eq!(info.packet_version, "20190530");
        assert_eq!(info.build_date, "2020-04-12_10-30-00");
        assert_eq!(info.server_mode, "Renewal");
        assert_eq!(info.arch, "x86_64");
        assert!(info.has_build_date());
    }

    #[test]
    fn test_missing_section() {
        let info = VersionInfo::parse("[other]\narch = x\n", Path::new("v.ini"));
        assert_eq!(info, VersionInfo::default());
        assert!(!info.has_build_date());
    }

    #[test]
    fn test_missing_entry_stays_unknown() {
        let info = VersionInfo::parse("[version_info]\narch: arm64\n", Path::new("v.ini"));
        assert_eq!(info.arch, "arm64");
        assert_eq!(info.build_date, UNKNOWN);
    }

    #[test]
    fn test_missing_file() {
        let info = VersionInfo::load(Path::new("/nonexistent/version_info.ini"));
        assert_eq!(info, VersionInfo::default());
    }
}
