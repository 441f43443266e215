//! SQL upgrade selection
//!
//! Upgrade scripts live in `sql-files/upgrades/` and are named after the
//! moment they were written (`2018-02-08--14-25.sql`). Every script newer
//! than the server build needs to be applied.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, NaiveDateTime};

use crate::install::{Installation, VersionInfo};

/// `build_date` format in `version_info.ini`.
pub const BUILD_DATE_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// File stem format of upgrade scripts.
pub const UPGRADE_NAME_FORMAT: &str = "%Y-%m-%d--%H-%M";

/// Executable whose timestamp stands in for an unknown build date.
const BUILD_DATE_FALLBACK_SERVER: &str = "char-server";

pub fn parse_build_date(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), BUILD_DATE_FORMAT).ok()
}

/// Timestamp encoded in an upgrade file name, if it has one.
pub fn upgrade_date(path: &Path) -> Option<NaiveDateTime> {
    let stem = path.file_stem()?.to_str()?;
    // names carry no seconds; pin them to zero
    NaiveDateTime::parse_from_str(&format!("{stem}-00"), &format!("{UPGRADE_NAME_FORMAT}-%S")).ok()
}

/// Build date of the installation.
///
/// Without a usable `build_date` this refuses unless `force` is set, in which
/// case the modification time of the char-server executable is used.
pub fn build_date(install: &Installation, info: &VersionInfo, force: bool) -> Result<NaiveDateTime> {
    if let Some(date) = info.has_build_date().then(|| parse_build_date(&info.build_date)).flatten() {
        return Ok(date);
    }

    let source = install.version_info_file();
    if !force {
        bail!(
            "Could not get build date from {}! SQL upgrades are unsafe. \
             To run them anyway, use the \"force\" flag.",
            source.display()
        );
    }

    let executable = install.executable(BUILD_DATE_FALLBACK_SERVER);
    let modified = fs::metadata(&executable)
        .and_then(|m| m.modified())
        .with_context(|| format!("Cannot stat {}", executable.display()))?;
    let date = DateTime::<Local>::from(modified).naive_local();

    tracing::warn!(
        "[upgrades] [unsafe] Failed to get build date from {}! SQL upgrades are unsafe.",
        source.display()
    );
    tracing::warn!("[upgrades] [unsafe] sql_upgrades called with force argument, proceeding anyway.");
    tracing::warn!("[upgrades] [unsafe] ------- THIS MAY BREAK YOUR DATABASE! -------");
    tracing::warn!(
        "[upgrades] [unsafe] Assuming {} creation date {date} as build date.",
        executable.display()
    );
    Ok(date)
}

/// Upgrade scripts in `dir` newer than `build`, oldest first.
pub fn pending(dir: &Path, build: NaiveDateTime) -> Result<Vec<PathBuf>> {
    let mut scripts: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "sql"))
            .collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("[upgrades] [none] {} does not exist", dir.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e).with_context(|| format!("Cannot list {}", dir.display())),
    };
    scripts.sort();

    Ok(scripts
        .into_iter()
        .filter(|path| match upgrade_date(path) {
            None => {
                tracing::info!(
                    "[upgrades] [skip] Failed to parse upgrade date for {} - ignoring file.",
                    path.display()
                );
                false
            }
            Some(date) if date > build => true,
            Some(_) => {
                tracing::debug!("[upgrades] {} is older than build, no need to import.", path.display());
                false
            }
        })
        .collect())
}
