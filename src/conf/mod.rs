//! Server configuration store
//!
//! Reads and rewrites single settings in the game servers' `key: value`
//! config files under `<installation>/conf/`. A copy of a file anywhere
//! below `conf/import/` overrides every same-named file elsewhere in `conf/`.
//!
//! Nothing is cached: every call rescans the tree and rereads the file, so
//! the files on disk are always the source of truth.

pub mod line;

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use jwalk::WalkDir;
use line::Line;

/// Name of the override directory inside `conf/`.
pub const IMPORT_DIR: &str = "import";

#[cfg(windows)]
const LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
const LINE_ENDING: &str = "\n";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no configuration file named {basename} under {}", conf_dir.display())]
    NotFound { basename: String, conf_dir: PathBuf },

    #[error("not a plain file name: {0:?}")]
    InvalidName(String),

    #[error("not a usable setting name: {0:?}")]
    InvalidKey(String),

    #[error("value for {key} must fit on one line: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("I/O error on {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn storage(path: &Path) -> impl FnOnce(io::Error) -> ConfigError {
    let path = path.to_path_buf();
    move |source| ConfigError::Storage { path, source }
}

/// Access to the config files of one installation.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    conf_dir: PathBuf,
}

impl ConfigStore {
    pub fn new(conf_dir: impl Into<PathBuf>) -> Self {
        Self {
            conf_dir: conf_dir.into(),
        }
    }

    pub fn conf_dir(&self) -> &Path {
        &self.conf_dir
    }

    /// All files named `basename`, highest precedence first.
    ///
    /// Matches below `conf/import/` come first, then every other match below
    /// `conf/`. Each group is sorted by path so the order never depends on
    /// directory iteration order.
    pub fn find_config_files(&self, basename: &str) -> Result<Vec<PathBuf>, ConfigError> {
        if basename.is_empty() || Path::new(basename).file_name() != Some(OsStr::new(basename)) {
            return Err(ConfigError::InvalidName(basename.to_string()));
        }

        let mut files = collect_named(&self.conf_dir.join(IMPORT_DIR), basename);
        let rest = collect_named(&self.conf_dir, basename);
        for path in rest {
            if !files.contains(&path) {
                files.push(path);
            }
        }

        if files.is_empty() {
            return Err(ConfigError::NotFound {
                basename: basename.to_string(),
                conf_dir: self.conf_dir.clone(),
            });
        }
        tracing::debug!("[conf] [find] {basename}: {files:?}");
        Ok(files)
    }

    /// Effective value of `key` for `basename`, exactly as written (quotes
    /// included). `Ok(None)` means no file sets it and the server default
    /// applies.
    pub fn get(&self, basename: &str, key: &str) -> Result<Option<String>, ConfigError> {
        for path in self.find_config_files(basename)? {
            let content = fs::read_to_string(&path).map_err(storage(&path))?;
            let mut values = content
                .lines()
                .map(Line::parse)
                .filter_map(|l| l.setting_for(key).map(|s| s.value().to_string()));

            if let Some(value) = values.next() {
                let others = values.count();
                if others > 0 {
                    tracing::warn!(
                        "[conf] [ambiguous] {key} is set {} times in {}, using the first",
                        others + 1,
                        path.display()
                    );
                }
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Like [`get`](Self::get) with one pair of surrounding quotes removed.
    pub fn get_unquoted(&self, basename: &str, key: &str) -> Result<Option<String>, ConfigError> {
        Ok(self
            .get(basename, key)?
            .map(|v| line::unquote(&v).into_owned()))
    }

    /// Set `key` to `value` in the highest-precedence file for `basename`.
    ///
    /// Every line setting `key` gets the new value; if none does, a
    /// `key: value` line is appended. Lower-precedence files are untouched.
    pub fn set(&self, basename: &str, key: &str, value: &str) -> Result<(), ConfigError> {
        let files = self.find_config_files(basename)?;
        let path = &files[0];

        let content = fs::read_to_string(path).map_err(storage(path))?;
        let updated = rewrite(&content, key, value)?;
        if updated == content {
            tracing::debug!("[conf] [unchanged] {key} in {}", path.display());
            return Ok(());
        }
        write_atomic(path, &updated)?;
        tracing::info!("[conf] [set] {key} in {}", path.display());
        Ok(())
    }
}

/// Files named `basename` below `dir`, sorted. Symlinked directories are
/// followed; entries that cannot be read are skipped with a warning.
fn collect_named(dir: &Path, basename: &str) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    let mut found: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                tracing::warn!("[conf] [walk] Skipping entry under {}: {e}", dir.display());
                None
            }
        })
        .filter(|e| e.file_name() == OsStr::new(basename))
        .map(|e| e.path())
        .filter(|path| path.is_file())
        .collect();
    found.sort();
    found
}

/// Line terminator already used by `content`, else the platform's.
fn line_ending(content: &str) -> &'static str {
    match content.find('\n') {
        Some(i) if content[..i].ends_with('\r') => "\r\n",
        Some(_) => "\n",
        None => LINE_ENDING,
    }
}

/// Apply one `key: value` change to file content.
///
/// Keys must be a single word without `:`; values must not contain line
/// breaks.
pub fn rewrite(content: &str, key: &str, value: &str) -> Result<String, ConfigError> {
    if key.is_empty()
        || key.contains(|c: char| c.is_whitespace() || c == ':')
        || key.starts_with("//")
        || key.starts_with('#')
    {
        return Err(ConfigError::InvalidKey(key.to_string()));
    }
    if value.contains(['\n', '\r']) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    let mut lines = Vec::new();
    let mut matched = false;

    for raw in content.lines() {
        match Line::parse(raw).setting_for(key) {
            Some(setting) => {
                let updated = setting.with_value(value);
                tracing::debug!("[conf] [rewrite] {raw:?} -> {updated:?}");
                matched = true;
                lines.push(updated);
            }
            None => lines.push(raw.to_string()),
        }
    }

    if !matched {
        let appended = format!("{key}: {}", line::render(value, false));
        tracing::debug!("[conf] [append] {appended:?}");
        lines.push(appended);
    }

    let ending = line_ending(content);
    let mut out = lines.join(ending);
    if content.is_empty() || content.ends_with('\n') {
        out.push_str(ending);
    }
    Ok(out)
}

/// Replace `path` with `content` via a sibling temp file and a rename.
fn write_atomic(path: &Path, content: &str) -> Result<(), ConfigError> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{name}.{}.tmp", std::process::id()));

    let permissions = fs::metadata(path).map_err(storage(path))?.permissions();
    fs::write(&tmp, content).map_err(storage(&tmp))?;
    if let Err(e) = fs::set_permissions(&tmp, permissions) {
        let _ = fs::remove_file(&tmp);
        return Err(storage(&tmp)(e));
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(storage(path)(e));
    }
    Ok(())
}
