//! Import `.sql` files statement by statement.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use sqlx::MySqlPool;

/// Split SQL text into statements.
///
/// Blank lines and lines starting with `--` or `#` are dropped; the rest are
/// trimmed and joined with a space. A line ending in `;` closes a statement.
/// Text after the last `;` is returned as a final statement.
pub fn statements(sql: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("--") || line.starts_with('#') {
            continue;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(line);
        if line.ends_with(';') {
            out.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        out.push(current);
    }
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub executed: usize,
    pub failed: usize,
}

/// Run every statement of `path`. A failing statement is logged and skipped.
pub async fn import_file(pool: &MySqlPool, path: &Path) -> Result<ImportReport> {
    tracing::info!("[sql] [import] Importing {} to database...", path.display());
    let sql = fs::read_to_string(path)
        .with_context(|| format!("Cannot read SQL file: {}", path.display()))?;

    let mut report = ImportReport::default();
    for statement in statements(&sql) {
        tracing::debug!("[sql] {statement}");
        match sqlx::raw_sql(&statement).execute(pool).await {
            Ok(_) => report.executed += 1,
            Err(e) => {
                tracing::error!("[sql] [statement_error] SQL statement error: {e}");
                report.failed += 1;
            }
        }
    }
    tracing::info!(
        "[sql] [imported] {}: {} statements ok, {} failed",
        path.display(),
        report.executed,
        report.failed
    );
    Ok(report)
}
