//! Screenshot files on disk.
//!
//! There is no index: the directory listing is the record. Files are named
//! `screenshot-<UTC ISO 8601 with ':' and '.' replaced by '-'>.png`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;

const PREFIX: &str = "screenshot-";
const SUFFIX: &str = ".png";

#[derive(Debug, Error)]
pub enum ScreenshotError {
    #[error("Invalid screenshot name: {0}")]
    InvalidName(String),

    #[error("Screenshot not found: {0}")]
    NotFound(String),

    #[error("Failed to read screenshots: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct ScreenshotInfo {
    pub filename: String,
    pub created: DateTime<Utc>,
    pub size: u64,
}

pub fn file_name_for(at: DateTime<Utc>) -> String {
    let iso = at.to_rfc3339_opts(SecondsFormat::Millis, true);
    format!("{PREFIX}{}{SUFFIX}", iso.replace([':', '.'], "-"))
}

/// Bare file names that follow the screenshot naming pattern. The stem is
/// limited to what [`file_name_for`] emits, so names are safe to echo into
/// headers.
pub fn is_screenshot_name(name: &str) -> bool {
    name.strip_prefix(PREFIX)
        .and_then(|rest| rest.strip_suffix(SUFFIX))
        .is_some_and(|stem| {
            !stem.is_empty() && stem.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

/// Newest first. A missing directory lists as empty.
pub async fn list(dir: &Path) -> Result<Vec<ScreenshotInfo>, ScreenshotError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut shots = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let filename = entry.file_name().to_string_lossy().into_owned();
        if !is_screenshot_name(&filename) {
            continue;
        }
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        let created = meta.created().or_else(|_| meta.modified())?;
        shots.push(ScreenshotInfo {
            filename,
            created: created.into(),
            size: meta.len(),
        });
    }

    shots.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.filename.cmp(&a.filename)));
    Ok(shots)
}

/// Resolves `name` to a file inside `dir`, refusing anything that would
/// escape it.
pub fn resolve(dir: &Path, name: &str) -> Result<PathBuf, ScreenshotError> {
    if !is_screenshot_name(name) {
        return Err(ScreenshotError::InvalidName(name.to_string()));
    }
    let not_found = || ScreenshotError::NotFound(name.to_string());
    let root = dunce::canonicalize(dir).map_err(|_| not_found())?;
    let path = dunce::canonicalize(root.join(name)).map_err(|_| not_found())?;
    if !path.starts_with(&root) || !path.is_file() {
        return Err(not_found());
    }
    Ok(path)
}
