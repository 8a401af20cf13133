//! Dump file naming and opening

use crate::error::{Result, SessionError};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tracing::{debug, info};

/// Placeholder replaced by the local date and time
pub const TIME_PLACEHOLDER: &str = "%t";

/// Format substituted for [`TIME_PLACEHOLDER`]
pub const TIME_FORMAT: &str = "%Y-%m-%d_%H_%M_%S";

/// Resolve a dump path template
///
/// The last `%t` is replaced with `now`. When the result already exists,
/// `-<sequence>` is inserted before the extension (bumped until free), so two
/// writers started within the same second never share a file.
pub fn resolve_dump_path(template: &str, now: DateTime<Local>, sequence: usize) -> PathBuf {
    let resolved = match template.rfind(TIME_PLACEHOLDER) {
        Some(pos) => format!(
            "{}{}{}",
            &template[..pos],
            now.format(TIME_FORMAT),
            &template[pos + TIME_PLACEHOLDER.len()..]
        ),
        None => template.to_string(),
    };

    let path = PathBuf::from(resolved);
    if !path.exists() {
        return path;
    }

    let mut n = sequence;
    loop {
        let candidate = with_suffix(&path, n);
        if !candidate.exists() {
            debug!("{} exists, using {}", path.display(), candidate.display());
            return candidate;
        }
        n += 1;
    }
}

fn with_suffix(path: &Path, n: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}-{}.{}", stem, n, ext.to_string_lossy()),
        None => format!("{}-{}", stem, n),
    };
    path.with_file_name(name)
}

/// Create (or truncate) a dump file
pub async fn open_dump_file(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .await
        .map_err(|source| SessionError::Sink {
            path: path.to_path_buf(),
            source,
        })?;
    info!("Dump file opened: {}", path.display());
    Ok(file)
}
