//! Async filesystem wrappers used by the download and catalog code.
//!
//! Collections live as plain directories full of media, temp files and one
//! manifest, so most call sites want the same three things: the touched path
//! in any error, size checks that answer "is this a plausible media file",
//! and deletes that shrug when the file is already gone.

use std::path::Path;

use crate::{Error, Result};

/// Tag an IO failure with the operation and the path it touched.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Create `path` and any missing parents.
pub async fn ensure_dir_all(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error("creating directory", path, e))
}

/// Make sure the directory a file is about to be written into exists.
pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    ensure_dir_all(parent).await
}

/// Byte size of a regular file, `None` for anything else (missing,
/// directory, broken symlink).
pub async fn file_size(path: &Path) -> Option<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(meta.len()),
        _ => None,
    }
}

/// Delete a file; a file that is already gone counts as deleted.
pub async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error("removing file", path, e)),
    }
}
