//! Atomic file writes.
//!
//! Contents go to `<name>.tmp` next to the target, are fsynced, then renamed
//! over the target. A failed write removes the temp file, so a crash or error
//! leaves either the old file or the new one and nothing else.

use std::ffi::OsStr;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Write `contents` to `path` atomically, creating parent directories.
///
/// # Errors
///
/// Returns the underlying I/O error. The temp file is removed on failure.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = tmp_path_for(path);
    let result = write_then_rename(&tmp_path, path, contents);
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result
}

/// `dir/name.ext` becomes `dir/name.ext.tmp`.
pub(crate) fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or(OsStr::new("")).to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_then_rename(tmp_path: &Path, path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(tmp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    std::fs::rename(tmp_path, path)
}
