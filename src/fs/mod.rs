//! File system helpers for the coordination document
//!
//! The document is only ever replaced whole: the new contents go to a
//! temporary file in the same directory, are flushed to disk, and then
//! renamed over the old file. Readers therefore see either the previous
//! document or the new one, never a partial write.
//!
//! # Examples
//!
//! ```rust,no_run
//! use agent_mesh::fs::{read_optional, write_atomic};
//! use std::path::Path;
//!
//! fn main() -> std::io::Result<()> {
//!     let path = Path::new(".agent-mesh/state.json");
//!     write_atomic(path, b"{}")?;
//!     assert_eq!(read_optional(path)?.as_deref(), Some("{}"));
//!     Ok(())
//! }
//! ```

use chrono::Utc;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Directory that holds `path`, treating a bare file name as the current directory
pub fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Create the directory holding `path` if it does not exist yet
pub fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(parent_dir(path))
}

/// Read a file to a string, returning `None` when it does not exist
pub fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Replace `path` with `contents` via write-to-temp-then-rename
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    ensure_parent_dir(path)?;
    let mut tmp = NamedTempFile::new_in(parent_dir(path))?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

/// Copy an unreadable file aside so the next write does not destroy it
///
/// Returns the path of the copy.
pub fn quarantine(path: &Path) -> io::Result<PathBuf> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let target = parent_dir(path).join(format!("{file_name}.corrupt-{}", Utc::now().timestamp()));
    fs::copy(path, &target)?;
    Ok(target)
}
