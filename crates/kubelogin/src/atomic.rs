//! Crash-safe file replacement
//!
//! Every write goes to a temporary file in the destination directory, is flushed
//! to disk, and then renamed over the destination. A reader (or a later run after
//! a crash) therefore sees either the old content or the new content in full.

use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

/// Atomically replace `path` with `contents`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    write_atomic_with(path, contents, |_| Ok(()))
}

/// Same as [`write_atomic`], running `before_rename` once the temporary file is
/// fully written and synced but before it replaces `path`.
///
/// An error from `before_rename` aborts the write; the temporary file is removed
/// and `path` is left untouched.
pub fn write_atomic_with<F>(path: &Path, contents: &[u8], before_rename: F) -> io::Result<()>
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    // A symlinked destination is replaced at its target and the link is kept
    let target = match std::fs::canonicalize(path) {
        Ok(resolved) => resolved,
        Err(e) if e.kind() == io::ErrorKind::NotFound => path.to_path_buf(),
        Err(e) => return Err(e),
    };
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;

    if let Ok(metadata) = std::fs::metadata(&target) {
        std::fs::set_permissions(temp.path(), metadata.permissions())?;
    }

    before_rename(temp.path())?;

    temp.persist(&target).map_err(|e| e.error)?;
    tracing::trace!(path = %target.display(), bytes = contents.len(), "File replaced atomically");
    Ok(())
}
