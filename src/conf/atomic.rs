//! Atomic file replacement.

use std::fs;
use std::io::Write;
use std::path::Path;

use tracing::debug;

use crate::{Error, Result};

/// Replace `path` with `contents` without ever exposing a partial file.
///
/// Writes a temp file in the same directory, applies `mode`, syncs it and
/// renames it over `path`. On Unix the directory is synced afterwards so the
/// rename itself survives a crash.
pub fn write_atomic(path: &Path, contents: &str, mode: u32) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    set_mode(tmp.as_file(), mode)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;

    #[cfg(unix)]
    {
        if let Ok(dir) = fs::File::open(dir) {
            let _ = dir.sync_all();
        }
    }

    debug!(path = %path.display(), bytes = contents.len(), mode = format!("{:o}", mode), "Replaced file");
    Ok(())
}

#[cfg(unix)]
fn set_mode(file: &fs::File, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_file: &fs::File, _mode: u32) -> Result<()> {
    Ok(())
}
