use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{JgpError, Result};

/// What happened to a local folder during cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    Absent,
}

/// Resolve `path` against the working directory
pub fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Create a bind-mount source ahead of time so the daemon does not create
/// it as root. Returns the absolute path.
pub fn ensure_dir(path: &Path) -> Result<PathBuf> {
    let path = absolute(path)?;
    std::fs::create_dir_all(&path)?;
    Ok(path)
}

pub fn remove_folder(path: &Path) -> Result<Removal> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(Removal::Removed),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Removal::Absent),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(JgpError::RemovePermission {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(JgpError::Io(e)),
    }
}

/// Hand everything under `path` to the owner of the working directory.
///
/// Returns the number of entries that could not be changed; root-owned
/// files written by a container can only be fixed when running as root.
#[cfg(unix)]
pub fn repair_ownership(path: &Path) -> Result<usize> {
    use std::os::unix::fs::MetadataExt;

    let owner = std::fs::metadata(std::env::current_dir()?)?;
    repair_ownership_to(path, owner.uid(), owner.gid())
}

#[cfg(unix)]
fn repair_ownership_to(path: &Path, uid: u32, gid: u32) -> Result<usize> {
    use std::os::unix::fs::MetadataExt;

    let mut failures = 0;

    for entry in walkdir::WalkDir::new(path) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable entry");
                failures += 1;
                continue;
            }
        };

        let meta = entry.path().symlink_metadata()?;
        if meta.uid() == uid && meta.gid() == gid {
            continue;
        }

        if let Err(e) = std::os::unix::fs::lchown(entry.path(), Some(uid), Some(gid)) {
            tracing::debug!(path = %entry.path().display(), error = %e, "chown failed");
            failures += 1;
        }
    }

    Ok(failures)
}

#[cfg(not(unix))]
pub fn repair_ownership(_path: &Path) -> Result<usize> {
    Ok(0)
}
