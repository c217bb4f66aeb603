//! Directory copies and renames behind installs and rollbacks
//!
//! Everything here is synchronous and meant to run on the blocking pool.

use fetchup_errors::{Error, StorageError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Sibling of `target` with a unique hidden name, on the same filesystem
pub(crate) fn sibling_path(target: &Path, label: &str) -> PathBuf {
    let name = target
        .file_name()
        .map_or_else(|| "install".to_string(), |n| n.to_string_lossy().into_owned());
    let unique = Uuid::new_v4().simple().to_string();
    target.with_file_name(format!(".{name}.{label}-{}", &unique[..8]))
}

/// Recursively copy `src` into a new directory `dst`, flushing every file.
///
/// Returns the number of files and symlinks copied.
pub(crate) fn copy_tree(src: &Path, dst: &Path) -> Result<usize, Error> {
    fs::create_dir_all(dst).map_err(|e| Error::io_with_path(&e, dst))?;
    let mut copied = 0;

    for entry in fs::read_dir(src).map_err(|e| Error::io_with_path(&e, src))? {
        let entry = entry.map_err(|e| Error::io_with_path(&e, src))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|e| Error::io_with_path(&e, &from))?;

        if file_type.is_symlink() {
            copy_symlink(&from, &to)?;
            copied += 1;
        } else if file_type.is_dir() {
            copied += copy_tree(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(|e| Error::io_with_path(&e, &to))?;
            fs::File::open(&to)
                .and_then(|file| file.sync_all())
                .map_err(|e| Error::io_with_path(&e, &to))?;
            copied += 1;
        }
    }

    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> Result<(), Error> {
    let target = fs::read_link(from).map_err(|e| Error::io_with_path(&e, from))?;
    std::os::unix::fs::symlink(&target, to).map_err(|e| Error::io_with_path(&e, to))
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> Result<(), Error> {
    // Follow the link where symlinks cannot be recreated
    fs::copy(from, to)
        .map(|_| ())
        .map_err(|e| Error::io_with_path(&e, to))
}

/// Count files and symlinks below `root`
pub(crate) fn count_files(root: &Path) -> Result<usize, Error> {
    let mut count = 0;
    for entry in fs::read_dir(root).map_err(|e| Error::io_with_path(&e, root))? {
        let entry = entry.map_err(|e| Error::io_with_path(&e, root))?;
        let file_type = entry
            .file_type()
            .map_err(|e| Error::io_with_path(&e, entry.path()))?;
        if file_type.is_dir() {
            count += count_files(&entry.path())?;
        } else {
            count += 1;
        }
    }
    Ok(count)
}

pub(crate) fn remove_tree_if_exists(path: &Path) -> Result<(), Error> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io_with_path(&e, path)),
    }
}

/// Best-effort cleanup of leftovers
pub(crate) fn discard(path: &Path) {
    if let Err(e) = remove_tree_if_exists(path) {
        warn!(path = %path.display(), error = %e, "failed to remove leftover directory");
    }
}

/// Replace `live` with the fully prepared `staged` tree using two renames.
///
/// The previous tree is moved aside first and put back if the second rename
/// fails; once the swap succeeds it is deleted.
pub(crate) fn swap_in(staged: &Path, live: &Path) -> Result<(), Error> {
    let retired = sibling_path(live, "old");
    let had_live = live.exists();

    if had_live {
        fs::rename(live, &retired).map_err(|e| rename_failed(&e, live, &retired))?;
    } else if let Some(parent) = live.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io_with_path(&e, parent))?;
    }

    if let Err(e) = fs::rename(staged, live) {
        if had_live {
            if let Err(restore) = fs::rename(&retired, live) {
                warn!(
                    live = %live.display(),
                    retired = %retired.display(),
                    error = %restore,
                    "failed to move previous installation back"
                );
            }
        }
        return Err(rename_failed(&e, staged, live));
    }

    if had_live {
        discard(&retired);
    }
    debug!(live = %live.display(), "swapped in new tree");
    Ok(())
}

fn rename_failed(err: &io::Error, from: &Path, to: &Path) -> Error {
    match err.kind() {
        io::ErrorKind::PermissionDenied | io::ErrorKind::StorageFull => Error::io_with_path(err, from),
        _ => StorageError::AtomicRenameFailed {
            message: format!("{} -> {}: {err}", from.display(), to.display()),
        }
        .into(),
    }
}
