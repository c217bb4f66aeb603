//! Content digest of a whole directory tree

use crate::{Hash, HashAlgorithm, Hasher, CHUNK_SIZE};
use fetchup_errors::{Error, StorageError};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncReadExt;

enum EntryKind {
    Dir,
    File,
    Symlink(PathBuf),
}

/// Hash a directory's layout and contents.
///
/// Entries are visited in sorted relative-path order, so the digest depends
/// only on names, entry kinds, file bytes and symlink targets. Timestamps and
/// permissions are ignored.
///
/// # Errors
/// Returns an error if the directory cannot be walked or a file cannot be read.
pub async fn digest_tree(root: &Path) -> Result<Hash, Error> {
    let mut entries = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut read_dir = fs::read_dir(&dir)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, &dir))?;
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| Error::io_with_path(&e, &dir))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| Error::io_with_path(&e, &path))?;
            let kind = if file_type.is_symlink() {
                EntryKind::Symlink(
                    fs::read_link(&path)
                        .await
                        .map_err(|e| Error::io_with_path(&e, &path))?,
                )
            } else if file_type.is_dir() {
                stack.push(path.clone());
                EntryKind::Dir
            } else {
                EntryKind::File
            };
            let relative = path
                .strip_prefix(root)
                .map_err(|_| StorageError::IoError {
                    message: format!("failed to compute relative path for {}", path.display()),
                })?
                .to_string_lossy()
                .replace('\\', "/");
            entries.push((relative, path, kind));
        }
    }

    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Hasher::new(HashAlgorithm::Blake3);
    let mut buffer = vec![0; CHUNK_SIZE];
    for (relative, path, kind) in entries {
        hasher.update(relative.as_bytes());
        hasher.update(&[0]);
        match kind {
            EntryKind::Dir => hasher.update(b"d"),
            EntryKind::Symlink(target) => {
                hasher.update(b"l");
                hasher.update(target.to_string_lossy().as_bytes());
            }
            EntryKind::File => {
                hasher.update(b"f");
                let mut file = File::open(&path)
                    .await
                    .map_err(|e| StorageError::from_io_with_path(&e, &path))?;
                let mut length = 0u64;
                loop {
                    let n = file
                        .read(&mut buffer)
                        .await
                        .map_err(|e| Error::io_with_path(&e, &path))?;
                    if n == 0 {
                        break;
                    }
                    length += n as u64;
                    hasher.update(&buffer[..n]);
                }
                hasher.update(&length.to_le_bytes());
            }
        }
        hasher.update(&[0]);
    }

    Ok(hasher.finalize())
}
