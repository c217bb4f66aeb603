//! Zip backend

use crate::safety::{is_root_entry, validate_safe_path, validate_symlink_target, PlannedLinks};
use crate::{
    corrupt, create_destination, ensure_no_symlink_ancestors, unsafe_entry, write_error,
    ExtractContext, Unpacked,
};
use fetchup_errors::Error;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

enum Kind {
    Dir,
    File,
    Symlink,
}

struct Planned {
    index: usize,
    name: String,
    path: PathBuf,
    kind: Kind,
}

pub(crate) fn unpack(archive: &Path, destination: &Path, ctx: &ExtractContext) -> Result<Unpacked, Error> {
    let file = File::open(archive).map_err(|e| Error::io_with_path(&e, archive))?;
    let mut zip = ZipArchive::new(file).map_err(|e| corrupt(archive, e))?;

    let plan = plan(&mut zip, archive)?;
    create_destination(destination)?;

    let total = plan.len();
    let mut unpacked = Unpacked::default();
    for (position, entry) in plan.iter().enumerate() {
        ctx.check_cancelled(archive)?;

        let mut source = zip.by_index(entry.index).map_err(|e| corrupt(archive, e))?;
        let out = destination.join(&entry.path);
        let include_self = !matches!(entry.kind, Kind::Symlink);
        ensure_no_symlink_ancestors(destination, &entry.path, include_self, archive, &entry.name)?;
        match entry.kind {
            Kind::Dir => {
                std::fs::create_dir_all(&out).map_err(|e| write_error(&e, &out))?;
            }
            Kind::File => {
                ensure_parent(&out)?;
                unpacked.bytes += copy_entry(&mut source, &out, archive)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    // Only permission bits; setuid and friends are dropped
                    if let Some(mode) = source.unix_mode() {
                        let _ = std::fs::set_permissions(
                            &out,
                            std::fs::Permissions::from_mode(mode & 0o777),
                        );
                    }
                }
            }
            Kind::Symlink => {
                let mut target = String::new();
                source
                    .read_to_string(&mut target)
                    .map_err(|e| corrupt(archive, e))?;
                ensure_parent(&out)?;
                create_symlink(Path::new(&target), &out)?;
            }
        }

        unpacked.entries += 1;
        ctx.entry_extracted(&entry.path, position, total);
    }

    Ok(unpacked)
}

/// List and validate every entry without writing anything
///
/// Symlinks are collected first so no entry, in any order, can be written
/// through a link the archive itself creates.
fn plan(zip: &mut ZipArchive<File>, archive: &Path) -> Result<Vec<Planned>, Error> {
    let mut plan = Vec::with_capacity(zip.len());
    let mut targets = Vec::new();
    let mut links = PlannedLinks::new();

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|e| corrupt(archive, e))?;
        let name = entry.name().to_string();
        if entry.is_dir() && is_root_entry(&name) {
            continue;
        }
        let path = validate_safe_path(&name).map_err(|reason| unsafe_entry(archive, &name, reason))?;

        let kind = if entry.is_dir() {
            Kind::Dir
        } else if entry.is_symlink() {
            let mut target = String::new();
            entry
                .read_to_string(&mut target)
                .map_err(|e| corrupt(archive, e))?;
            validate_symlink_target(&path, Path::new(&target))
                .map_err(|reason| unsafe_entry(archive, &name, reason))?;
            if !links.insert(path.clone()) {
                return Err(unsafe_entry(archive, &name, "duplicate symlink".to_string()));
            }
            targets.push((plan.len(), PathBuf::from(target)));
            Kind::Symlink
        } else {
            Kind::File
        };
        plan.push(Planned {
            index,
            name,
            path,
            kind,
        });
    }

    for entry in plan.iter().filter(|p| !matches!(p.kind, Kind::Symlink)) {
        links
            .check_entry(&entry.path)
            .map_err(|reason| unsafe_entry(archive, &entry.name, reason))?;
    }
    for (position, target) in &targets {
        let entry = &plan[*position];
        links
            .check_link(&entry.path, target)
            .map_err(|reason| unsafe_entry(archive, &entry.name, reason))?;
    }
    Ok(plan)
}

fn ensure_parent(path: &Path) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| write_error(&e, parent))?;
    }
    Ok(())
}

/// Copy one entry, telling read failures (corrupt archive) from write failures
fn copy_entry(source: &mut impl Read, out: &Path, archive: &Path) -> Result<u64, Error> {
    let mut file = File::create(out).map_err(|e| write_error(&e, out))?;
    let mut buffer = vec![0u8; 64 * 1024];
    let mut written = 0u64;
    loop {
        let n = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(corrupt(archive, e)),
        };
        file.write_all(&buffer[..n])
            .map_err(|e| write_error(&e, out))?;
        written += n as u64;
    }
    file.flush().map_err(|e| write_error(&e, out))?;
    Ok(written)
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> Result<(), Error> {
    std::os::unix::fs::symlink(target, link).map_err(|e| write_error(&e, link))
}

#[cfg(not(unix))]
fn create_symlink(target: &Path, link: &Path) -> Result<(), Error> {
    tracing::warn!(link = %link.display(), target = %target.display(), "symlinks unsupported, skipping");
    Ok(())
}
