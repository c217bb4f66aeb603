//! Tar and tar.gz backend

use crate::safety::{
    is_root_entry, validate_hardlink_target, validate_safe_path, validate_symlink_target,
    PlannedLinks,
};
use crate::{
    corrupt, create_destination, ensure_no_symlink_ancestors, unsafe_entry, write_error,
    ExtractContext, Unpacked,
};
use fetchup_errors::Error;
use fetchup_types::ArchiveFormat;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tar::{Archive, EntryType};

struct Planned {
    name: String,
    path: PathBuf,
    symlink: bool,
    /// Pax global headers and the `./` root entry write nothing
    skip: bool,
}

pub(crate) fn unpack(
    format: ArchiveFormat,
    archive: &Path,
    destination: &Path,
    ctx: &ExtractContext,
) -> Result<Unpacked, Error> {
    let plan = plan(format, archive)?;
    create_destination(destination)?;

    let mut tar = open(format, archive)?;
    tar.set_preserve_permissions(false);
    tar.set_preserve_mtime(true);
    tar.set_unpack_xattrs(false);
    tar.set_overwrite(true);

    let total = plan.iter().filter(|p| !p.skip).count();
    let mut unpacked = Unpacked::default();
    let mut entries = tar.entries().map_err(|e| corrupt(archive, e))?;

    for planned in &plan {
        ctx.check_cancelled(archive)?;

        let mut entry = entries
            .next()
            .ok_or_else(|| corrupt(archive, "archive changed while extracting"))?
            .map_err(|e| corrupt(archive, e))?;
        if planned.skip {
            continue;
        }
        ensure_no_symlink_ancestors(
            destination,
            &planned.path,
            !planned.symlink,
            archive,
            &planned.name,
        )?;

        let size = if entry.header().entry_type().is_file() {
            entry.header().size().unwrap_or(0)
        } else {
            0
        };
        entry
            .unpack_in(destination)
            .map_err(|e| classify_unpack_error(&e, archive, &destination.join(&planned.path)))?;

        unpacked.bytes += size;
        ctx.entry_extracted(&planned.path, unpacked.entries, total);
        unpacked.entries += 1;
    }

    Ok(unpacked)
}

fn open(format: ArchiveFormat, archive: &Path) -> Result<Archive<Box<dyn Read>>, Error> {
    let file = File::open(archive).map_err(|e| Error::io_with_path(&e, archive))?;
    let reader: Box<dyn Read> = match format {
        ArchiveFormat::TarGz => Box::new(GzDecoder::new(BufReader::new(file))),
        _ => Box::new(BufReader::new(file)),
    };
    Ok(Archive::new(reader))
}

/// List and validate every entry without writing anything
fn plan(format: ArchiveFormat, archive: &Path) -> Result<Vec<Planned>, Error> {
    let mut tar = open(format, archive)?;
    let mut plan = Vec::new();
    let mut links = PlannedLinks::new();
    let mut targets = Vec::new();

    for entry in tar.entries().map_err(|e| corrupt(archive, e))? {
        let entry = entry.map_err(|e| corrupt(archive, e))?;
        let raw = entry.path().map_err(|e| corrupt(archive, e))?;
        let name = raw.to_string_lossy().into_owned();
        let entry_type = entry.header().entry_type();

        if entry_type == EntryType::XGlobalHeader
            || (entry_type == EntryType::Directory && is_root_entry(&name))
        {
            plan.push(Planned {
                name,
                path: PathBuf::new(),
                symlink: false,
                skip: true,
            });
            continue;
        }

        let path = validate_safe_path(&name).map_err(|reason| unsafe_entry(archive, &name, reason))?;
        let symlink = entry_type == EntryType::Symlink;

        match entry_type {
            EntryType::Symlink | EntryType::Link => {
                let target = entry
                    .link_name()
                    .map_err(|e| corrupt(archive, e))?
                    .ok_or_else(|| unsafe_entry(archive, &name, "link without target".to_string()))?
                    .into_owned();
                let check = if symlink {
                    validate_symlink_target(&path, &target)
                } else {
                    validate_hardlink_target(&target)
                };
                check.map_err(|reason| unsafe_entry(archive, &name, reason))?;
                if symlink && !links.insert(path.clone()) {
                    return Err(unsafe_entry(archive, &name, "duplicate symlink".to_string()));
                }
                targets.push((plan.len(), target));
            }
            EntryType::Char | EntryType::Block | EntryType::Fifo => {
                return Err(unsafe_entry(
                    archive,
                    &name,
                    "device and fifo entries are not allowed".to_string(),
                ));
            }
            _ => {}
        }

        plan.push(Planned {
            name,
            path,
            symlink,
            skip: false,
        });
    }

    // Symlinks are all known now, so entry order cannot hide an escape
    for entry in plan.iter().filter(|p| !p.skip && !p.symlink) {
        links
            .check_entry(&entry.path)
            .map_err(|reason| unsafe_entry(archive, &entry.name, reason))?;
    }
    for (position, target) in &targets {
        let entry = &plan[*position];
        let check = if entry.symlink {
            links.check_link(&entry.path, target)
        } else {
            links.check_hardlink(target)
        };
        check.map_err(|reason| unsafe_entry(archive, &entry.name, reason))?;
    }

    Ok(plan)
}

fn classify_unpack_error(err: &io::Error, archive: &Path, out: &Path) -> Error {
    match err.kind() {
        io::ErrorKind::StorageFull | io::ErrorKind::PermissionDenied => write_error(err, out),
        _ => corrupt(archive, err),
    }
}
