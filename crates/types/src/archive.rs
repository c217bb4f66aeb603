//! Archive format detection

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Archive formats the extraction pipeline understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
}

const SUFFIXES: &[(&str, ArchiveFormat)] = &[
    (".tar.gz", ArchiveFormat::TarGz),
    (".tgz", ArchiveFormat::TarGz),
    (".tar", ArchiveFormat::Tar),
    (".zip", ArchiveFormat::Zip),
];

impl ArchiveFormat {
    /// Detect the format from the file extension (case-insensitive)
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        SUFFIXES
            .iter()
            .find(|(suffix, _)| name.ends_with(suffix))
            .map(|(_, format)| *format)
    }

    /// File name with any recognised archive extension removed
    #[must_use]
    pub fn strip_extension(path: &Path) -> String {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let lower = name.to_ascii_lowercase();
        for (suffix, _) in SUFFIXES {
            if lower.ends_with(suffix) && lower.len() > suffix.len() {
                return name[..name.len() - suffix.len()].to_string();
            }
        }
        path.file_stem()
            .map_or(name, |s| s.to_string_lossy().into_owned())
    }
}

/// Outcome of a successful extraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub archive: PathBuf,
    pub destination: PathBuf,
    pub format: ArchiveFormat,
    pub entries: usize,
    pub bytes_written: u64,
    /// Whether the archive was removed afterwards
    pub archive_deleted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_formats() {
        assert_eq!(
            ArchiveFormat::from_path(Path::new("a/b.ZIP")),
            Some(ArchiveFormat::Zip)
        );
        assert_eq!(
            ArchiveFormat::from_path(Path::new("b.tar.gz")),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(
            ArchiveFormat::from_path(Path::new("b.tgz")),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(ArchiveFormat::from_path(Path::new("b.rar")), None);
    }

    #[test]
    fn strips_extensions() {
        assert_eq!(ArchiveFormat::strip_extension(Path::new("app-2.0.tar.gz")), "app-2.0");
        assert_eq!(ArchiveFormat::strip_extension(Path::new("data.zip")), "data");
        assert_eq!(ArchiveFormat::strip_extension(Path::new("notes.txt")), "notes");
    }
}
