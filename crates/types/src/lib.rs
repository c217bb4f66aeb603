#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions for fetchup
//!
//! This crate provides the data model shared by the download manager, the
//! extraction pipeline and the update installer.

pub mod archive;
pub mod download;
pub mod update;

// Re-export commonly used types
pub use archive::{ArchiveFormat, ExtractionReport};
pub use chrono::{DateTime, Utc};
pub use download::{CommandOutcome, DownloadId, DownloadRequest, DownloadState, DownloadTask};
pub use semver::Version;
pub use update::{Backup, BackupStatus, InstallReport, RollbackReport, UpdateCheck, UpdatePackage};
pub use uuid::Uuid;
