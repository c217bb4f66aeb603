#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Self-update workflow for fetchup
//!
//! [`UpdateInstaller`] checks a [`VersionSource`] for newer releases,
//! downloads packages through the download manager and verifies their
//! checksum, then installs them behind a durable backup. A failed install
//! is rolled back automatically; any backup can also be restored manually.

pub mod backup;
mod fsops;
mod installer;
pub mod source;

pub use backup::BackupRegistry;
pub use installer::{InstallerConfig, UpdateInstaller};
pub use source::{HttpVersionSource, ReleaseManifest, StaticVersionSource, VersionSource};
