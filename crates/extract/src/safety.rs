//! Path security validation for archive entries
//!
//! Every entry name and link target is checked before anything is written,
//! so a rejected archive leaves the destination untouched.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

const WINDOWS_DEVICES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const MAX_COMPONENT_LEN: usize = 255;

/// Validate an entry name and return it as a normalized relative path
///
/// # Errors
///
/// Returns the reason when the name is empty, absolute, climbs out with
/// `..`, or contains a suspicious component.
pub fn validate_safe_path(entry: &str) -> Result<PathBuf, String> {
    if entry.is_empty() {
        return Err("empty path not allowed".to_string());
    }
    if entry.contains('\0') {
        return Err("NUL byte in path".to_string());
    }
    if entry.starts_with('/') || entry.starts_with('\\') {
        return Err("absolute path not allowed".to_string());
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(entry).components() {
        match component {
            Component::Normal(name) => {
                validate_path_component(&name.to_string_lossy())?;
                normalized.push(name);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                return Err("parent directory reference not allowed".to_string());
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err("absolute path not allowed".to_string());
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err("path resolves to the destination itself".to_string());
    }
    Ok(normalized)
}

fn validate_path_component(component: &str) -> Result<(), String> {
    if component.chars().any(|c| ('\x01'..='\x07').contains(&c)) {
        return Err(format!("suspicious character in path component: {component:?}"));
    }

    // Drive letters such as `C:` only parse as prefixes on Windows
    if component.len() >= 2 && component.as_bytes()[1] == b':' && component.as_bytes()[0].is_ascii_alphabetic() {
        return Err(format!("drive prefix not allowed: {component}"));
    }

    let upper = component.to_ascii_uppercase();
    let stem = upper.split('.').next().unwrap_or_default();
    if WINDOWS_DEVICES.contains(&stem) {
        return Err(format!("device name not allowed: {component}"));
    }

    if component.len() > MAX_COMPONENT_LEN {
        return Err(format!(
            "path component too long: {} characters",
            component.len()
        ));
    }

    Ok(())
}

/// Whether an entry names the archive root itself, such as `./`
#[must_use]
pub fn is_root_entry(entry: &str) -> bool {
    !entry.is_empty()
        && Path::new(entry)
            .components()
            .all(|c| matches!(c, Component::CurDir))
}

/// Validate a symlink target, resolved from the directory holding the link
///
/// # Errors
///
/// Returns the reason when the target is absolute or climbs above the
/// extraction root.
pub fn validate_symlink_target(link: &Path, target: &Path) -> Result<(), String> {
    let base = link.parent().unwrap_or_else(|| Path::new(""));
    resolve_within(base, target)
        .map(|_| ())
        .map_err(|reason| format!("symlink target {}: {reason}", target.display()))
}

/// Validate a hard link target, which tar resolves from the archive root
///
/// # Errors
///
/// Returns the reason when the target is not a safe relative path.
pub fn validate_hardlink_target(target: &Path) -> Result<(), String> {
    resolve_within(Path::new(""), target)
        .map(|_| ())
        .map_err(|reason| format!("hard link target {}: {reason}", target.display()))
}

/// Symlinks an archive will create, keyed by their normalized entry path
///
/// Lexical checks only hold while no entry is written through, or resolved
/// across, another link from the same archive.
#[derive(Debug, Default)]
pub struct PlannedLinks(HashSet<PathBuf>);

impl PlannedLinks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a link, returning `false` if the path was already a link
    pub fn insert(&mut self, link: PathBuf) -> bool {
        self.0.insert(link)
    }

    /// Check an entry that is not itself a planned symlink
    ///
    /// # Errors
    ///
    /// Returns the reason when the entry is, or lies beneath, a planned link.
    pub fn check_entry(&self, path: &Path) -> Result<(), String> {
        match path.ancestors().find(|a| self.0.contains(*a)) {
            Some(link) => Err(format!("written through symlink {}", link.display())),
            None => Ok(()),
        }
    }

    /// Check a symlink entry and its target
    ///
    /// # Errors
    ///
    /// Returns the reason when the link lies beneath another planned link or
    /// its target resolves through one.
    pub fn check_link(&self, link: &Path, target: &Path) -> Result<(), String> {
        if let Some(parent) = link.parent() {
            self.check_entry(parent)?;
        }
        self.check_target(link.parent().unwrap_or_else(|| Path::new("")), target)
    }

    /// Check a hard link target, resolved from the archive root
    ///
    /// # Errors
    ///
    /// Returns the reason when the target resolves through a planned link.
    pub fn check_hardlink(&self, target: &Path) -> Result<(), String> {
        self.check_target(Path::new(""), target)
    }

    fn check_target(&self, base: &Path, target: &Path) -> Result<(), String> {
        let mut resolved: PathBuf = normal_components(base).collect();
        for component in target.components() {
            if !resolved.as_os_str().is_empty() && self.0.contains(&resolved) {
                return Err(format!(
                    "target {} resolves through symlink {}",
                    target.display(),
                    resolved.display()
                ));
            }
            match component {
                Component::Normal(name) => resolved.push(name),
                Component::ParentDir => {
                    resolved.pop();
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn normal_components(path: &Path) -> impl Iterator<Item = &std::ffi::OsStr> {
    path.components().filter_map(|c| match c {
        Component::Normal(name) => Some(name),
        _ => None,
    })
}

/// Lexically resolve `target` against `base`, refusing to leave the root
fn resolve_within(base: &Path, target: &Path) -> Result<PathBuf, String> {
    if target.as_os_str().is_empty() {
        return Err("empty target".to_string());
    }
    let mut resolved: Vec<&std::ffi::OsStr> = normal_components(base).collect();

    for component in target.components() {
        match component {
            Component::Normal(name) => resolved.push(name),
            Component::CurDir => {}
            Component::ParentDir => {
                if resolved.pop().is_none() {
                    return Err("escapes the destination".to_string());
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err("absolute target not allowed".to_string());
            }
        }
    }

    Ok(resolved.iter().collect())
}
