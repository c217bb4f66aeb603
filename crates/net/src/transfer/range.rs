//! Range bookkeeping for resumable transfers

use fetchup_errors::Error;
use reqwest::header::{HeaderMap, CONTENT_RANGE};
use std::path::Path;
use tokio::fs;

/// Parsed `Content-Range` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// First byte of the body, absent for `bytes */total`
    pub start: Option<u64>,
    pub total: Option<u64>,
}

impl ContentRange {
    /// Parse `bytes start-end/total`, `bytes start-end/*` or `bytes */total`
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.trim().strip_prefix("bytes")?.trim_start();
        let (range, total) = rest.split_once('/')?;
        let total = match total.trim() {
            "*" => None,
            t => Some(t.parse().ok()?),
        };
        let start = match range.trim() {
            "*" => None,
            r => Some(r.split_once('-')?.0.trim().parse().ok()?),
        };
        Some(Self { start, total })
    }

    pub(super) fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(Self::parse)
    }
}

/// Clamp the requested resume offset to what is actually on disk.
///
/// A checkpoint may lag behind or run ahead of the file; bytes beyond the
/// returned offset are truncated before appending.
pub(super) async fn effective_offset(path: &Path, requested: u64) -> Result<u64, Error> {
    if requested == 0 {
        return Ok(0);
    }
    match fs::metadata(path).await {
        Ok(metadata) => Ok(requested.min(metadata.len())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(Error::io_with_path(&e, path)),
    }
}
