#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Network operations for fetchup
//!
//! This crate holds the pooled HTTP client, small metadata fetches used by
//! the update checker, and the resumable transfer engine used by the
//! download manager.

mod client;
pub mod retry;
pub mod transfer;

pub use client::{NetClient, NetConfig};
pub use transfer::{
    validate_url, ContentRange, HttpTransport, TransferConfig, TransferError, TransferOutcome,
    TransferProgress, TransferRequest, Transport,
};

use fetchup_errors::{Error, NetworkError};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

/// Fetch text content from a URL
///
/// # Errors
///
/// Returns an error if the HTTP request fails, the server returns an error status,
/// or the response body cannot be decoded as text.
pub async fn fetch_text(client: &NetClient, url: &str) -> Result<String, Error> {
    debug!(url, "fetching text");

    let response = client.get(url).await?;

    if !response.status().is_success() {
        return Err(NetworkError::HttpError {
            status: response.status().as_u16(),
            message: response.status().to_string(),
        }
        .into());
    }

    response
        .text()
        .await
        .map_err(|e| NetworkError::DownloadFailed(e.to_string()).into())
}

/// Fetch and decode a JSON document
///
/// # Errors
///
/// Returns an error if the request fails or the body is not valid JSON for `T`.
pub async fn fetch_json<T: DeserializeOwned>(client: &NetClient, url: &str) -> Result<T, Error> {
    let body = fetch_text(client, url).await?;
    serde_json::from_str(&body).map_err(|e| {
        NetworkError::DownloadFailed(format!("invalid JSON from {url}: {e}")).into()
    })
}

/// Parse and validate a URL
///
/// # Errors
///
/// Returns an error if the URL string is malformed or invalid according to RFC 3986.
pub fn parse_url(url: &str) -> Result<Url, Error> {
    Url::parse(url).map_err(|e| NetworkError::InvalidUrl(e.to_string()).into())
}
