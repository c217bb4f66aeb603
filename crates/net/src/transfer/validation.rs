//! URL validation and HTTP response validation for transfers

use fetchup_errors::{Error, NetworkError};
use reqwest::StatusCode;
use url::Url;

/// Validate URL and check for supported protocols
///
/// # Errors
///
/// Returns `InvalidUrl` for malformed input and `UnsupportedProtocol` for
/// anything other than http and https.
pub fn validate_url(url: &str) -> Result<Url, Error> {
    let parsed = Url::parse(url).map_err(|e| NetworkError::InvalidUrl(format!("{url}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(NetworkError::UnsupportedProtocol {
            protocol: scheme.to_string(),
        }
        .into()),
    }
}

/// What to do with a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ResponsePlan {
    /// Append the body at the requested offset
    Append,
    /// The server sent the whole file; truncate and write from zero
    Restart,
    /// The range could not be satisfied; ask again without a range
    Retry416,
}

/// Validate HTTP response for a transfer
pub(super) fn plan_response(status: StatusCode, is_resume: bool) -> Result<ResponsePlan, Error> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        // Caller fills in Retry-After
        return Err(NetworkError::RateLimited { seconds: 0 }.into());
    }
    if is_resume {
        match status {
            StatusCode::PARTIAL_CONTENT => return Ok(ResponsePlan::Append),
            StatusCode::RANGE_NOT_SATISFIABLE => return Ok(ResponsePlan::Retry416),
            s if s.is_success() => return Ok(ResponsePlan::Restart),
            _ => {}
        }
    } else if status.is_success() {
        return Ok(ResponsePlan::Restart);
    }

    Err(NetworkError::HttpError {
        status: status.as_u16(),
        message: status.to_string(),
    }
    .into())
}
