//! HTTP client with connection pooling and retry logic

use fetchup_config::NetworkConfig;
use fetchup_errors::{Error, NetworkError};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;

/// Network client configuration
#[derive(Debug, Clone)]
pub struct NetConfig {
    pub connect_timeout: Duration,
    pub pool_idle_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    /// Extra attempts for small metadata requests; transfers retry in the manager
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub user_agent: String,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 10,
            retry_count: 2,
            retry_delay: Duration::from_millis(500),
            user_agent: format!("fetchup/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl From<&NetworkConfig> for NetConfig {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            user_agent: config.user_agent.clone(),
            ..Self::default()
        }
    }
}

/// HTTP client wrapper with retry logic
///
/// No whole-request timeout is set: large transfers are bounded by the
/// idle timeout of the transfer engine instead.
#[derive(Clone, Debug)]
pub struct NetClient {
    client: Client,
    config: NetConfig,
}

impl NetClient {
    /// Create a new network client
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to initialize.
    pub fn new(config: NetConfig) -> Result<Self, Error> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| NetworkError::TlsError(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Create with default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created with default settings.
    pub fn with_defaults() -> Result<Self, Error> {
        Self::new(NetConfig::default())
    }

    /// Execute a GET request with retries
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails after all retry attempts.
    pub async fn get(&self, url: &str) -> Result<Response, Error> {
        self.retry_request(|| self.client.get(url).send()).await
    }

    /// Start building a GET request without retries
    #[must_use]
    pub fn request(&self, url: &str) -> RequestBuilder {
        self.client.get(url)
    }

    /// Execute a request with retries
    async fn retry_request<F, Fut>(&self, mut f: F) -> Result<Response, Error>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Response, reqwest::Error>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay * attempt).await;
            }

            match f().await {
                Ok(response) => {
                    if response.status() == StatusCode::TOO_MANY_REQUESTS {
                        return Err(NetworkError::RateLimited {
                            seconds: retry_after_secs(&response),
                        }
                        .into());
                    }
                    return Ok(response);
                }
                Err(e) => {
                    let retry = Self::should_retry(&e);
                    last_error = Some(e);
                    if !retry {
                        break;
                    }
                }
            }
        }

        Err(match last_error {
            Some(e) => map_reqwest_error(&e),
            None => NetworkError::DownloadFailed("Unknown error".to_string()).into(),
        })
    }

    /// Determine if an error should be retried
    fn should_retry(error: &reqwest::Error) -> bool {
        error.is_timeout()
            || error.is_connect()
            || error.status().is_none_or(|s| s.is_server_error())
    }
}

/// Seconds announced by a `Retry-After` header, zero when absent
pub(crate) fn retry_after_secs(response: &Response) -> u64 {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0)
}

/// Classify a reqwest failure
pub(crate) fn map_reqwest_error(e: &reqwest::Error) -> Error {
    let url = e.url().map(ToString::to_string).unwrap_or_default();
    if e.is_timeout() {
        NetworkError::Timeout { url, seconds: 0 }.into()
    } else if e.is_connect() {
        NetworkError::ConnectionRefused(e.to_string()).into()
    } else if e.is_builder() {
        NetworkError::InvalidUrl(e.to_string()).into()
    } else if let Some(status) = e.status() {
        NetworkError::HttpError {
            status: status.as_u16(),
            message: status.to_string(),
        }
        .into()
    } else {
        NetworkError::DownloadFailed(e.to_string()).into()
    }
}
