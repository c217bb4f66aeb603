//! Where release metadata comes from

use async_trait::async_trait;
use fetchup_errors::{Error, InstallError};
use fetchup_net::{fetch_json, NetClient};
use fetchup_types::{UpdatePackage, Version};
use serde::Deserialize;
use tracing::debug;

/// Release manifest as published by the update server
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseManifest {
    pub version: String,
    pub download_url: String,
    pub checksum: String,
}

impl ReleaseManifest {
    /// Validate the manifest into a package descriptor
    ///
    /// # Errors
    ///
    /// Returns `InstallError::InvalidRelease` if the version is not semver or
    /// a field is empty.
    pub fn into_package(self) -> Result<UpdatePackage, Error> {
        let version = Version::parse(self.version.trim()).map_err(|e| InstallError::InvalidRelease {
            message: format!("version {:?}: {e}", self.version),
        })?;
        if self.download_url.trim().is_empty() {
            return Err(InstallError::InvalidRelease {
                message: "missing download URL".to_string(),
            }
            .into());
        }
        if self.checksum.trim().is_empty() {
            return Err(InstallError::InvalidRelease {
                message: "missing checksum".to_string(),
            }
            .into());
        }

        Ok(UpdatePackage {
            version,
            download_url: self.download_url,
            checksum: self.checksum.trim().to_string(),
            local_path: None,
        })
    }
}

/// Provides the newest published release
#[async_trait]
pub trait VersionSource: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the release metadata cannot be fetched or is invalid.
    async fn latest(&self) -> Result<UpdatePackage, Error>;
}

/// Fetches a JSON release manifest over HTTP
#[derive(Debug, Clone)]
pub struct HttpVersionSource {
    client: NetClient,
    url: String,
}

impl HttpVersionSource {
    pub fn new(client: NetClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl VersionSource for HttpVersionSource {
    async fn latest(&self) -> Result<UpdatePackage, Error> {
        debug!(url = %self.url, "fetching release manifest");
        let manifest: ReleaseManifest = fetch_json(&self.client, &self.url).await?;
        manifest.into_package()
    }
}

/// Fixed release, for embedding and tests
#[derive(Debug, Clone)]
pub struct StaticVersionSource {
    package: UpdatePackage,
}

impl StaticVersionSource {
    #[must_use]
    pub fn new(package: UpdatePackage) -> Self {
        Self { package }
    }
}

#[async_trait]
impl VersionSource for StaticVersionSource {
    async fn latest(&self) -> Result<UpdatePackage, Error> {
        Ok(self.package.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetchup_errors::ErrorKind;

    fn manifest(version: &str, checksum: &str) -> ReleaseManifest {
        ReleaseManifest {
            version: version.to_string(),
            download_url: "https://example.com/app-2.0.0.zip".to_string(),
            checksum: checksum.to_string(),
        }
    }

    #[test]
    fn manifest_parses_into_package() {
        let package = manifest(" 2.0.0 ", "sha256:abc123").into_package().unwrap();
        assert_eq!(package.version, Version::new(2, 0, 0));
        assert_eq!(package.checksum, "sha256:abc123");
        assert!(package.local_path.is_none());
    }

    #[test]
    fn invalid_manifests_are_rejected() {
        let err = manifest("2.0", "abc123").into_package().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InstallFailed);
        assert!(manifest("2.0.0", "  ").into_package().is_err());
    }

    #[test]
    fn manifest_uses_camel_case_fields() {
        let manifest: ReleaseManifest = serde_json::from_str(
            r#"{"version":"1.2.3","downloadUrl":"https://example.com/x.zip","checksum":"ff"}"#,
        )
        .unwrap();
        assert_eq!(manifest.download_url, "https://example.com/x.zip");
    }
}
