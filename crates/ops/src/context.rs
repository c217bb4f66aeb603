//! Operations context for dependency injection

use fetchup_config::Config;
use fetchup_download::DownloadManager;
use fetchup_errors::Error;
use fetchup_events::{EventBus, EventEmitter};
use fetchup_update::UpdateInstaller;
use std::sync::Arc;

/// Everything a boundary command needs
#[derive(Debug, Clone)]
pub struct OpsCtx {
    pub config: Config,
    pub downloads: DownloadManager,
    pub installer: Arc<UpdateInstaller>,
    /// Bus shared by the manager and the installer
    pub events: EventBus,
}

impl OpsCtx {
    /// Wire up the download manager and installer from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or persisted
    /// state cannot be read.
    pub async fn from_config(config: Config) -> Result<Self, Error> {
        let events = EventBus::new();
        let downloads = DownloadManager::from_config(&config, events.clone()).await?;
        let installer = UpdateInstaller::from_config(&config, downloads.clone()).await?;
        OpsContextBuilder::new()
            .with_config(config)
            .with_event_bus(events)
            .with_downloads(downloads)
            .with_installer(Arc::new(installer))
            .build()
    }

    /// Pause in-flight transfers and persist checkpoints
    ///
    /// # Errors
    ///
    /// Returns an error if the download manager already stopped.
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.downloads.shutdown().await
    }
}

impl EventEmitter for OpsCtx {
    fn event_bus(&self) -> Option<&EventBus> {
        Some(&self.events)
    }
}

/// Builder for operations context
#[derive(Default)]
pub struct OpsContextBuilder {
    config: Option<Config>,
    downloads: Option<DownloadManager>,
    installer: Option<Arc<UpdateInstaller>>,
    events: Option<EventBus>,
}

impl OpsContextBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn with_downloads(mut self, downloads: DownloadManager) -> Self {
        self.downloads = Some(downloads);
        self
    }

    #[must_use]
    pub fn with_installer(mut self, installer: Arc<UpdateInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    /// Set the event bus; defaults to the download manager's bus
    #[must_use]
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the context
    ///
    /// # Errors
    ///
    /// Returns an error if the download manager or installer is missing.
    pub fn build(self) -> Result<OpsCtx, Error> {
        let downloads = self.downloads.ok_or_else(|| missing("downloads"))?;
        let installer = self.installer.ok_or_else(|| missing("installer"))?;
        let events = self
            .events
            .unwrap_or_else(|| downloads.events().clone());

        Ok(OpsCtx {
            config: self.config.unwrap_or_default(),
            downloads,
            installer,
            events,
        })
    }
}

fn missing(component: &str) -> Error {
    Error::internal(format!("operations context is missing component: {component}"))
}
