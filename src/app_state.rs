use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{
    extractor::{FfmpegExtractor, FrameExtractor},
    notifier::{HttpNotifier, Notifier},
    queue::{self, QueueError, QueueGateway},
    scratch::{LocalFs, ScratchFs},
    storage::{ObjectStore, S3Store, StorageError},
};

/// Shared handles to every external collaborator of the worker.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn QueueGateway>,
    pub storage: Arc<dyn ObjectStore>,
    pub scratch: Arc<dyn ScratchFs>,
    pub extractor: Arc<dyn FrameExtractor>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    pub fn new(
        queue: Arc<dyn QueueGateway>,
        storage: Arc<dyn ObjectStore>,
        scratch: Arc<dyn ScratchFs>,
        extractor: Arc<dyn FrameExtractor>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            queue,
            storage,
            scratch,
            extractor,
            notifier,
        }
    }

    /// Wire the production adapters from configuration.
    pub async fn from_config(config: &AppConfig) -> Result<Self, StartupError> {
        tracing::info!(backend = %config.queue_backend, "Connecting to job queue");
        let queue = queue::connect(config).await?;

        tracing::info!(bucket = %config.s3_bucket, "Initializing object storage client");
        let storage: Arc<dyn ObjectStore> = Arc::new(S3Store::new(&config.aws())?);

        let scratch: Arc<dyn ScratchFs> = Arc::new(LocalFs::new());
        let extractor = Arc::new(FfmpegExtractor::new(
            config.extractor(),
            scratch.clone(),
            storage.clone(),
        ));
        let notifier = Arc::new(HttpNotifier::new(config.notifier()).map_err(StartupError::Http)?);

        Ok(Self::new(queue, storage, scratch, extractor, notifier))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Failed to build HTTP client: {0}")]
    Http(#[source] reqwest::Error),
}
