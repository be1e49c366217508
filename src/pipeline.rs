//! Per-message processing pipeline.
//!
//! One message goes through parse, download, extract, archive, notify and is
//! then always deleted from the queue, whatever happened before. Scratch
//! space is per job and removed before the outcome is reported.

use std::path::{Path, PathBuf};
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde_json::json;
use strum::Display;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::config::PipelineConfig;
use crate::models::job::{Job, JobError, JobStage};
use crate::models::message::QueueMessage;
use crate::models::result::ProcessingResult;
use crate::services::extractor::ExtractError;
use crate::services::queue::{QueueAddress, QueueError};
use crate::services::scratch::ScratchError;
use crate::services::storage::StorageError;

/// Coarse failure classes, used as the metrics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Validation,
    NotFound,
    ExternalTool,
    Scratch,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidMessage(#[from] JobError),

    #[error("source not found: {key} (bucket {bucket})")]
    SourceNotFound { bucket: String, key: String },

    #[error("no frames extracted from {0}")]
    NoFramesExtracted(String),

    #[error("Object storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Scratch storage error: {0}")]
    Scratch(#[from] ScratchError),

    #[error("Frame extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidMessage(_) => FailureKind::Validation,
            Self::SourceNotFound { .. } => FailureKind::NotFound,
            Self::NoFramesExtracted(_) => FailureKind::ExternalTool,
            Self::Storage(_) | Self::Queue(_) => FailureKind::Transport,
            Self::Scratch(_) => FailureKind::Scratch,
            Self::Extract(ExtractError::Storage(_)) => FailureKind::Transport,
            Self::Extract(ExtractError::Scratch(_)) => FailureKind::Scratch,
            Self::Extract(_) => FailureKind::ExternalTool,
        }
    }
}

/// What happened to one received message.
#[derive(Debug, Clone)]
pub struct MessageOutcome {
    pub message_id: Option<String>,
    /// `None` when the body could not be parsed into a job.
    pub result: Option<ProcessingResult>,
    pub deleted: bool,
}

impl MessageOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.as_ref().is_some_and(|r| r.success)
    }
}

/// Summary of one receive-and-process pass.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub received: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub receive_error: Option<String>,
    pub outcomes: Vec<MessageOutcome>,
}

impl BatchReport {
    fn from_outcomes(outcomes: Vec<MessageOutcome>) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
        Self {
            received: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
            receive_error: None,
            outcomes,
        }
    }

    fn receive_failed(error: &QueueError) -> Self {
        Self {
            receive_error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

/// Paths owned by a single pipeline run. The source lives in its own
/// subdirectory so no file name can collide with `frames/`.
#[derive(Debug, Clone)]
struct Workspace {
    root: PathBuf,
    source_dir: PathBuf,
    source: PathBuf,
    frames: PathBuf,
    archive: PathBuf,
}

impl Workspace {
    fn new(config: &PipelineConfig, job: &Job) -> Self {
        let run_id = Uuid::new_v4();
        let root = config.scratch_dir.join(run_id.to_string());
        let source_dir = root.join("source");
        Self {
            source: source_dir.join(job.file_name()),
            source_dir,
            frames: root.join("frames"),
            archive: config.output_dir.join(format!("frames_{run_id}.zip")),
            root,
        }
    }
}

/// Runs the pipeline for every message of a batch.
pub struct Processor {
    state: AppState,
    config: PipelineConfig,
}

impl Processor {
    pub fn new(state: AppState, config: PipelineConfig) -> Self {
        Self { state, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Receive one batch and process it. Receive failures are reported and
    /// leave the queue untouched.
    pub async fn process_batch(&self, queue: &QueueAddress) -> BatchReport {
        let messages = match self.state.queue.receive(queue).await {
            Ok(messages) => messages,
            Err(err) => {
                error!(queue = %queue, error = %err, "Failed to receive messages");
                metrics::counter!("queue_receive_errors_total").increment(1);
                self.state
                    .notifier
                    .notify_error(&json!({ "queueUrl": queue.as_str() }), &err)
                    .await;
                return BatchReport::receive_failed(&err);
            }
        };

        if messages.is_empty() {
            debug!(queue = %queue, "No messages available");
            return BatchReport::default();
        }

        info!(queue = %queue, count = messages.len(), "Received messages");

        let outcomes = stream::iter(messages)
            .map(|message| self.process_message(queue, message))
            .buffer_unordered(self.config.max_concurrent_jobs.max(1))
            .collect::<Vec<_>>()
            .await;

        let report = BatchReport::from_outcomes(outcomes);
        info!(
            queue = %queue,
            received = report.received,
            succeeded = report.succeeded,
            failed = report.failed,
            "Batch processed"
        );
        report
    }

    /// Process one message and delete it, regardless of the outcome.
    pub async fn process_message(&self, queue: &QueueAddress, message: QueueMessage) -> MessageOutcome {
        metrics::counter!("frame_jobs_received_total").increment(1);
        let started = Instant::now();
        debug!(message_id = message.log_id(), stage = %JobStage::Received, "Processing message");

        let result = match message.parse_job() {
            Ok(job) => Some(self.process_job(&job).await),
            Err(err) => {
                warn!(message_id = message.log_id(), error = %err, "Discarding malformed message");
                let err = PipelineError::from(err);
                self.report_failure(&json!({ "rawBody": message.body }), &err)
                    .await;
                None
            }
        };

        let deleted = self.acknowledge(queue, &message).await;
        metrics::histogram!("frame_job_processing_seconds").record(started.elapsed().as_secs_f64());

        MessageOutcome {
            message_id: message.id,
            result,
            deleted,
        }
    }

    async fn process_job(&self, job: &Job) -> ProcessingResult {
        info!(
            job_id = job.job_id(),
            source_key = job.source_key(),
            stage = %JobStage::Parsed,
            "Processing video"
        );

        match self.run_job(job).await {
            Ok(result) => {
                self.state.notifier.notify_success(&result).await;
                metrics::counter!("frame_jobs_completed_total").increment(1);
                debug!(job_id = job.job_id(), stage = %JobStage::Notified, "Job completed");
                result
            }
            Err(err) => {
                warn!(job_id = job.job_id(), kind = %err.kind(), error = %err, "Job failed");
                self.report_failure(&job.error_context(), &err).await;
                ProcessingResult::failed(job, &err)
            }
        }
    }

    /// Download, extract, archive and upload. Scratch space is gone by the
    /// time this returns, on both paths.
    pub async fn run_job(&self, job: &Job) -> Result<ProcessingResult, PipelineError> {
        let bucket = &self.config.bucket;
        let data = self
            .state
            .storage
            .download(bucket, job.source_key())
            .await?
            .ok_or_else(|| PipelineError::SourceNotFound {
                bucket: bucket.clone(),
                key: job.source_key().to_string(),
            })?;
        debug!(job_id = job.job_id(), bytes = data.len(), stage = %JobStage::Downloaded, "Source downloaded");

        let workspace = Workspace::new(&self.config, job);
        self.state.scratch.create_dir_all(&workspace.root).await?;

        let archived = self.extract_and_archive(job, &workspace, &data).await;
        let keep_archive = archived.is_ok() && self.config.retain_archives;
        self.cleanup(job, &workspace, keep_archive).await;

        let archive_key = archived?;
        let output_path = keep_archive.then(|| workspace.archive.clone());
        Ok(ProcessingResult::succeeded(job, archive_key, output_path))
    }

    async fn extract_and_archive(
        &self,
        job: &Job,
        workspace: &Workspace,
        data: &[u8],
    ) -> Result<String, PipelineError> {
        let scratch = &self.state.scratch;
        scratch.create_dir_all(&workspace.source_dir).await?;
        scratch.write(&workspace.source, data).await?;
        debug!(job_id = job.job_id(), path = %workspace.source.display(), "Source written to scratch");

        scratch.ensure_dir(&workspace.frames).await?;
        let frames = self
            .state
            .extractor
            .extract_frames(&workspace.source, &workspace.frames)
            .await?;
        if frames.is_empty() {
            return Err(PipelineError::NoFramesExtracted(job.source_key().to_string()));
        }
        debug!(job_id = job.job_id(), frames = frames.len(), stage = %JobStage::FramesExtracted, "Frames ready");

        scratch.ensure_dir(&self.config.output_dir).await?;
        let key = self
            .state
            .extractor
            .archive_and_upload(&workspace.frames, &workspace.archive, &self.config.bucket)
            .await?;
        info!(job_id = job.job_id(), archive_key = %key, stage = %JobStage::Archived, "Archive uploaded");
        Ok(key)
    }

    /// Remove the job's scratch tree, and the local archive unless retained.
    /// Failures are logged only.
    async fn cleanup(&self, job: &Job, workspace: &Workspace, keep_archive: bool) {
        let mut targets: Vec<&Path> = vec![&workspace.root];
        if !keep_archive {
            targets.push(&workspace.archive);
        }

        for path in targets {
            if let Err(err) = self.state.scratch.remove(path).await {
                warn!(job_id = job.job_id(), path = %path.display(), error = %err, "Scratch cleanup failed");
            }
        }
    }

    async fn report_failure(&self, context: &serde_json::Value, err: &PipelineError) {
        metrics::counter!("frame_jobs_failed_total", "kind" => err.kind().to_string()).increment(1);
        self.state.notifier.notify_error(context, err).await;
    }

    /// Delete the message if it carries a receipt. Returns whether it was deleted.
    async fn acknowledge(&self, queue: &QueueAddress, message: &QueueMessage) -> bool {
        let Some(receipt) = message.receipt.as_deref() else {
            warn!(message_id = message.log_id(), "Message has no receipt token, cannot delete it");
            return false;
        };

        match self.state.queue.delete(queue, receipt).await {
            Ok(()) => {
                info!(message_id = message.log_id(), stage = %JobStage::Deleted, "Message removed from queue");
                true
            }
            Err(err) => {
                error!(message_id = message.log_id(), error = %err, "Failed to delete message");
                self.state
                    .notifier
                    .notify_error(&json!({ "messageId": message.id, "queueUrl": queue.as_str() }), &err)
                    .await;
                false
            }
        }
    }
}
