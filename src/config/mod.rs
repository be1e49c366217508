use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::services::storage::bucket_url;

/// Largest batch a single receive may return.
pub const MAX_BATCH_SIZE: i32 = 10;

/// Upper bound SQS accepts for a visibility timeout.
pub const MAX_VISIBILITY_SECS: u64 = 43_200;

/// Time allowed per job on top of the ffmpeg timeout (download, upload, notify).
const JOB_OVERHEAD_SECS: u64 = 60;

/// Queue service the worker consumes from.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum QueueBackend {
    Sqs,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Queue service backing the job queue.
    #[serde(default = "default_queue_backend")]
    pub queue_backend: QueueBackend,

    /// Queue name to create or resolve at startup.
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Pre-resolved queue address. When set, queue creation is skipped.
    pub queue_url: Option<String>,

    /// Messages requested per receive (capped at 10).
    #[serde(default = "default_batch_size")]
    pub queue_batch_size: i32,

    /// Long-poll wait per receive, in seconds.
    #[serde(default = "default_wait_secs")]
    pub queue_wait_secs: i32,

    /// Visibility timeout applied to queues this worker creates. Received
    /// messages are hidden for at least [`AppConfig::receive_visibility_secs`].
    #[serde(default = "default_visibility_timeout")]
    pub queue_visibility_timeout_secs: u32,

    /// Redis connection string (redis backend only)
    pub redis_url: Option<String>,

    #[serde(default = "default_region")]
    pub aws_region: String,

    /// Custom endpoint for LocalStack / MinIO
    pub aws_endpoint_url: Option<String>,

    pub aws_access_key_id: Option<String>,

    pub aws_secret_access_key: Option<String>,

    /// Bucket holding source videos and frame archives
    pub s3_bucket: String,

    #[serde(default)]
    pub s3_force_path_style: bool,

    /// Interval between poll passes, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Pipelines allowed in flight within one batch (capped at 10).
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Keep the local zip after upload.
    #[serde(default)]
    pub retain_archives: bool,

    #[serde(default)]
    pub archive_key_prefix: String,

    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    #[serde(default = "default_frames_per_second")]
    pub frames_per_second: u32,

    #[serde(default = "default_ffmpeg_timeout_secs")]
    pub ffmpeg_timeout_secs: u64,

    /// Base URL of the external API receiving completion notifications
    pub notify_base_url: Option<String>,

    #[serde(default = "default_notify_timeout_secs")]
    pub notify_timeout_secs: u64,

    /// Operational HTTP surface bind address. Empty disables the server.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

/// Settings the orchestrator needs per message.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub bucket: String,
    pub scratch_dir: PathBuf,
    pub output_dir: PathBuf,
    pub retain_archives: bool,
    pub max_concurrent_jobs: usize,
}

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub ffmpeg_path: String,
    pub frames_per_second: u32,
    pub timeout: Duration,
    pub archive_key_prefix: String,
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub base_url: Option<String>,
    /// Prefix joined with an archive key to build the link sent to requesters.
    pub file_url_base: String,
    pub timeout: Duration,
}

/// Connection settings shared by the SQS and S3 adapters.
#[derive(Debug, Clone)]
pub struct AwsSettings {
    pub region: String,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
}

fn default_queue_backend() -> QueueBackend {
    QueueBackend::Sqs
}

fn default_queue_name() -> String {
    "video-processing-queue".to_string()
}

fn default_batch_size() -> i32 {
    MAX_BATCH_SIZE
}

fn default_wait_secs() -> i32 {
    20
}

fn default_visibility_timeout() -> u32 {
    60
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_poll_interval_ms() -> u64 {
    20_000
}

fn default_max_concurrent_jobs() -> usize {
    1
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("tmp")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_frames_per_second() -> u32 {
    1
}

fn default_ffmpeg_timeout_secs() -> u64 {
    600
}

fn default_notify_timeout_secs() -> u64 {
    10
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn batch_size(&self) -> i32 {
        self.queue_batch_size.clamp(1, MAX_BATCH_SIZE)
    }

    /// How long a received batch stays invisible to other consumers. Covers
    /// every job of the batch running into the ffmpeg timeout, given the
    /// configured concurrency, and never drops below the queue's own timeout.
    pub fn receive_visibility_secs(&self) -> u32 {
        let concurrency = self.pipeline().max_concurrent_jobs.max(1) as u64;
        let rounds = (self.batch_size() as u64).div_ceil(concurrency);
        let budget = rounds * (self.ffmpeg_timeout_secs + JOB_OVERHEAD_SECS);
        budget
            .max(u64::from(self.queue_visibility_timeout_secs))
            .min(MAX_VISIBILITY_SECS) as u32
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            bucket: self.s3_bucket.clone(),
            scratch_dir: self.scratch_dir.clone(),
            output_dir: self.output_dir.clone(),
            retain_archives: self.retain_archives,
            max_concurrent_jobs: self.max_concurrent_jobs.clamp(1, MAX_BATCH_SIZE as usize),
        }
    }

    pub fn extractor(&self) -> ExtractorConfig {
        ExtractorConfig {
            ffmpeg_path: self.ffmpeg_path.clone(),
            frames_per_second: self.frames_per_second.max(1),
            timeout: Duration::from_secs(self.ffmpeg_timeout_secs),
            archive_key_prefix: self.archive_key_prefix.clone(),
        }
    }

    pub fn notifier(&self) -> NotifierConfig {
        NotifierConfig {
            base_url: self
                .notify_base_url
                .as_deref()
                .filter(|url| !url.is_empty())
                .map(|url| url.trim_end_matches('/').to_string()),
            file_url_base: bucket_url(&self.aws(), &self.s3_bucket),
            timeout: Duration::from_secs(self.notify_timeout_secs),
        }
    }

    pub fn aws(&self) -> AwsSettings {
        AwsSettings {
            region: self.aws_region.clone(),
            endpoint_url: self.aws_endpoint_url.clone().filter(|url| !url.is_empty()),
            access_key_id: self.aws_access_key_id.clone(),
            secret_access_key: self.aws_secret_access_key.clone(),
            force_path_style: self.s3_force_path_style,
        }
    }
}

impl PipelineConfig {
    /// Defaults for a worker writing into `root`.
    pub fn rooted_at(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        let root = root.into();
        Self {
            bucket: bucket.into(),
            scratch_dir: root.join("tmp"),
            output_dir: root.join("outputs"),
            retain_archives: false,
            max_concurrent_jobs: 1,
        }
    }
}
