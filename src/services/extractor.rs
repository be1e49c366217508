//! Frame extraction with ffmpeg and frame archiving.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::ExtractorConfig;
use crate::services::scratch::{ScratchError, ScratchFs};
use crate::services::storage::{ObjectStore, StorageError};

/// Naming pattern for extracted frames.
pub const FRAME_PATTERN: &str = "frame_%04d.png";

/// Longest stderr excerpt carried in an error.
const STDERR_TAIL_BYTES: usize = 1024;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// Sample frames from `input` into `output_dir`, returning the sorted file names.
    ///
    /// An empty list is a valid result; callers decide whether that is a failure.
    async fn extract_frames(&self, input: &Path, output_dir: &Path) -> Result<Vec<String>, ExtractError>;

    /// Zip every file of `frames_dir` into `archive_path` and upload it to
    /// `container`, returning the object key.
    async fn archive_and_upload(
        &self,
        frames_dir: &Path,
        archive_path: &Path,
        container: &str,
    ) -> Result<String, ExtractError>;

    /// Check that the transcoder can be started.
    async fn probe(&self) -> Result<(), ExtractError>;
}

/// Builder for ffmpeg argument lists.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    output_args: Vec<String>,
    overwrite: bool,
    log_level: String,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Uniform time-based sampling into numbered images under `output_dir`.
    pub fn sample_frames(input: impl AsRef<Path>, output_dir: impl AsRef<Path>, fps: u32) -> Self {
        Self::new(input, output_dir.as_ref().join(FRAME_PATTERN)).video_filter(format!("fps={fps}"))
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Production extractor: spawns ffmpeg, zips on a blocking thread, uploads
/// through the object store.
pub struct FfmpegExtractor {
    config: ExtractorConfig,
    fs: Arc<dyn ScratchFs>,
    store: Arc<dyn ObjectStore>,
}

impl FfmpegExtractor {
    pub fn new(config: ExtractorConfig, fs: Arc<dyn ScratchFs>, store: Arc<dyn ObjectStore>) -> Self {
        Self { config, fs, store }
    }

    async fn run(&self, args: &[String], timeout: Duration) -> Result<(), ExtractError> {
        debug!(command = %format!("{} {}", self.config.ffmpeg_path, args.join(" ")), "Running ffmpeg");

        let child = Command::new(&self.config.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ExtractError::Spawn)?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(ExtractError::Spawn)?,
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "ffmpeg timed out, killing process");
                return Err(ExtractError::Timeout(timeout));
            }
        };

        if output.status.success() {
            Ok(())
        } else {
            Err(ExtractError::ProcessFailed {
                code: output.status.code(),
                stderr: stderr_tail(&output.stderr),
            })
        }
    }
}

#[async_trait]
impl FrameExtractor for FfmpegExtractor {
    async fn extract_frames(&self, input: &Path, output_dir: &Path) -> Result<Vec<String>, ExtractError> {
        let cmd = FfmpegCommand::sample_frames(input, output_dir, self.config.frames_per_second);
        self.run(&cmd.build_args(), self.config.timeout).await?;

        let frames = self.fs.read_dir(output_dir).await?;
        metrics::counter!("frames_extracted_total").increment(frames.len() as u64);
        info!(input = %input.display(), frames = frames.len(), "Frames extracted");
        Ok(frames)
    }

    async fn archive_and_upload(
        &self,
        frames_dir: &Path,
        archive_path: &Path,
        container: &str,
    ) -> Result<String, ExtractError> {
        let file_name = archive_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ExtractError::InvalidPath(archive_path.to_path_buf()))?
            .to_string();

        let frames = self.fs.read_dir(frames_dir).await?;
        if let Some(parent) = archive_path.parent() {
            self.fs.ensure_dir(parent).await?;
        }

        let source = frames_dir.to_path_buf();
        let target = archive_path.to_path_buf();
        let entries = frames.len();
        let size = tokio::task::spawn_blocking(move || write_zip(&source, &frames, &target))
            .await
            .map_err(ExtractError::Join)??;

        info!(archive = %archive_path.display(), entries, bytes = size, "Archive written");

        // The archive is closed and synced at this point.
        let data = self.fs.read(archive_path).await?;
        let key = format!("{}{}", self.config.archive_key_prefix, file_name);
        self.store
            .upload(container, &key, &data, "application/zip")
            .await?;

        info!(bucket = container, key = %key, "Archive uploaded");
        Ok(key)
    }

    async fn probe(&self) -> Result<(), ExtractError> {
        self.run(&["-version".to_string()], PROBE_TIMEOUT).await
    }
}

/// Deflate `names` from `dir` into a new zip at `target`, returning its size.
pub fn write_zip(dir: &Path, names: &[String], target: &Path) -> Result<u64, zip::result::ZipError> {
    let file = File::create(target)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for name in names {
        let mut frame = File::open(dir.join(name))?;
        zip.start_file(name.as_str(), options)?;
        io::copy(&mut frame, &mut zip)?;
    }

    let file = zip.finish()?.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(file.metadata()?.len())
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_TAIL_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Failed to start ffmpeg: {0}")]
    Spawn(#[source] io::Error),

    #[error(
        "FFmpeg process exited with code {}: {stderr}",
        .code.map_or_else(|| "none".to_string(), |c| c.to_string())
    )]
    ProcessFailed { code: Option<i32>, stderr: String },

    #[error("FFmpeg timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to build archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Archive task failed: {0}")]
    Join(#[source] tokio::task::JoinError),

    #[error("Invalid archive path {}", .0.display())]
    InvalidPath(PathBuf),

    #[error(transparent)]
    Scratch(#[from] ScratchError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
