//! In-memory stand-ins for the worker's external collaborators.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::error::Error;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use frame_extract_worker::{
    app_state::AppState,
    config::PipelineConfig,
    models::{message::QueueMessage, result::ProcessingResult},
    pipeline::Processor,
    services::{
        extractor::{ExtractError, FrameExtractor},
        notifier::Notifier,
        queue::{QueueAddress, QueueError, QueueGateway},
        scratch::{ScratchError, ScratchFs},
        storage::{ObjectStore, StorageError},
    },
};

pub const BUCKET: &str = "videos";

pub fn queue_address() -> QueueAddress {
    QueueAddress::new("fake://video-processing-queue")
}

/// A message with id `m-<n>` and receipt `r-<n>`.
pub fn message(n: usize, body: &str) -> QueueMessage {
    QueueMessage::new(Some(format!("m-{n}")), body, Some(format!("r-{n}")))
}

pub fn job_body(job_id: &str, source_key: &str) -> String {
    serde_json::json!({
        "jobId": job_id,
        "sourceKey": source_key,
        "originalName": source_key,
        "type": "mp4",
    })
    .to_string()
}

#[derive(Default)]
pub struct FakeQueue {
    pending: Mutex<VecDeque<QueueMessage>>,
    deleted: Mutex<Vec<String>>,
    sent: Mutex<Vec<String>>,
    pub fail_receive: AtomicBool,
    pub fail_delete: AtomicBool,
    pub unhealthy: AtomicBool,
}

impl FakeQueue {
    pub fn push(&self, message: QueueMessage) {
        self.pending.lock().unwrap().push_back(message);
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    fn failure(what: &str) -> QueueError {
        QueueError::Config(format!("simulated {what} failure"))
    }
}

#[async_trait]
impl QueueGateway for FakeQueue {
    async fn create_or_resolve(&self, name: &str) -> Result<QueueAddress, QueueError> {
        Ok(QueueAddress::new(format!("fake://{name}")))
    }

    async fn receive(&self, _queue: &QueueAddress) -> Result<Vec<QueueMessage>, QueueError> {
        if self.fail_receive.load(Ordering::SeqCst) {
            return Err(Self::failure("receive"));
        }
        let mut pending = self.pending.lock().unwrap();
        let take = pending.len().min(10);
        Ok(pending.drain(..take).collect())
    }

    async fn delete(&self, _queue: &QueueAddress, receipt: &str) -> Result<(), QueueError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Self::failure("delete"));
        }
        self.deleted.lock().unwrap().push(receipt.to_string());
        Ok(())
    }

    async fn send(&self, _queue: &QueueAddress, body: &str) -> Result<Option<String>, QueueError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(body.to_string());
        Ok(Some(format!("sent-{}", sent.len())))
    }

    async fn health_check(&self, _queue: &QueueAddress) -> Result<(), QueueError> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(Self::failure("health"));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    uploads: Mutex<Vec<(String, String, String)>>,
    pub fail_download: AtomicBool,
    pub fail_upload: AtomicBool,
}

impl FakeStore {
    pub fn put(&self, container: &str, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert((container.to_string(), key.to_string()), data.to_vec());
    }

    pub fn get(&self, container: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(container.to_string(), key.to_string()))
            .cloned()
    }

    /// `(container, key, content type)` of every upload, in order.
    pub fn uploads(&self) -> Vec<(String, String, String)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn download(&self, container: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        if self.fail_download.load(Ordering::SeqCst) {
            return Err(StorageError::Status {
                status: 503,
                key: key.to_string(),
            });
        }
        Ok(self.get(container, key))
    }

    async fn upload(
        &self,
        container: &str,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError> {
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(StorageError::Status {
                status: 500,
                key: key.to_string(),
            });
        }
        self.put(container, key, data);
        self.uploads.lock().unwrap().push((
            container.to_string(),
            key.to_string(),
            content_type.to_string(),
        ));
        Ok(())
    }
}

/// Scratch filesystem kept in memory.
#[derive(Default)]
pub struct MemoryFs {
    files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
    dirs: Mutex<BTreeSet<PathBuf>>,
    pub fail_remove: AtomicBool,
}

impl MemoryFs {
    pub fn contains(&self, path: &Path) -> bool {
        self.files.lock().unwrap().contains_key(path) || self.dirs.lock().unwrap().contains(path)
    }

    /// Files and directories strictly below `root`.
    pub fn paths_under(&self, root: &Path) -> Vec<PathBuf> {
        let files = self.files.lock().unwrap();
        let dirs = self.dirs.lock().unwrap();
        files
            .keys()
            .chain(dirs.iter())
            .filter(|p| p.starts_with(root) && p.as_path() != root)
            .cloned()
            .collect()
    }

    pub fn files(&self) -> Vec<PathBuf> {
        self.files.lock().unwrap().keys().cloned().collect()
    }

    fn missing(op: &'static str, path: &Path) -> ScratchError {
        ScratchError::Io {
            op,
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file or directory"),
        }
    }
}

#[async_trait]
impl ScratchFs for MemoryFs {
    async fn create_dir_all(&self, path: &Path) -> Result<(), ScratchError> {
        let mut dirs = self.dirs.lock().unwrap();
        for ancestor in path.ancestors().filter(|a| !a.as_os_str().is_empty()) {
            dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    async fn ensure_dir(&self, path: &Path) -> Result<(), ScratchError> {
        if self.files.lock().unwrap().contains_key(path) {
            return Err(ScratchError::NotADirectory(path.to_path_buf()));
        }
        self.create_dir_all(path).await
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<(), ScratchError> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), data.to_vec());
        Ok(())
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>, ScratchError> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| Self::missing("read", path))
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<String>, ScratchError> {
        if !self.dirs.lock().unwrap().contains(path) {
            return Err(Self::missing("list", path));
        }
        let files = self.files.lock().unwrap();
        let dirs = self.dirs.lock().unwrap();
        let names: BTreeSet<String> = files
            .keys()
            .chain(dirs.iter())
            .filter(|p| p.parent() == Some(path))
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect();
        Ok(names.into_iter().collect())
    }

    async fn remove(&self, path: &Path) -> Result<(), ScratchError> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(ScratchError::Io {
                op: "remove",
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"),
            });
        }
        self.files.lock().unwrap().retain(|p, _| !p.starts_with(path));
        self.dirs.lock().unwrap().retain(|p| !p.starts_with(path));
        Ok(())
    }
}

/// Extractor that writes configured frame files instead of running ffmpeg.
pub struct FakeExtractor {
    fs: Arc<MemoryFs>,
    store: Arc<FakeStore>,
    frames: Mutex<Vec<String>>,
    failure: Mutex<Option<String>>,
    archive_key: Mutex<Option<String>>,
    extract_calls: Mutex<Vec<(PathBuf, PathBuf)>>,
    archive_calls: Mutex<Vec<(PathBuf, PathBuf, String)>>,
    pub probe_fails: AtomicBool,
}

impl FakeExtractor {
    pub fn new(fs: Arc<MemoryFs>, store: Arc<FakeStore>) -> Self {
        Self {
            fs,
            store,
            frames: Mutex::new(vec!["frame_0001.png".to_string(), "frame_0002.png".to_string()]),
            failure: Mutex::new(None),
            archive_key: Mutex::new(None),
            extract_calls: Mutex::new(Vec::new()),
            archive_calls: Mutex::new(Vec::new()),
            probe_fails: AtomicBool::new(false),
        }
    }

    pub fn set_frames(&self, frames: &[&str]) {
        *self.frames.lock().unwrap() = frames.iter().map(|f| f.to_string()).collect();
    }

    /// Make every extraction fail with `stderr`.
    pub fn fail_with(&self, stderr: &str) {
        *self.failure.lock().unwrap() = Some(stderr.to_string());
    }

    /// Upload under `key` instead of the archive's file name.
    pub fn set_archive_key(&self, key: &str) {
        *self.archive_key.lock().unwrap() = Some(key.to_string());
    }

    /// `(input, output dir)` of every extraction, in order.
    pub fn extract_calls(&self) -> Vec<(PathBuf, PathBuf)> {
        self.extract_calls.lock().unwrap().clone()
    }

    /// `(frames dir, archive path, container)` of every archive request.
    pub fn archive_calls(&self) -> Vec<(PathBuf, PathBuf, String)> {
        self.archive_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FrameExtractor for FakeExtractor {
    async fn extract_frames(&self, input: &Path, output_dir: &Path) -> Result<Vec<String>, ExtractError> {
        self.extract_calls
            .lock()
            .unwrap()
            .push((input.to_path_buf(), output_dir.to_path_buf()));

        self.fs.read(input).await?;
        let failure = self.failure.lock().unwrap().clone();
        if let Some(stderr) = failure {
            return Err(ExtractError::ProcessFailed {
                code: Some(1),
                stderr,
            });
        }

        let frames = self.frames.lock().unwrap().clone();
        for frame in &frames {
            self.fs.write(&output_dir.join(frame), b"png").await?;
        }
        Ok(self.fs.read_dir(output_dir).await?)
    }

    async fn archive_and_upload(
        &self,
        frames_dir: &Path,
        archive_path: &Path,
        container: &str,
    ) -> Result<String, ExtractError> {
        self.archive_calls.lock().unwrap().push((
            frames_dir.to_path_buf(),
            archive_path.to_path_buf(),
            container.to_string(),
        ));

        let frames = self.fs.read_dir(frames_dir).await?;
        let data = frames.join("\n").into_bytes();
        self.fs.write(archive_path, &data).await?;

        let configured = self.archive_key.lock().unwrap().clone();
        let key = match configured {
            Some(key) => key,
            None => archive_path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| ExtractError::InvalidPath(archive_path.to_path_buf()))?
                .to_string(),
        };
        self.store
            .upload(container, &key, &data, "application/zip")
            .await?;
        Ok(key)
    }

    async fn probe(&self) -> Result<(), ExtractError> {
        if self.probe_fails.load(Ordering::SeqCst) {
            return Err(ExtractError::Spawn(io::Error::new(
                io::ErrorKind::NotFound,
                "ffmpeg not found",
            )));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    successes: Mutex<Vec<ProcessingResult>>,
    errors: Mutex<Vec<(serde_json::Value, String)>>,
}

impl RecordingNotifier {
    pub fn successes(&self) -> Vec<ProcessingResult> {
        self.successes.lock().unwrap().clone()
    }

    /// `(context, error message)` of every reported failure.
    pub fn errors(&self) -> Vec<(serde_json::Value, String)> {
        self.errors.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_success(&self, result: &ProcessingResult) {
        self.successes.lock().unwrap().push(result.clone());
    }

    async fn notify_error(&self, context: &serde_json::Value, error: &(dyn Error + Send + Sync)) {
        self.errors
            .lock()
            .unwrap()
            .push((context.clone(), error.to_string()));
    }
}

/// A processor wired to fakes, with handles on each of them.
pub struct Harness {
    pub queue: Arc<FakeQueue>,
    pub store: Arc<FakeStore>,
    pub fs: Arc<MemoryFs>,
    pub extractor: Arc<FakeExtractor>,
    pub notifier: Arc<RecordingNotifier>,
    pub config: PipelineConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::rooted_at("/work", BUCKET))
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        let fs = Arc::new(MemoryFs::default());
        let store = Arc::new(FakeStore::default());
        Self {
            queue: Arc::new(FakeQueue::default()),
            extractor: Arc::new(FakeExtractor::new(fs.clone(), store.clone())),
            notifier: Arc::new(RecordingNotifier::default()),
            store,
            fs,
            config,
        }
    }

    pub fn state(&self) -> AppState {
        AppState::new(
            self.queue.clone(),
            self.store.clone(),
            self.fs.clone(),
            self.extractor.clone(),
            self.notifier.clone(),
        )
    }

    pub fn processor(&self) -> Processor {
        Processor::new(self.state(), self.config.clone())
    }
}
