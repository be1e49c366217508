use std::fmt::Display;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::job::{Job, Requester};

/// Outcome of one pipeline run. Handed to the notifier, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub success: bool,
    pub job_id: String,
    pub source_key: String,
    pub original_name: String,
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<Requester>,
    /// Local archive path, only reported when the archive is retained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(rename = "savedZipKey", default, skip_serializing_if = "Option::is_none")]
    pub archive_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessingResult {
    fn for_job(job: &Job) -> Self {
        Self {
            success: false,
            job_id: job.job_id().to_string(),
            source_key: job.source_key().to_string(),
            original_name: job.original_name().to_string(),
            job_type: job.job_type().to_string(),
            requester: job.requester().cloned(),
            output_path: None,
            archive_key: None,
            error: None,
        }
    }

    pub fn succeeded(job: &Job, archive_key: String, output_path: Option<PathBuf>) -> Self {
        Self {
            success: true,
            archive_key: Some(archive_key),
            output_path,
            ..Self::for_job(job)
        }
    }

    pub fn failed(job: &Job, error: impl Display) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::for_job(job)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job() -> Job {
        Job::parse(r#"{"jobId":"1","sourceKey":"v.mp4","originalName":"v.mp4","type":"mp4"}"#)
            .unwrap()
    }

    #[test]
    fn test_success_serialization() {
        let result = ProcessingResult::succeeded(&job(), "frames_abc.zip".to_string(), None);
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "success": true,
                "jobId": "1",
                "sourceKey": "v.mp4",
                "originalName": "v.mp4",
                "type": "mp4",
                "savedZipKey": "frames_abc.zip"
            })
        );
    }

    #[test]
    fn test_failure_carries_error() {
        let result = ProcessingResult::failed(&job(), "source not found");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("source not found"));
        assert!(result.archive_key.is_none());
    }
}
