use std::path::Path;

use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Stages a message moves through inside the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum JobStage {
    Received,
    Parsed,
    Downloaded,
    FramesExtracted,
    Archived,
    Notified,
    Deleted,
}

/// Identity of whoever submitted the video. Only used for outbound notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Address the completion notice is sent to.
    #[serde(alias = "email", default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,

    /// Credential forwarded verbatim in the `Authorization` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,
}

/// Wire form of a job as carried in a queue message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JobData {
    #[serde(alias = "registerId")]
    #[garde(length(min = 1, max = 256))]
    pub job_id: String,

    #[serde(alias = "savedVideoKey")]
    #[garde(length(min = 1, max = 1024))]
    pub source_key: String,

    #[serde(alias = "originalVideoName", default)]
    #[garde(length(max = 1024))]
    pub original_name: String,

    #[serde(rename = "type", default)]
    #[garde(skip)]
    pub job_type: String,

    #[serde(alias = "user", default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub requester: Option<Requester>,
}

/// A unit of work: one source video to turn into a frame archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    job_id: String,
    source_key: String,
    original_name: String,
    job_type: String,
    requester: Option<Requester>,
}

impl Job {
    pub fn from_data(data: JobData) -> Self {
        Self {
            job_id: data.job_id,
            source_key: data.source_key,
            original_name: data.original_name,
            job_type: data.job_type,
            requester: data.requester,
        }
    }

    pub fn to_data(&self) -> JobData {
        JobData {
            job_id: self.job_id.clone(),
            source_key: self.source_key.clone(),
            original_name: self.original_name.clone(),
            job_type: self.job_type.clone(),
            requester: self.requester.clone(),
        }
    }

    /// Parse and validate a message body.
    pub fn parse(body: &str) -> Result<Self, JobError> {
        let data: JobData = serde_json::from_str(body)?;
        data.validate()?;
        Ok(Self::from_data(data))
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn source_key(&self) -> &str {
        &self.source_key
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn requester(&self) -> Option<&Requester> {
        self.requester.as_ref()
    }

    /// Local file name for the downloaded source.
    ///
    /// Uses the original name when present, otherwise the source key. Only the
    /// final path component is kept so a crafted name cannot escape the scratch
    /// directory.
    pub fn file_name(&self) -> String {
        let candidate = if self.original_name.trim().is_empty() {
            self.source_key.as_str()
        } else {
            self.original_name.as_str()
        };

        Path::new(candidate)
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .unwrap_or("source")
            .to_string()
    }

    /// JSON context attached to error reports for this job. The requester's
    /// credential is left out since error reports go to logs and webhooks.
    pub fn error_context(&self) -> serde_json::Value {
        let mut data = self.to_data();
        if let Some(requester) = data.requester.as_mut() {
            requester.authorization = None;
        }
        serde_json::to_value(data).unwrap_or_else(|_| {
            serde_json::json!({ "jobId": self.job_id, "sourceKey": self.source_key })
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Invalid JSON in message body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid job payload: {0}")]
    Invalid(#[from] garde::Report),
}
