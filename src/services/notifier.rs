use std::error::Error;

use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::NotifierConfig;
use crate::models::result::ProcessingResult;

/// Downstream reporting of job outcomes. Never fails the job.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_success(&self, result: &ProcessingResult);

    async fn notify_error(&self, context: &serde_json::Value, error: &(dyn Error + Send + Sync));
}

#[derive(Serialize)]
struct SuccessNotice<'a> {
    to: &'a str,
    message: &'a str,
    file: String,
}

#[derive(Serialize)]
struct StatusUpdate<'a> {
    status: &'a str,
    #[serde(rename = "savedZipKey")]
    saved_zip_key: &'a str,
}

/// Notifier that logs every outcome and, when an API base URL is configured,
/// announces completed jobs over HTTP.
pub struct HttpNotifier {
    http: Client,
    config: NotifierConfig,
}

impl HttpNotifier {
    pub fn new(config: NotifierConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    /// POST `<base>/api/notify/success` telling the requester where the archive is.
    async fn send_success_notice(&self, base: &str, result: &ProcessingResult) {
        let requester = result.requester.as_ref();
        let contact = requester.and_then(|r| r.contact.as_deref());
        let authorization = requester.and_then(|r| r.authorization.as_deref());

        let (Some(contact), Some(authorization), Some(key)) =
            (contact, authorization, result.archive_key.as_deref())
        else {
            warn!(
                job_id = %result.job_id,
                "Requester contact, authorization or archive key missing, skipping success notification"
            );
            return;
        };

        let notice = SuccessNotice {
            to: contact,
            message: "Success!",
            file: format!("{}/{}", self.config.file_url_base, key),
        };
        let Some(url) = endpoint(base, &["api", "notify", "success"]) else {
            warn!(job_id = %result.job_id, base, "Invalid notification base URL");
            return;
        };
        self.send(Method::POST, url, authorization, &notice, &result.job_id)
            .await;
    }

    /// PATCH `<base>/api/video/<job id>` marking the job finished.
    async fn update_status(&self, base: &str, result: &ProcessingResult) {
        let authorization = result
            .requester
            .as_ref()
            .and_then(|r| r.authorization.as_deref());

        let (false, Some(authorization), Some(key)) = (
            result.job_id.is_empty(),
            authorization,
            result.archive_key.as_deref(),
        ) else {
            warn!(
                job_id = %result.job_id,
                "Job id, authorization or archive key missing, skipping status update"
            );
            return;
        };

        let update = StatusUpdate {
            status: "FINISHED",
            saved_zip_key: key,
        };
        let Some(url) = endpoint(base, &["api", "video", &result.job_id]) else {
            warn!(job_id = %result.job_id, base, "Invalid notification base URL");
            return;
        };
        self.send(Method::PATCH, url, authorization, &update, &result.job_id)
            .await;
    }

    async fn send<T: Serialize + Sync>(
        &self,
        method: Method,
        url: Url,
        authorization: &str,
        body: &T,
        job_id: &str,
    ) {
        let response = self
            .http
            .request(method.clone(), url.clone())
            .header(reqwest::header::AUTHORIZATION, authorization)
            .json(body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                info!(job_id, %method, %url, status = resp.status().as_u16(), "Notification delivered");
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                warn!(job_id, %method, %url, status = status.as_u16(), body = %body, "Notification rejected");
            }
            Err(e) => {
                warn!(job_id, %method, %url, error = %e, "Notification request failed");
            }
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify_success(&self, result: &ProcessingResult) {
        info!(
            job_id = %result.job_id,
            source_key = %result.source_key,
            original_name = %result.original_name,
            job_type = %result.job_type,
            archive_key = ?result.archive_key,
            output_path = ?result.output_path,
            "Video processing completed"
        );

        let Some(base) = self.config.base_url.as_deref() else {
            debug!(job_id = %result.job_id, "No notification endpoint configured");
            return;
        };

        self.send_success_notice(base, result).await;
        self.update_status(base, result).await;
    }

    async fn notify_error(&self, context: &serde_json::Value, error: &(dyn Error + Send + Sync)) {
        error!(
            context = %context,
            error = %error,
            causes = ?error_chain(error),
            "Video processing failed"
        );
    }
}

/// `base` with `segments` appended, each percent-encoded as a single path
/// segment. `None` when `base` cannot carry a path.
fn endpoint(base: &str, segments: &[&str]) -> Option<Url> {
    let mut url = Url::parse(base).ok()?;
    url.path_segments_mut().ok()?.pop_if_empty().extend(segments);
    Some(url)
}

/// Messages of every `source()` below `error`.
pub fn error_chain(error: &dyn Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut current = error.source();
    while let Some(cause) = current {
        causes.push(cause.to_string());
        current = cause.source();
    }
    causes
}
