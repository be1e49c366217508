use async_trait::async_trait;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use tracing::{debug, info};

use crate::config::AwsSettings;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object. `None` when the key does not exist.
    async fn download(&self, container: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store an object, replacing any existing one under the same key.
    async fn upload(
        &self,
        container: &str,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError>;
}

/// Client for S3-compatible object storage (AWS S3, LocalStack, MinIO).
pub struct S3Store {
    region: Region,
    credentials: Credentials,
    path_style: bool,
}

impl S3Store {
    pub fn new(aws: &AwsSettings) -> Result<Self, StorageError> {
        let region = match &aws.endpoint_url {
            Some(endpoint) => Region::Custom {
                region: aws.region.clone(),
                endpoint: endpoint.clone(),
            },
            None => aws
                .region
                .parse::<Region>()
                .map_err(|e| StorageError::Config(e.to_string()))?,
        };

        let credentials = match (&aws.access_key_id, &aws.secret_access_key) {
            (Some(key), Some(secret)) => {
                Credentials::new(Some(key.as_str()), Some(secret.as_str()), None, None, None)
            }
            _ => Credentials::default(),
        }
        .map_err(|e| StorageError::Config(e.to_string()))?;

        info!(region = %aws.region, path_style = aws.force_path_style, "S3 client initialized");

        Ok(Self {
            region,
            credentials,
            path_style: aws.force_path_style,
        })
    }

    fn bucket(&self, name: &str) -> Result<Box<Bucket>, StorageError> {
        let bucket = Bucket::new(name, self.region.clone(), self.credentials.clone())
            .map_err(StorageError::S3)?;
        Ok(if self.path_style {
            bucket.with_path_style()
        } else {
            bucket
        })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn download(&self, container: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let bucket = self.bucket(container)?;
        match bucket.get_object(key).await {
            Ok(response) => match response.status_code() {
                200..=299 => {
                    let data = response.to_vec();
                    debug!(bucket = container, key, bytes = data.len(), "Downloaded object");
                    Ok(Some(data))
                }
                404 => Ok(None),
                status => Err(StorageError::Status {
                    status,
                    key: key.to_string(),
                }),
            },
            Err(S3Error::HttpFailWithBody(404, _)) => Ok(None),
            Err(e) => Err(StorageError::S3(e)),
        }
    }

    async fn upload(
        &self,
        container: &str,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError> {
        let bucket = self.bucket(container)?;
        let response = bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(StorageError::S3)?;

        match response.status_code() {
            200..=299 => {
                debug!(bucket = container, key, bytes = data.len(), "Uploaded object");
                Ok(())
            }
            status => Err(StorageError::Status {
                status,
                key: key.to_string(),
            }),
        }
    }
}

/// Public base URL of a bucket.
pub fn bucket_url(aws: &AwsSettings, bucket: &str) -> String {
    match &aws.endpoint_url {
        Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), bucket),
        None => format!("https://{}.s3.{}.amazonaws.com", bucket, aws.region),
    }
}

/// Public URL of an object, as handed to notification recipients.
pub fn object_url(aws: &AwsSettings, bucket: &str, key: &str) -> String {
    format!("{}/{}", bucket_url(aws, bucket), key)
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] S3Error),

    #[error("S3 returned status {status} for {key}")]
    Status { status: u16, key: String },

    #[error("Storage configuration error: {0}")]
    Config(String),
}
