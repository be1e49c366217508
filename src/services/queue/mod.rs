//! Job queue gateway.
//!
//! The worker only needs four things from a queue: resolve it, pull a batch,
//! acknowledge a message and (for the submit tool) push one. Two backends are
//! supported: Amazon SQS and a Redis list pair.

mod redis_queue;
mod sqs_queue;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{AppConfig, QueueBackend};
use crate::models::message::QueueMessage;

pub use redis_queue::RedisQueue;
pub use sqs_queue::SqsQueue;

/// Resolved address of a queue (SQS queue URL or Redis key namespace).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueAddress(String);

impl QueueAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Receive tuning shared by the backends.
#[derive(Debug, Clone, Copy)]
pub struct ReceiveOptions {
    pub batch_size: i32,
    pub wait_secs: i32,
    pub visibility_timeout_secs: u32,
    /// How long each received message stays reserved for this worker.
    pub lease_secs: u32,
}

impl ReceiveOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            batch_size: config.batch_size(),
            wait_secs: config.queue_wait_secs.clamp(0, 20),
            visibility_timeout_secs: config.queue_visibility_timeout_secs,
            lease_secs: config.receive_visibility_secs(),
        }
    }
}

#[async_trait]
pub trait QueueGateway: Send + Sync {
    /// Create the named queue, or return the existing one's address.
    async fn create_or_resolve(&self, name: &str) -> Result<QueueAddress, QueueError>;

    /// Pull up to one batch of messages. Empty when the queue has nothing.
    async fn receive(&self, queue: &QueueAddress) -> Result<Vec<QueueMessage>, QueueError>;

    /// Acknowledge a message by its receipt token.
    async fn delete(&self, queue: &QueueAddress, receipt: &str) -> Result<(), QueueError>;

    /// Publish a message body, returning the queue-assigned id if any.
    async fn send(&self, queue: &QueueAddress, body: &str) -> Result<Option<String>, QueueError>;

    async fn health_check(&self, queue: &QueueAddress) -> Result<(), QueueError>;
}

/// Build the gateway selected by `QUEUE_BACKEND`.
pub async fn connect(config: &AppConfig) -> Result<Arc<dyn QueueGateway>, QueueError> {
    let options = ReceiveOptions::from_config(config);
    match config.queue_backend {
        QueueBackend::Sqs => Ok(Arc::new(SqsQueue::new(&config.aws(), options).await)),
        QueueBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| QueueError::Config("REDIS_URL is required for the redis backend".to_string()))?;
            Ok(Arc::new(RedisQueue::new(url, options)?))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("SQS request failed: {0}")]
    Sqs(#[from] Box<aws_sdk_sqs::Error>),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Queue {0} returned no address")]
    MissingAddress(String),

    #[error("Queue configuration error: {0}")]
    Config(String),
}
