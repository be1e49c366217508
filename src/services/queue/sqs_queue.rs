use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::config::Credentials;
use aws_sdk_sqs::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::operation::create_queue::CreateQueueError;
use aws_sdk_sqs::types::QueueAttributeName;
use aws_sdk_sqs::Client;
use tracing::{debug, info};

use super::{QueueAddress, QueueError, QueueGateway, ReceiveOptions};
use crate::config::AwsSettings;
use crate::models::message::QueueMessage;

/// Amazon SQS backed job queue.
pub struct SqsQueue {
    client: Client,
    options: ReceiveOptions,
}

impl SqsQueue {
    pub async fn new(aws: &AwsSettings, options: ReceiveOptions) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(aws.region.clone()));

        if let (Some(key), Some(secret)) = (&aws.access_key_id, &aws.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                key.clone(),
                secret.clone(),
                None,
                None,
                "worker-config",
            ));
        }

        let shared = loader.load().await;
        let mut builder = aws_sdk_sqs::config::Builder::from(&shared);

        // LocalStack and friends
        if let Some(endpoint) = &aws.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        info!(region = %aws.region, endpoint = ?aws.endpoint_url, "SQS client initialized");

        Self::from_client(Client::from_conf(builder.build()), options)
    }

    pub fn from_client(client: Client, options: ReceiveOptions) -> Self {
        Self { client, options }
    }

    async fn queue_url(&self, name: &str) -> Result<QueueAddress, QueueError> {
        let output = self
            .client
            .get_queue_url()
            .queue_name(name)
            .send()
            .await
            .map_err(sqs_error)?;

        output
            .queue_url()
            .map(QueueAddress::new)
            .ok_or_else(|| QueueError::MissingAddress(name.to_string()))
    }
}

#[async_trait]
impl QueueGateway for SqsQueue {
    async fn create_or_resolve(&self, name: &str) -> Result<QueueAddress, QueueError> {
        let created = self
            .client
            .create_queue()
            .queue_name(name)
            .attributes(
                QueueAttributeName::VisibilityTimeout,
                self.options.visibility_timeout_secs.to_string(),
            )
            .send()
            .await;

        match created {
            Ok(output) => output
                .queue_url()
                .map(QueueAddress::new)
                .ok_or_else(|| QueueError::MissingAddress(name.to_string())),
            Err(err) if already_exists(&err) => {
                info!(queue = name, "Queue already exists, resolving its URL");
                self.queue_url(name).await
            }
            Err(err) => Err(sqs_error(err)),
        }
    }

    async fn receive(&self, queue: &QueueAddress) -> Result<Vec<QueueMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(queue.as_str())
            .max_number_of_messages(self.options.batch_size)
            .wait_time_seconds(self.options.wait_secs)
            .visibility_timeout(self.options.lease_secs as i32)
            .send()
            .await
            .map_err(sqs_error)?;

        let messages: Vec<QueueMessage> = output
            .messages()
            .iter()
            .map(|msg| {
                QueueMessage::new(
                    msg.message_id().map(str::to_string),
                    msg.body().unwrap_or_default(),
                    msg.receipt_handle().map(str::to_string),
                )
            })
            .collect();

        debug!(queue = %queue, count = messages.len(), "Received SQS messages");
        Ok(messages)
    }

    async fn delete(&self, queue: &QueueAddress, receipt: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(queue.as_str())
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(sqs_error)?;
        Ok(())
    }

    async fn send(&self, queue: &QueueAddress, body: &str) -> Result<Option<String>, QueueError> {
        let output = self
            .client
            .send_message()
            .queue_url(queue.as_str())
            .message_body(body)
            .send()
            .await
            .map_err(sqs_error)?;
        Ok(output.message_id().map(str::to_string))
    }

    async fn health_check(&self, queue: &QueueAddress) -> Result<(), QueueError> {
        self.client
            .get_queue_attributes()
            .queue_url(queue.as_str())
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await
            .map_err(sqs_error)?;
        Ok(())
    }
}

fn already_exists(err: &SdkError<CreateQueueError>) -> bool {
    err.as_service_error().is_some_and(|e| {
        e.is_queue_name_exists()
            || matches!(e.code(), Some("QueueAlreadyExists") | Some("QueueNameExists"))
    })
}

fn sqs_error<E>(err: E) -> QueueError
where
    aws_sdk_sqs::Error: From<E>,
{
    QueueError::Sqs(Box::new(aws_sdk_sqs::Error::from(err)))
}
