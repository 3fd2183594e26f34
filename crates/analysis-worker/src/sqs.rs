//! SQS client wrapper for the analysis job queue

use aws_sdk_sqs::Client;
use tracing::debug;

use crate::config::WorkerConfig;
use crate::error::WorkerError;

/// Long-poll wait per receive call.
const WAIT_TIME_SECS: i32 = 20;

/// A message received from SQS
#[derive(Debug, Clone)]
pub struct SqsMessage {
    /// Message body (the game id)
    pub body: String,
    pub receipt_handle: String,
}

impl SqsMessage {
    pub fn game_id(&self) -> Option<i64> {
        self.body.trim().parse().ok()
    }
}

#[derive(Clone)]
pub struct SqsClient {
    client: Client,
    queue_url: String,
    visibility_timeout: i32,
}

impl SqsClient {
    pub async fn new(config: &WorkerConfig) -> Result<Self, WorkerError> {
        let queue_url = config.require_queue_url()?.to_string();
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

        // Custom endpoint for LocalStack
        let client = match &config.sqs_endpoint_url {
            Some(endpoint) => {
                let sqs_config = aws_sdk_sqs::config::Builder::from(&aws_config)
                    .endpoint_url(endpoint)
                    .build();
                Client::from_conf(sqs_config)
            }
            None => Client::new(&aws_config),
        };

        Ok(Self {
            client,
            queue_url,
            visibility_timeout: i32::try_from(config.visibility_timeout_secs).unwrap_or(i32::MAX),
        })
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    /// Receive up to `max` messages with long polling
    pub async fn receive_messages(&self, max: i32) -> Result<Vec<SqsMessage>, WorkerError> {
        let response = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max.clamp(1, 10))
            .wait_time_seconds(WAIT_TIME_SECS)
            .visibility_timeout(self.visibility_timeout)
            .send()
            .await
            .map_err(|e| WorkerError::Sqs(format!("Failed to receive messages: {e}")))?;

        let messages: Vec<SqsMessage> = response
            .messages()
            .iter()
            .filter_map(|msg| {
                Some(SqsMessage {
                    body: msg.body()?.to_string(),
                    receipt_handle: msg.receipt_handle()?.to_string(),
                })
            })
            .collect();

        debug!(count = messages.len(), "Received messages");
        Ok(messages)
    }

    /// Delete a message after it has been handled
    pub async fn delete_message(&self, receipt_handle: &str) -> Result<(), WorkerError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| WorkerError::Sqs(format!("Failed to delete message: {e}")))?;

        debug!("Deleted message");
        Ok(())
    }
}
