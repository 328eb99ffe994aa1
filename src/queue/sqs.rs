//! AWS SQS implementation of [`QueueAdapter`].

use super::{QueueAdapter, MAX_RECEIVE};
use crate::command::{self, Message};
use crate::error::TaskError;
use async_trait::async_trait;
use aws_sdk_sqs::types::MessageAttributeValue;
use aws_sdk_sqs::Client;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Default queue attributes applied when a pool's queue does not yet exist.
const DEFAULT_RECEIVE_WAIT_SECONDS: &str = "2";
const DEFAULT_VISIBILITY_TIMEOUT: &str = "120";

/// Lazily-connecting SQS adapter for a single named queue ("pool").
///
/// The client and queue URL are established on first use rather than at
/// construction time, mirroring how the rest of this crate's adapters avoid
/// doing I/O in a constructor.
pub struct SqsQueueAdapter {
    queue_name: String,
    task_timeout: u64,
    client: RwLock<Option<Client>>,
    queue_url: RwLock<Option<String>>,
}

impl SqsQueueAdapter {
    pub fn new(queue_name: impl Into<String>, task_timeout: u64) -> Self {
        Self {
            queue_name: queue_name.into(),
            task_timeout,
            client: RwLock::new(None),
            queue_url: RwLock::new(None),
        }
    }

    async fn client(&self) -> Client {
        if let Some(client) = self.client.read().await.as_ref() {
            return client.clone();
        }
        let mut guard = self.client.write().await;
        if let Some(client) = guard.as_ref() {
            return client.clone();
        }
        let config = aws_config::load_from_env().await;
        let client = Client::new(&config);
        *guard = Some(client.clone());
        client
    }

    async fn queue_url(&self) -> Result<String, TaskError> {
        if let Some(url) = self.queue_url.read().await.as_ref() {
            return Ok(url.clone());
        }
        let mut guard = self.queue_url.write().await;
        if let Some(url) = guard.as_ref() {
            return Ok(url.clone());
        }
        let client = self.client().await;
        let url = match client
            .get_queue_url()
            .queue_name(&self.queue_name)
            .send()
            .await
        {
            Ok(resp) => resp.queue_url().unwrap_or_default().to_string(),
            Err(_) => {
                info!(queue = %self.queue_name, "CREATING_QUEUE_IN_AWS");
                let created = client
                    .create_queue()
                    .queue_name(&self.queue_name)
                    .attributes(
                        aws_sdk_sqs::types::QueueAttributeName::ReceiveMessageWaitTimeSeconds,
                        DEFAULT_RECEIVE_WAIT_SECONDS,
                    )
                    .attributes(
                        aws_sdk_sqs::types::QueueAttributeName::VisibilityTimeout,
                        DEFAULT_VISIBILITY_TIMEOUT,
                    )
                    .send()
                    .await
                    .map_err(|e| TaskError::Queue(format!("create_queue failed: {e}")))?;
                created.queue_url().unwrap_or_default().to_string()
            }
        };
        *guard = Some(url.clone());
        Ok(url)
    }
}

#[async_trait]
impl QueueAdapter for SqsQueueAdapter {
    async fn send(
        &self,
        task_name: &str,
        attrs: &Value,
        delay_s: u64,
        exec_id: Option<String>,
        when: Option<DateTime<Utc>>,
    ) -> Result<(), TaskError> {
        let client = self.client().await;
        let url = self.queue_url().await?;
        let body = serde_json::to_string(attrs)?;
        let exec_id = exec_id.unwrap_or_else(command::new_exec_id);
        let when = command::format_when(when.unwrap_or_else(Utc::now));

        debug!(%task_name, %exec_id, "SENDING_TASK");
        client
            .send_message()
            .queue_url(&url)
            .message_body(body)
            .delay_seconds(delay_s as i32)
            .message_attributes(
                "task_name",
                MessageAttributeValue::builder()
                    .data_type("String")
                    .string_value(task_name)
                    .build()
                    .map_err(|e| TaskError::Queue(e.to_string()))?,
            )
            .message_attributes(
                "exec_id",
                MessageAttributeValue::builder()
                    .data_type("String")
                    .string_value(&exec_id)
                    .build()
                    .map_err(|e| TaskError::Queue(e.to_string()))?,
            )
            .message_attributes(
                "when",
                MessageAttributeValue::builder()
                    .data_type("String")
                    .string_value(&when)
                    .build()
                    .map_err(|e| TaskError::Queue(e.to_string()))?,
            )
            .send()
            .await
            .map_err(|e| TaskError::Queue(format!("send_message failed: {e}")))?;
        Ok(())
    }

    async fn receive(&self, max: u32) -> Result<Vec<Message>, TaskError> {
        let max = if max > MAX_RECEIVE {
            warn!(requested = max, "RECEIVE_CLAMPED_TO_MAX");
            MAX_RECEIVE
        } else {
            max
        };
        if max == 0 {
            return Ok(Vec::new());
        }
        let client = self.client().await;
        let url = self.queue_url().await?;
        let resp = client
            .receive_message()
            .queue_url(&url)
            .max_number_of_messages(max as i32)
            .wait_time_seconds(1)
            .visibility_timeout(self.task_timeout as i32)
            .message_attribute_names("All")
            .attribute_names(aws_sdk_sqs::types::QueueAttributeName::ApproximateReceiveCount)
            .attribute_names(aws_sdk_sqs::types::QueueAttributeName::SentTimestamp)
            .send()
            .await
            .map_err(|e| TaskError::Queue(format!("receive_message failed: {e}")))?;

        let messages = resp
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|m| Message {
                body: m.body.unwrap_or_default(),
                message_attributes: m
                    .message_attributes
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|(k, v)| v.string_value.map(|sv| (k, sv)))
                    .collect(),
                attributes: m
                    .attributes
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(k, v)| (k.as_str().to_string(), v))
                    .collect(),
                receipt_handle: m.receipt_handle.unwrap_or_default(),
            })
            .collect();
        Ok(messages)
    }

    async fn delete(&self, message: &Message) -> Result<(), TaskError> {
        let client = self.client().await;
        let url = self.queue_url().await?;
        client
            .delete_message()
            .queue_url(&url)
            .receipt_handle(&message.receipt_handle)
            .send()
            .await
            .map_err(|e| TaskError::Queue(format!("delete_message failed: {e}")))?;
        Ok(())
    }

    async fn change_visibility(&self, message: &Message, new_timeout_s: i64) -> bool {
        let client = self.client().await;
        let url = match self.queue_url().await {
            Ok(url) => url,
            Err(_) => return false,
        };
        let new_timeout = new_timeout_s.clamp(0, i32::MAX as i64) as i32;
        match client
            .change_message_visibility()
            .queue_url(&url)
            .receipt_handle(&message.receipt_handle)
            .visibility_timeout(new_timeout)
            .send()
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "VISIBILITY_CHANGE_FAILURE");
                false
            }
        }
    }

    async fn approximate_depth(&self) -> Result<u64, TaskError> {
        let client = self.client().await;
        let url = self.queue_url().await?;
        let resp = client
            .get_queue_attributes()
            .queue_url(&url)
            .attribute_names(aws_sdk_sqs::types::QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await
            .map_err(|e| TaskError::Queue(format!("get_queue_attributes failed: {e}")))?;
        resp.attributes
            .unwrap_or_default()
            .get(&aws_sdk_sqs::types::QueueAttributeName::ApproximateNumberOfMessages)
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| TaskError::Queue("ApproximateNumberOfMessages missing".into()))
    }
}
