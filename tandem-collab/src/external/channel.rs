use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, warn};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::UserId;

use super::{check_status, ExternalError};

/// How many times a failed channel call is attempted in total
const CHANNEL_ATTEMPTS: usize = 2;

/// Pause before a failed channel call is attempted again
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// The external call/chat provider a room's channel lives on.
///
/// Every operation must be idempotent, since failed calls are retried.
#[async_trait]
pub trait CallChannel: Send + Sync {
    async fn add_members(&self, channel_id: &str, user_ids: &[UserId])
        -> Result<(), ExternalError>;
    async fn remove_members(
        &self,
        channel_id: &str,
        user_ids: &[UserId],
    ) -> Result<(), ExternalError>;
    async fn send_message(
        &self,
        channel_id: &str,
        message: &ChannelMessage,
    ) -> Result<(), ExternalError>;
}

/// A message appended to a room's chat
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    pub text: String,
    /// The user the message is posted as
    pub user_id: UserId,
    pub attachments: Vec<PlaybackAttachment>,
}

/// Structured description of a playback change, so chat clients can render it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackAttachment {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub artist: String,
    pub uri: String,
    pub position: u64,
    pub action: String,
    pub started_at: DateTime<Utc>,
    pub initiated_by: UserId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelOperation {
    AddMembers(Vec<UserId>),
    RemoveMembers(Vec<UserId>),
    SendMessage(ChannelMessage),
}

impl ChannelOperation {
    fn name(&self) -> &'static str {
        match self {
            Self::AddMembers(_) => "add members",
            Self::RemoveMembers(_) => "remove members",
            Self::SendMessage(_) => "send message",
        }
    }
}

/// Runs [CallChannel] operations with a timeout and a single retry.
///
/// Dispatched operations go through a queue per channel, so a channel sees them in the
/// order they were dispatched even when one of them has to be retried.
#[derive(Clone)]
pub struct ChannelDispatcher {
    channel: Arc<dyn CallChannel>,
    timeout: Duration,
    backoff: Duration,
    queues: Arc<DashMap<String, mpsc::UnboundedSender<ChannelOperation>>>,
}

impl ChannelDispatcher {
    pub fn new(channel: Arc<dyn CallChannel>, timeout: Duration) -> Self {
        Self {
            channel,
            timeout,
            backoff: RETRY_BACKOFF,
            queues: Default::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Performs the operation, returning the last error if every attempt failed.
    pub async fn deliver(
        &self,
        channel_id: &str,
        operation: &ChannelOperation,
    ) -> Result<(), ExternalError> {
        let mut attempt = 1;

        loop {
            let result = tokio::time::timeout(self.timeout, self.execute(channel_id, operation))
                .await
                .unwrap_or(Err(ExternalError::Timeout(self.timeout)));

            match result {
                Ok(()) => return Ok(()),
                Err(error) if attempt < CHANNEL_ATTEMPTS => {
                    debug!(
                        "Channel {}: {} failed ({}), retrying",
                        channel_id,
                        operation.name(),
                        error
                    );
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Queues the operation to be performed in the background, after everything
    /// dispatched to the channel before it. Failures are logged, never returned.
    pub fn dispatch(&self, channel_id: &str, operation: ChannelOperation) {
        let name = operation.name();

        let queue = self
            .queues
            .entry(channel_id.to_string())
            .or_insert_with(|| self.spawn_queue(channel_id));

        if queue.send(operation).is_err() {
            warn!("Queue of channel {} is closed, dropped {}", channel_id, name);
        }
    }

    fn spawn_queue(&self, channel_id: &str) -> mpsc::UnboundedSender<ChannelOperation> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<ChannelOperation>();
        let dispatcher = self.clone();
        let channel_id = channel_id.to_string();

        tokio::spawn(async move {
            while let Some(operation) = receiver.recv().await {
                if let Err(error) = dispatcher.deliver(&channel_id, &operation).await {
                    warn!(
                        "Channel {} is out of sync, {} failed: {}",
                        channel_id,
                        operation.name(),
                        error
                    );
                }
            }
        });

        sender
    }

    async fn execute(
        &self,
        channel_id: &str,
        operation: &ChannelOperation,
    ) -> Result<(), ExternalError> {
        match operation {
            ChannelOperation::AddMembers(users) => {
                self.channel.add_members(channel_id, users).await
            }
            ChannelOperation::RemoveMembers(users) => {
                self.channel.remove_members(channel_id, users).await
            }
            ChannelOperation::SendMessage(message) => {
                self.channel.send_message(channel_id, message).await
            }
        }
    }
}

/// A [CallChannel] speaking JSON to a channel gateway over HTTP.
pub struct HttpCallChannel {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpCallChannel {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ExternalError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExternalError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<(), ExternalError> {
        let mut request = self
            .client
            .post(format!("{}{}", self.endpoint, path))
            .json(body);

        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        check_status(response.status())
    }
}

#[async_trait]
impl CallChannel for HttpCallChannel {
    async fn add_members(
        &self,
        channel_id: &str,
        user_ids: &[UserId],
    ) -> Result<(), ExternalError> {
        self.post(
            &format!("/channels/{}/members", channel_id),
            &json!({ "userIds": user_ids }),
        )
        .await
    }

    async fn remove_members(
        &self,
        channel_id: &str,
        user_ids: &[UserId],
    ) -> Result<(), ExternalError> {
        self.post(
            &format!("/channels/{}/members/remove", channel_id),
            &json!({ "userIds": user_ids }),
        )
        .await
    }

    async fn send_message(
        &self,
        channel_id: &str,
        message: &ChannelMessage,
    ) -> Result<(), ExternalError> {
        self.post(&format!("/channels/{}/messages", channel_id), message)
            .await
    }
}

/// Used when no channel gateway is configured. Every call succeeds without doing anything.
pub struct DisabledCallChannel;

#[async_trait]
impl CallChannel for DisabledCallChannel {
    async fn add_members(
        &self,
        channel_id: &str,
        user_ids: &[UserId],
    ) -> Result<(), ExternalError> {
        debug!("Channel disabled, skipped adding {:?} to {}", user_ids, channel_id);
        Ok(())
    }

    async fn remove_members(
        &self,
        channel_id: &str,
        user_ids: &[UserId],
    ) -> Result<(), ExternalError> {
        debug!("Channel disabled, skipped removing {:?} from {}", user_ids, channel_id);
        Ok(())
    }

    async fn send_message(
        &self,
        channel_id: &str,
        _message: &ChannelMessage,
    ) -> Result<(), ExternalError> {
        debug!("Channel disabled, skipped message to {}", channel_id);
        Ok(())
    }
}
