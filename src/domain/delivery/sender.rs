//! Message-send collaborator.
//!
//! The dispatcher only needs "deliver this content to this user as the
//! business" and a success/failure answer; how the message is stored or
//! pushed belongs to the messaging service behind this trait.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::RedisConfig;
use crate::domain::campaign::CampaignContent;
use crate::redis::RedisPool;

#[derive(Debug, Clone, Error)]
pub enum SendError {
    /// Timeout or unavailable dependency; retried with backoff
    #[error("Transient send failure: {0}")]
    Transient(String),

    /// The recipient cannot receive this message; never retried
    #[error("Send rejected: {0}")]
    Rejected(String),
}

impl SendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SendError::Transient(_))
    }
}

/// What is handed to the sender for one recipient.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    pub campaign_id: Uuid,
    pub delivery_id: Uuid,
    pub content: CampaignContent,
}

#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Deliver to one recipient; returns the conversation message ID.
    async fn send_as_business(
        &self,
        business_id: &str,
        recipient_id: &str,
        message: &OutboundMessage,
    ) -> Result<String, SendError>;
}

/// Event published on the per-user notification channel.
#[derive(Debug, Serialize)]
struct PublishedNotification<'a> {
    #[serde(rename = "type")]
    target_type: &'static str,
    target: &'a str,
    event: PublishedEvent<'a>,
}

#[derive(Debug, Serialize)]
struct PublishedEvent<'a> {
    event_type: &'static str,
    payload: PublishedPayload<'a>,
    priority: &'static str,
    correlation_id: String,
}

#[derive(Debug, Serialize)]
struct PublishedPayload<'a> {
    message_id: String,
    business_id: &'a str,
    campaign_id: Uuid,
    delivery_id: Uuid,
    content: &'a CampaignContent,
    sent_at: chrono::DateTime<Utc>,
}

/// Publishes each message to the notification service's Redis channel
/// `{publish_prefix}:{recipient}`.
pub struct RedisMessageSender {
    pool: Arc<RedisPool>,
    prefix: String,
}

impl RedisMessageSender {
    pub fn new(pool: Arc<RedisPool>, config: &RedisConfig) -> Self {
        Self {
            pool,
            prefix: config.publish_prefix.clone(),
        }
    }

    fn channel(&self, recipient_id: &str) -> String {
        format!("{}:{}", self.prefix, recipient_id)
    }
}

#[async_trait]
impl MessageSender for RedisMessageSender {
    async fn send_as_business(
        &self,
        business_id: &str,
        recipient_id: &str,
        message: &OutboundMessage,
    ) -> Result<String, SendError> {
        let message_id = Uuid::new_v4().to_string();
        let notification = PublishedNotification {
            target_type: "user",
            target: recipient_id,
            event: PublishedEvent {
                event_type: "broadcast.message",
                payload: PublishedPayload {
                    message_id: message_id.clone(),
                    business_id,
                    campaign_id: message.campaign_id,
                    delivery_id: message.delivery_id,
                    content: &message.content,
                    sent_at: Utc::now(),
                },
                priority: "Normal",
                correlation_id: message.delivery_id.to_string(),
            },
        };
        let body = serde_json::to_string(&notification)
            .map_err(|e| SendError::Rejected(format!("unserializable message: {}", e)))?;

        let mut conn = self
            .pool
            .get_connection()
            .await
            .map_err(|e| SendError::Transient(e.to_string()))?;

        let result: redis::RedisResult<i64> = redis::cmd("PUBLISH")
            .arg(self.channel(recipient_id))
            .arg(body)
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => Ok(message_id),
            Err(e) => {
                if e.is_io_error() || e.is_connection_dropped() {
                    self.pool.invalidate().await;
                }
                Err(SendError::Transient(e.to_string()))
            }
        }
    }
}

/// Sender used when no messaging backend is configured: logs and acknowledges.
#[derive(Default)]
pub struct LogMessageSender;

#[async_trait]
impl MessageSender for LogMessageSender {
    async fn send_as_business(
        &self,
        business_id: &str,
        recipient_id: &str,
        message: &OutboundMessage,
    ) -> Result<String, SendError> {
        let message_id = Uuid::new_v4().to_string();
        tracing::info!(
            business_id = %business_id,
            recipient_id = %recipient_id,
            campaign_id = %message.campaign_id,
            delivery_id = %message.delivery_id,
            message_id = %message_id,
            "Broadcast message accepted (log sender)"
        );
        Ok(message_id)
    }
}

/// Create the message sender: Redis publishing when Redis is enabled and
/// connected, otherwise the log sender.
pub fn create_message_sender(
    config: &RedisConfig,
    redis_pool: Option<Arc<RedisPool>>,
) -> Arc<dyn MessageSender> {
    match redis_pool {
        Some(pool) if config.enabled => {
            tracing::info!(prefix = %config.publish_prefix, "Creating Redis message sender");
            Arc::new(RedisMessageSender::new(pool, config))
        }
        _ => {
            tracing::warn!("No messaging backend configured, messages will only be logged");
            Arc::new(LogMessageSender)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_published_wire_format() {
        let content = CampaignContent::text("hello");
        let notification = PublishedNotification {
            target_type: "user",
            target: "u1",
            event: PublishedEvent {
                event_type: "broadcast.message",
                payload: PublishedPayload {
                    message_id: "m-1".to_string(),
                    business_id: "biz",
                    campaign_id: Uuid::nil(),
                    delivery_id: Uuid::nil(),
                    content: &content,
                    sent_at: Utc::now(),
                },
                priority: "Normal",
                correlation_id: "d-1".to_string(),
            },
        };
        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["type"], "user");
        assert_eq!(value["target"], "u1");
        assert_eq!(value["event"]["event_type"], "broadcast.message");
        assert_eq!(value["event"]["payload"]["content"]["body"], "hello");
    }

    #[tokio::test]
    async fn test_log_sender_acknowledges() {
        let sender = LogMessageSender;
        let message = OutboundMessage {
            campaign_id: Uuid::new_v4(),
            delivery_id: Uuid::new_v4(),
            content: CampaignContent::text("hi"),
        };
        let id = sender.send_as_business("biz", "u1", &message).await.unwrap();
        assert!(!id.is_empty());
    }

    #[test]
    fn test_without_pool_uses_log_sender() {
        let config = RedisConfig {
            enabled: true,
            ..Default::default()
        };
        // Construction must not panic or connect.
        let _sender = create_message_sender(&config, None);
    }
}
