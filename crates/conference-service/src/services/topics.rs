//! In-process broadcast topics.
//!
//! Each topic is a `tokio::sync::broadcast` channel created on first
//! subscription. Publishing to a topic without subscribers is a no-op, and a
//! slow subscriber only ever lags itself.

use crate::errors::CsError;
use crate::models::ChatEvent;
use common::types::ChatId;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Process-wide topic for disconnect notices.
pub const PRESENCE_TOPIC: &str = "presence";

/// Per-topic buffer. Subscribers further behind than this observe a lag.
const TOPIC_CAPACITY: usize = 256;

/// Topic name for a chat.
pub fn chat_topic(chat_id: ChatId) -> String {
    format!("chat:{}", chat_id)
}

#[derive(Debug, Default)]
pub struct TopicHub {
    topics: Mutex<HashMap<String, broadcast::Sender<ChatEvent>>>,
}

impl TopicHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: &str) -> Result<broadcast::Receiver<ChatEvent>, CsError> {
        let mut topics = self
            .topics
            .lock()
            .map_err(|_| CsError::Internal("topic registry lock poisoned".to_string()))?;

        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0);
        Ok(sender.subscribe())
    }

    /// Publish an event. Returns the number of subscribers it reached.
    pub fn publish(&self, topic: &str, event: ChatEvent) -> usize {
        let Ok(mut topics) = self.topics.lock() else {
            tracing::error!(target: "cs.hub", topic = %topic, "Topic registry lock poisoned, event dropped");
            return 0;
        };

        let Some(sender) = topics.get(topic) else {
            return 0;
        };

        match sender.send(event) {
            Ok(delivered) => delivered,
            Err(_) => {
                // Every receiver is gone
                topics.remove(topic);
                0
            }
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .ok()
            .and_then(|topics| topics.get(topic).map(broadcast::Sender::receiver_count))
            .unwrap_or(0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::MessageType;

    #[test]
    fn test_chat_topic_format() {
        assert_eq!(chat_topic(ChatId(42)), "chat:42");
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber_in_order() {
        let hub = TopicHub::new();
        let mut first = hub.subscribe("chat:1").unwrap();
        let mut second = hub.subscribe("chat:1").unwrap();

        assert_eq!(hub.publish("chat:1", ChatEvent::cleared(ChatId(1))), 2);
        assert_eq!(
            hub.publish("chat:1", ChatEvent::chat_deleted(ChatId(1))),
            2
        );

        for receiver in [&mut first, &mut second] {
            assert_eq!(receiver.recv().await.unwrap().event_type, MessageType::Clear);
            assert_eq!(
                receiver.recv().await.unwrap().event_type,
                MessageType::ChatDeleted
            );
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let hub = TopicHub::new();
        assert_eq!(hub.publish("chat:9", ChatEvent::cleared(ChatId(9))), 0);
    }

    #[test]
    fn test_dropped_subscribers_release_topic() {
        let hub = TopicHub::new();
        let receiver = hub.subscribe("chat:3").unwrap();
        assert_eq!(hub.subscriber_count("chat:3"), 1);

        drop(receiver);
        assert_eq!(hub.publish("chat:3", ChatEvent::cleared(ChatId(3))), 0);
        assert_eq!(hub.subscriber_count("chat:3"), 0);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let hub = TopicHub::new();
        let mut chat_one = hub.subscribe("chat:1").unwrap();
        let _chat_two = hub.subscribe("chat:2").unwrap();

        hub.publish("chat:2", ChatEvent::cleared(ChatId(2)));
        assert!(chat_one.try_recv().is_err());
    }
}
