use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("event bus connection failed: {0}")]
    ConnectionFailed(String),

    #[error("publish to {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },
}

/// Downstream services (ledger, notifications) consume these events with
/// at-least-once semantics; the coordinator treats publication as
/// fire-and-forget and consumers dedupe on transaction id.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: serde_json::Value,
    ) -> Result<(), PublishError>;
}

/// Kafka-backed publisher. Payloads are JSON; messages are keyed by
/// transaction id so one transaction's events stay on one partition.
pub struct KafkaEventPublisher {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaEventPublisher {
    pub fn new(brokers: &str) -> Result<Self, PublishError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "1")
            .create()
            .map_err(|e| PublishError::ConnectionFailed(format!("failed to create producer: {e}")))?;

        tracing::info!(brokers = %brokers, "Kafka producer created");

        Ok(Self {
            producer,
            timeout: Duration::from_secs(5),
        })
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: serde_json::Value,
    ) -> Result<(), PublishError> {
        let bytes = serde_json::to_vec(&payload).map_err(|e| PublishError::PublishFailed {
            topic: topic.to_string(),
            reason: format!("failed to serialize payload: {e}"),
        })?;

        let record = FutureRecord::to(topic).payload(&bytes).key(key);

        match self
            .producer
            .send(record, Timeout::After(self.timeout))
            .await
        {
            Ok((partition, offset)) => {
                tracing::debug!(
                    topic = %topic,
                    key = %key,
                    partition = partition,
                    offset = offset,
                    "Event published"
                );
                Ok(())
            }
            Err((err, _)) => Err(PublishError::PublishFailed {
                topic: topic.to_string(),
                reason: err.to_string(),
            }),
        }
    }
}
