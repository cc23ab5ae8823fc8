//! Queue producer/consumer (C10) — durable topic T, per §4.10 and §6.
//!
//! Consumption is at-least-once: each claimed message is handed to the
//! dispatch handler (C9) and the offset is only advanced after the handler
//! reaches a terminal branch. Republishing a message (the fallback path in
//! §4.9 step 5b) reuses the same producer the REST boundary uses to enqueue
//! new transactions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::message::Message as _;
use rdkafka::error::KafkaError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::dispatch::DispatchHandler;

/// Abstraction over "publish bytes to a topic" so C9's republish path and
/// the REST boundary's enqueue path can be driven by a fake in tests
/// (DESIGN.md's "module-level singletons -> dependency-injected services").
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageProducer: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), KafkaError>;
}

pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    pub fn new(brokers: &str) -> Result<Self, KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "10000")
            .create()?;
        Ok(Self { producer })
    }
}

#[async_trait]
impl MessageProducer for KafkaProducer {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), KafkaError> {
        let record = FutureRecord::to(topic).payload(&payload).key("");
        match self.producer.send(record, Duration::from_secs(5)).await {
            Ok((partition, offset)) => {
                info!(topic, partition, offset, "message published");
                Ok(())
            }
            Err((err, _)) => {
                error!(topic, error = %err, "failed to publish message");
                Err(err)
            }
        }
    }
}

/// Builds the consumer group client (C10), joining `group_id` on the topics
/// handed to [`run_consumer_loop`]. Offsets auto-commit; initial offset is
/// newest per §6 ("initial offset newest").
pub fn build_consumer(
    brokers: &str,
    group_id: &str,
    client_id: &str,
) -> Result<StreamConsumer, KafkaError> {
    ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("group.id", group_id)
        .set("client.id", client_id)
        .set("enable.auto.commit", "true")
        .set("auto.offset.reset", "latest")
        .create()
}

/// Runs the consumer loop (C10) until `shutdown` is cancelled. Each claimed
/// message is logged (topic/partition/offset per §4.10) and handed to the
/// dispatch handler; reconnects indefinitely on session errors until
/// shutdown is observed (§4.10, §5).
pub async fn run_consumer_loop(
    consumer: StreamConsumer,
    topic: String,
    handler: Arc<DispatchHandler>,
    shutdown: CancellationToken,
) {
    if let Err(e) = consumer.subscribe(&[topic.as_str()]) {
        error!(topic, error = %e, "failed to subscribe to topic");
        return;
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("consumer loop shutting down");
                break;
            }
            recv = consumer.recv() => {
                match recv {
                    Ok(message) => {
                        let payload = message.payload().map(|p| p.to_vec()).unwrap_or_default();
                        info!(
                            topic = message.topic(),
                            partition = message.partition(),
                            offset = message.offset(),
                            "message claimed"
                        );
                        let handler = handler.clone();
                        let child_token = shutdown.child_token();
                        handler.handle(payload, &child_token).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "consumer session error, retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }

    // Closes the group cleanly on shutdown (§4.10).
    drop(consumer);
}
