//! Durable per-tenant ingest stream over the Redis-backed broccoli broker.
//!
//! Delivery is at-least-once: a consumed batch stays pending until it is
//! acknowledged, and a rejected batch is requeued for some worker. The
//! downstream upsert is idempotent, which is what makes this safe.

use broccoli_queue::brokers::broker::BrokerMessage;
use broccoli_queue::queue::BroccoliQueue;
use redis::AsyncCommands;
use time::Duration as TimeDuration;
use tracing::{debug, warn};

use common::IngestMessage;

use crate::config::QueueConfig;
use crate::error::MqError;

/// Bounded poll so shutdown signals are observed promptly.
const POLL_TIMEOUT_SECS: i64 = 2;

pub struct IngestQueue {
    queue: BroccoliQueue,
    redis: redis::Client,
}

impl IngestQueue {
    pub async fn connect(config: &QueueConfig) -> Result<Self, MqError> {
        let queue = BroccoliQueue::builder(&config.url)
            .pool_connections(config.pool_size)
            .build()
            .await?;
        let redis = redis::Client::open(config.url.as_str())?;
        Ok(Self { queue, redis })
    }

    /// Stream name for one tenant.
    pub fn topic(tenant_code: &str) -> String {
        format!("ingest:{tenant_code}")
    }

    /// Append one record to the tenant's stream. Non-blocking.
    pub async fn publish(&self, message: &IngestMessage) -> Result<(), MqError> {
        let topic = Self::topic(&message.tenant_code);
        self.queue.publish(&topic, None, message, None).await?;
        debug!(topic = %topic, file = %message.file_path, "Queued ingest message");
        Ok(())
    }

    /// Read up to `batch_size` pending messages with a bounded block.
    /// Consumed messages stay unacknowledged until [`Self::acknowledge`].
    pub async fn consume_batch(
        &self,
        tenant_code: &str,
        batch_size: usize,
    ) -> Result<Vec<BrokerMessage<IngestMessage>>, MqError> {
        let topic = Self::topic(tenant_code);
        let batch = self
            .queue
            .consume_batch::<IngestMessage>(
                &topic,
                batch_size,
                TimeDuration::seconds(POLL_TIMEOUT_SECS),
                None,
            )
            .await?;
        Ok(batch)
    }

    pub async fn acknowledge(
        &self,
        tenant_code: &str,
        message: BrokerMessage<IngestMessage>,
    ) -> Result<(), MqError> {
        let topic = Self::topic(tenant_code);
        self.queue.acknowledge(&topic, message).await?;
        Ok(())
    }

    /// Return a message to the stream for redelivery.
    pub async fn reject(
        &self,
        tenant_code: &str,
        message: BrokerMessage<IngestMessage>,
    ) -> Result<(), MqError> {
        let topic = Self::topic(tenant_code);
        self.queue.reject(&topic, message).await?;
        Ok(())
    }

    /// Consume one batch and run `handler` over it synchronously. The whole
    /// batch is acknowledged when the handler returns `Ok`, and requeued
    /// when it fails. Returns the number of messages acknowledged.
    pub async fn consume_for_tenant<F, Fut, E>(
        &self,
        tenant_code: &str,
        batch_size: usize,
        handler: F,
    ) -> Result<usize, MqError>
    where
        F: FnOnce(Vec<IngestMessage>) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Debug,
    {
        let batch = self.consume_batch(tenant_code, batch_size).await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let payloads: Vec<IngestMessage> =
            batch.iter().map(|m| m.payload.clone()).collect();
        match handler(payloads).await {
            Ok(()) => {
                let count = batch.len();
                for message in batch {
                    self.acknowledge(tenant_code, message).await?;
                }
                Ok(count)
            }
            Err(e) => {
                warn!(
                    tenant = %tenant_code,
                    error = ?e,
                    "Ingest batch handler failed, requeueing batch"
                );
                for message in batch {
                    self.reject(tenant_code, message).await?;
                }
                Ok(0)
            }
        }
    }

    /// Queue depth for monitoring. The broker keeps the backlog in a Redis
    /// list named by the topic.
    pub async fn pending_count(&self, tenant_code: &str) -> Result<i64, MqError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let count: i64 = conn.llen(Self::topic(tenant_code)).await?;
        Ok(count)
    }
}
