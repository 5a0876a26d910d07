use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions, BasicPublishOptions, BasicRejectOptions},
    types::{AMQPValue, LongLongInt},
    BasicProperties, Channel,
};
use tracing::{debug, warn};

use crate::error::{BrokerError, BrokerResult};

const RETRY_HEADER: &str = "x-retry-count";

/// Per-delivery acknowledgement handle.
///
/// Wraps the raw lapin [`Delivery`] with the exchange/routing information needed to
/// requeue a message with an incremented `x-retry-count` header, bounded by
/// `max_requeue_count`.
pub struct DeliveryController {
    channel: Channel,
    delivery: Delivery,
    exchange: String,
    max_requeue_count: u32,
}

impl DeliveryController {
    pub fn new(
        channel: Channel,
        delivery: Delivery,
        exchange: String,
        max_requeue_count: u32,
    ) -> Self {
        Self {
            channel,
            delivery,
            exchange,
            max_requeue_count,
        }
    }

    /// Raw message body.
    pub fn data(&self) -> &[u8] {
        &self.delivery.data
    }

    /// Routing key the message was published with.
    pub fn routing_key(&self) -> &str {
        self.delivery.routing_key.as_str()
    }

    /// Current value of the `x-retry-count` header (0 if absent).
    pub fn retry_count(&self) -> u32 {
        header_retry_count(&self.delivery.properties)
    }

    pub async fn ack(self) -> BrokerResult<()> {
        self.channel
            .basic_ack(self.delivery.delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    /// Reject without requeue (permanent failure / malformed payload).
    pub async fn reject(self) -> BrokerResult<()> {
        self.channel
            .basic_reject(
                self.delivery.delivery_tag,
                BasicRejectOptions { requeue: false },
            )
            .await?;
        Ok(())
    }

    /// Nack without requeue; semantically equivalent to `reject` for a single message.
    pub async fn nack(self) -> BrokerResult<()> {
        self.channel
            .basic_nack(
                self.delivery.delivery_tag,
                BasicNackOptions {
                    requeue: false,
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Republish the message body to the same queue with `x-retry-count` incremented,
    /// then ack the original delivery. Fails with [`BrokerError::RetryCountExceeded`] once
    /// the header would exceed `max_requeue_count`.
    pub async fn requeue(self) -> BrokerResult<()> {
        let current = self.retry_count();
        if current >= self.max_requeue_count {
            warn!(
                retry_count = current,
                cap = self.max_requeue_count,
                "delivery exceeded requeue cap, rejecting permanently"
            );
            self.channel
                .basic_reject(
                    self.delivery.delivery_tag,
                    BasicRejectOptions { requeue: false },
                )
                .await?;
            return Err(BrokerError::RetryCountExceeded(self.max_requeue_count));
        }

        let mut headers = self
            .delivery
            .properties
            .headers()
            .clone()
            .unwrap_or_default();
        headers.insert(
            RETRY_HEADER.into(),
            AMQPValue::LongLongInt((current + 1) as LongLongInt),
        );

        let properties = self.delivery.properties.clone().with_headers(headers);

        self.channel
            .basic_publish(
                &self.exchange,
                self.delivery.routing_key.as_str(),
                BasicPublishOptions::default(),
                &self.delivery.data,
                properties,
            )
            .await?
            .await?;

        debug!(
            retry_count = current + 1,
            "requeued delivery with incremented retry-count header"
        );

        self.channel
            .basic_ack(self.delivery.delivery_tag, BasicAckOptions::default())
            .await?;

        Ok(())
    }
}

fn header_retry_count(properties: &BasicProperties) -> u32 {
    properties
        .headers()
        .as_ref()
        .and_then(|h| h.inner().get(RETRY_HEADER))
        .and_then(|v| match v {
            AMQPValue::LongLongInt(n) => Some(*n as u32),
            AMQPValue::LongInt(n) => Some(*n as u32),
            AMQPValue::ShortInt(n) => Some(*n as u32),
            _ => None,
        })
        .unwrap_or(0)
}
