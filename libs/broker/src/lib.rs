//! AMQP transport for the analysis pipeline.
//!
//! Wraps `lapin` with the topic-exchange / routing-key / queue-binding shape the
//! outbox publisher and the subscriber worker both rely on: a durable topic exchange,
//! a durable queue bound with a wildcard pattern, manual acknowledgement, and a
//! per-delivery [`DeliveryController`] that knows how to requeue with a bounded
//! `x-retry-count` header.

pub mod config;
mod controller;
mod error;

pub use config::BrokerConfig;
pub use controller::DeliveryController;
pub use error::{BrokerError, BrokerResult};

use futures::StreamExt;
use lapin::{
    options::{
        BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use std::future::Future;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// A connected handle to the broker, holding the topology configuration needed to
/// (re)declare the exchange/queue/binding and to publish or consume messages.
pub struct Broker {
    config: BrokerConfig,
    connection: Connection,
}

impl Broker {
    pub async fn connect(config: BrokerConfig) -> BrokerResult<Self> {
        let connection = tokio::time::timeout(
            config.connect_timeout,
            Connection::connect(
                &config.url,
                ConnectionProperties::default().with_connection_name("page-analyzer".into()),
            ),
        )
        .await
        .map_err(|_| BrokerError::Other(anyhow::anyhow!("timed out connecting to broker")))??;

        info!("connected to broker at {}", redact_url(&config.url));

        let broker = Self { config, connection };
        broker.declare_topology().await?;
        Ok(broker)
    }

    async fn channel(&self) -> BrokerResult<Channel> {
        let channel = self.connection.create_channel().await?;
        channel
            .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
            .await?;
        Ok(channel)
    }

    /// Declare the topic exchange, the durable work queue, and bind it with the
    /// configured wildcard pattern. Idempotent; safe to call after a reconnect.
    pub async fn declare_topology(&self) -> BrokerResult<()> {
        let channel = self.connection.create_channel().await?;

        channel
            .exchange_declare(
                &self.config.exchange_name,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: self.config.durable,
                    auto_delete: self.config.auto_delete,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .queue_declare(
                &self.config.queue_name,
                QueueDeclareOptions {
                    durable: self.config.durable,
                    auto_delete: self.config.auto_delete,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .queue_bind(
                &self.config.queue_name,
                &self.config.exchange_name,
                &self.config.binding_pattern,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        debug!(
            exchange = %self.config.exchange_name,
            queue = %self.config.queue_name,
            pattern = %self.config.binding_pattern,
            "broker topology declared"
        );

        Ok(())
    }

    /// Publish a persistent message on the configured exchange using `routing_key`.
    pub async fn publish(&self, routing_key: &str, payload: &[u8]) -> BrokerResult<()> {
        let channel = self.channel().await?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2) // persistent
            .with_timestamp(chrono_now_secs());

        channel
            .basic_publish(
                &self.config.exchange_name,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| BrokerError::PublishFailed(e.to_string()))?
            .await
            .map_err(|e| BrokerError::PublishFailed(e.to_string()))?;

        Ok(())
    }

    /// Consume from the configured queue until `shutdown` fires, invoking `handler` for
    /// each delivery with a [`DeliveryController`] the handler must ack/nack/reject/requeue.
    /// On a transport error the loop sleeps `reconnect_delay` and re-establishes the
    /// consumer rather than returning.
    pub async fn consume<F, Fut>(
        &self,
        consumer_tag: &str,
        mut shutdown: watch::Receiver<()>,
        handler: F,
    ) -> BrokerResult<()>
    where
        F: Fn(DeliveryController) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        loop {
            let channel = match self.channel().await {
                Ok(c) => c,
                Err(e) => {
                    error!(error = %e, "failed to open consumer channel, retrying");
                    tokio::time::sleep(self.config.reconnect_delay).await;
                    continue;
                }
            };

            let mut consumer = match channel
                .basic_consume(
                    &self.config.queue_name,
                    consumer_tag,
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
            {
                Ok(c) => c,
                Err(e) => {
                    error!(error = %e, "failed to start consumer, retrying");
                    tokio::time::sleep(self.config.reconnect_delay).await;
                    continue;
                }
            };

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("consumer shutting down");
                        return Ok(());
                    }
                    next = consumer.next() => {
                        match next {
                            Some(Ok(delivery)) => {
                                let controller = DeliveryController::new(
                                    channel.clone(),
                                    delivery,
                                    self.config.exchange_name.clone(),
                                    self.config.max_requeue_count,
                                );
                                handler(controller).await;
                            }
                            Some(Err(e)) => {
                                warn!(error = %e, "consumer stream error, reconnecting");
                                break;
                            }
                            None => {
                                warn!("consumer stream closed, reconnecting");
                                break;
                            }
                        }
                    }
                }
            }

            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }
}

fn chrono_now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn redact_url(url: &str) -> String {
    match url.find('@') {
        Some(at) => match url.find("://") {
            Some(scheme_end) => format!("{}://***@{}", &url[..scheme_end], &url[at + 1..]),
            None => "***".to_string(),
        },
        None => url.to_string(),
    }
}
