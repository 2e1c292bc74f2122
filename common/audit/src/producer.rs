use crate::{DeliveryReport, PublishError, PublishResult, PublishedMessage};
use common_observability::PublisherMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, warn};

/// The network seam: everything that talks to a broker implements this.
///
/// `enqueue` must not block. The client owns the ticket from then on and must
/// complete it exactly once, or drop it if the message is abandoned.
pub trait BrokerClient: Send + Sync {
    fn enqueue(&self, message: PublishedMessage, ticket: DeliveryTicket);

    /// Blocks until nothing is in flight or `timeout` elapses.
    fn flush(&self, timeout: Duration) -> PublishResult<()>;

    fn in_flight(&self) -> usize;

    /// Tears the client down. Anything still queued is abandoned.
    fn shutdown(&self);
}

/// Completion token carried alongside a message through the broker client.
pub struct DeliveryTicket {
    topic: String,
    key: String,
    reply: Option<oneshot::Sender<PublishResult<DeliveryReport>>>,
    metrics: Arc<PublisherMetrics>,
}

impl DeliveryTicket {
    pub(crate) fn new(topic: &str, key: &str, metrics: Arc<PublisherMetrics>) -> (Self, oneshot::Receiver<PublishResult<DeliveryReport>>) {
        let (reply, receiver) = oneshot::channel();
        let ticket = Self {
            topic: topic.to_string(),
            key: key.to_string(),
            reply: Some(reply),
            metrics,
        };
        (ticket, receiver)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Records the outcome, logs it and resolves the caller's handle if it is still held.
    pub fn complete(mut self, result: PublishResult<DeliveryReport>) {
        match &result {
            Ok(report) => {
                self.metrics.message_delivered(&self.topic);
                debug!(
                    topic = %report.topic,
                    partition = report.partition,
                    offset = report.offset,
                    "Audit message delivered"
                );
            }
            Err(err) => {
                self.metrics.message_failed(&self.topic);
                error!(?err, topic = %self.topic, key = %self.key, "Failed to deliver audit message");
            }
        }
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(result);
        }
    }
}

impl Drop for DeliveryTicket {
    fn drop(&mut self) {
        if self.reply.is_some() {
            self.metrics.abandoned.inc();
            warn!(topic = %self.topic, key = %self.key, "Audit message abandoned before delivery");
        }
    }
}

/// Caller-side view of one send. Dropping it means fire-and-forget; delivery
/// failures are still logged by the ticket.
#[derive(Debug)]
pub struct DeliveryHandle {
    reply: oneshot::Receiver<PublishResult<DeliveryReport>>,
    abandoned: watch::Receiver<bool>,
}

impl DeliveryHandle {
    pub(crate) fn new(reply: oneshot::Receiver<PublishResult<DeliveryReport>>, abandoned: watch::Receiver<bool>) -> Self {
        Self { reply, abandoned }
    }

    /// Resolves once the broker acknowledged or rejected the message, or the
    /// manager gave up on it during close.
    pub async fn wait(self) -> PublishResult<DeliveryReport> {
        let DeliveryHandle { mut reply, mut abandoned } = self;
        loop {
            tokio::select! {
                biased;
                result = &mut reply => return result.unwrap_or(Err(PublishError::Abandoned)),
                changed = abandoned.changed() => {
                    if changed.is_err() {
                        return reply.await.unwrap_or(Err(PublishError::Abandoned));
                    }
                    if *abandoned.borrow() {
                        return Err(PublishError::Abandoned);
                    }
                }
            }
        }
    }

    /// Non-blocking check used by hosts that poll instead of awaiting.
    pub fn try_result(&mut self) -> Option<PublishResult<DeliveryReport>> {
        match self.reply.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) if *self.abandoned.borrow() => Some(Err(PublishError::Abandoned)),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(PublishError::Abandoned)),
        }
    }
}

#[cfg(feature = "kafka-producer")]
pub use kafka::{DeliveryContext, KafkaBrokerClient};

#[cfg(feature = "kafka-producer")]
mod kafka {
    use super::{BrokerClient, DeliveryTicket};
    use crate::{DeliveryReport, ProducerConfig, PublishError, PublishResult, PublishedMessage};
    use rdkafka::error::{KafkaError, RDKafkaErrorCode};
    use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, PurgeConfig, ThreadedProducer};
    use rdkafka::{ClientContext, Message};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tracing::{info, warn};

    /// Routes librdkafka delivery reports back to the ticket that travelled with the record.
    pub struct DeliveryContext;

    impl ClientContext for DeliveryContext {}

    impl ProducerContext for DeliveryContext {
        type DeliveryOpaque = Box<DeliveryTicket>;

        fn delivery(&self, delivery_result: &DeliveryResult<'_>, ticket: Self::DeliveryOpaque) {
            if let Err((err, _)) = delivery_result {
                if is_purged(err) {
                    // Dropping the ticket records the message as abandoned.
                    drop(ticket);
                    return;
                }
            }
            let result = match delivery_result {
                Ok(message) => Ok(DeliveryReport {
                    topic: message.topic().to_string(),
                    partition: message.partition(),
                    offset: message.offset(),
                }),
                Err((err, _)) => Err(PublishError::Transport(err.to_string())),
            };
            (*ticket).complete(result);
        }
    }

    /// Reports librdkafka emits for messages removed by `purge`.
    pub(crate) fn is_purged(err: &KafkaError) -> bool {
        matches!(
            err,
            KafkaError::MessageProduction(RDKafkaErrorCode::PurgeQueue | RDKafkaErrorCode::PurgeInflight)
        )
    }

    pub struct KafkaBrokerClient {
        producer: ThreadedProducer<DeliveryContext>,
        closed: AtomicBool,
    }

    impl KafkaBrokerClient {
        pub fn new(config: &ProducerConfig) -> PublishResult<Self> {
            let producer: ThreadedProducer<DeliveryContext> = config
                .client_config()
                .create_with_context(DeliveryContext)
                .map_err(|e| PublishError::Client(format!("Failed to create Kafka producer: {e}")))?;
            info!(
                bootstrap_servers = %config.bootstrap_servers,
                client_id = %config.client_id,
                acks = %config.effective_acks(),
                "Kafka producer initialised"
            );
            Ok(Self { producer, closed: AtomicBool::new(false) })
        }
    }

    impl BrokerClient for KafkaBrokerClient {
        fn enqueue(&self, message: PublishedMessage, ticket: DeliveryTicket) {
            if self.closed.load(Ordering::Acquire) {
                ticket.complete(Err(PublishError::Transport("Kafka producer already shut down".into())));
                return;
            }
            let record = BaseRecord::with_opaque_to(&message.topic, Box::new(ticket))
                .key(message.partition_key.as_str())
                .payload(message.payload.as_slice());
            if let Err((err, record)) = self.producer.send(record) {
                (*record.delivery_opaque)
                    .complete(Err(PublishError::Transport(format!("Failed to enqueue message: {err}"))));
            }
        }

        fn flush(&self, timeout: Duration) -> PublishResult<()> {
            self.producer.flush(timeout).map_err(|err| {
                warn!(?err, in_flight = self.producer.in_flight_count(), "Kafka flush incomplete");
                PublishError::FlushTimeout(timeout)
            })
        }

        fn in_flight(&self) -> usize {
            self.producer.in_flight_count().max(0) as usize
        }

        /// Drops everything still queued or in flight so nothing is written after close.
        fn shutdown(&self) {
            self.closed.store(true, Ordering::Release);
            let purged = self.producer.in_flight_count();
            self.producer.purge(PurgeConfig::default().queue().inflight());
            if purged > 0 {
                warn!(purged, "Purged undelivered audit messages from Kafka producer");
            }
        }
    }

}
