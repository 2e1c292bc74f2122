use crate::{
    BrokerClient, DeliveryHandle, DeliveryTicket, ManagerState, ProducerConfig, PublishError, PublishResult,
    PublishedMessage,
};
use common_observability::PublisherMetrics;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Owns the single broker client of the process and the delivery configuration.
///
/// `send` is lock-free: it checks an atomic state and registers itself in an
/// entering counter that `close` drains before flushing. A send that observed
/// `Ready` is therefore flushed by `close`, and a send that starts after `close`
/// began is refused without touching the client.
pub struct ConnectionManager {
    config: ProducerConfig,
    client: Arc<dyn BrokerClient>,
    state: AtomicU8,
    entering: AtomicUsize,
    abandoned: watch::Sender<bool>,
    metrics: Arc<PublisherMetrics>,
}

impl ConnectionManager {
    /// Wraps an already built client. Tests pass a `MemoryBroker` here.
    pub fn with_client(config: ProducerConfig, client: Arc<dyn BrokerClient>, metrics: Arc<PublisherMetrics>) -> Self {
        let (abandoned, _) = watch::channel(false);
        Self {
            config,
            client,
            state: AtomicU8::new(ManagerState::Ready.as_u8()),
            entering: AtomicUsize::new(0),
            abandoned,
            metrics,
        }
    }

    /// Builds the rdkafka client for `config`.
    #[cfg(feature = "kafka-producer")]
    pub fn connect(config: ProducerConfig, metrics: Arc<PublisherMetrics>) -> PublishResult<Self> {
        config.validate()?;
        if config.acks_overridden() {
            warn!(
                configured = %config.acks,
                effective = %config.effective_acks(),
                "Idempotent producer requires acks=all; overriding KAFKA_ACKS"
            );
        }
        info!(
            bootstrap_servers = %config.bootstrap_servers,
            client_id = %config.client_id,
            acks = %config.acks,
            "Initialising Kafka producer for audit event publishing"
        );
        let client = crate::KafkaBrokerClient::new(&config)?;
        Ok(Self::with_client(config, Arc::new(client), metrics))
    }

    #[cfg(feature = "kafka-producer")]
    pub fn from_env(metrics: Arc<PublisherMetrics>) -> PublishResult<Self> {
        Self::connect(ProducerConfig::from_env()?, metrics)
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<PublisherMetrics> {
        &self.metrics
    }

    pub fn state(&self) -> ManagerState {
        ManagerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn in_flight(&self) -> usize {
        self.client.in_flight()
    }

    /// Enqueues one message without blocking. Only fails synchronously when the
    /// manager is closing or closed; transport failures arrive through the handle.
    pub fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> PublishResult<DeliveryHandle> {
        let message = PublishedMessage::new(topic, key, payload)?;
        self.send_message(message)
    }

    pub fn send_message(&self, message: PublishedMessage) -> PublishResult<DeliveryHandle> {
        self.entering.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if state != ManagerState::Ready {
            self.entering.fetch_sub(1, Ordering::SeqCst);
            self.metrics.rejected.inc();
            warn!(topic = %message.topic, %state, "Attempted to send audit message while producer is unavailable");
            return Err(PublishError::Unavailable(state));
        }

        let (ticket, reply) = DeliveryTicket::new(&message.topic, &message.partition_key, self.metrics.clone());
        self.metrics.message_enqueued(&message.topic);
        self.client.enqueue(message, ticket);
        let handle = DeliveryHandle::new(reply, self.abandoned.subscribe());
        self.entering.fetch_sub(1, Ordering::SeqCst);
        Ok(handle)
    }

    /// Blocks until every enqueued message was acknowledged or failed for good.
    /// Bounded by the delivery timeout; a no-op once closing has started.
    pub fn flush(&self) -> PublishResult<()> {
        if self.state() != ManagerState::Ready {
            return Ok(());
        }
        self.client.flush(self.config.delivery_timeout)
    }

    /// Idempotent graceful shutdown: drain, flush within the grace period,
    /// abandon whatever is left and tear the client down.
    pub fn close(&self) {
        let began = self.state.compare_exchange(
            ManagerState::Ready.as_u8(),
            ManagerState::Closing.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if began.is_err() {
            return;
        }
        info!("Closing Kafka producer");

        while self.entering.load(Ordering::SeqCst) > 0 {
            std::thread::yield_now();
        }

        if let Err(err) = self.client.flush(self.config.close_grace) {
            let abandoned = self.client.in_flight();
            warn!(?err, abandoned, grace = ?self.config.close_grace, "Grace period elapsed; abandoning in-flight audit messages");
            self.abandoned.send_replace(true);
        }
        self.client.shutdown();

        self.state.store(ManagerState::Closed.as_u8(), Ordering::SeqCst);
        info!("Kafka producer closed");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if self.state() == ManagerState::Ready {
            warn!("Connection manager dropped without close; flushing");
            self.close();
        }
    }
}

type ManagerFactory = dyn Fn(Arc<PublisherMetrics>) -> PublishResult<ConnectionManager> + Send + Sync;

/// One-time initialisation barrier around the process's connection manager.
///
/// Concurrent first callers block on the same construction and all receive the
/// same instance. A failed construction leaves the slot empty and the next call
/// tries again. Once `close` ran the slot stays closed and never builds a client.
pub struct ManagerSlot {
    cell: OnceCell<Arc<ConnectionManager>>,
    initializing: AtomicBool,
    closed: AtomicBool,
    factory: Box<ManagerFactory>,
    metrics: Arc<PublisherMetrics>,
}

impl ManagerSlot {
    pub fn new<F>(metrics: Arc<PublisherMetrics>, factory: F) -> Self
    where
        F: Fn(Arc<PublisherMetrics>) -> PublishResult<ConnectionManager> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            initializing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            factory: Box::new(factory),
            metrics,
        }
    }

    /// Slot whose manager is built from the `KAFKA_*` environment on first use.
    #[cfg(feature = "kafka-producer")]
    pub fn from_env(metrics: Arc<PublisherMetrics>) -> Self {
        Self::new(metrics, ConnectionManager::from_env)
    }

    pub fn metrics(&self) -> &Arc<PublisherMetrics> {
        &self.metrics
    }

    /// Returns the shared manager, constructing it on first call. Fails with
    /// `Unavailable(Closed)` after `close`.
    pub fn instance(&self) -> PublishResult<Arc<ConnectionManager>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(self.refuse());
        }
        let manager = self
            .cell
            .get_or_try_init(|| {
                self.initializing.store(true, Ordering::SeqCst);
                let built = (self.factory)(self.metrics.clone());
                self.initializing.store(false, Ordering::SeqCst);
                match built {
                    Ok(manager) => Ok(Arc::new(manager)),
                    Err(err) => {
                        self.metrics.init_failures.inc();
                        error!(?err, "Failed to initialise Kafka producer");
                        Err(err)
                    }
                }
            })?
            .clone();

        // A close racing construction may not have seen this manager.
        if self.closed.load(Ordering::SeqCst) {
            manager.close();
            return Err(self.refuse());
        }
        Ok(manager)
    }

    /// Latches the slot closed and closes the manager if one was built.
    /// Idempotent; blocks for at most the manager's close grace period.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        match self.cell.get() {
            Some(manager) => manager.close(),
            None => info!("Kafka producer was never initialised; slot closed"),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn refuse(&self) -> PublishError {
        self.metrics.rejected.inc();
        warn!("Audit publisher already shut down; refusing to build a Kafka producer");
        PublishError::Unavailable(ManagerState::Closed)
    }

    /// The manager if one was already built; never constructs.
    pub fn get(&self) -> Option<Arc<ConnectionManager>> {
        self.cell.get().cloned()
    }

    pub fn state(&self) -> ManagerState {
        match self.cell.get() {
            Some(manager) => manager.state(),
            None if self.closed.load(Ordering::SeqCst) => ManagerState::Closed,
            None if self.initializing.load(Ordering::SeqCst) => ManagerState::Initializing,
            None => ManagerState::Uninitialized,
        }
    }
}

#[cfg(feature = "kafka-producer")]
static SHARED: OnceCell<Arc<ManagerSlot>> = OnceCell::new();

/// Process-wide slot for hosts that cannot pass one down explicitly.
#[cfg(feature = "kafka-producer")]
pub fn shared_slot() -> PublishResult<Arc<ManagerSlot>> {
    SHARED
        .get_or_try_init(|| {
            let metrics = PublisherMetrics::new().map_err(|e| PublishError::Config(format!("metrics registry: {e}")))?;
            Ok(Arc::new(ManagerSlot::from_env(Arc::new(metrics))))
        })
        .cloned()
}
