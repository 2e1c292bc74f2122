use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters for the audit event publishing pipeline.
///
/// Each instance owns its registry so tests and embedded hosts can keep
/// independent counts.
#[derive(Clone)]
pub struct PublisherMetrics {
    pub registry: Registry,
    pub enqueued: IntCounterVec,
    pub delivered: IntCounterVec,
    pub failed: IntCounterVec,
    pub abandoned: IntCounter,
    pub rejected: IntCounter,
    pub filtered: IntCounterVec,
    pub dropped: IntCounterVec,
    pub init_failures: IntCounter,
}

impl PublisherMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let enqueued = IntCounterVec::new(
            Opts::new(
                "audit_events_enqueued_total",
                "Audit messages handed to the broker client",
            ),
            &["topic"],
        )?;
        registry.register(Box::new(enqueued.clone()))?;

        let delivered = IntCounterVec::new(
            Opts::new(
                "audit_events_delivered_total",
                "Audit messages acknowledged by the broker",
            ),
            &["topic"],
        )?;
        registry.register(Box::new(delivered.clone()))?;

        let failed = IntCounterVec::new(
            Opts::new(
                "audit_events_failed_total",
                "Audit messages that permanently failed delivery",
            ),
            &["topic"],
        )?;
        registry.register(Box::new(failed.clone()))?;

        let abandoned = IntCounter::new(
            "audit_events_abandoned_total",
            "Audit messages abandoned when the close grace period elapsed",
        )?;
        registry.register(Box::new(abandoned.clone()))?;

        let rejected = IntCounter::new(
            "audit_events_rejected_total",
            "Sends refused because the connection manager was closing or closed",
        )?;
        registry.register(Box::new(rejected.clone()))?;

        let filtered = IntCounterVec::new(
            Opts::new(
                "audit_events_filtered_total",
                "Domain events skipped by the allow-list",
            ),
            &["source"],
        )?;
        registry.register(Box::new(filtered.clone()))?;

        let dropped = IntCounterVec::new(
            Opts::new(
                "audit_events_dropped_total",
                "Domain events lost to a transformation or publishing error",
            ),
            &["source"],
        )?;
        registry.register(Box::new(dropped.clone()))?;

        let init_failures = IntCounter::new(
            "audit_manager_init_failures_total",
            "Failed attempts to construct the broker connection manager",
        )?;
        registry.register(Box::new(init_failures.clone()))?;

        Ok(Self {
            registry,
            enqueued,
            delivered,
            failed,
            abandoned,
            rejected,
            filtered,
            dropped,
            init_failures,
        })
    }

    pub fn message_enqueued(&self, topic: &str) {
        self.enqueued.with_label_values(&[topic]).inc();
    }

    pub fn message_delivered(&self, topic: &str) {
        self.delivered.with_label_values(&[topic]).inc();
    }

    pub fn message_failed(&self, topic: &str) {
        self.failed.with_label_values(&[topic]).inc();
    }

    pub fn event_filtered(&self, source: &str) {
        self.filtered.with_label_values(&[source]).inc();
    }

    pub fn event_dropped(&self, source: &str) {
        self.dropped.with_label_values(&[source]).inc();
    }

    /// Prometheus text exposition of every registered counter.
    pub fn render(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
