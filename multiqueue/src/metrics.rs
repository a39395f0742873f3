//! Metrics for [crate::Engine].

use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
};

/// Label for per-queue metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct QueueLabel {
    pub queue: String,
}

impl QueueLabel {
    pub fn new(queue: &str) -> Self {
        Self {
            queue: queue.to_string(),
        }
    }
}

/// Metrics for [crate::Engine].
#[derive(Default)]
pub struct Metrics {
    /// Items enqueued.
    pub enqueued: Counter,
    /// Sequences dequeued.
    pub dequeued: Counter,
    /// Notifications dropped because a subscriber was full.
    pub dropped: Counter,
    /// Queues with in-memory state.
    pub queues: Gauge,
    /// Tip of each queue.
    pub tip: Family<QueueLabel, Gauge>,
    /// Sequences stored ahead of a gap, per queue.
    pub pending: Family<QueueLabel, Gauge>,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: &E) -> Self {
        let metrics = Self::default();
        context.register("enqueued", "Items enqueued", metrics.enqueued.clone());
        context.register("dequeued", "Sequences dequeued", metrics.dequeued.clone());
        context.register(
            "dropped",
            "Notifications dropped because a subscriber was full",
            metrics.dropped.clone(),
        );
        context.register(
            "queues",
            "Queues with in-memory state",
            metrics.queues.clone(),
        );
        context.register("tip", "Tip of each queue", metrics.tip.clone());
        context.register(
            "pending",
            "Sequences stored ahead of a gap",
            metrics.pending.clone(),
        );
        metrics
    }
}
