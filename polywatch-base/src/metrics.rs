use std::collections::HashMap;

use prometheus::{
    labels, opts, Encoder, IntCounterVec, IntGaugeVec, Registry, TextEncoder,
};

/// The metrics namespace prefix. All metric names start with `{NAMESPACE}_`.
pub const NAMESPACE: &str = "polywatch";

macro_rules! namespaced {
    ($name:expr) => {
        format!("{}_{}", NAMESPACE, $name)
    };
}

/// Metrics registry and helpers for one agent process.
#[derive(Debug)]
pub struct CoreMetrics {
    registry: Registry,
    const_labels: HashMap<String, String>,
    listen_port: u16,
}

impl CoreMetrics {
    /// Track metrics for a particular agent name.
    pub fn new(for_agent: &str, listen_port: u16, registry: Registry) -> prometheus::Result<Self> {
        let const_labels: HashMap<String, String> = labels! {
            namespaced!("baselib_version") => env!("CARGO_PKG_VERSION").into(),
            "agent".into() => for_agent.into(),
        };
        Ok(Self {
            registry,
            const_labels,
            listen_port,
        })
    }

    fn const_labels_ref(&self) -> HashMap<&str, &str> {
        self.const_labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    /// Create and register an int gauge vec under the agent namespace.
    pub fn new_int_gauge(
        &self,
        metric_name: &str,
        help: &str,
        labels: &[&str],
    ) -> prometheus::Result<IntGaugeVec> {
        let gauge = IntGaugeVec::new(
            opts!(namespaced!(metric_name), help, self.const_labels_ref()),
            labels,
        )?;
        self.registry.register(Box::new(gauge.clone()))?;
        Ok(gauge)
    }

    /// Create and register an int counter vec under the agent namespace.
    pub fn new_int_counter(
        &self,
        metric_name: &str,
        help: &str,
        labels: &[&str],
    ) -> prometheus::Result<IntCounterVec> {
        let counter = IntCounterVec::new(
            opts!(namespaced!(metric_name), help, self.const_labels_ref()),
            labels,
        )?;
        self.registry.register(Box::new(counter.clone()))?;
        Ok(counter)
    }

    /// Gather and encode the current metric values in text exposition
    /// format.
    pub fn gather(&self) -> prometheus::Result<Vec<u8>> {
        let collected_metrics = self.registry.gather();
        let mut out_buf = Vec::with_capacity(1024 * 64);
        let encoder = TextEncoder::new();
        encoder.encode(&collected_metrics, &mut out_buf)?;
        Ok(out_buf)
    }

    /// Port the exporter should listen on.
    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// The metric bundle shared by the indexing workers. Cloning is cheap and
/// each worker labels its own series.
#[derive(Clone, Debug)]
pub struct SyncMetrics {
    /// Highest identity each worker's cursor has persisted.
    pub indexed_height: IntGaugeVec,
    /// Items written to the store, by worker and kind.
    pub stored_items: IntCounterVec,
    /// Items a worker could not handle inline and deferred to the gap
    /// registry, by worker and kind.
    pub missed_items: IntCounterVec,
    /// Orphaned blocks recorded during reorg handling.
    pub reorged_blocks: IntCounterVec,
    /// Gap claim attempts by kind and outcome (won/lost).
    pub gap_claims: IntCounterVec,
    /// Pending gaps by kind, refreshed by the Gapfiller.
    pub pending_gaps: IntGaugeVec,
}

impl SyncMetrics {
    /// Register the worker metric bundle on `metrics`.
    pub fn new(metrics: &CoreMetrics) -> prometheus::Result<Self> {
        Ok(Self {
            indexed_height: metrics.new_int_gauge(
                "indexed_height",
                "Highest identity persisted by each worker cursor",
                &["worker"],
            )?,
            stored_items: metrics.new_int_counter(
                "stored_items",
                "Items written to the store",
                &["worker", "kind"],
            )?,
            missed_items: metrics.new_int_counter(
                "missed_items",
                "Items deferred to the gap registry instead of inline handling",
                &["worker", "kind"],
            )?,
            reorged_blocks: metrics.new_int_counter(
                "reorged_blocks",
                "Orphaned blocks recorded during reorg handling",
                &["worker"],
            )?,
            gap_claims: metrics.new_int_counter(
                "gap_claims",
                "Gap claim attempts",
                &["kind", "outcome"],
            )?,
            pending_gaps: metrics.new_int_gauge(
                "pending_gaps",
                "Currently pending gaps",
                &["kind"],
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_namespaced() {
        let metrics = CoreMetrics::new("test", 0, Registry::new()).unwrap();
        let sync = SyncMetrics::new(&metrics).unwrap();
        sync.stored_items.with_label_values(&["live_indexer", "block"]).inc();
        let encoded = String::from_utf8(metrics.gather().unwrap()).unwrap();
        assert!(encoded.contains("polywatch_stored_items"));
        assert!(encoded.contains("agent=\"test\""));
    }
}
