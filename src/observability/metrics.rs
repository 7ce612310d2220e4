use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub active_deliveries: IntGauge,
    pub location_updates_total: IntCounterVec,
    pub location_update_latency_seconds: HistogramVec,
    pub durable_write_failures_total: IntCounter,
    pub stale_evictions_total: IntCounter,
    pub connections: IntGauge,
    pub fanout_dropped_total: IntCounter,
    pub broker_failures_total: IntCounter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let active_deliveries = IntGauge::new(
            "active_deliveries",
            "Deliveries currently held in the local tracking map",
        )
        .expect("valid active_deliveries metric");

        let location_updates_total = IntCounterVec::new(
            Opts::new("location_updates_total", "Location updates by outcome"),
            &["outcome"],
        )
        .expect("valid location_updates_total metric");

        let location_update_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "location_update_latency_seconds",
                "Latency of the synchronous location update path in seconds",
            ),
            &["outcome"],
        )
        .expect("valid location_update_latency_seconds metric");

        let durable_write_failures_total = IntCounter::new(
            "durable_write_failures_total",
            "Best-effort durable writes that failed",
        )
        .expect("valid durable_write_failures_total metric");

        let stale_evictions_total = IntCounter::new(
            "stale_evictions_total",
            "Deliveries evicted from the local map for inactivity",
        )
        .expect("valid stale_evictions_total metric");

        let connections = IntGauge::new("realtime_connections", "Open realtime connections")
            .expect("valid realtime_connections metric");

        let fanout_dropped_total = IntCounter::new(
            "fanout_dropped_total",
            "Frames dropped because a connection queue was full",
        )
        .expect("valid fanout_dropped_total metric");

        let broker_failures_total = IntCounter::new(
            "broker_failures_total",
            "Broker publishes that failed",
        )
        .expect("valid broker_failures_total metric");

        registry
            .register(Box::new(active_deliveries.clone()))
            .expect("register active_deliveries");
        registry
            .register(Box::new(location_updates_total.clone()))
            .expect("register location_updates_total");
        registry
            .register(Box::new(location_update_latency_seconds.clone()))
            .expect("register location_update_latency_seconds");
        registry
            .register(Box::new(durable_write_failures_total.clone()))
            .expect("register durable_write_failures_total");
        registry
            .register(Box::new(stale_evictions_total.clone()))
            .expect("register stale_evictions_total");
        registry
            .register(Box::new(connections.clone()))
            .expect("register realtime_connections");
        registry
            .register(Box::new(fanout_dropped_total.clone()))
            .expect("register fanout_dropped_total");
        registry
            .register(Box::new(broker_failures_total.clone()))
            .expect("register broker_failures_total");

        Self {
            registry,
            active_deliveries,
            location_updates_total,
            location_update_latency_seconds,
            durable_write_failures_total,
            stale_evictions_total,
            connections,
            fanout_dropped_total,
            broker_failures_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
