//! Prometheus metrics for broker health observability.
//!
//! # Metric Families
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `procwarden_connections_total` | Counter | `outcome` |
//! | `procwarden_sessions_active` | Gauge | |
//! | `procwarden_requests_total` | Counter | `message`, `outcome` |
//! | `procwarden_request_duration_seconds` | Histogram | `message` |
//! | `procwarden_denials_total` | Counter | `message`, `held_tier` |
//! | `procwarden_handler_status_total` | Counter | `message`, `status` |
//! | `procwarden_elevations_total` | Counter | `tier` |
//! | `procwarden_shutdown_protection_held` | Gauge | |
//!
//! `message` labels carry [`MessageId::name`] values, so the cardinality is
//! bounded by the catalog. Free-form strings never become labels without
//! passing through [`truncate_label`].
//!
//! [`MessageId::name`]: crate::protocol::messages::MessageId::name

use std::sync::Arc;

use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use thiserror::Error;

/// Maximum length for label values to prevent denial-of-service via
/// unbounded labels.
pub const MAX_LABEL_VALUE_LEN: usize = 64;

/// Histogram buckets for request dispatch duration, in seconds. Most
/// operations are procfs reads; the tail covers blocking memory reads.
pub const REQUEST_DURATION_BUCKETS: &[f64] =
    &[0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Failed to register a metric with Prometheus.
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    /// Failed to encode metrics output.
    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

/// Result type for metrics operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Broker health metrics.
///
/// All metrics use interior mutability and are safe to share across
/// threads. The struct is `Clone`, `Send`, and `Sync`.
#[derive(Clone)]
pub struct BrokerMetrics {
    /// Total connections by acceptance outcome.
    connections_total: CounterVec,

    /// Sessions that completed a handshake and have not yet disconnected.
    sessions_active: Gauge,

    /// Total dispatched requests by message name and dispatch outcome.
    requests_total: CounterVec,

    /// Dispatch duration by message name.
    request_duration: HistogramVec,

    /// Total authorization denials by message name and the tier the session
    /// held when denied.
    denials_total: CounterVec,

    /// Total handler completions by message name and in-reply status.
    handler_status_total: CounterVec,

    /// Total successful tier elevations by resulting tier.
    elevations_total: CounterVec,

    /// Outstanding shutdown-protection acquisitions across all sessions.
    shutdown_protection_held: Gauge,
}

impl BrokerMetrics {
    /// Creates broker metrics and registers them with the given registry.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register.
    pub fn new(registry: &Registry) -> MetricsResult<Self> {
        let connections_total = CounterVec::new(
            Opts::new(
                "procwarden_connections_total",
                "Total connections by acceptance outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(connections_total.clone()))?;

        let sessions_active = Gauge::new(
            "procwarden_sessions_active",
            "Sessions with a completed handshake",
        )?;
        registry.register(Box::new(sessions_active.clone()))?;

        let requests_total = CounterVec::new(
            Opts::new(
                "procwarden_requests_total",
                "Total dispatched requests by message and outcome",
            ),
            &["message", "outcome"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "procwarden_request_duration_seconds",
                "Dispatch duration per message",
            )
            .buckets(REQUEST_DURATION_BUCKETS.to_vec()),
            &["message"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        let denials_total = CounterVec::new(
            Opts::new(
                "procwarden_denials_total",
                "Total authorization denials by message and held tier",
            ),
            &["message", "held_tier"],
        )?;
        registry.register(Box::new(denials_total.clone()))?;

        let handler_status_total = CounterVec::new(
            Opts::new(
                "procwarden_handler_status_total",
                "Total handler completions by message and reply status",
            ),
            &["message", "status"],
        )?;
        registry.register(Box::new(handler_status_total.clone()))?;

        let elevations_total = CounterVec::new(
            Opts::new(
                "procwarden_elevations_total",
                "Total tier elevations by resulting tier",
            ),
            &["tier"],
        )?;
        registry.register(Box::new(elevations_total.clone()))?;

        let shutdown_protection_held = Gauge::new(
            "procwarden_shutdown_protection_held",
            "Outstanding shutdown-protection acquisitions",
        )?;
        registry.register(Box::new(shutdown_protection_held.clone()))?;

        Ok(Self {
            connections_total,
            sessions_active,
            requests_total,
            request_duration,
            denials_total,
            handler_status_total,
            elevations_total,
            shutdown_protection_held,
        })
    }

    // ========================================================================
    // Connection and session metrics
    // ========================================================================

    /// Records a connection attempt outcome, e.g. `accepted`,
    /// `handshake_failed`, `at_capacity`.
    pub fn connection(&self, outcome: &str) {
        let outcome = truncate_label(outcome);
        self.connections_total.with_label_values(&[outcome]).inc();
    }

    pub fn session_started(&self) {
        self.sessions_active.inc();
    }

    pub fn session_ended(&self) {
        self.sessions_active.dec();
    }

    /// Current active-session gauge value, for tests.
    #[must_use]
    pub fn active_sessions(&self) -> f64 {
        self.sessions_active.get()
    }

    // ========================================================================
    // Dispatch metrics
    // ========================================================================

    /// Records one dispatched request.
    pub fn request_completed(&self, message: &str, outcome: &str, duration_secs: f64) {
        let message = truncate_label(message);
        let outcome = truncate_label(outcome);
        self.requests_total
            .with_label_values(&[message, outcome])
            .inc();
        self.request_duration
            .with_label_values(&[message])
            .observe(duration_secs);
    }

    /// Total requests for a message and outcome, for tests.
    #[must_use]
    pub fn request_count(&self, message: &str, outcome: &str) -> f64 {
        let message = truncate_label(message);
        let outcome = truncate_label(outcome);
        self.requests_total
            .with_label_values(&[message, outcome])
            .get()
    }

    /// Records an authorization denial.
    pub fn request_denied(&self, message: &str, held_tier: &str) {
        let message = truncate_label(message);
        let held_tier = truncate_label(held_tier);
        self.denials_total
            .with_label_values(&[message, held_tier])
            .inc();
    }

    /// Total denials for a message and tier, for tests.
    #[must_use]
    pub fn denial_count(&self, message: &str, held_tier: &str) -> f64 {
        let message = truncate_label(message);
        let held_tier = truncate_label(held_tier);
        self.denials_total
            .with_label_values(&[message, held_tier])
            .get()
    }

    /// Records the in-reply status a handler produced.
    pub fn handler_status(&self, message: &str, status: &str) {
        let message = truncate_label(message);
        let status = truncate_label(status);
        self.handler_status_total
            .with_label_values(&[message, status])
            .inc();
    }

    /// Total handler statuses, for tests.
    #[must_use]
    pub fn handler_status_count(&self, message: &str, status: &str) -> f64 {
        let message = truncate_label(message);
        let status = truncate_label(status);
        self.handler_status_total
            .with_label_values(&[message, status])
            .get()
    }

    // ========================================================================
    // Elevation and shutdown metrics
    // ========================================================================

    /// Records a successful tier elevation.
    pub fn session_elevated(&self, tier: &str) {
        let tier = truncate_label(tier);
        self.elevations_total.with_label_values(&[tier]).inc();
    }

    /// Total elevations to a tier, for tests.
    #[must_use]
    pub fn elevation_count(&self, tier: &str) -> f64 {
        let tier = truncate_label(tier);
        self.elevations_total.with_label_values(&[tier]).get()
    }

    /// Mirrors the broker-wide outstanding protection count.
    pub fn set_shutdown_protection_held(&self, held: usize) {
        self.shutdown_protection_held.set(held as f64);
    }
}

/// Metrics registry wrapper holding the Prometheus registry and the broker
/// metrics registered with it.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    broker_metrics: BrokerMetrics,
}

impl MetricsRegistry {
    /// Creates a registry with all broker metrics registered.
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails.
    pub fn new() -> MetricsResult<Self> {
        let registry = Registry::new();
        let broker_metrics = BrokerMetrics::new(&registry)?;
        Ok(Self {
            registry,
            broker_metrics,
        })
    }

    /// Returns the broker metrics.
    #[must_use]
    pub const fn broker_metrics(&self) -> &BrokerMetrics {
        &self.broker_metrics
    }

    /// Encodes all metrics in Prometheus text format, as served from the
    /// `/metrics` endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode_text(&self) -> MetricsResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
    }

    /// Returns the underlying Prometheus registry.
    #[must_use]
    pub const fn prometheus_registry(&self) -> &Registry {
        &self.registry
    }
}

/// Shared metrics registry for use across the daemon.
pub type SharedMetricsRegistry = Arc<MetricsRegistry>;

/// Creates a new shared metrics registry.
///
/// # Errors
///
/// Returns an error if metric registration fails.
pub fn new_shared_registry() -> MetricsResult<SharedMetricsRegistry> {
    Ok(Arc::new(MetricsRegistry::new()?))
}

/// Truncates a label value at a UTF-8 boundary. Known label sources are
/// bounded already; this guards the free-form ones.
fn truncate_label(value: &str) -> &str {
    if value.len() <= MAX_LABEL_VALUE_LEN {
        return value;
    }
    let end = value
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|&end| end <= MAX_LABEL_VALUE_LEN)
        .last()
        .unwrap_or(0);
    &value[..end]
}

#[cfg(test)]
#[allow(clippy::float_cmp)] // Prometheus counters/gauges return exact integer values as f64
mod tests {
    use super::*;

    #[test]
    fn registry_creation_and_encoding() {
        let registry = MetricsRegistry::new().expect("registry creation should succeed");
        assert!(registry.encode_text().is_ok());
    }

    #[test]
    fn session_gauge_tracks_lifecycle() {
        let registry = MetricsRegistry::new().unwrap();
        let metrics = registry.broker_metrics();

        assert_eq!(metrics.active_sessions(), 0.0);
        metrics.session_started();
        metrics.session_started();
        assert_eq!(metrics.active_sessions(), 2.0);
        metrics.session_ended();
        assert_eq!(metrics.active_sessions(), 1.0);
    }

    #[test]
    fn request_counters_split_by_outcome() {
        let registry = MetricsRegistry::new().unwrap();
        let metrics = registry.broker_metrics();

        metrics.request_completed("open_process", "completed", 0.002);
        metrics.request_completed("open_process", "completed", 0.004);
        metrics.request_completed("open_process", "denied", 0.001);

        assert_eq!(metrics.request_count("open_process", "completed"), 2.0);
        assert_eq!(metrics.request_count("open_process", "denied"), 1.0);
        assert_eq!(metrics.request_count("open_process", "unsupported"), 0.0);
    }

    #[test]
    fn denial_counter_carries_held_tier() {
        let registry = MetricsRegistry::new().unwrap();
        let metrics = registry.broker_metrics();

        metrics.request_denied("terminate_process", "low");
        metrics.request_denied("terminate_process", "low");
        metrics.request_denied("terminate_process", "medium");

        assert_eq!(metrics.denial_count("terminate_process", "low"), 2.0);
        assert_eq!(metrics.denial_count("terminate_process", "medium"), 1.0);
    }

    #[test]
    fn handler_status_counter() {
        let registry = MetricsRegistry::new().unwrap();
        let metrics = registry.broker_metrics();

        metrics.handler_status("query_information_process", "success");
        metrics.handler_status("query_information_process", "not_found");

        assert_eq!(
            metrics.handler_status_count("query_information_process", "success"),
            1.0
        );
        assert_eq!(
            metrics.handler_status_count("query_information_process", "not_found"),
            1.0
        );
    }

    #[test]
    fn elevation_counter() {
        let registry = MetricsRegistry::new().unwrap();
        let metrics = registry.broker_metrics();

        metrics.session_elevated("maximum");
        metrics.session_elevated("maximum");
        assert_eq!(metrics.elevation_count("maximum"), 2.0);
        assert_eq!(metrics.elevation_count("medium"), 0.0);
    }

    #[test]
    fn all_families_appear_after_observation() {
        let registry = MetricsRegistry::new().unwrap();
        let metrics = registry.broker_metrics();

        metrics.connection("accepted");
        metrics.session_started();
        metrics.request_completed("query_clock", "completed", 0.001);
        metrics.request_denied("system_control", "low");
        metrics.handler_status("query_clock", "success");
        metrics.session_elevated("medium");
        metrics.set_shutdown_protection_held(1);

        let output = registry.encode_text().unwrap();
        for family in [
            "procwarden_connections_total",
            "procwarden_sessions_active",
            "procwarden_requests_total",
            "procwarden_request_duration_seconds",
            "procwarden_denials_total",
            "procwarden_handler_status_total",
            "procwarden_elevations_total",
            "procwarden_shutdown_protection_held",
        ] {
            assert!(output.contains(family), "missing {family}");
        }
    }

    #[test]
    fn label_truncation_is_utf8_safe() {
        let long_ascii = "a".repeat(200);
        assert_eq!(truncate_label(&long_ascii).len(), MAX_LABEL_VALUE_LEN);

        let exact = "b".repeat(MAX_LABEL_VALUE_LEN);
        assert_eq!(truncate_label(&exact), exact);

        // 4-byte characters crossing the boundary must not split.
        let emoji = "\u{1F600}".repeat(20);
        let truncated = truncate_label(&emoji);
        assert!(truncated.len() <= MAX_LABEL_VALUE_LEN);
        assert_eq!(truncated.len() % 4, 0);

        let mixed = format!("{}{}", "c".repeat(63), "\u{1F600}");
        assert_eq!(truncate_label(&mixed), "c".repeat(63));
    }

    #[test]
    fn shared_registry_round_trip() {
        let registry = new_shared_registry().unwrap();
        registry.broker_metrics().connection("accepted");
        let output = registry.encode_text().unwrap();
        assert!(output.contains("procwarden_connections_total"));
    }
}
