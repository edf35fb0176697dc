//! Shared runtime dependencies handed to every handler invocation.

use std::sync::Arc;

use secrecy::SecretString;

use crate::metrics::{BrokerMetrics, SharedMetricsRegistry};
use crate::state::BrokerState;
use crate::system::SystemFacade;

/// Everything a handler may touch besides the session and the message.
///
/// Handlers receive this by reference on every call; nothing here is
/// reachable through globals, so tests can run brokers side by side with
/// independent facades and counters.
pub struct RuntimeContext {
    system: Arc<dyn SystemFacade>,
    state: Arc<BrokerState>,
    metrics: Option<SharedMetricsRegistry>,
    token_secret: Option<SecretString>,
}

impl RuntimeContext {
    #[must_use]
    pub fn new(system: Arc<dyn SystemFacade>, state: Arc<BrokerState>) -> Self {
        Self {
            system,
            state,
            metrics: None,
            token_secret: None,
        }
    }

    /// Attach a metrics registry. Without one, recording calls are no-ops.
    #[must_use]
    pub fn with_metrics(mut self, metrics: SharedMetricsRegistry) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Attach the shared secret used to verify session tokens. Without one,
    /// token elevation is refused.
    #[must_use]
    pub fn with_token_secret(mut self, secret: SecretString) -> Self {
        self.token_secret = Some(secret);
        self
    }

    #[must_use]
    pub fn system(&self) -> &dyn SystemFacade {
        self.system.as_ref()
    }

    #[must_use]
    pub fn state(&self) -> &BrokerState {
        &self.state
    }

    #[must_use]
    pub fn metrics(&self) -> Option<&BrokerMetrics> {
        self.metrics
            .as_deref()
            .map(crate::metrics::MetricsRegistry::broker_metrics)
    }

    #[must_use]
    pub fn metrics_registry(&self) -> Option<&SharedMetricsRegistry> {
        self.metrics.as_ref()
    }

    #[must_use]
    pub fn token_secret(&self) -> Option<&SecretString> {
        self.token_secret.as_ref()
    }
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("metrics", &self.metrics.is_some())
            .field("token_secret", &self.token_secret.is_some())
            .finish_non_exhaustive()
    }
}
