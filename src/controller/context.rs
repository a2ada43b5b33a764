use std::sync::Arc;
use std::time::Duration;

use crate::config::ReconcilerConfig;
use crate::controller::reconciler::ReconciliationMode;
use crate::retry::RetryPolicy;

/// Shared context for one reconciler run
pub struct Context<C> {
    /// Kubernetes client
    pub client: Arc<C>,
    pub mode: ReconciliationMode,
    /// Retry policy for every deploy
    pub retry: RetryPolicy,
    /// Sleep between availability probes
    pub poll_interval: Duration,
}

impl<C> Context<C> {
    pub fn new(client: Arc<C>, config: &ReconcilerConfig) -> Self {
        Self {
            client,
            mode: config.mode(),
            retry: config.retry_policy(),
            poll_interval: config.poll_interval,
        }
    }
}

impl<C> Clone for Context<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            mode: self.mode,
            retry: self.retry,
            poll_interval: self.poll_interval,
        }
    }
}
