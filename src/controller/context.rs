use std::sync::Arc;

use kube::Client;

use crate::config::OperatorConfig;
use crate::events::TracingEventSink;

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Operator configuration
    pub config: Arc<OperatorConfig>,
    /// Sink for warning events raised during manifest generation
    pub events: TracingEventSink,
}

impl Context {
    pub fn new(client: Client, config: Arc<OperatorConfig>) -> Self {
        Self {
            client,
            config,
            events: TracingEventSink,
        }
    }
}
