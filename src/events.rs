//! Warning-event emission for policy corrections
//!
//! Resource clamping and instance-count enforcement silently correct the
//! generated manifests; the only externally visible trace is a warning event.
//! Generators receive the sink as a trait object so tests can capture events
//! without a Kubernetes API server.

use tracing::warn;

/// Receives warning events emitted while manifests are generated.
pub trait EventSink: Send + Sync {
    fn warning(&self, reason: &str, message: &str);
}

/// Default sink that forwards warnings to the tracing subscriber.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn warning(&self, reason: &str, message: &str) {
        warn!(reason, "{}", message);
    }
}

/// In-memory sink for asserting on emitted warnings in tests.
#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use super::EventSink;

    #[derive(Default)]
    pub(crate) struct RecordingEventSink {
        pub(crate) events: Mutex<Vec<(String, String)>>,
    }

    impl EventSink for RecordingEventSink {
        fn warning(&self, reason: &str, message: &str) {
            self.events
                .lock()
                .unwrap()
                .push((reason.to_string(), message.to_string()));
        }
    }

    impl RecordingEventSink {
        pub(crate) fn reasons(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|(reason, _)| reason.clone())
                .collect()
        }
    }
}
