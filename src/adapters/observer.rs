//! Activity observers: the seam any external dashboard plugs into.

use std::sync::Mutex;

use tracing::info;

use super::Observer;

/// Default observer: structured activity log lines.
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn notify(&self, topic: &str, text: &str) {
        info!(topic, "{text}");
    }
}

/// Records every notification; used by tests to assert on pipeline activity.
#[derive(Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<(String, String)>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// All notifications in delivery order
    pub fn events(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// How many messages were delivered on a topic
    pub fn count(&self, topic: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|(t, _)| t == topic)
            .count()
    }
}

impl Observer for CollectingObserver {
    fn notify(&self, topic: &str, text: &str) {
        // notify is best-effort: a poisoned lock is swallowed
        if let Ok(mut events) = self.events.lock() {
            events.push((topic.to_string(), text.to_string()));
        }
    }
}
