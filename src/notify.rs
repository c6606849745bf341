use std::sync::{Arc, Mutex};

use tracing::info;

use crate::domain::{NotificationSink, NotifyEvent};

/// Logs notifications; the production transport (email, realtime push) sits
/// behind the same trait.
#[derive(Default, Debug)]
pub struct TracingSink {}

impl NotificationSink for TracingSink {
    fn notify(&self, user: &str, event: &NotifyEvent) {
        info!(user, ?event, "notify");
    }
}

#[derive(Default, Debug)]
pub struct NoopSink {}

impl NotificationSink for NoopSink {
    fn notify(&self, _user: &str, _event: &NotifyEvent) {}
}

/// Captures notifications for assertions. Clones share the same buffer.
#[derive(Clone, Default, Debug)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<(String, NotifyEvent)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, NotifyEvent)> {
        self.events.lock().expect("sink buffer poisoned").clone()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, user: &str, event: &NotifyEvent) {
        self.events
            .lock()
            .expect("sink buffer poisoned")
            .push((user.to_string(), event.clone()));
    }
}
