//! Diff-and-publish of service state variables.
//!
//! Each service renders its full state as a name → value map. The publisher
//! keeps the last map it published per service and forwards only what
//! changed since then.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::debug;

use crate::bus::{BusEvent, SharedBus};

/// Variable name → value
pub type StateMap = BTreeMap<String, String>;

/// A service that can render its current state
#[async_trait]
pub trait StatefulService: Send + Sync {
    /// Short service name used as the publication key
    fn name(&self) -> &str;

    /// Compute the current full state. May reconcile internal state first.
    async fn make_state(&self) -> StateMap;
}

/// Destination of changed variables
pub trait NotificationSink: Send + Sync {
    fn notify(&self, service: &str, changes: &StateMap);
}

impl NotificationSink for SharedBus {
    fn notify(&self, service: &str, changes: &StateMap) {
        self.publish(BusEvent::ServiceStateChanged {
            service: service.to_string(),
            changes: changes.clone(),
        });
    }
}

/// Remembers what each service last published.
pub struct StatePublisher<S: NotificationSink> {
    sink: S,
    previous: Mutex<HashMap<String, StateMap>>,
}

impl<S: NotificationSink> StatePublisher<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            previous: Mutex::new(HashMap::new()),
        }
    }

    /// Publish `service`'s state. With `all`, every variable counts as
    /// changed. Returns what was forwarded to the sink.
    pub async fn publish(&self, service: &dyn StatefulService, all: bool) -> StateMap {
        let current = service.make_state().await;
        self.publish_map(service.name(), current, all)
    }

    /// Diff an already computed map against the previous one.
    pub fn publish_map(&self, service: &str, current: StateMap, all: bool) -> StateMap {
        let changes = {
            let mut previous = self
                .previous
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let old = previous.entry(service.to_string()).or_default();
            let changes = if all {
                current.clone()
            } else {
                diff(old, &current)
            };
            *old = current;
            changes
        };

        if !changes.is_empty() {
            debug!("{}: {} variable(s) changed", service, changes.len());
            self.sink.notify(service, &changes);
        }
        changes
    }

    /// Forget what `service` published, so its next publication is complete.
    pub fn reset(&self, service: &str) {
        self.previous
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(service);
    }
}

/// Entries of `current` that are new or differ from `old`
pub fn diff(old: &StateMap, current: &StateMap) -> StateMap {
    current
        .iter()
        .filter(|(k, v)| old.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, StateMap)>>,
    }

    impl NotificationSink for Arc<Recorder> {
        fn notify(&self, service: &str, changes: &StateMap) {
            self.calls
                .lock()
                .unwrap()
                .push((service.to_string(), changes.clone()));
        }
    }

    fn map(pairs: &[(&str, &str)]) -> StateMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn only_changed_variables_are_forwarded() {
        let recorder = Arc::new(Recorder::default());
        let publisher = StatePublisher::new(recorder.clone());

        let first = publisher.publish_map("volume", map(&[("Volume", "10"), ("Mute", "0")]), false);
        assert_eq!(first.len(), 2);

        let second =
            publisher.publish_map("volume", map(&[("Volume", "20"), ("Mute", "0")]), false);
        assert_eq!(second, map(&[("Volume", "20")]));

        // Nothing changed: sink not called
        let third = publisher.publish_map("volume", map(&[("Volume", "20"), ("Mute", "0")]), false);
        assert!(third.is_empty());
        assert_eq!(recorder.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn all_flag_and_new_variables() {
        let recorder = Arc::new(Recorder::default());
        let publisher = StatePublisher::new(recorder.clone());

        publisher.publish_map("receiver", map(&[("Uri", "a")]), false);
        let added = publisher.publish_map("receiver", map(&[("Uri", "a"), ("Metadata", "m")]), false);
        assert_eq!(added, map(&[("Metadata", "m")]));

        let everything =
            publisher.publish_map("receiver", map(&[("Uri", "a"), ("Metadata", "m")]), true);
        assert_eq!(everything.len(), 2);
    }

    #[test]
    fn services_are_tracked_separately() {
        let recorder = Arc::new(Recorder::default());
        let publisher = StatePublisher::new(recorder.clone());
        publisher.publish_map("a", map(&[("X", "1")]), false);
        let other = publisher.publish_map("b", map(&[("X", "1")]), false);
        assert_eq!(other.len(), 1);

        publisher.reset("a");
        assert_eq!(publisher.publish_map("a", map(&[("X", "1")]), false).len(), 1);
    }
}
