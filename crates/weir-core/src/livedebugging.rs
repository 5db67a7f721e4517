//! Live-debugging fanout: components publish what flowed through them,
//! but only while somebody is watching.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::component::ComponentId;

/// What kind of data a debug event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugDataKind {
    MetricSample,
    LogEntry,
}

/// One published debug record.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DebugData {
    /// The component the data flowed through
    pub component_id: String,
    /// The kind of data
    pub kind: DebugDataKind,
    /// How many records this event stands for; 0 means the input was
    /// dropped
    pub count: u64,
    /// Rendered payload, produced lazily at publish time
    pub data: String,
}

/// Publisher with per-component subscriptions.
///
/// The hot path calls [`publish_if_active`](LiveDebugPublisher::publish_if_active)
/// on every record; when no subscription is active that is one relaxed
/// atomic load and the rendering closure never runs.
#[derive(Default)]
pub struct LiveDebugPublisher {
    active: AtomicBool,
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<DebugData>>>>,
}

impl LiveDebugPublisher {
    /// A publisher with no subscriptions
    pub fn new() -> Self {
        LiveDebugPublisher::default()
    }

    /// Subscribe to a component's debug stream
    pub fn subscribe(&self, component_id: &ComponentId) -> mpsc::UnboundedReceiver<DebugData> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.lock_subscribers();
        subscribers
            .entry(component_id.to_string())
            .or_default()
            .push(tx);
        self.active.store(true, Ordering::Release);
        rx
    }

    /// True when any subscription exists; components may use this to skip
    /// building intermediate state
    pub fn is_active(&self, component_id: &ComponentId) -> bool {
        if !self.active.load(Ordering::Acquire) {
            return false;
        }
        self.lock_subscribers()
            .get(&component_id.to_string())
            .is_some_and(|subs| !subs.is_empty())
    }

    /// Publish a record if a subscription for the component is active.
    /// The rendering closure only runs when the record is actually sent.
    pub fn publish_if_active(
        &self,
        component_id: &ComponentId,
        kind: DebugDataKind,
        count: u64,
        data: impl FnOnce() -> String,
    ) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        let key = component_id.to_string();
        let mut subscribers = self.lock_subscribers();
        let Some(subs) = subscribers.get_mut(&key) else {
            return;
        };
        if subs.is_empty() {
            return;
        }

        let event = DebugData {
            component_id: key,
            kind,
            count,
            data: data(),
        };
        // Drop closed subscriptions as we go.
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn lock_subscribers(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, Vec<mpsc::UnboundedSender<DebugData>>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> ComponentId {
        ComponentId::root("metrics.relabel.default")
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let publisher = LiveDebugPublisher::new();
        let mut rendered = false;
        publisher.publish_if_active(&id(), DebugDataKind::MetricSample, 1, || {
            rendered = true;
            String::new()
        });
        assert!(!rendered, "rendering must be skipped with no subscribers");
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let publisher = LiveDebugPublisher::new();
        let mut rx = publisher.subscribe(&id());

        publisher.publish_if_active(&id(), DebugDataKind::MetricSample, 1, || {
            "{job=\"a\"} => {job=\"b\"}".to_string()
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.count, 1);
        assert_eq!(event.kind, DebugDataKind::MetricSample);
        assert!(event.data.contains("=>"));
    }

    #[tokio::test]
    async fn test_publish_is_scoped_to_component() {
        let publisher = LiveDebugPublisher::new();
        let mut rx = publisher.subscribe(&ComponentId::root("logs.process.other"));

        publisher.publish_if_active(&id(), DebugDataKind::MetricSample, 1, String::new);
        // Nothing should arrive for the other component.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let publisher = LiveDebugPublisher::new();
        let rx = publisher.subscribe(&id());
        drop(rx);

        publisher.publish_if_active(&id(), DebugDataKind::MetricSample, 1, String::new);
        assert!(!publisher.is_active(&id()));
    }
}
