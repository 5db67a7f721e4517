//! The component model: identity, the `Component` trait, build options,
//! and the shutdown signal components block on in `run`.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use weir_syntax::Value;

use crate::error::CoreError;

pub mod health;
pub mod registry;

pub use health::{Health, HealthType};
pub use registry::{Registration, Registry, Stability};

/// Fully-qualified identity of a component instance.
///
/// `local_id` is `type "label"` joined with a dot, e.g.
/// `metrics.relabel.default`. `module_id` is empty for the root module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct ComponentId {
    /// Owning module; empty for the root module
    pub module_id: String,
    /// Node id within the module
    pub local_id: String,
}

impl ComponentId {
    /// An id in the root module
    pub fn root(local_id: impl Into<String>) -> Self {
        ComponentId {
            module_id: String::new(),
            local_id: local_id.into(),
        }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.module_id.is_empty() {
            write!(f, "{}", self.local_id)
        } else {
            write!(f, "{}/{}", self.module_id, self.local_id)
        }
    }
}

/// A long-lived configured unit with typed arguments and exports.
///
/// `run` is started once per instance and must return promptly when the
/// shutdown signal fires. `update` is only ever invoked from the
/// controller's serialized reload path, so it is never concurrent with
/// itself, but it does race with `run`-driven work: components guard their
/// internal state with their own locks. `update` runs under the reload
/// lock and must stay short and non-blocking.
#[async_trait]
pub trait Component: Send + Sync + 'static {
    /// Run the component until the shutdown signal fires.
    async fn run(&self, shutdown: ShutdownSignal) -> Result<(), CoreError>;

    /// Apply new arguments in place. Components that cannot update
    /// dynamically keep the default, which tells the controller to
    /// recreate the instance instead.
    fn update(&self, args: Value) -> Result<(), CoreError> {
        let _ = args;
        Err(CoreError::UpdateNotSupported)
    }

    /// Component-specific debug payload surfaced through introspection
    fn debug_info(&self) -> Option<serde_json::Value> {
        None
    }

    /// Whether the component publishes live-debugging data
    fn live_debugging(&self) -> bool {
        false
    }
}

/// Cooperative-cancellation handle given to every `run` invocation.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// A signal pair: trigger the handle, observe through the signal
    pub fn pair() -> (ShutdownHandle, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (ShutdownHandle { tx }, ShutdownSignal { rx })
    }

    /// A signal that never fires, for tests and standalone use
    pub fn never() -> ShutdownSignal {
        let (tx, rx) = watch::channel(false);
        // Leak the sender so the channel stays open.
        std::mem::forget(tx);
        ShutdownSignal { rx }
    }

    /// Wait until shutdown is requested
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                // Sender dropped; treat as cancellation.
                return;
            }
        }
    }

    /// True once shutdown has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// The triggering side of a [`ShutdownSignal`].
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Request shutdown; all signals observe it
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// Callback through which a component publishes new exports.
pub type StateChangeFn = Arc<dyn Fn(Value) + Send + Sync>;

/// Dependencies handed to a component when it is built.
#[derive(Clone)]
pub struct Options {
    /// The component's own identity
    pub id: ComponentId,
    /// Publishes the component's exports; safe to call from any thread,
    /// including during build
    pub on_state_change: StateChangeFn,
    services: ServiceMap,
}

impl Options {
    /// Assemble options for a component build
    pub fn new(id: ComponentId, on_state_change: StateChangeFn, services: ServiceMap) -> Self {
        Options {
            id,
            on_state_change,
            services,
        }
    }

    /// Fetch a shared runtime service by type.
    pub fn get_service<T: Any + Send + Sync>(&self) -> Result<Arc<T>, CoreError> {
        self.services
            .get::<T>()
            .ok_or(CoreError::ServiceMissing(std::any::type_name::<T>()))
    }
}

/// Type-indexed map of shared runtime services.
#[derive(Clone, Default)]
pub struct ServiceMap {
    services: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ServiceMap {
    /// Build a service map from registered services
    pub fn builder() -> ServiceMapBuilder {
        ServiceMapBuilder {
            services: HashMap::new(),
        }
    }

    /// Look up a service by type
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services
            .get(&TypeId::of::<T>())
            .and_then(|service| Arc::clone(service).downcast::<T>().ok())
    }
}

/// Builder for [`ServiceMap`].
pub struct ServiceMapBuilder {
    services: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ServiceMapBuilder {
    /// Register a service instance
    pub fn with<T: Any + Send + Sync>(mut self, service: Arc<T>) -> Self {
        self.services.insert(TypeId::of::<T>(), service);
        self
    }

    /// Finish building
    pub fn build(self) -> ServiceMap {
        ServiceMap {
            services: Arc::new(self.services),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_id_display() {
        assert_eq!(
            ComponentId::root("metrics.relabel.default").to_string(),
            "metrics.relabel.default"
        );
        let in_module = ComponentId {
            module_id: "mod.a".into(),
            local_id: "metrics.relabel.x".into(),
        };
        assert_eq!(in_module.to_string(), "mod.a/metrics.relabel.x");
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let (handle, mut signal) = ShutdownSignal::pair();
        assert!(!signal.is_cancelled());

        handle.shutdown();
        signal.cancelled().await;
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_signal_clone_observes() {
        let (handle, signal) = ShutdownSignal::pair();
        let mut cloned = signal.clone();
        handle.shutdown();
        cloned.cancelled().await;
    }

    #[test]
    fn test_service_map_lookup() {
        struct Fake(u32);

        let services = ServiceMap::builder().with(Arc::new(Fake(9))).build();
        assert_eq!(services.get::<Fake>().unwrap().0, 9);
        assert!(services.get::<String>().is_none());
    }

    #[test]
    fn test_options_missing_service() {
        struct Absent;

        let options = Options::new(
            ComponentId::root("x.y.z"),
            Arc::new(|_| {}),
            ServiceMap::default(),
        );
        assert!(matches!(
            options.get_service::<Absent>(),
            Err(CoreError::ServiceMissing(_))
        ));
    }
}
