use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use weir_syntax::{ArgSchema, Value};

use crate::component::{Component, Options};
use crate::error::CoreError;

/// Release maturity of a registered component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stability {
    /// May change or disappear without notice
    Experimental,
    /// Interface is settling but not yet covered by compatibility promises
    PublicPreview,
    /// Covered by compatibility promises
    GenerallyAvailable,
}

/// Constructor for a component instance.
pub type BuildFn =
    Arc<dyn Fn(Options, &Value) -> Result<Arc<dyn Component>, CoreError> + Send + Sync>;

/// Process-wide metadata describing one component type.
///
/// Immutable after registration: the argument schema drives body
/// validation, the export names drive reference checking, and `build`
/// produces instances.
#[derive(Clone)]
pub struct Registration {
    /// Component name, e.g. `metrics.relabel`
    pub name: &'static str,
    /// Release maturity
    pub stability: Stability,
    /// Declared argument surface
    pub args: ArgSchema,
    /// Names of the fields the component exports
    pub exports: &'static [&'static str],
    /// Instance constructor
    pub build: BuildFn,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("stability", &self.stability)
            .field("exports", &self.exports)
            .finish()
    }
}

impl Registration {
    /// True if the registration exports a field with this name
    pub fn exports_field(&self, name: &str) -> bool {
        self.exports.iter().any(|export| *export == name)
    }
}

/// The process-wide mapping from component name to registration.
#[derive(Default)]
pub struct Registry {
    registrations: HashMap<&'static str, Registration>,
}

impl Registry {
    /// An empty registry
    pub fn new() -> Self {
        Registry::default()
    }

    /// Register a component type. Double registration is a bug in the
    /// embedding program and is reported as an error.
    pub fn register(&mut self, registration: Registration) -> Result<(), CoreError> {
        let name = registration.name;
        if self.registrations.contains_key(name) {
            return Err(CoreError::AlreadyRegistered(name.to_string()));
        }
        self.registrations.insert(name, registration);
        Ok(())
    }

    /// Look up a registration by component name
    pub fn get(&self, name: &str) -> Option<&Registration> {
        self.registrations.get(name)
    }

    /// All registered component names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.registrations.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ShutdownSignal;
    use async_trait::async_trait;

    struct Nop;

    #[async_trait]
    impl Component for Nop {
        async fn run(&self, mut shutdown: ShutdownSignal) -> Result<(), CoreError> {
            shutdown.cancelled().await;
            Ok(())
        }
    }

    fn nop_registration(name: &'static str) -> Registration {
        Registration {
            name,
            stability: Stability::GenerallyAvailable,
            args: ArgSchema::empty(),
            exports: &["output"],
            build: Arc::new(|_, _| Ok(Arc::new(Nop))),
        }
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = Registry::new();
        registry.register(nop_registration("testcomponents.nop")).unwrap();

        assert!(registry.get("testcomponents.nop").is_some());
        assert!(registry.get("testcomponents.other").is_none());
        assert_eq!(registry.names(), vec!["testcomponents.nop"]);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = Registry::new();
        registry.register(nop_registration("testcomponents.nop")).unwrap();
        let err = registry
            .register(nop_registration("testcomponents.nop"))
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyRegistered(_)));
    }

    #[test]
    fn test_exports_field() {
        let registration = nop_registration("testcomponents.nop");
        assert!(registration.exports_field("output"));
        assert!(!registration.exports_field("receiver"));
    }
}
