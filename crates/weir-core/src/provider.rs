//! Introspection surface consumed by UI collaborators.

use serde::Serialize;

use crate::component::{ComponentId, Health};
use crate::error::CoreError;

/// Which optional fields of [`Info`] to populate.
#[derive(Debug, Clone, Copy, Default)]
pub struct InfoOptions {
    /// Include the health record
    pub get_health: bool,
    /// Include the evaluated arguments
    pub get_arguments: bool,
    /// Include the current exports
    pub get_exports: bool,
    /// Include component debug info
    pub get_debug_info: bool,
}

impl InfoOptions {
    /// Populate every optional field
    pub fn all() -> Self {
        InfoOptions {
            get_health: true,
            get_arguments: true,
            get_exports: true,
            get_debug_info: true,
        }
    }
}

/// A snapshot of one component for introspection.
///
/// `references` and `referenced_by` only name component nodes; edges to
/// configuration blocks are filtered out so consumers see a homogeneous
/// graph.
#[derive(Debug, Clone, Serialize)]
pub struct Info {
    /// Fully-qualified identity
    pub id: ComponentId,
    /// The block label, when present
    pub label: Option<String>,
    /// The component type name, e.g. `metrics.relabel`
    pub component_name: String,
    /// Component node ids this component references
    pub references: Vec<String>,
    /// Component node ids referencing this component
    pub referenced_by: Vec<String>,
    /// Health, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<Health>,
    /// Evaluated arguments, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
    /// Current exports, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exports: Option<serde_json::Value>,
    /// Component-specific debug payload, when requested and available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_info: Option<serde_json::Value>,
    /// Whether the component participates in live debugging
    pub live_debugging_enabled: bool,
}

/// Lookup surface over the running graph.
pub trait Provider {
    /// Fetch one component by id.
    ///
    /// Fails with [`CoreError::ModuleNotFound`] for an unknown module,
    /// [`CoreError::ComponentNotFound`] for an unknown id, and
    /// [`CoreError::NotAComponent`] when the id names a configuration
    /// block.
    fn get_component(&self, id: &ComponentId, opts: InfoOptions) -> Result<Info, CoreError>;

    /// List every component in a module. The root module is `""`.
    fn list_components(&self, module_id: &str, opts: InfoOptions) -> Result<Vec<Info>, CoreError>;
}
