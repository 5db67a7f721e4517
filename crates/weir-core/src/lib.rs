//!
//! weir-core - component model and runtime controller for the weir agent
//!
//! This crate owns the pieces between a parsed configuration and running
//! telemetry components: the component trait and registry, the dependency
//! graph, the controller that evaluates nodes and manages lifecycles, the
//! label store that hands out series identities, and the live-debugging
//! publisher.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Component trait, identity, registry, and health
pub mod component;

/// The controller: loader and scheduler
pub mod controller;

/// Error types
pub mod error;

/// Arena-backed dependency graph
pub mod graph;

/// Canonical label sets and the stale marker
pub mod labels;

/// Process-wide label identity store
pub mod labelstore;

/// Live-debugging publisher
pub mod livedebugging;

/// Logging setup and the `logging` configuration block
pub mod logging;

/// Introspection types
pub mod provider;

pub use component::{
    Component, ComponentId, Health, HealthType, Options, Registration, Registry, ServiceMap,
    ShutdownHandle, ShutdownSignal, Stability,
};
pub use controller::{Runtime, RuntimeOptions};
pub use error::CoreError;
pub use graph::{CycleError, Graph, GraphNode, NodeIndex};
pub use labels::{is_stale_nan, Label, LabelSet, LabelSetBuilder, STALE_NAN};
pub use labelstore::LabelStore;
pub use livedebugging::{DebugData, DebugDataKind, LiveDebugPublisher};
pub use provider::{Info, InfoOptions, Provider};
