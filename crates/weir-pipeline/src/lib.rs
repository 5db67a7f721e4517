//!
//! weir-pipeline - hot-path components for the weir agent
//!
//! Two data-path subsystems built on the weir-core primitives: the
//! `metrics.relabel` component (relabeling rules memoized in an
//! identity-keyed LRU cache, fanned out to downstream appenders) and the
//! `logs.process` component (an ordered stage pipeline over a shared
//! extraction context).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// The metric appender chain: contract, fanout, interceptor
pub mod appender;

/// The `logs.process` component and the log consumer contract
pub mod process;

/// The `metrics.relabel` component and its rule engine
pub mod relabel;

/// Log entries, stages, and the pipeline
pub mod stages;

pub use appender::{Appendable, Appender, Exemplar, Histogram, Metadata, MetricsReceiver, SeriesRef};
pub use process::{LogConsumer, LogReceiver};
pub use relabel::{RelabelAction, RelabelRule};
pub use stages::{LogEntry, Pipeline, Stage, StageError};

use weir_core::{CoreError, Registry};

/// Register every component this crate provides.
pub fn register_builtins(registry: &mut Registry) -> Result<(), CoreError> {
    relabel::register(registry)?;
    process::register(registry)?;
    Ok(())
}
