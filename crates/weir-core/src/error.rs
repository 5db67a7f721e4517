use thiserror::Error;
use weir_syntax::Diagnostic;

/// Core error type for the weir runtime
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Component not found
    #[error("component not found: {0}")]
    ComponentNotFound(String),

    /// Module not found
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    /// The id names a node that is not a component
    #[error("{0} is not a component")]
    NotAComponent(String),

    /// A component name is not registered
    #[error("unrecognized component name {0:?}")]
    UnknownComponentName(String),

    /// A registration with the same name already exists
    #[error("component {0:?} is already registered")]
    AlreadyRegistered(String),

    /// Building a component instance failed
    #[error("building component {id}: {reason}")]
    BuildError {
        /// Node id of the failing component
        id: String,
        /// What went wrong
        reason: String,
    },

    /// A component rejected an argument update
    #[error("updating component {id}: {reason}")]
    UpdateError {
        /// Node id of the failing component
        id: String,
        /// What went wrong
        reason: String,
    },

    /// The component does not support in-place updates
    #[error("component does not support dynamic updates")]
    UpdateNotSupported,

    /// Argument validation failed
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Configuration could not be loaded; the previous graph keeps running
    #[error("configuration rejected: {}", format_diagnostics(.0))]
    InvalidConfig(Vec<Diagnostic>),

    /// A required service is missing from the runtime
    #[error("service not available: {0}")]
    ServiceMissing(&'static str),

    /// The runtime is shutting down
    #[error("{0} has exited")]
    Exited(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

fn format_diagnostics(diags: &[Diagnostic]) -> String {
    diags
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl CoreError {
    /// The diagnostics behind a rejected configuration, when present
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            CoreError::InvalidConfig(diags) => diags,
            _ => &[],
        }
    }
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::Other(err)
    }
}

impl From<&str> for CoreError {
    fn from(err: &str) -> Self {
        CoreError::Other(err.to_string())
    }
}

impl From<weir_syntax::DecodeError> for CoreError {
    fn from(err: weir_syntax::DecodeError) -> Self {
        CoreError::InvalidArguments(err.to_string())
    }
}
