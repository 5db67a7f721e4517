//! Structured logging setup and the `logging` configuration block.
//!
//! The agent logs through `tracing`; this module wires up the subscriber
//! and gives the controller a typed home for the `logging { … }` block.

use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use weir_syntax::schema::{DecodeError, FromValue, ObjectDecoder};
use weir_syntax::Value;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Key=value pairs
    Logfmt,
    /// One JSON object per line
    Json,
}

/// Evaluated form of the `logging` configuration block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggingOptions {
    /// Filter directive, e.g. `info` or `weir_core=debug`
    pub level: String,
    /// Line format
    pub format: LogFormat,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        LoggingOptions {
            level: "info".to_string(),
            format: LogFormat::Logfmt,
        }
    }
}

impl FromValue for LoggingOptions {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let object = ObjectDecoder::new(value)?;
        let defaults = LoggingOptions::default();
        let format = match object.optional::<String>("format")? {
            None => defaults.format,
            Some(name) => match name.as_str() {
                "logfmt" => LogFormat::Logfmt,
                "json" => LogFormat::Json,
                other => {
                    return Err(DecodeError::new(format!(
                        "unknown log format {:?}, expected \"logfmt\" or \"json\"",
                        other
                    )));
                }
            },
        };
        Ok(LoggingOptions {
            level: object.optional_or("level", defaults.level)?,
            format,
        })
    }
}

/// Initialize the global `tracing` subscriber.
///
/// `RUST_LOG` wins over the configured level when set, so operators can
/// crank verbosity without touching configuration. Safe to call once per
/// process; later calls fail if a subscriber is already installed.
pub fn init_logging(options: &LoggingOptions) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.level.clone()));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match options.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true))
            .try_init(),
        LogFormat::Logfmt => registry
            .with(fmt::layer().compact().with_target(true))
            .try_init(),
    };
    result.map_err(|err| format!("installing tracing subscriber: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use weir_syntax::Value;

    #[test]
    fn test_defaults() {
        let options = LoggingOptions::from_value(&Value::object([])).unwrap();
        assert_eq!(options, LoggingOptions::default());
    }

    #[test]
    fn test_decode_full_block() {
        let value = Value::object([
            ("level".to_string(), Value::String("debug".into())),
            ("format".to_string(), Value::String("json".into())),
        ]);
        let options = LoggingOptions::from_value(&value).unwrap();
        assert_eq!(options.level, "debug");
        assert_eq!(options.format, LogFormat::Json);
    }

    #[test]
    fn test_unknown_format_rejected() {
        let value = Value::object([(
            "format".to_string(),
            Value::String("xml".into()),
        )]);
        assert!(LoggingOptions::from_value(&value).is_err());
    }
}
