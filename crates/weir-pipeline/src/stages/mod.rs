//! The log-processing pipeline: an ordered list of stages sharing one
//! per-entry extracted map.
//!
//! Stages are a tagged variant, each owning its compiled artifact (a
//! regex stage owns its compiled expression). Configuration is validated
//! when the pipeline is built; the hot path assumes well-formed stages.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use metrics::counter;
use thiserror::Error;
use weir_core::LabelSet;
use weir_syntax::schema::ObjectDecoder;
use weir_syntax::Value;

mod json;
mod labels;
mod regex_stage;
mod static_labels;
mod template;

pub use json::JsonStage;
pub use labels::LabelsStage;
pub use regex_stage::RegexStage;
pub use static_labels::StaticLabelsStage;
pub use template::TemplateStage;

/// A log record in flight through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// When the line was observed
    pub timestamp: DateTime<Utc>,
    /// The raw line
    pub line: String,
    /// Stream labels
    pub labels: LabelSet,
    /// The shared extraction context: stages read named sources from it
    /// and append or overwrite keys
    pub extracted: HashMap<String, serde_json::Value>,
}

impl LogEntry {
    /// An entry with empty labels and no extractions
    pub fn new(timestamp: DateTime<Utc>, line: impl Into<String>) -> Self {
        LogEntry {
            timestamp,
            line: line.into(),
            labels: LabelSet::empty(),
            extracted: HashMap::new(),
        }
    }

    /// Replace the stream labels
    pub fn with_labels(mut self, labels: LabelSet) -> Self {
        self.labels = labels;
        self
    }
}

/// Configuration problems caught at pipeline build time.
#[derive(Error, Debug)]
pub enum StageError {
    /// A stage block is missing its `type` discriminator
    #[error("stage is missing a type")]
    MissingStageType,

    /// The `type` names no known stage
    #[error("unknown stage type {0:?}")]
    UnknownStageType(String),

    /// The regex stage requires `expression`
    #[error("expression is required")]
    ExpressionRequired,

    /// The regex expression failed to compile
    #[error("could not compile regular expression: {0}")]
    CouldNotCompileRegex(#[from] regex::Error),

    /// An explicitly empty `source` on a regex stage
    #[error("empty source")]
    EmptyRegexStageSource,

    /// The json stage requires a non-empty `expressions` map
    #[error("expressions are required")]
    ExpressionsRequired,

    /// The template stage requires `source` and `template`
    #[error("template stage requires {0}")]
    TemplateFieldRequired(&'static str),

    /// A stage field failed to decode
    #[error("invalid stage config: {0}")]
    InvalidConfig(String),
}

impl From<weir_syntax::DecodeError> for StageError {
    fn from(err: weir_syntax::DecodeError) -> Self {
        StageError::InvalidConfig(err.to_string())
    }
}

/// One built pipeline stage.
#[derive(Debug)]
pub enum Stage {
    Regex(RegexStage),
    Json(JsonStage),
    Template(TemplateStage),
    Labels(LabelsStage),
    StaticLabels(StaticLabelsStage),
}

impl Stage {
    /// Build a stage from an evaluated `stage.<type>` block value.
    pub fn from_config(config: &Value) -> Result<Stage, StageError> {
        let object = ObjectDecoder::new(config)?;
        let stage_type: String = object
            .optional("type")?
            .ok_or(StageError::MissingStageType)?;
        match stage_type.as_str() {
            "regex" => Ok(Stage::Regex(RegexStage::from_config(&object)?)),
            "json" => Ok(Stage::Json(JsonStage::from_config(&object)?)),
            "template" => Ok(Stage::Template(TemplateStage::from_config(&object)?)),
            "labels" => Ok(Stage::Labels(LabelsStage::from_config(&object)?)),
            "static_labels" => Ok(Stage::StaticLabels(StaticLabelsStage::from_config(&object)?)),
            other => Err(StageError::UnknownStageType(other.to_string())),
        }
    }

    /// The stage kind, for logs and debug output
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Regex(_) => "regex",
            Stage::Json(_) => "json",
            Stage::Template(_) => "template",
            Stage::Labels(_) => "labels",
            Stage::StaticLabels(_) => "static_labels",
        }
    }

    fn process(&self, entry: &mut LogEntry) {
        match self {
            Stage::Regex(stage) => stage.process(entry),
            Stage::Json(stage) => stage.process(entry),
            Stage::Template(stage) => stage.process(entry),
            Stage::Labels(stage) => stage.process(entry),
            Stage::StaticLabels(stage) => stage.process(entry),
        }
    }
}

/// An ordered, build-time-validated list of stages.
#[derive(Debug)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Build a pipeline from evaluated stage block values, in order.
    pub fn new(stage_configs: &[Value]) -> Result<Pipeline, StageError> {
        let stages = stage_configs
            .iter()
            .map(Stage::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Pipeline { stages })
    }

    /// Number of stages
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// True when the pipeline has no stages
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run one entry through every stage, in order.
    pub fn process(&self, mut entry: LogEntry) -> LogEntry {
        counter!("weir_pipeline_entries_processed").increment(1);
        for stage in &self.stages {
            stage.process(&mut entry);
        }
        entry
    }
}

/// Convert an extracted value to the string a stage operates on.
///
/// Strings pass through; numbers render in their canonical form.
/// Everything else (null, bool, arrays, objects) has no useful string
/// form and is reported as an error the stage logs at debug level.
pub(crate) fn value_to_string(value: &serde_json::Value) -> Result<String, String> {
    match value {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Err("can't convert <nil> to string".to_string()),
        other => Err(format!("can't convert {} to string", json_kind(other))),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage_value(stage_type: &str, fields: &[(&str, Value)]) -> Value {
        let mut all = vec![("type".to_string(), Value::String(stage_type.to_string()))];
        all.extend(
            fields
                .iter()
                .map(|(name, value)| (name.to_string(), value.clone())),
        );
        Value::object(all)
    }

    #[test]
    fn test_pipeline_build_dispatches_on_type() {
        let pipeline = Pipeline::new(&[
            stage_value("regex", &[("expression", Value::String("^(?P<x>.)".into()))]),
            stage_value(
                "static_labels",
                &[(
                    "values",
                    Value::object([("app".to_string(), Value::String("web".into()))]),
                )],
            ),
        ])
        .unwrap();
        assert_eq!(pipeline.len(), 2);
    }

    #[test]
    fn test_unknown_stage_type_rejected() {
        let err = Pipeline::new(&[stage_value("bogus", &[])]).unwrap_err();
        assert!(matches!(err, StageError::UnknownStageType(_)));
    }

    #[test]
    fn test_missing_stage_type_rejected() {
        let err = Pipeline::new(&[Value::object([])]).unwrap_err();
        assert!(matches!(err, StageError::MissingStageType));
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&serde_json::json!("x")).unwrap(), "x");
        assert_eq!(value_to_string(&serde_json::json!(12)).unwrap(), "12");
        assert_eq!(value_to_string(&serde_json::json!(1.5)).unwrap(), "1.5");
        assert!(value_to_string(&serde_json::Value::Null)
            .unwrap_err()
            .contains("<nil>"));
        assert!(value_to_string(&serde_json::json!(true)).is_err());
        assert!(value_to_string(&serde_json::json!([1])).is_err());
    }
}
