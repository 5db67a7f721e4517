//! The regex stage: named capture groups into the extracted map.

use regex::Regex;
use tracing::debug;
use weir_syntax::schema::ObjectDecoder;

use super::{value_to_string, LogEntry, StageError};

/// Parses a source string with a regex; every named capture group is
/// written into the extracted map, and optionally promoted to a label.
#[derive(Debug)]
pub struct RegexStage {
    expression: Regex,
    /// Key into the extracted map; `None` means operate on the line
    source: Option<String>,
    /// Promote every named group to a label, overwriting same-named ones
    labels_from_groups: bool,
}

impl RegexStage {
    /// Validate and compile the stage configuration.
    ///
    /// `expression` is required and must compile; an explicitly empty
    /// `source` string is a configuration error (unset means "the line").
    pub fn from_config(object: &ObjectDecoder<'_>) -> Result<RegexStage, StageError> {
        let pattern: String = object
            .optional("expression")?
            .ok_or(StageError::ExpressionRequired)?;
        let expression = Regex::new(&pattern)?;

        let source: Option<String> = object.optional("source")?;
        if let Some(key) = &source {
            if key.is_empty() {
                return Err(StageError::EmptyRegexStageSource);
            }
        }

        Ok(RegexStage {
            expression,
            source,
            labels_from_groups: object.optional_or("labels_from_groups", false)?,
        })
    }

    /// Run the stage over one entry.
    ///
    /// A missing source key, an unconvertible source value, or a
    /// non-matching input all leave the entry untouched.
    pub fn process(&self, entry: &mut LogEntry) {
        let input = match &self.source {
            None => entry.line.clone(),
            Some(key) => {
                let Some(value) = entry.extracted.get(key) else {
                    debug!(component = "stage", r#type = "regex", source = %key,
                        "source does not exist in the set of extracted values");
                    return;
                };
                match value_to_string(value) {
                    Ok(text) => text,
                    Err(err) => {
                        debug!(component = "stage", r#type = "regex", source = %key, %err,
                            "failed to convert source value to string");
                        return;
                    }
                }
            }
        };

        let Some(captures) = self.expression.captures(&input) else {
            debug!(component = "stage", r#type = "regex", "regex did not match");
            return;
        };

        for name in self.expression.capture_names().flatten() {
            let value = captures.name(name).map(|m| m.as_str()).unwrap_or("");
            entry
                .extracted
                .insert(name.to_string(), serde_json::Value::String(value.to_string()));
            if self.labels_from_groups {
                let mut builder = entry.labels.to_builder();
                builder.set(name, value);
                if let Ok(labels) = builder.build() {
                    entry.labels = labels;
                }
            }
        }
    }
}
