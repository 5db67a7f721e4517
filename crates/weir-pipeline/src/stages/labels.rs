//! The labels stage: promote extracted values to stream labels.

use std::collections::BTreeMap;

use tracing::debug;
use weir_syntax::schema::ObjectDecoder;
use weir_syntax::Value;

use super::{value_to_string, LogEntry, StageError};

/// Copies extracted values into labels. `values` maps a label name to an
/// optional extracted key; a null value means "same key as the label
/// name".
#[derive(Debug)]
pub struct LabelsStage {
    values: Vec<(String, String)>,
}

impl LabelsStage {
    /// Validate the stage configuration.
    pub fn from_config(object: &ObjectDecoder<'_>) -> Result<LabelsStage, StageError> {
        let raw: BTreeMap<String, Value> = object.optional_or("values", BTreeMap::new())?;
        let mut values = Vec::with_capacity(raw.len());
        for (label, source) in raw {
            if label.is_empty() {
                return Err(StageError::InvalidConfig(
                    "label name must not be empty".to_string(),
                ));
            }
            let key = match source {
                Value::Null => label.clone(),
                Value::String(key) if key.is_empty() => label.clone(),
                Value::String(key) => key,
                other => {
                    return Err(StageError::InvalidConfig(format!(
                        "label source for {:?} must be a string, got {}",
                        label,
                        other.kind()
                    )));
                }
            };
            values.push((label, key));
        }
        Ok(LabelsStage { values })
    }

    /// Run the stage over one entry; missing keys are skipped.
    pub fn process(&self, entry: &mut LogEntry) {
        for (label, key) in &self.values {
            let Some(value) = entry.extracted.get(key) else {
                debug!(component = "stage", r#type = "labels", source = %key,
                    "source does not exist in the set of extracted values");
                continue;
            };
            match value_to_string(value) {
                Ok(text) => {
                    let mut builder = entry.labels.to_builder();
                    builder.set(label.clone(), text);
                    if let Ok(labels) = builder.build() {
                        entry.labels = labels;
                    }
                }
                Err(err) => {
                    debug!(component = "stage", r#type = "labels", source = %key, %err,
                        "failed to convert source value to string");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn stage(values: &[(&str, Value)]) -> Result<LabelsStage, StageError> {
        let value = Value::object([(
            "values".to_string(),
            Value::object(
                values
                    .iter()
                    .map(|(name, value)| (name.to_string(), value.clone())),
            ),
        )]);
        LabelsStage::from_config(&ObjectDecoder::new(&value).unwrap())
    }

    #[test]
    fn test_label_from_same_named_key() {
        let stage = stage(&[("level", Value::Null)]).unwrap();
        let mut entry = LogEntry::new(Utc::now(), "");
        entry.extracted.insert("level".into(), serde_json::json!("warn"));
        stage.process(&mut entry);
        assert_eq!(entry.labels.get("level"), Some("warn"));
    }

    #[test]
    fn test_label_from_renamed_key() {
        let stage = stage(&[("lvl", Value::String("level".into()))]).unwrap();
        let mut entry = LogEntry::new(Utc::now(), "");
        entry.extracted.insert("level".into(), serde_json::json!("warn"));
        stage.process(&mut entry);
        assert_eq!(entry.labels.get("lvl"), Some("warn"));
    }

    #[test]
    fn test_missing_key_is_skipped() {
        let stage = stage(&[("level", Value::Null)]).unwrap();
        let mut entry = LogEntry::new(Utc::now(), "");
        stage.process(&mut entry);
        assert!(entry.labels.is_empty());
    }

    #[test]
    fn test_non_string_source_config_rejected() {
        assert!(stage(&[("level", Value::Int(3))]).is_err());
    }
}
