//! The static_labels stage: a literal label map applied to every entry.

use std::collections::BTreeMap;

use weir_syntax::schema::ObjectDecoder;

use super::{LogEntry, StageError};

/// Sets fixed labels on every entry, overwriting existing values.
#[derive(Debug)]
pub struct StaticLabelsStage {
    values: BTreeMap<String, String>,
}

impl StaticLabelsStage {
    /// Validate the stage configuration.
    pub fn from_config(object: &ObjectDecoder<'_>) -> Result<StaticLabelsStage, StageError> {
        let values: BTreeMap<String, String> = object.optional_or("values", BTreeMap::new())?;
        if values.keys().any(|name| name.is_empty()) {
            return Err(StageError::InvalidConfig(
                "label name must not be empty".to_string(),
            ));
        }
        Ok(StaticLabelsStage { values })
    }

    /// Run the stage over one entry.
    pub fn process(&self, entry: &mut LogEntry) {
        if self.values.is_empty() {
            return;
        }
        let mut builder = entry.labels.to_builder();
        for (name, value) in &self.values {
            builder.set(name.clone(), value.clone());
        }
        if let Ok(labels) = builder.build() {
            entry.labels = labels;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use weir_core::LabelSet;
    use weir_syntax::Value;

    fn stage(values: &[(&str, &str)]) -> StaticLabelsStage {
        let value = Value::object([(
            "values".to_string(),
            Value::object(
                values
                    .iter()
                    .map(|(name, value)| (name.to_string(), Value::String(value.to_string()))),
            ),
        )]);
        StaticLabelsStage::from_config(&ObjectDecoder::new(&value).unwrap()).unwrap()
    }

    #[test]
    fn test_sets_and_overwrites_labels() {
        let stage = stage(&[("protocol", "HTTP/2"), ("app", "web")]);
        let mut entry =
            LogEntry::new(Utc::now(), "").with_labels(LabelSet::from_pairs(&[("protocol", "old")]));
        stage.process(&mut entry);
        assert_eq!(entry.labels.get("protocol"), Some("HTTP/2"));
        assert_eq!(entry.labels.get("app"), Some("web"));
    }
}
