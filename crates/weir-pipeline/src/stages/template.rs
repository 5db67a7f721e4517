//! The template stage: rewrite one extracted value from the others.

use tracing::debug;
use weir_syntax::schema::ObjectDecoder;

use super::{value_to_string, LogEntry, StageError};

/// Writes `template` into `extracted[source]`, substituting
/// `{placeholder}` occurrences with extracted values. `{value}` stands
/// for the current value of the source key itself.
#[derive(Debug)]
pub struct TemplateStage {
    source: String,
    template: String,
}

impl TemplateStage {
    /// Validate the stage configuration; both fields are required.
    pub fn from_config(object: &ObjectDecoder<'_>) -> Result<TemplateStage, StageError> {
        let source: String = object
            .optional("source")?
            .ok_or(StageError::TemplateFieldRequired("source"))?;
        if source.is_empty() {
            return Err(StageError::TemplateFieldRequired("source"));
        }
        let template: String = object
            .optional("template")?
            .ok_or(StageError::TemplateFieldRequired("template"))?;
        Ok(TemplateStage { source, template })
    }

    /// Run the stage over one entry.
    pub fn process(&self, entry: &mut LogEntry) {
        let mut output = self.template.clone();

        if output.contains("{value}") {
            let current = entry
                .extracted
                .get(&self.source)
                .and_then(|value| value_to_string(value).ok())
                .unwrap_or_default();
            output = output.replace("{value}", &current);
        }

        for (key, value) in &entry.extracted {
            let placeholder = format!("{{{}}}", key);
            if !output.contains(&placeholder) {
                continue;
            }
            match value_to_string(value) {
                Ok(text) => output = output.replace(&placeholder, &text),
                Err(err) => {
                    debug!(component = "stage", r#type = "template", source = %key, %err,
                        "failed to convert source value to string");
                }
            }
        }

        entry
            .extracted
            .insert(self.source.clone(), serde_json::Value::String(output));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use weir_syntax::Value;

    fn stage(source: &str, template: &str) -> TemplateStage {
        let value = Value::object([
            ("source".to_string(), Value::String(source.to_string())),
            ("template".to_string(), Value::String(template.to_string())),
        ]);
        TemplateStage::from_config(&ObjectDecoder::new(&value).unwrap()).unwrap()
    }

    #[test]
    fn test_required_fields() {
        let missing_template = Value::object([(
            "source".to_string(),
            Value::String("x".into()),
        )]);
        assert!(TemplateStage::from_config(&ObjectDecoder::new(&missing_template).unwrap()).is_err());

        let empty_source = Value::object([
            ("source".to_string(), Value::String("".into())),
            ("template".to_string(), Value::String("t".into())),
        ]);
        assert!(TemplateStage::from_config(&ObjectDecoder::new(&empty_source).unwrap()).is_err());
    }

    #[test]
    fn test_substitutes_extracted_values() {
        let stage = stage("message", "{level}: {msg}");
        let mut entry = LogEntry::new(Utc::now(), "");
        entry.extracted.insert("level".into(), serde_json::json!("WARN"));
        entry.extracted.insert("msg".into(), serde_json::json!("disk full"));
        stage.process(&mut entry);
        assert_eq!(entry.extracted["message"], "WARN: disk full");
    }

    #[test]
    fn test_value_placeholder_reads_current_source() {
        let stage = stage("app", "prefixed-{value}");
        let mut entry = LogEntry::new(Utc::now(), "");
        entry.extracted.insert("app".into(), serde_json::json!("web"));
        stage.process(&mut entry);
        assert_eq!(entry.extracted["app"], "prefixed-web");
    }

    #[test]
    fn test_unknown_placeholder_is_left_verbatim() {
        let stage = stage("out", "{nope}");
        let mut entry = LogEntry::new(Utc::now(), "");
        stage.process(&mut entry);
        assert_eq!(entry.extracted["out"], "{nope}");
    }
}
