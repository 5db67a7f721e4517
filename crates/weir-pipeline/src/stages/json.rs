//! The json stage: fields of a JSON source into the extracted map.

use std::collections::BTreeMap;

use tracing::debug;
use weir_syntax::schema::ObjectDecoder;

use super::{value_to_string, LogEntry, StageError};

/// Parses the source as JSON and copies selected fields into the
/// extracted map.
///
/// `expressions` maps an extracted key to a dotted path into the parsed
/// document; an empty path means "use the key itself as the path".
#[derive(Debug)]
pub struct JsonStage {
    expressions: Vec<(String, Vec<String>)>,
    source: Option<String>,
}

impl JsonStage {
    /// Validate the stage configuration.
    pub fn from_config(object: &ObjectDecoder<'_>) -> Result<JsonStage, StageError> {
        let raw: BTreeMap<String, String> = object
            .optional("expressions")?
            .ok_or(StageError::ExpressionsRequired)?;
        if raw.is_empty() {
            return Err(StageError::ExpressionsRequired);
        }

        let expressions = raw
            .into_iter()
            .map(|(key, path)| {
                let segments = if path.is_empty() {
                    vec![key.clone()]
                } else {
                    path.split('.').map(str::to_string).collect()
                };
                (key, segments)
            })
            .collect();

        Ok(JsonStage {
            expressions,
            source: object.optional("source")?,
        })
    }

    /// Run the stage over one entry. An unparseable source leaves the
    /// entry untouched.
    pub fn process(&self, entry: &mut LogEntry) {
        let input = match &self.source {
            None => entry.line.clone(),
            Some(key) => {
                let Some(value) = entry.extracted.get(key) else {
                    debug!(component = "stage", r#type = "json", source = %key,
                        "source does not exist in the set of extracted values");
                    return;
                };
                match value_to_string(value) {
                    Ok(text) => text,
                    Err(err) => {
                        debug!(component = "stage", r#type = "json", source = %key, %err,
                            "failed to convert source value to string");
                        return;
                    }
                }
            }
        };

        let document: serde_json::Value = match serde_json::from_str(&input) {
            Ok(document) => document,
            Err(err) => {
                debug!(component = "stage", r#type = "json", %err, "failed to parse source as JSON");
                return;
            }
        };

        for (key, path) in &self.expressions {
            let mut cursor = Some(&document);
            for segment in path {
                cursor = cursor.and_then(|value| value.get(segment));
            }
            // A missing path still writes the key, as null: downstream
            // stages that need the value report the conversion failure.
            let value = cursor.cloned().unwrap_or(serde_json::Value::Null);
            entry.extracted.insert(key.clone(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use weir_syntax::Value;

    fn stage(fields: &[(&str, Value)]) -> Result<JsonStage, StageError> {
        let value = Value::object(
            fields
                .iter()
                .map(|(name, value)| (name.to_string(), value.clone())),
        );
        JsonStage::from_config(&ObjectDecoder::new(&value).unwrap())
    }

    fn expressions(pairs: &[(&str, &str)]) -> Value {
        Value::object(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), Value::String(v.to_string()))),
        )
    }

    #[test]
    fn test_expressions_required() {
        assert!(matches!(stage(&[]), Err(StageError::ExpressionsRequired)));
        let err = stage(&[("expressions", Value::object([]))]).unwrap_err();
        assert!(matches!(err, StageError::ExpressionsRequired));
    }

    #[test]
    fn test_extracts_fields_from_line() {
        let stage = stage(&[(
            "expressions",
            expressions(&[("app", ""), ("lvl", "level")]),
        )])
        .unwrap();
        let mut entry = LogEntry::new(Utc::now(), r#"{"app":"ingest","level":"WARN","extra":1}"#);
        stage.process(&mut entry);

        assert_eq!(entry.extracted["app"], "ingest");
        assert_eq!(entry.extracted["lvl"], "WARN");
        assert!(!entry.extracted.contains_key("extra"));
        assert!(!entry.extracted.contains_key("level"));
    }

    #[test]
    fn test_dotted_path_navigation() {
        let stage = stage(&[(
            "expressions",
            expressions(&[("status", "response.status")]),
        )])
        .unwrap();
        let mut entry = LogEntry::new(Utc::now(), r#"{"response":{"status":200}}"#);
        stage.process(&mut entry);
        assert_eq!(entry.extracted["status"], 200);
    }

    #[test]
    fn test_unparseable_line_passes_through() {
        let stage = stage(&[("expressions", expressions(&[("app", "")]))]).unwrap();
        let mut entry = LogEntry::new(Utc::now(), "plain text, not json");
        let before = entry.clone();
        stage.process(&mut entry);
        assert_eq!(entry, before);
    }

    #[test]
    fn test_missing_path_extracts_null() {
        let stage = stage(&[("expressions", expressions(&[("gone", "no.such.path")]))]).unwrap();
        let mut entry = LogEntry::new(Utc::now(), r#"{"a":1}"#);
        stage.process(&mut entry);
        assert_eq!(entry.extracted["gone"], serde_json::Value::Null);
    }

    #[test]
    fn test_null_value_is_extracted_as_null() {
        // A present-but-null field extracts as null; a later stage that
        // needs a string then reports the conversion failure.
        let stage = stage(&[("expressions", expressions(&[("time", "")]))]).unwrap();
        let mut entry = LogEntry::new(Utc::now(), r#"{"time":null}"#);
        stage.process(&mut entry);
        assert_eq!(entry.extracted["time"], serde_json::Value::Null);
    }
}
