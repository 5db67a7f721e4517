//! The relabeling rule engine: an ordered list of rules applied to a
//! label set, producing a rewritten set or a drop decision.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use regex::Regex;
use weir_core::{LabelSet, LabelSetBuilder};
use weir_syntax::schema::{DecodeError, FromValue, ObjectDecoder};
use weir_syntax::Value;

/// What a rule does with its match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelabelAction {
    /// Write the expanded replacement into the target label
    Replace,
    /// Drop the series unless the regex matches
    Keep,
    /// Drop the series when the regex matches
    Drop,
    /// Write `hash(concatenated values) % modulus` into the target label
    HashMod,
    /// Rename labels whose names match the regex
    LabelMap,
    /// Remove labels whose names match the regex
    LabelDrop,
    /// Remove labels whose names do not match the regex
    LabelKeep,
    /// Lowercase the concatenated source values into the target label
    Lowercase,
    /// Uppercase the concatenated source values into the target label
    Uppercase,
}

impl RelabelAction {
    fn parse(name: &str) -> Result<Self, DecodeError> {
        Ok(match name {
            "replace" => RelabelAction::Replace,
            "keep" => RelabelAction::Keep,
            "drop" => RelabelAction::Drop,
            "hashmod" => RelabelAction::HashMod,
            "labelmap" => RelabelAction::LabelMap,
            "labeldrop" => RelabelAction::LabelDrop,
            "labelkeep" => RelabelAction::LabelKeep,
            "lowercase" => RelabelAction::Lowercase,
            "uppercase" => RelabelAction::Uppercase,
            other => {
                return Err(DecodeError::new(format!(
                    "unknown relabel action {:?}",
                    other
                )));
            }
        })
    }
}

/// One relabeling rule.
///
/// Regexes are fully anchored, matching the upstream convention: `env`
/// matches only the exact string `env`.
#[derive(Debug, Clone)]
pub struct RelabelRule {
    pub source_labels: Vec<String>,
    pub separator: String,
    pub regex: Regex,
    pub modulus: u64,
    pub target_label: String,
    pub replacement: String,
    pub action: RelabelAction,
}

const KNOWN_FIELDS: &[&str] = &[
    "source_labels",
    "separator",
    "regex",
    "modulus",
    "target_label",
    "replacement",
    "action",
    // Injected by block evaluation for multi-segment block names; plain
    // `rule` blocks never carry it, but tolerate it for forward compat.
    "type",
];

impl FromValue for RelabelRule {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let object = ObjectDecoder::new(value)?;
        if let Value::Object(fields) = value {
            for name in fields.keys() {
                if !KNOWN_FIELDS.contains(&name.as_str()) {
                    return Err(DecodeError::new(format!(
                        "unknown rule field {:?}",
                        name
                    )));
                }
            }
        }

        let action = match object.optional::<String>("action")? {
            Some(name) => RelabelAction::parse(&name)?,
            None => RelabelAction::Replace,
        };
        let pattern: String = object.optional_or("regex", "(.*)".to_string())?;
        let regex = Regex::new(&format!("^(?:{})$", pattern))
            .map_err(|err| DecodeError::new(format!("invalid regex: {}", err)))?;

        let rule = RelabelRule {
            source_labels: object.optional_or("source_labels", Vec::new())?,
            separator: object.optional_or("separator", ";".to_string())?,
            regex,
            modulus: object.optional_or("modulus", 0u64)?,
            target_label: object.optional_or("target_label", String::new())?,
            replacement: object.optional_or("replacement", "$1".to_string())?,
            action,
        };
        rule.validate()?;
        Ok(rule)
    }
}

impl RelabelRule {
    fn validate(&self) -> Result<(), DecodeError> {
        match self.action {
            RelabelAction::Replace | RelabelAction::Lowercase | RelabelAction::Uppercase => {
                if self.target_label.is_empty() {
                    return Err(DecodeError::new(format!(
                        "relabel action {:?} requires target_label",
                        self.action
                    )));
                }
            }
            RelabelAction::HashMod => {
                if self.target_label.is_empty() {
                    return Err(DecodeError::new(
                        "relabel action hashmod requires target_label",
                    ));
                }
                if self.modulus == 0 {
                    return Err(DecodeError::new(
                        "relabel action hashmod requires a positive modulus",
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// The concatenated source label values, missing labels contributing
    /// empty strings.
    fn source_value(&self, labels: &LabelSet) -> String {
        self.source_labels
            .iter()
            .map(|name| labels.get(name).unwrap_or(""))
            .collect::<Vec<_>>()
            .join(&self.separator)
    }
}

/// Apply rules in order against a copy of the input.
///
/// Returns `None` when a keep/drop rule decided to discard the series;
/// the caller's label set is never mutated.
pub fn process(labels: &LabelSet, rules: &[RelabelRule]) -> Option<LabelSet> {
    let mut current = labels.clone();
    for rule in rules {
        current = apply(&current, rule)?;
    }
    Some(current)
}

fn apply(labels: &LabelSet, rule: &RelabelRule) -> Option<LabelSet> {
    match rule.action {
        RelabelAction::Keep => {
            let value = rule.source_value(labels);
            if !rule.regex.is_match(&value) {
                return None;
            }
            Some(labels.clone())
        }
        RelabelAction::Drop => {
            let value = rule.source_value(labels);
            if rule.regex.is_match(&value) {
                return None;
            }
            Some(labels.clone())
        }
        RelabelAction::Replace => {
            let value = rule.source_value(labels);
            let captures = match rule.regex.captures(&value) {
                Some(captures) => captures,
                // No match: the rule is a no-op, not a drop.
                None => return Some(labels.clone()),
            };
            let target = expand(&captures, &rule.target_label);
            if target.is_empty() {
                return Some(labels.clone());
            }
            let replacement = expand(&captures, &rule.replacement);
            let mut builder = labels.to_builder();
            if replacement.is_empty() {
                builder.remove(&target);
            } else {
                builder.set(target, replacement);
            }
            finish(builder)
        }
        RelabelAction::HashMod => {
            let value = rule.source_value(labels);
            let mut hasher = DefaultHasher::new();
            value.hash(&mut hasher);
            let shard = hasher.finish() % rule.modulus;
            let mut builder = labels.to_builder();
            builder.set(rule.target_label.clone(), shard.to_string());
            finish(builder)
        }
        RelabelAction::LabelMap => {
            let mut builder = labels.to_builder();
            for label in labels.iter() {
                if let Some(captures) = rule.regex.captures(&label.name) {
                    let new_name = expand(&captures, &rule.replacement);
                    if !new_name.is_empty() {
                        builder.set(new_name, label.value.clone());
                    }
                }
            }
            finish(builder)
        }
        RelabelAction::LabelDrop => {
            let mut builder = labels.to_builder();
            for label in labels.iter() {
                if rule.regex.is_match(&label.name) {
                    builder.remove(&label.name);
                }
            }
            finish(builder)
        }
        RelabelAction::LabelKeep => {
            let mut builder = labels.to_builder();
            for label in labels.iter() {
                if !rule.regex.is_match(&label.name) {
                    builder.remove(&label.name);
                }
            }
            finish(builder)
        }
        RelabelAction::Lowercase => {
            let value = rule.source_value(labels).to_lowercase();
            let mut builder = labels.to_builder();
            builder.set(rule.target_label.clone(), value);
            finish(builder)
        }
        RelabelAction::Uppercase => {
            let value = rule.source_value(labels).to_uppercase();
            let mut builder = labels.to_builder();
            builder.set(rule.target_label.clone(), value);
            finish(builder)
        }
    }
}

fn finish(builder: LabelSetBuilder) -> Option<LabelSet> {
    // Builders seeded from a valid set only fail on empty names, which
    // expand() cannot produce from a non-empty template.
    builder.build().ok()
}

fn expand(captures: &regex::Captures<'_>, template: &str) -> String {
    let mut out = String::new();
    captures.expand(template, &mut out);
    out
}
