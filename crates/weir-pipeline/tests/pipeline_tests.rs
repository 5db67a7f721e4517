//! Integration tests for the log-stage pipeline, driven from real
//! configuration text the way the controller drives it.

use std::collections::BTreeMap;

use chrono::Utc;
use weir_core::controller::loader::eval_body;
use weir_core::LabelSet;
use weir_pipeline::stages::{LogEntry, Pipeline, StageError};
use weir_syntax::{parse_file, Scope, Value};

const APACHE_LINE: &str = r#"11.11.11.11 - frank [25/Jan/2000:14:00:01 -0500] "GET /1986.js HTTP/1.1" 200 932"#;

/// Parse a `logs.process`-style body and build the pipeline from its
/// `stage` blocks, exactly as the component does.
fn pipeline_from_config(source: &str) -> Result<Pipeline, StageError> {
    let file = parse_file(source).expect("config should parse");
    let fields = eval_body(&file.body, &Scope::with_stdlib(BTreeMap::new()))
        .expect("body should evaluate");
    let stages = match fields.get("stage") {
        Some(Value::Array(stages)) => stages.clone(),
        _ => Vec::new(),
    };
    Pipeline::new(&stages)
}

fn entry(line: &str) -> LogEntry {
    LogEntry::new(Utc::now(), line)
}

#[test]
fn test_regex_stage_extracts_named_groups() {
    let pipeline = pipeline_from_config(
        r#"
        stage.regex {
            expression = "^(?P<ip>\\S+) \\S+ \\S+ \\[(?P<ts>[^\\]]+)\\]"
        }
        "#,
    )
    .unwrap();

    let out = pipeline.process(entry(APACHE_LINE));
    assert_eq!(out.extracted["ip"], "11.11.11.11");
    assert_eq!(out.extracted["ts"], "25/Jan/2000:14:00:01 -0500");
    assert!(out.labels.is_empty());
}

#[test]
fn test_multi_stage_shared_extraction_context() {
    // The second stage reads what the first extracted.
    let pipeline = pipeline_from_config(
        r#"
        stage.regex {
            expression = "\"\\S+ \\S+ (?P<protocol>\\S+)\""
        }
        stage.regex {
            expression = "^HTTP/(?P<protocol_version>[0-9\\.]+)$"
            source     = "protocol"
        }
        "#,
    )
    .unwrap();

    let out = pipeline.process(entry(APACHE_LINE));
    assert_eq!(out.extracted["protocol"], "HTTP/1.1");
    assert_eq!(out.extracted["protocol_version"], "1.1");
}

#[test]
fn test_labels_from_groups_overrides_static_labels() {
    let pipeline = pipeline_from_config(
        r#"
        stage.static_labels {
            values = { protocol = "HTTP/2" }
        }
        stage.regex {
            expression         = "\"\\S+ \\S+ (?P<protocol>\\S+)\""
            labels_from_groups = true
        }
        "#,
    )
    .unwrap();

    let out = pipeline.process(entry(APACHE_LINE));
    assert_eq!(out.labels.get("protocol"), Some("HTTP/1.1"));
}

#[test]
fn test_missing_json_key_flows_through_as_null() {
    // The json stage extracts a missing key as null; the regex stage
    // then cannot convert it and passes the entry through unchanged.
    let pipeline = pipeline_from_config(
        r#"
        stage.json {
            expressions = { "time" = "" }
        }
        stage.regex {
            expression = "^(?P<year>\\d+)"
            source     = "time"
        }
        "#,
    )
    .unwrap();

    let out = pipeline.process(entry(r#"{"app":"ingest","level":"WARN"}"#));
    assert_eq!(out.extracted["time"], serde_json::Value::Null);
    assert!(!out.extracted.contains_key("year"));
    assert!(out.labels.is_empty());
}

#[test]
fn test_no_match_is_idempotent() {
    let pipeline = pipeline_from_config(
        r#"
        stage.regex {
            expression = "^(?P<num>\\d+)$"
        }
        "#,
    )
    .unwrap();

    let input = entry("definitely not a number")
        .with_labels(LabelSet::from_pairs(&[("app", "web")]));
    let before = input.clone();
    let out = pipeline.process(input);
    assert_eq!(out.extracted, before.extracted);
    assert_eq!(out.labels, before.labels);
}

#[test]
fn test_full_pipeline_json_template_labels() {
    let pipeline = pipeline_from_config(
        r#"
        stage.json {
            expressions = { "level" = "", "msg" = "message" }
        }
        stage.template {
            source   = "summary"
            template = "{level}: {msg}"
        }
        stage.labels {
            values = { level = null }
        }
        stage.static_labels {
            values = { source = "app-logs" }
        }
        "#,
    )
    .unwrap();

    let out = pipeline.process(entry(r#"{"level":"error","message":"boom"}"#));
    assert_eq!(out.extracted["summary"], "error: boom");
    assert_eq!(out.labels.get("level"), Some("error"));
    assert_eq!(out.labels.get("source"), Some("app-logs"));
}

#[test]
fn test_build_errors_from_config() {
    assert!(matches!(
        pipeline_from_config("stage.regex { }"),
        Err(StageError::ExpressionRequired)
    ));
    assert!(matches!(
        pipeline_from_config(
            r#"stage.regex { expression = "(?P<ts[0-9]+).*" }"#
        ),
        Err(StageError::CouldNotCompileRegex(_))
    ));
    assert!(matches!(
        pipeline_from_config(
            r#"
            stage.regex {
                expression = "(?P<ts>[0-9]+).*"
                source     = ""
            }
            "#
        ),
        Err(StageError::EmptyRegexStageSource)
    ));
    assert!(matches!(
        pipeline_from_config("stage.json { }"),
        Err(StageError::ExpressionsRequired)
    ));
}
