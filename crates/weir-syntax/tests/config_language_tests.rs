//! End-to-end tests for the configuration language: parse a whole file,
//! evaluate its attributes against a scope, and check reference extraction
//! the way the controller uses it.

use std::collections::BTreeMap;

use weir_syntax::eval::{eval_recording, references};
use weir_syntax::{parse_file, Scope, Value};

const CONFIG: &str = r#"
// A small but representative configuration.
logging {
    level  = "debug"
    format = "logfmt"
}

metrics.relabel "keep_prod" {
    max_cache_size = 50000
    forward_to     = [metrics.remote.default.receiver]

    rule {
        action        = "drop"
        source_labels = ["env"]
        regex         = "staging"
    }
}

logs.process "apache" {
    forward_to = [logs.remote.default.receiver]

    stage.regex {
        expression = "^(?P<ip>\\S+)"
    }
}
"#;

#[test]
fn test_parse_representative_config() {
    let file = parse_file(CONFIG).expect("config should parse");

    let blocks: Vec<String> = file.body.blocks().map(|b| b.node_id()).collect();
    assert_eq!(
        blocks,
        vec!["logging", "metrics.relabel.keep_prod", "logs.process.apache"]
    );

    let relabel = file
        .body
        .blocks()
        .find(|b| b.node_id() == "metrics.relabel.keep_prod")
        .unwrap();
    assert_eq!(relabel.body.attributes().count(), 2);
    assert_eq!(relabel.body.blocks().count(), 1);
}

#[test]
fn test_reference_extraction_for_graph_edges() {
    let file = parse_file(CONFIG).expect("config should parse");
    let relabel = file
        .body
        .blocks()
        .find(|b| b.node_id() == "metrics.relabel.keep_prod")
        .unwrap();

    let forward_to = relabel
        .body
        .attributes()
        .find(|a| a.name == "forward_to")
        .unwrap();

    let refs: Vec<String> = references(&forward_to.value)
        .iter()
        .map(|r| r.join())
        .collect();
    assert_eq!(refs, vec!["metrics.remote.default.receiver"]);
}

#[test]
fn test_evaluation_against_export_scope() {
    // The controller binds dependency exports into a nested object tree;
    // expressions then resolve against that snapshot.
    let receiver = Value::String("receiver-handle".into());
    let scope = Scope::with_stdlib(BTreeMap::from([(
        "metrics".to_string(),
        Value::object([(
            "remote".to_string(),
            Value::object([(
                "default".to_string(),
                Value::object([("receiver".to_string(), receiver.clone())]),
            )]),
        )]),
    )]));

    let expr = weir_syntax::parse_expression("[metrics.remote.default.receiver]").unwrap();
    let (value, refs) = eval_recording(&expr, &scope).unwrap();

    assert_eq!(value, Value::Array(vec![receiver]));
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].join(), "metrics.remote.default.receiver");
}

#[test]
fn test_undefined_reference_is_rejected() {
    let scope = Scope::with_stdlib(BTreeMap::new());
    let expr = weir_syntax::parse_expression("metrics.remote.default.receiver").unwrap();
    let err = weir_syntax::eval(&expr, &scope).unwrap_err();
    assert_eq!(err.code, weir_syntax::codes::ERR_UNDEFINED);
}

#[test]
fn test_expression_operators_in_config_position() {
    let scope = Scope::with_stdlib(BTreeMap::from([(
        "base".to_string(),
        Value::Int(30_000),
    )]));
    let expr = weir_syntax::parse_expression("base * 2 + 5000").unwrap();
    assert_eq!(weir_syntax::eval(&expr, &scope).unwrap(), Value::Int(65_000));
}
