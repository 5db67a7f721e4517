//! End-to-end: configuration text through the controller, receiver
//! capsules flowing between components, data pushed through the
//! assembled pipeline.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use weir_core::{
    Component, CoreError, LabelSet, Options, Provider, Registration, Registry, Runtime,
    RuntimeOptions, ShutdownSignal, Stability,
};
use weir_pipeline::appender::{
    Appendable, Appender, Exemplar, Histogram, Metadata, MetricsReceiver, SeriesRef,
};
use weir_pipeline::process::{LogConsumer, LogReceiver};
use weir_pipeline::stages::LogEntry;
use weir_syntax::schema::{FromValue, ObjectDecoder};
use weir_syntax::{ArgSchema, Field, Value};

/// Sink that records metric samples; registered as `test.metrics_sink`
/// and exported through a receiver capsule like any real exporter.
#[derive(Default)]
struct MetricsSink {
    samples: Mutex<Vec<(LabelSet, f64)>>,
}

struct MetricsSinkHandle(Arc<MetricsSink>);

impl Appendable for MetricsSinkHandle {
    fn appender(&self) -> Arc<dyn Appender> {
        Arc::clone(&self.0) as Arc<dyn Appender>
    }
}

impl Appender for MetricsSink {
    fn append(
        &self,
        _series: SeriesRef,
        labels: &LabelSet,
        _timestamp: i64,
        value: f64,
    ) -> Result<SeriesRef, CoreError> {
        self.samples.lock().unwrap().push((labels.clone(), value));
        Ok(1)
    }

    fn append_exemplar(
        &self,
        _series: SeriesRef,
        _labels: &LabelSet,
        _exemplar: &Exemplar,
    ) -> Result<SeriesRef, CoreError> {
        Ok(1)
    }

    fn append_histogram(
        &self,
        _series: SeriesRef,
        _labels: &LabelSet,
        _timestamp: i64,
        _histogram: &Histogram,
    ) -> Result<SeriesRef, CoreError> {
        Ok(1)
    }

    fn update_metadata(
        &self,
        _series: SeriesRef,
        _labels: &LabelSet,
        _metadata: &Metadata,
    ) -> Result<SeriesRef, CoreError> {
        Ok(1)
    }
}

struct SinkComponent;

#[async_trait]
impl Component for SinkComponent {
    async fn run(&self, mut shutdown: ShutdownSignal) -> Result<(), CoreError> {
        shutdown.cancelled().await;
        Ok(())
    }

    fn update(&self, _args: Value) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Sink that records log entries.
#[derive(Default)]
struct LogsSink {
    entries: Mutex<Vec<LogEntry>>,
}

impl LogConsumer for LogsSink {
    fn consume(&self, entries: Vec<LogEntry>) -> Result<(), CoreError> {
        self.entries.lock().unwrap().extend(entries);
        Ok(())
    }
}

/// Captures the receiver capsule a driver block was configured with, so
/// the test can push data into the graph from outside.
#[derive(Default)]
struct Captured {
    metrics: Mutex<Option<MetricsReceiver>>,
    logs: Mutex<Option<LogReceiver>>,
}

struct DriverComponent;

#[async_trait]
impl Component for DriverComponent {
    async fn run(&self, mut shutdown: ShutdownSignal) -> Result<(), CoreError> {
        shutdown.cancelled().await;
        Ok(())
    }

    fn update(&self, _args: Value) -> Result<(), CoreError> {
        Ok(())
    }
}

struct TestHooks {
    metrics_sink: Arc<MetricsSink>,
    logs_sink: Arc<LogsSink>,
    captured: Arc<Captured>,
}

fn registry_with_test_components() -> (Arc<Registry>, TestHooks) {
    let metrics_sink = Arc::new(MetricsSink::default());
    let logs_sink = Arc::new(LogsSink::default());
    let captured = Arc::new(Captured::default());

    let mut registry = Registry::new();
    weir_pipeline::register_builtins(&mut registry).unwrap();

    let sink = Arc::clone(&metrics_sink);
    registry
        .register(Registration {
            name: "test.metrics_sink",
            stability: Stability::Experimental,
            args: ArgSchema::empty(),
            exports: &["receiver"],
            build: Arc::new(move |options: Options, _: &Value| {
                let receiver = MetricsReceiver(Arc::new(MetricsSinkHandle(Arc::clone(&sink))));
                (options.on_state_change)(Value::object([(
                    "receiver".to_string(),
                    receiver.capsule(),
                )]));
                Ok(Arc::new(SinkComponent) as Arc<dyn Component>)
            }),
        })
        .unwrap();

    let sink = Arc::clone(&logs_sink);
    registry
        .register(Registration {
            name: "test.logs_sink",
            stability: Stability::Experimental,
            args: ArgSchema::empty(),
            exports: &["receiver"],
            build: Arc::new(move |options: Options, _: &Value| {
                let receiver = LogReceiver(Arc::clone(&sink) as Arc<dyn LogConsumer>);
                (options.on_state_change)(Value::object([(
                    "receiver".to_string(),
                    receiver.capsule(),
                )]));
                Ok(Arc::new(SinkComponent) as Arc<dyn Component>)
            }),
        })
        .unwrap();

    const DRIVER_ARGS: ArgSchema = ArgSchema::new(&[
        Field::attr_optional("metrics"),
        Field::attr_optional("logs"),
    ]);

    let slot = Arc::clone(&captured);
    registry
        .register(Registration {
            name: "test.driver",
            stability: Stability::Experimental,
            args: DRIVER_ARGS,
            exports: &[],
            build: Arc::new(move |_: Options, args: &Value| {
                let object = ObjectDecoder::new(args)?;
                if let Some(value) = object.get("metrics") {
                    *slot.metrics.lock().unwrap() = Some(MetricsReceiver::from_value(value)?);
                }
                if let Some(value) = object.get("logs") {
                    *slot.logs.lock().unwrap() = Some(LogReceiver::from_value(value)?);
                }
                Ok(Arc::new(DriverComponent) as Arc<dyn Component>)
            }),
        })
        .unwrap();

    (
        Arc::new(registry),
        TestHooks {
            metrics_sink,
            logs_sink,
            captured,
        },
    )
}

#[tokio::test]
async fn test_metrics_path_end_to_end() {
    let (registry, hooks) = registry_with_test_components();
    let runtime = Runtime::new(RuntimeOptions::new(registry));

    runtime
        .load_source(
            r#"
            test.metrics_sink "out" { }

            metrics.relabel "filter" {
                forward_to = [test.metrics_sink.out.receiver]

                rule {
                    action        = "drop"
                    source_labels = ["job"]
                    regex         = "secret"
                }
            }

            test.driver "in" {
                metrics = metrics.relabel.filter.receiver
            }
            "#,
        )
        .await
        .unwrap();

    let receiver = hooks
        .captured
        .metrics
        .lock()
        .unwrap()
        .clone()
        .expect("driver captured the relabel receiver");

    let appender = receiver.0.appender();
    appender
        .append(0, &LabelSet::from_pairs(&[("job", "api")]), 1, 1.0)
        .unwrap();
    appender
        .append(0, &LabelSet::from_pairs(&[("job", "secret")]), 2, 2.0)
        .unwrap();

    let samples = hooks.metrics_sink.samples.lock().unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].0.get("job"), Some("api"));
}

#[tokio::test]
async fn test_logs_path_end_to_end() {
    let (registry, hooks) = registry_with_test_components();
    let runtime = Runtime::new(RuntimeOptions::new(registry));

    runtime
        .load_source(
            r#"
            test.logs_sink "out" { }

            logs.process "parse" {
                forward_to = [test.logs_sink.out.receiver]

                stage.json {
                    expressions = { "level" = "" }
                }
                stage.labels {
                    values = { level = null }
                }
            }

            test.driver "in" {
                logs = logs.process.parse.receiver
            }
            "#,
        )
        .await
        .unwrap();

    let receiver = hooks
        .captured
        .logs
        .lock()
        .unwrap()
        .clone()
        .expect("driver captured the process receiver");

    receiver
        .0
        .consume(vec![LogEntry::new(
            Utc::now(),
            r#"{"level":"warn","message":"low disk"}"#,
        )])
        .unwrap();

    let entries = hooks.logs_sink.entries.lock().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].labels.get("level"), Some("warn"));
    assert_eq!(entries[0].extracted["level"], "warn");
}

#[tokio::test]
async fn test_graph_shape_through_introspection() {
    let (registry, _hooks) = registry_with_test_components();
    let runtime = Runtime::new(RuntimeOptions::new(registry));

    runtime
        .load_source(
            r#"
            test.metrics_sink "out" { }
            metrics.relabel "filter" {
                forward_to = [test.metrics_sink.out.receiver]
            }
            "#,
        )
        .await
        .unwrap();

    let info = runtime
        .get_component(
            &weir_core::ComponentId::root("metrics.relabel.filter"),
            weir_core::InfoOptions::all(),
        )
        .unwrap();
    assert_eq!(info.references, vec!["test.metrics_sink.out"]);
    assert!(info.live_debugging_enabled);
    assert_eq!(info.debug_info.unwrap()["rule_count"], 0);

    let exports = info.exports.unwrap();
    assert!(exports["receiver"]
        .as_str()
        .unwrap()
        .contains("capsule"));
}

#[tokio::test]
async fn test_invalid_stage_isolates_node() {
    let (registry, _hooks) = registry_with_test_components();
    let runtime = Runtime::new(RuntimeOptions::new(registry));

    // A bad regex is a component lifecycle failure: the node goes
    // unhealthy but the reload itself succeeds.
    runtime
        .load_source(
            r#"
            test.logs_sink "out" { }
            logs.process "broken" {
                forward_to = [test.logs_sink.out.receiver]
                stage.regex {
                    expression = "(?P<ts[0-9]+).*"
                }
            }
            "#,
        )
        .await
        .unwrap();

    let info = runtime
        .get_component(
            &weir_core::ComponentId::root("logs.process.broken"),
            weir_core::InfoOptions::all(),
        )
        .unwrap();
    let health = info.health.unwrap();
    assert_eq!(health.state, weir_core::HealthType::Unhealthy);
    assert!(health.message.contains("could not compile regular expression"));
}
