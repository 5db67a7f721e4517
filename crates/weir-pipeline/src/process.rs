//! The `logs.process` component: runs every incoming entry through its
//! stage pipeline and forwards the result to downstream consumers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;
use weir_core::livedebugging::{DebugDataKind, LiveDebugPublisher};
use weir_core::{
    Component, ComponentId, CoreError, Options, Registration, Registry, ShutdownSignal, Stability,
};
use weir_syntax::schema::{DecodeError, FromValue, ObjectDecoder};
use weir_syntax::{ArgSchema, Field, Value};

use crate::stages::{LogEntry, Pipeline};

/// The registered component name.
pub const NAME: &str = "logs.process";

const ARGS: ArgSchema = ArgSchema::new(&[
    Field::attr("forward_to"),
    Field::block_repeated("stage.regex"),
    Field::block_repeated("stage.json"),
    Field::block_repeated("stage.template"),
    Field::block_repeated("stage.labels"),
    Field::block_repeated("stage.static_labels"),
]);

/// One hop in the log data path. Synchronous: a blocked downstream
/// blocks the caller.
pub trait LogConsumer: Send + Sync {
    /// Consume a batch of entries
    fn consume(&self, entries: Vec<LogEntry>) -> Result<(), CoreError>;
}

/// The capsule payload carried by `receiver` exports on the logs path.
#[derive(Clone)]
pub struct LogReceiver(pub Arc<dyn LogConsumer>);

impl FromValue for LogReceiver {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        weir_syntax::schema::capsule_payload::<LogReceiver>(value, "log receiver")
    }
}

impl LogReceiver {
    /// Wrap into a capsule value for an export
    pub fn capsule(self) -> Value {
        weir_syntax::schema::capsule("log receiver", self)
    }
}

/// Arguments of the `logs.process` component.
pub struct Arguments {
    /// Downstream consumers for processed entries
    pub forward_to: Vec<LogReceiver>,
    /// Raw stage block values, in configuration order
    pub stages: Vec<Value>,
}

impl FromValue for Arguments {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let object = ObjectDecoder::new(value)?;
        Ok(Arguments {
            forward_to: object.required("forward_to")?,
            stages: object.repeated("stage")?,
        })
    }
}

/// Register `logs.process` into a registry.
pub fn register(registry: &mut Registry) -> Result<(), CoreError> {
    registry.register(Registration {
        name: NAME,
        stability: Stability::GenerallyAvailable,
        args: ARGS,
        exports: &["receiver"],
        build: Arc::new(|options: Options, args: &Value| {
            let component = LogsProcess::new(options, args)?;
            Ok(Arc::new(component) as Arc<dyn Component>)
        }),
    })
}

struct ProcessState {
    id: ComponentId,
    debug_publisher: Arc<LiveDebugPublisher>,
    pipeline: RwLock<Arc<Pipeline>>,
    children: RwLock<Arc<Vec<LogReceiver>>>,
    exited: AtomicBool,
}

impl LogConsumer for ProcessState {
    fn consume(&self, entries: Vec<LogEntry>) -> Result<(), CoreError> {
        if self.exited.load(Ordering::Acquire) {
            return Err(CoreError::Exited(self.id.to_string()));
        }

        // One snapshot of pipeline and children per batch.
        let pipeline = Arc::clone(
            &self
                .pipeline
                .read()
                .unwrap_or_else(|poison| poison.into_inner()),
        );
        let children = Arc::clone(
            &self
                .children
                .read()
                .unwrap_or_else(|poison| poison.into_inner()),
        );

        let processed: Vec<LogEntry> = entries
            .into_iter()
            .map(|entry| {
                let before = entry.labels.clone();
                let after = pipeline.process(entry);
                self.debug_publisher.publish_if_active(
                    &self.id,
                    DebugDataKind::LogEntry,
                    1,
                    || format!("{} => {}: {}", before, after.labels, after.line),
                );
                after
            })
            .collect();

        let mut first_error = None;
        for child in children.iter() {
            if let Err(err) = child.0.consume(processed.clone()) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// The `logs.process` component instance.
pub struct LogsProcess {
    state: Arc<ProcessState>,
    receiver: LogReceiver,
    on_state_change: weir_core::component::StateChangeFn,
}

impl LogsProcess {
    /// Build the component, validate the stage configuration, and export
    /// the receiver.
    pub fn new(options: Options, args: &Value) -> Result<Self, CoreError> {
        let decoded = Arguments::from_value(args)?;
        let pipeline = Pipeline::new(&decoded.stages)
            .map_err(|err| CoreError::InvalidArguments(err.to_string()))?;

        let state = Arc::new(ProcessState {
            id: options.id.clone(),
            debug_publisher: options.get_service::<LiveDebugPublisher>()?,
            pipeline: RwLock::new(Arc::new(pipeline)),
            children: RwLock::new(Arc::new(decoded.forward_to)),
            exited: AtomicBool::new(false),
        });

        let component = LogsProcess {
            receiver: LogReceiver(Arc::clone(&state) as Arc<dyn LogConsumer>),
            state,
            on_state_change: options.on_state_change,
        };
        component.publish_exports();
        Ok(component)
    }

    /// The exported receiver, for tests that drive the data path directly.
    pub fn receiver(&self) -> LogReceiver {
        self.receiver.clone()
    }

    fn publish_exports(&self) {
        (self.on_state_change)(Value::object([(
            "receiver".to_string(),
            self.receiver.clone().capsule(),
        )]));
    }
}

#[async_trait]
impl Component for LogsProcess {
    async fn run(&self, mut shutdown: ShutdownSignal) -> Result<(), CoreError> {
        shutdown.cancelled().await;
        self.state.exited.store(true, Ordering::Release);
        debug!(id = %self.state.id, "log pipeline exiting");
        Ok(())
    }

    fn update(&self, args: Value) -> Result<(), CoreError> {
        let decoded = Arguments::from_value(&args)?;
        let pipeline = Pipeline::new(&decoded.stages)
            .map_err(|err| CoreError::InvalidArguments(err.to_string()))?;

        *self
            .state
            .pipeline
            .write()
            .unwrap_or_else(|poison| poison.into_inner()) = Arc::new(pipeline);
        *self
            .state
            .children
            .write()
            .unwrap_or_else(|poison| poison.into_inner()) = Arc::new(decoded.forward_to);

        self.publish_exports();
        Ok(())
    }

    fn debug_info(&self) -> Option<serde_json::Value> {
        let stage_count = self
            .state
            .pipeline
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .len();
        Some(serde_json::json!({ "stage_count": stage_count }))
    }

    fn live_debugging(&self) -> bool {
        true
    }
}
