//! The `metrics.relabel` component: applies relabeling rules to every
//! label set flowing through and forwards survivors to a fanout of
//! downstream appenders, memoizing per-series decisions in an
//! identity-keyed LRU cache.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use lru::LruCache;
use metrics::{counter, gauge};
use tracing::debug;
use weir_core::livedebugging::{DebugDataKind, LiveDebugPublisher};
use weir_core::{
    is_stale_nan, Component, ComponentId, CoreError, LabelSet, LabelStore, Options, Registration,
    Registry, ShutdownSignal, Stability,
};
use weir_syntax::schema::{DecodeError, FromValue, ObjectDecoder};
use weir_syntax::{ArgSchema, Field, Value};

use crate::appender::{
    Appendable, Appender, Exemplar, Fanout, Histogram, Interceptor, Metadata, MetricsReceiver,
};

pub mod rules;

pub use rules::{process, RelabelAction, RelabelRule};

/// The registered component name.
pub const NAME: &str = "metrics.relabel";

const DEFAULT_CACHE_SIZE: usize = 100_000;

const ARGS: ArgSchema = ArgSchema::new(&[
    Field::attr("forward_to"),
    Field::attr_optional("max_cache_size"),
    Field::block_repeated("rule"),
]);

/// Arguments of the `metrics.relabel` component.
pub struct Arguments {
    /// Where relabeled metrics are forwarded
    pub forward_to: Vec<MetricsReceiver>,
    /// The rules applied to each series
    pub rules: Vec<RelabelRule>,
    /// LRU capacity; one entry per live series identity
    pub max_cache_size: usize,
}

impl FromValue for Arguments {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let object = ObjectDecoder::new(value)?;
        let args = Arguments {
            forward_to: object.required("forward_to")?,
            rules: object.repeated("rule")?,
            max_cache_size: object.optional_or("max_cache_size", DEFAULT_CACHE_SIZE)?,
        };
        if args.max_cache_size == 0 {
            return Err(DecodeError::new(format!(
                "max_cache_size must be greater than 0 and is {}",
                args.max_cache_size
            )));
        }
        Ok(args)
    }
}

/// Register `metrics.relabel` into a registry.
pub fn register(registry: &mut Registry) -> Result<(), CoreError> {
    registry.register(Registration {
        name: NAME,
        stability: Stability::GenerallyAvailable,
        args: ARGS,
        exports: &["receiver", "rules"],
        build: Arc::new(|options: Options, args: &Value| {
            let component = Relabel::new(options, args)?;
            Ok(Arc::new(component) as Arc<dyn Component>)
        }),
    })
}

/// A memoized relabel decision: the rewritten labels and their identity,
/// or `None` when the series was dropped. Storing the output id saves
/// recomputing it on every hit.
#[derive(Clone)]
struct LabelAndId {
    labels: LabelSet,
    #[allow(dead_code)]
    id: u64,
}

type CacheEntry = Option<LabelAndId>;

struct RelabelState {
    id: ComponentId,
    label_store: Arc<LabelStore>,
    debug_publisher: Arc<LiveDebugPublisher>,
    /// Rule list; written only from `update`, read on the hot path
    rules: RwLock<Vec<RelabelRule>>,
    /// Identity-keyed memo; guarded separately from the rules so cache
    /// traffic does not serialize against rule reads
    cache: Mutex<LruCache<u64, CacheEntry>>,
    exited: AtomicBool,
    fanout: Arc<Fanout>,
}

impl RelabelState {
    /// Apply the rules to one incoming label set, consulting the cache.
    ///
    /// Returns `None` when the series is dropped. The input is never
    /// mutated; rules run against a copy on a cache miss.
    fn relabel(&self, value: f64, labels: &LabelSet) -> Option<LabelSet> {
        let rules = self.rules.read().unwrap_or_else(|poison| poison.into_inner());
        counter!("weir_relabel_metrics_processed").increment(1);

        let global_ref = self.label_store.get_or_add_global_ref_id(labels);
        let cached = {
            let mut cache = self.lock_cache();
            cache.get(&global_ref).cloned()
        };

        let relabeled = match cached {
            Some(entry) => {
                counter!("weir_relabel_cache_hits").increment(1);
                entry.map(|hit| hit.labels)
            }
            None => {
                counter!("weir_relabel_cache_misses").increment(1);
                let outcome = rules::process(labels, &rules);
                self.add_to_cache(global_ref, outcome.clone());
                outcome
            }
        };

        // A stale marker removes the memo, but only after the lookup so
        // the marker itself still propagates downstream exactly once.
        if is_stale_nan(value) {
            counter!("weir_relabel_cache_deletes").increment(1);
            self.lock_cache().pop(&global_ref);
        }
        gauge!("weir_relabel_cache_size").set(self.lock_cache().len() as f64);

        let count = match &relabeled {
            Some(out) if !out.is_empty() => 1,
            _ => 0,
        };
        self.debug_publisher.publish_if_active(
            &self.id,
            DebugDataKind::MetricSample,
            count,
            || {
                format!(
                    "{} => {}",
                    labels,
                    relabeled
                        .as_ref()
                        .map(|out| out.to_string())
                        .unwrap_or_else(|| "<dropped>".to_string())
                )
            },
        );

        relabeled
    }

    fn add_to_cache(&self, original_id: u64, outcome: Option<LabelSet>) {
        let entry = outcome.map(|labels| {
            let id = self.label_store.get_or_add_global_ref_id(&labels);
            LabelAndId { labels, id }
        });
        self.lock_cache().put(original_id, entry);
    }

    fn clear_cache(&self, capacity: usize) {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least one");
        *self.lock_cache() = LruCache::new(capacity);
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, LruCache<u64, CacheEntry>> {
        self.cache.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn check_running(&self) -> Result<(), CoreError> {
        if self.exited.load(Ordering::Acquire) {
            return Err(CoreError::Exited(self.id.to_string()));
        }
        Ok(())
    }
}

/// The `metrics.relabel` component instance.
pub struct Relabel {
    state: Arc<RelabelState>,
    receiver: MetricsReceiver,
    on_state_change: weir_core::component::StateChangeFn,
}

impl std::fmt::Debug for Relabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relabel").finish_non_exhaustive()
    }
}

impl Relabel {
    /// Build the component: wire the interceptor hooks, export the
    /// receiver immediately (it stays the same for the component
    /// lifetime), and apply the initial arguments.
    pub fn new(options: Options, args: &Value) -> Result<Self, CoreError> {
        let decoded = Arguments::from_value(args)?;

        let label_store = options.get_service::<LabelStore>()?;
        let debug_publisher = options.get_service::<LiveDebugPublisher>()?;
        let fanout = Arc::new(Fanout::new(Vec::new(), Arc::clone(&label_store)));

        let state = Arc::new(RelabelState {
            id: options.id.clone(),
            label_store,
            debug_publisher,
            rules: RwLock::new(Vec::new()),
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(decoded.max_cache_size).ok_or_else(|| {
                    CoreError::InvalidArguments("max_cache_size must be positive".to_string())
                })?,
            )),
            exited: AtomicBool::new(false),
            fanout: Arc::clone(&fanout),
        });

        let sample_state = Arc::clone(&state);
        let exemplar_state = Arc::clone(&state);
        let histogram_state = Arc::clone(&state);
        let metadata_state = Arc::clone(&state);
        let interceptor = Interceptor::new(fanout as Arc<dyn Appendable>)
            .with_sample_hook(Arc::new(
                move |labels: &LabelSet, ts: i64, value: f64, next: &dyn Appender| {
                    sample_state.check_running()?;
                    match sample_state.relabel(value, labels) {
                        Some(out) if !out.is_empty() => {
                            counter!("weir_relabel_metrics_written").increment(1);
                            next.append(0, &out, ts, value)
                        }
                        _ => Ok(0),
                    }
                },
            ))
            .with_exemplar_hook(Arc::new(
                move |labels: &LabelSet, exemplar: &Exemplar, next: &dyn Appender| {
                    exemplar_state.check_running()?;
                    match exemplar_state.relabel(0.0, labels) {
                        Some(out) if !out.is_empty() => next.append_exemplar(0, &out, exemplar),
                        _ => Ok(0),
                    }
                },
            ))
            .with_histogram_hook(Arc::new(
                move |labels: &LabelSet, ts: i64, histogram: &Histogram, next: &dyn Appender| {
                    histogram_state.check_running()?;
                    match histogram_state.relabel(0.0, labels) {
                        Some(out) if !out.is_empty() => {
                            next.append_histogram(0, &out, ts, histogram)
                        }
                        _ => Ok(0),
                    }
                },
            ))
            .with_metadata_hook(Arc::new(
                move |labels: &LabelSet, metadata: &Metadata, next: &dyn Appender| {
                    metadata_state.check_running()?;
                    match metadata_state.relabel(0.0, labels) {
                        Some(out) if !out.is_empty() => next.update_metadata(0, &out, metadata),
                        _ => Ok(0),
                    }
                },
            ));

        let component = Relabel {
            state,
            receiver: MetricsReceiver(Arc::new(interceptor)),
            on_state_change: options.on_state_change,
        };
        component.apply(decoded, args);
        Ok(component)
    }

    /// The exported receiver, for tests that drive the data path directly.
    pub fn receiver(&self) -> MetricsReceiver {
        self.receiver.clone()
    }

    fn apply(&self, args: Arguments, raw: &Value) {
        // A rule or capacity change invalidates every memo; drops are
        // cheap to re-derive.
        self.state.clear_cache(args.max_cache_size);
        {
            let mut rules = self
                .state
                .rules
                .write()
                .unwrap_or_else(|poison| poison.into_inner());
            *rules = args.rules;
        }
        self.state.fanout.update_children(args.forward_to);

        let rules_export = match raw {
            Value::Object(fields) => fields.get("rule").cloned().unwrap_or(Value::Array(vec![])),
            _ => Value::Array(vec![]),
        };
        (self.on_state_change)(Value::object([
            ("receiver".to_string(), self.receiver.clone().capsule()),
            ("rules".to_string(), rules_export),
        ]));
    }
}

#[async_trait]
impl Component for Relabel {
    async fn run(&self, mut shutdown: ShutdownSignal) -> Result<(), CoreError> {
        shutdown.cancelled().await;
        self.state.exited.store(true, Ordering::Release);
        debug!(id = %self.state.id, "relabel component exiting");
        Ok(())
    }

    fn update(&self, args: Value) -> Result<(), CoreError> {
        let decoded = Arguments::from_value(&args)?;
        self.apply(decoded, &args);
        Ok(())
    }

    fn debug_info(&self) -> Option<serde_json::Value> {
        let cache_len = self.state.lock_cache().len();
        let rule_count = self
            .state
            .rules
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .len();
        Some(serde_json::json!({
            "cache_entries": cache_len,
            "rule_count": rule_count,
        }))
    }

    fn live_debugging(&self) -> bool {
        true
    }
}
