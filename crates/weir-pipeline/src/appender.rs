//! The metric appender chain: the contract downstream components
//! implement, the fanout that replicates writes, and the interceptor
//! that lets a component hook each signal on its way through.

use std::sync::{Arc, RwLock};

use weir_core::{CoreError, LabelSet, LabelStore};

/// Identity of a series as understood by an appender chain. `0` means
/// "unknown; derive it yourself".
pub type SeriesRef = u64;

/// An exemplar attached to a series.
#[derive(Debug, Clone, PartialEq)]
pub struct Exemplar {
    /// Exemplar labels (e.g. trace id), distinct from the series labels
    pub labels: LabelSet,
    /// Observed value
    pub value: f64,
    /// Timestamp in milliseconds since the epoch
    pub timestamp: i64,
}

/// A native histogram sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    /// Total observation count
    pub count: u64,
    /// Sum of observations
    pub sum: f64,
    /// Cumulative bucket counts as (upper bound, count)
    pub buckets: Vec<(f64, u64)>,
}

/// Series metadata.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Metadata {
    /// Metric type, e.g. `counter`
    pub metric_type: String,
    /// Unit of the recorded values
    pub unit: String,
    /// Help text
    pub help: String,
}

/// One hop in the metric data path. Calls are synchronous end-to-end: if
/// a downstream blocks, the caller blocks; drop policies belong to the
/// downstream.
pub trait Appender: Send + Sync {
    /// Append a sample
    fn append(
        &self,
        series: SeriesRef,
        labels: &LabelSet,
        timestamp: i64,
        value: f64,
    ) -> Result<SeriesRef, CoreError>;

    /// Append an exemplar
    fn append_exemplar(
        &self,
        series: SeriesRef,
        labels: &LabelSet,
        exemplar: &Exemplar,
    ) -> Result<SeriesRef, CoreError>;

    /// Append a native histogram sample
    fn append_histogram(
        &self,
        series: SeriesRef,
        labels: &LabelSet,
        timestamp: i64,
        histogram: &Histogram,
    ) -> Result<SeriesRef, CoreError>;

    /// Update series metadata
    fn update_metadata(
        &self,
        series: SeriesRef,
        labels: &LabelSet,
        metadata: &Metadata,
    ) -> Result<SeriesRef, CoreError>;
}

/// Hands out appenders; this is what components export as their receiver.
pub trait Appendable: Send + Sync {
    /// A fresh appender over the current downstream configuration
    fn appender(&self) -> Arc<dyn Appender>;
}

/// The capsule payload carried by `receiver` exports on the metrics path.
#[derive(Clone)]
pub struct MetricsReceiver(pub Arc<dyn Appendable>);

impl weir_syntax::FromValue for MetricsReceiver {
    fn from_value(value: &weir_syntax::Value) -> Result<Self, weir_syntax::DecodeError> {
        weir_syntax::schema::capsule_payload::<MetricsReceiver>(value, "metrics receiver")
    }
}

impl MetricsReceiver {
    /// Wrap into a capsule value for an export
    pub fn capsule(self) -> weir_syntax::Value {
        weir_syntax::schema::capsule("metrics receiver", self)
    }
}

/// Replicates every append to a set of children.
///
/// The child list is swapped atomically on component update; each
/// [`Fanout::appender`] call snapshots the list exactly once, so an
/// in-flight append keeps one consistent view.
pub struct Fanout {
    children: RwLock<Arc<Vec<MetricsReceiver>>>,
    label_store: Arc<LabelStore>,
}

impl Fanout {
    /// A fanout over the initial child set
    pub fn new(children: Vec<MetricsReceiver>, label_store: Arc<LabelStore>) -> Self {
        Fanout {
            children: RwLock::new(Arc::new(children)),
            label_store,
        }
    }

    /// Swap the child set
    pub fn update_children(&self, children: Vec<MetricsReceiver>) {
        let mut slot = self
            .children
            .write()
            .unwrap_or_else(|poison| poison.into_inner());
        *slot = Arc::new(children);
    }

    /// Number of children currently attached
    pub fn child_count(&self) -> usize {
        self.children
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .len()
    }
}

impl Appendable for Fanout {
    fn appender(&self) -> Arc<dyn Appender> {
        let children = Arc::clone(
            &self
                .children
                .read()
                .unwrap_or_else(|poison| poison.into_inner()),
        );
        Arc::new(FanoutAppender {
            appenders: children.iter().map(|child| child.0.appender()).collect(),
            label_store: Arc::clone(&self.label_store),
        })
    }
}

struct FanoutAppender {
    appenders: Vec<Arc<dyn Appender>>,
    label_store: Arc<LabelStore>,
}

impl FanoutAppender {
    /// The stable ref a fanout reports upstream is the label store
    /// identity, regardless of what children return.
    fn global_ref(&self, series: SeriesRef, labels: &LabelSet) -> SeriesRef {
        if series != 0 {
            return series;
        }
        self.label_store.get_or_add_global_ref_id(labels)
    }

    fn for_each(
        &self,
        mut call: impl FnMut(&dyn Appender) -> Result<SeriesRef, CoreError>,
    ) -> Result<(), CoreError> {
        let mut first_error = None;
        for appender in &self.appenders {
            if let Err(err) = call(appender.as_ref()) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Appender for FanoutAppender {
    fn append(
        &self,
        series: SeriesRef,
        labels: &LabelSet,
        timestamp: i64,
        value: f64,
    ) -> Result<SeriesRef, CoreError> {
        let series = self.global_ref(series, labels);
        self.for_each(|appender| appender.append(series, labels, timestamp, value))?;
        Ok(series)
    }

    fn append_exemplar(
        &self,
        series: SeriesRef,
        labels: &LabelSet,
        exemplar: &Exemplar,
    ) -> Result<SeriesRef, CoreError> {
        let series = self.global_ref(series, labels);
        self.for_each(|appender| appender.append_exemplar(series, labels, exemplar))?;
        Ok(series)
    }

    fn append_histogram(
        &self,
        series: SeriesRef,
        labels: &LabelSet,
        timestamp: i64,
        histogram: &Histogram,
    ) -> Result<SeriesRef, CoreError> {
        let series = self.global_ref(series, labels);
        self.for_each(|appender| appender.append_histogram(series, labels, timestamp, histogram))?;
        Ok(series)
    }

    fn update_metadata(
        &self,
        series: SeriesRef,
        labels: &LabelSet,
        metadata: &Metadata,
    ) -> Result<SeriesRef, CoreError> {
        let series = self.global_ref(series, labels);
        self.for_each(|appender| appender.update_metadata(series, labels, metadata))?;
        Ok(series)
    }
}

/// Per-signal hooks. Each hook receives the incoming labels and the next
/// appender in the chain and decides what, if anything, to forward.
pub type SampleHook = Arc<
    dyn Fn(&LabelSet, i64, f64, &dyn Appender) -> Result<SeriesRef, CoreError> + Send + Sync,
>;
/// Hook for exemplars
pub type ExemplarHook = Arc<
    dyn Fn(&LabelSet, &Exemplar, &dyn Appender) -> Result<SeriesRef, CoreError> + Send + Sync,
>;
/// Hook for histograms
pub type HistogramHook = Arc<
    dyn Fn(&LabelSet, i64, &Histogram, &dyn Appender) -> Result<SeriesRef, CoreError>
        + Send
        + Sync,
>;
/// Hook for metadata updates
pub type MetadataHook = Arc<
    dyn Fn(&LabelSet, &Metadata, &dyn Appender) -> Result<SeriesRef, CoreError> + Send + Sync,
>;

/// An appendable that passes each signal through a hook before the next
/// hop. This is the receiver a transforming component exports: the hooks
/// run the transformation, `next` is the component's fanout.
pub struct Interceptor {
    next: Arc<dyn Appendable>,
    on_sample: Option<SampleHook>,
    on_exemplar: Option<ExemplarHook>,
    on_histogram: Option<HistogramHook>,
    on_metadata: Option<MetadataHook>,
}

impl Interceptor {
    /// An interceptor that forwards everything unchanged
    pub fn new(next: Arc<dyn Appendable>) -> Self {
        Interceptor {
            next,
            on_sample: None,
            on_exemplar: None,
            on_histogram: None,
            on_metadata: None,
        }
    }

    /// Hook numeric samples
    pub fn with_sample_hook(mut self, hook: SampleHook) -> Self {
        self.on_sample = Some(hook);
        self
    }

    /// Hook exemplars
    pub fn with_exemplar_hook(mut self, hook: ExemplarHook) -> Self {
        self.on_exemplar = Some(hook);
        self
    }

    /// Hook histograms
    pub fn with_histogram_hook(mut self, hook: HistogramHook) -> Self {
        self.on_histogram = Some(hook);
        self
    }

    /// Hook metadata updates
    pub fn with_metadata_hook(mut self, hook: MetadataHook) -> Self {
        self.on_metadata = Some(hook);
        self
    }
}

impl Appendable for Interceptor {
    fn appender(&self) -> Arc<dyn Appender> {
        Arc::new(InterceptorAppender {
            next: self.next.appender(),
            on_sample: self.on_sample.clone(),
            on_exemplar: self.on_exemplar.clone(),
            on_histogram: self.on_histogram.clone(),
            on_metadata: self.on_metadata.clone(),
        })
    }
}

struct InterceptorAppender {
    next: Arc<dyn Appender>,
    on_sample: Option<SampleHook>,
    on_exemplar: Option<ExemplarHook>,
    on_histogram: Option<HistogramHook>,
    on_metadata: Option<MetadataHook>,
}

impl Appender for InterceptorAppender {
    fn append(
        &self,
        series: SeriesRef,
        labels: &LabelSet,
        timestamp: i64,
        value: f64,
    ) -> Result<SeriesRef, CoreError> {
        match &self.on_sample {
            Some(hook) => hook(labels, timestamp, value, self.next.as_ref()),
            None => self.next.append(series, labels, timestamp, value),
        }
    }

    fn append_exemplar(
        &self,
        series: SeriesRef,
        labels: &LabelSet,
        exemplar: &Exemplar,
    ) -> Result<SeriesRef, CoreError> {
        match &self.on_exemplar {
            Some(hook) => hook(labels, exemplar, self.next.as_ref()),
            None => self.next.append_exemplar(series, labels, exemplar),
        }
    }

    fn append_histogram(
        &self,
        series: SeriesRef,
        labels: &LabelSet,
        timestamp: i64,
        histogram: &Histogram,
    ) -> Result<SeriesRef, CoreError> {
        match &self.on_histogram {
            Some(hook) => hook(labels, timestamp, histogram, self.next.as_ref()),
            None => self.next.append_histogram(series, labels, timestamp, histogram),
        }
    }

    fn update_metadata(
        &self,
        series: SeriesRef,
        labels: &LabelSet,
        metadata: &Metadata,
    ) -> Result<SeriesRef, CoreError> {
        match &self.on_metadata {
            Some(hook) => hook(labels, metadata, self.next.as_ref()),
            None => self.next.update_metadata(series, labels, metadata),
        }
    }
}
