//! The runtime: owns the graph, drives (re)evaluation, starts and stops
//! component tasks, and propagates export changes.
//!
//! Every mutation of the graph goes through a single reload lock:
//! `load_source` and export propagation serialize on it, so each node only
//! ever sees one evaluation at a time and each descendant observes one
//! consistent snapshot per pass. Component `run` loops execute
//! concurrently on their own tasks for the lifetime of the instance.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use weir_syntax::{Diagnostic, Value};

use crate::component::{
    Component, ComponentId, Health, Options, Registry, ServiceMap, ShutdownHandle, ShutdownSignal,
};
use crate::controller::loader::{self, eval_body, scope_for, LoadPlan};
use crate::controller::node::{ComponentNode, Node};
use crate::error::CoreError;
use crate::graph::Graph;
use crate::labelstore::LabelStore;
use crate::livedebugging::LiveDebugPublisher;
use crate::logging::LoggingOptions;

/// How long the controller waits for a removed component to exit before
/// logging and moving on.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Construction options for [`Runtime`].
pub struct RuntimeOptions {
    /// The component registry to resolve block names against
    pub registry: Arc<Registry>,
    /// Soft deadline for component shutdown during reloads and teardown
    pub shutdown_grace: Duration,
}

impl RuntimeOptions {
    /// Options with the default shutdown grace period
    pub fn new(registry: Arc<Registry>) -> Self {
        RuntimeOptions {
            registry,
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }
}

/// The controller: graph owner, scheduler, and introspection provider.
///
/// Cloning is cheap and shares the same runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    registry: Arc<Registry>,
    services: ServiceMap,
    label_store: Arc<LabelStore>,
    live_debug: Arc<LiveDebugPublisher>,
    /// Serializes reloads and export propagation
    reload_lock: tokio::sync::Mutex<()>,
    state: RwLock<RuntimeState>,
    queue_tx: mpsc::UnboundedSender<String>,
    queue_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    shutdown_grace: Duration,
}

struct RuntimeState {
    graph: Arc<Graph<Node>>,
    tasks: HashMap<String, RunningTask>,
    logging: LoggingOptions,
}

struct RunningTask {
    handle: ShutdownHandle,
    monitor: tokio::task::JoinHandle<()>,
}

impl Runtime {
    /// Create a runtime with an empty graph.
    pub fn new(options: RuntimeOptions) -> Self {
        let label_store = Arc::new(LabelStore::new());
        let live_debug = Arc::new(LiveDebugPublisher::new());
        let services = ServiceMap::builder()
            .with(Arc::clone(&label_store))
            .with(Arc::clone(&live_debug))
            .build();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        Runtime {
            inner: Arc::new(RuntimeInner {
                registry: options.registry,
                services,
                label_store,
                live_debug,
                reload_lock: tokio::sync::Mutex::new(()),
                state: RwLock::new(RuntimeState {
                    graph: Arc::new(Graph::new()),
                    tasks: HashMap::new(),
                    logging: LoggingOptions::default(),
                }),
                queue_tx,
                queue_rx: std::sync::Mutex::new(Some(queue_rx)),
                shutdown_grace: options.shutdown_grace,
            }),
        }
    }

    /// The shared label store service.
    pub fn label_store(&self) -> Arc<LabelStore> {
        Arc::clone(&self.inner.label_store)
    }

    /// The shared live-debugging publisher.
    pub fn live_debug(&self) -> Arc<LiveDebugPublisher> {
        Arc::clone(&self.inner.live_debug)
    }

    /// The logging options from the last applied configuration.
    pub fn logging_options(&self) -> LoggingOptions {
        self.inner.read_state(|state| state.logging.clone())
    }

    /// The current graph snapshot.
    fn graph(&self) -> Arc<Graph<Node>> {
        self.inner.read_state(|state| Arc::clone(&state.graph))
    }

    /// Parse, validate, and apply a new configuration.
    ///
    /// All-or-nothing: any configuration error (parse failure, unknown
    /// name, bad reference, schema violation, cycle) rejects the reload
    /// and leaves the previous graph running. Component lifecycle
    /// failures after the swap (argument evaluation, build, update) are
    /// isolated to their node, which goes `Unhealthy` while its last
    /// valid state keeps running.
    pub async fn load_source(&self, source: &str) -> Result<(), CoreError> {
        let _guard = self.inner.reload_lock.lock().await;

        // Phase 1: pure validation against the current graph.
        let previous = self.graph();
        let plan = loader::build_graph(source, &self.inner.registry, &previous)
            .map_err(CoreError::InvalidConfig)?;
        for warning in &plan.warnings {
            warn!(%warning, "configuration warning");
        }

        let LoadPlan {
            graph,
            blocks,
            added,
            removed,
            ..
        } = plan;
        info!(
            nodes = graph.len(),
            added = added.len(),
            removed = removed.len(),
            "applying configuration"
        );

        // Phase 2: apply. Swap the graph, push new blocks into nodes, stop
        // removed components, then evaluate in dependency order.
        let graph = Arc::new(graph);
        self.inner.write_state(|state| {
            state.graph = Arc::clone(&graph);
        });
        for index in graph.indices() {
            let Some(node) = graph.node(index) else { continue };
            match node {
                Node::Component(component) => {
                    if let Some(block) = blocks.get(&component.id().local_id) {
                        component.set_block(block.clone());
                    }
                }
                Node::Config(config) => {
                    if let Some(block) = blocks.get(config.name()) {
                        config.set_block(block.clone());
                    }
                }
            }
        }

        for node in removed {
            self.stop_component(&node).await;
        }

        self.evaluate_all(&graph).await;
        Ok(())
    }

    /// Run the scheduler until the shutdown signal fires, then stop every
    /// component. Must be called at most once.
    pub async fn run(&self, mut shutdown: ShutdownSignal) -> Result<(), CoreError> {
        let mut queue_rx = self
            .inner
            .queue_rx
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take()
            .ok_or_else(|| CoreError::Other("runtime is already running".to_string()))?;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = queue_rx.recv() => {
                    let Some(first) = changed else { break };
                    // Coalesce whatever else is already queued into one
                    // propagation pass.
                    let mut roots = vec![first];
                    while let Ok(id) = queue_rx.try_recv() {
                        if !roots.contains(&id) {
                            roots.push(id);
                        }
                    }
                    self.propagate_exports(&roots).await;
                }
            }
        }

        info!("runtime shutting down");
        self.stop_all().await;
        Ok(())
    }

    /// Re-evaluate every transitive dependant of the changed nodes, in
    /// topological order, against one consistent snapshot.
    async fn propagate_exports(&self, roots: &[String]) {
        let _guard = self.inner.reload_lock.lock().await;
        let graph = self.graph();

        let mut affected: Vec<usize> = Vec::new();
        for root in roots {
            let Some(index) = graph.index_of(root) else { continue };
            for dependant in graph.transitive_dependants_topo(index) {
                if !affected.contains(&dependant) {
                    affected.push(dependant);
                }
            }
        }
        if affected.is_empty() {
            return;
        }

        // Order the union topologically so every descendant sees its
        // ancestors' final values for this pass.
        let order = match graph.topo() {
            Ok(order) => order,
            Err(_) => return,
        };
        let ordered: Vec<usize> = order
            .into_iter()
            .filter(|index| affected.contains(index))
            .collect();

        debug!(count = ordered.len(), "re-evaluating dependants of export change");
        for index in ordered {
            if let Some(Node::Component(node)) = graph.node(index) {
                let node = Arc::clone(node);
                self.evaluate_component(&graph, index, &node).await;
            }
        }
    }

    /// Evaluate every node of a freshly applied graph in dependency order.
    async fn evaluate_all(&self, graph: &Arc<Graph<Node>>) {
        let order = match graph.topo() {
            // The plan was validated acyclic in phase 1.
            Ok(order) => order,
            Err(err) => {
                error!(%err, "applied graph has a cycle; this is a bug");
                return;
            }
        };

        for index in order {
            match graph.node(index) {
                Some(Node::Component(node)) => {
                    let node = Arc::clone(node);
                    self.evaluate_component(graph, index, &node).await;
                }
                Some(Node::Config(node)) => {
                    let node = Arc::clone(node);
                    self.evaluate_config(graph, index, &node);
                }
                None => {}
            }
        }
    }

    fn evaluate_config(
        &self,
        graph: &Arc<Graph<Node>>,
        index: usize,
        node: &Arc<crate::controller::node::ConfigBlockNode>,
    ) {
        let scope = scope_for(graph, index);
        let block = node.block();
        match eval_body(&block.body, &scope) {
            Ok(fields) => {
                let value = Value::Object(fields);
                node.set_value(value.clone());
                if node.name() == "logging" {
                    match <LoggingOptions as weir_syntax::FromValue>::from_value(&value) {
                        Ok(options) => self.inner.write_state(|state| {
                            state.logging = options;
                        }),
                        Err(err) => warn!(%err, "invalid logging block"),
                    }
                }
            }
            Err(diags) => {
                warn!(
                    block = node.name(),
                    errors = format_diags(&diags),
                    "configuration block failed to evaluate"
                );
            }
        }
    }

    /// Evaluate one component node: regenerate its arguments from its
    /// block, then build, update, or restart the instance as needed.
    async fn evaluate_component(
        &self,
        graph: &Arc<Graph<Node>>,
        index: usize,
        node: &Arc<ComponentNode>,
    ) {
        let scope = scope_for(graph, index);
        let block = node.block();
        let args = match eval_body(&block.body, &scope) {
            Ok(fields) => Value::Object(fields),
            Err(diags) => {
                // The node keeps its last valid arguments and instance.
                node.set_health(Health::unhealthy(format!(
                    "evaluating arguments: {}",
                    format_diags(&diags)
                )));
                return;
            }
        };

        let unchanged = node.args().as_ref() == Some(&args);
        match node.instance() {
            None => self.build_and_start(node, args),
            Some(instance) => {
                if unchanged {
                    return;
                }
                match instance.update(args.clone()) {
                    Ok(()) => {
                        node.set_args(args);
                        node.set_health(Health::healthy("applied new arguments"));
                        debug!(id = %node.id(), "component updated in place");
                    }
                    Err(CoreError::UpdateNotSupported) => {
                        // Recreate the instance: identity of the node is
                        // preserved but the component restarts.
                        debug!(id = %node.id(), "component does not update in place; restarting");
                        self.stop_component(node).await;
                        node.clear_instance();
                        self.build_and_start(node, args);
                    }
                    Err(err) => {
                        node.set_health(Health::unhealthy(format!("update failed: {}", err)));
                        warn!(id = %node.id(), %err, "component rejected new arguments");
                    }
                }
            }
        }
    }

    fn build_and_start(&self, node: &Arc<ComponentNode>, args: Value) {
        let options = self.component_options(node);
        let build = Arc::clone(&node.registration().build);
        match build(options, &args) {
            Ok(instance) => {
                node.set_instance(Arc::clone(&instance));
                node.set_args(args);
                node.set_health(Health::healthy("component started"));
                self.spawn_component(node, instance);
            }
            Err(err) => {
                node.set_health(Health::unhealthy(format!("build failed: {}", err)));
                warn!(id = %node.id(), %err, "component failed to build");
            }
        }
    }

    fn component_options(&self, node: &Arc<ComponentNode>) -> Options {
        let queue_tx = self.inner.queue_tx.clone();
        let callback_node = Arc::clone(node);
        Options::new(
            node.id().clone(),
            Arc::new(move |exports: Value| {
                if callback_node.set_exports(exports) {
                    let _ = queue_tx.send(callback_node.id().local_id.clone());
                }
            }),
            self.inner.services.clone(),
        )
    }

    /// Spawn the component's run loop plus a monitor that translates its
    /// outcome (including panics) into node health.
    fn spawn_component(&self, node: &Arc<ComponentNode>, instance: Arc<dyn Component>) {
        let (handle, signal) = ShutdownSignal::pair();
        let monitor_node = Arc::clone(node);
        let monitor = tokio::spawn(async move {
            let run = tokio::spawn(async move { instance.run(signal).await });
            match run.await {
                Ok(Ok(())) => {
                    monitor_node.set_health(Health::exited("run loop returned"));
                }
                Ok(Err(err)) => {
                    monitor_node.set_health(Health::unhealthy(format!("run failed: {}", err)));
                }
                Err(join_err) if join_err.is_panic() => {
                    let payload = join_err.into_panic();
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(id = %monitor_node.id(), panic = %message, "component panicked");
                    monitor_node
                        .set_health(Health::unhealthy(format!("component panicked: {}", message)));
                }
                Err(_) => {
                    // Cancelled during teardown.
                }
            }
        });

        let id = node.id().local_id.clone();
        self.inner.write_state(|state| {
            state.tasks.insert(id, RunningTask { handle, monitor });
        });
    }

    /// Stop a component's run task, waiting up to the grace period.
    async fn stop_component(&self, node: &Arc<ComponentNode>) {
        let id = node.id().local_id.clone();
        let task = self.inner.write_state(|state| state.tasks.remove(&id));
        let Some(task) = task else { return };

        debug!(%id, "stopping component");
        task.handle.shutdown();
        if tokio::time::timeout(self.inner.shutdown_grace, task.monitor)
            .await
            .is_err()
        {
            warn!(%id, "component did not exit within the grace period; proceeding");
        }
    }

    async fn stop_all(&self) {
        let graph = self.graph();
        // Stop dependants before their dependencies so data paths drain
        // from the top: reverse topological order.
        let order = graph.topo().map(|mut order| {
            order.reverse();
            order
        });
        let Ok(order) = order else { return };
        for index in order {
            if let Some(Node::Component(node)) = graph.node(index) {
                let node = Arc::clone(node);
                self.stop_component(&node).await;
            }
        }
    }
}

impl RuntimeInner {
    fn read_state<T>(&self, f: impl FnOnce(&RuntimeState) -> T) -> T {
        let state = self.state.read().unwrap_or_else(|poison| poison.into_inner());
        f(&state)
    }

    fn write_state<T>(&self, f: impl FnOnce(&mut RuntimeState) -> T) -> T {
        let mut state = self.state.write().unwrap_or_else(|poison| poison.into_inner());
        f(&mut state)
    }
}

fn format_diags(diags: &[Diagnostic]) -> String {
    diags
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// Introspection surface: see `provider.rs` for the data types.
use crate::provider::{Info, InfoOptions, Provider};

impl Provider for Runtime {
    fn get_component(&self, id: &ComponentId, opts: InfoOptions) -> Result<Info, CoreError> {
        if !id.module_id.is_empty() {
            return Err(CoreError::ModuleNotFound(id.module_id.clone()));
        }
        let graph = self.graph();
        let index = graph
            .index_of(&id.local_id)
            .ok_or_else(|| CoreError::ComponentNotFound(id.local_id.clone()))?;
        match graph.node(index) {
            Some(Node::Component(node)) => Ok(component_info(&graph, index, node, opts)),
            Some(Node::Config(_)) => Err(CoreError::NotAComponent(id.local_id.clone())),
            None => Err(CoreError::ComponentNotFound(id.local_id.clone())),
        }
    }

    fn list_components(&self, module_id: &str, opts: InfoOptions) -> Result<Vec<Info>, CoreError> {
        if !module_id.is_empty() {
            return Err(CoreError::ModuleNotFound(module_id.to_string()));
        }
        let graph = self.graph();
        let mut infos: Vec<Info> = graph
            .indices()
            .filter_map(|index| {
                graph
                    .node(index)
                    .and_then(Node::as_component)
                    .map(|node| component_info(&graph, index, node, opts))
            })
            .collect();
        infos.sort_by(|a, b| a.id.local_id.cmp(&b.id.local_id));
        Ok(infos)
    }
}

/// Project one component node into its introspection record. Edges to
/// non-component nodes are skipped so the projected graph stays
/// homogeneous.
fn component_info(
    graph: &Graph<Node>,
    index: usize,
    node: &Arc<ComponentNode>,
    opts: InfoOptions,
) -> Info {
    let component_ids = |indices: &[usize]| -> Vec<String> {
        let mut ids: Vec<String> = indices
            .iter()
            .filter_map(|&other| graph.node(other))
            .filter_map(Node::as_component)
            .map(|other| other.id().local_id.clone())
            .collect();
        ids.sort();
        ids
    };

    let instance = node.instance();
    Info {
        id: node.id().clone(),
        label: node.label(),
        component_name: node.component_name().to_string(),
        references: component_ids(graph.dependencies(index)),
        referenced_by: component_ids(graph.dependants(index)),
        health: opts.get_health.then(|| node.health()),
        arguments: opts
            .get_arguments
            .then(|| node.args().map(|args| args.to_json()).unwrap_or_default()),
        exports: opts.get_exports.then(|| node.exports().to_json()),
        debug_info: if opts.get_debug_info {
            instance.as_ref().and_then(|i| i.debug_info())
        } else {
            None
        },
        live_debugging_enabled: instance.map(|i| i.live_debugging()).unwrap_or(false),
    }
}
