//! Graph node types owned by the controller.

use std::sync::{Arc, Mutex, MutexGuard};

use weir_syntax::ast::Block;
use weir_syntax::Value;

use crate::component::{Component, ComponentId, Health, Registration};
use crate::graph::GraphNode;

/// A vertex in the controller's graph: a component or a configuration
/// block.
#[derive(Clone)]
pub enum Node {
    /// A configured component instance
    Component(Arc<ComponentNode>),
    /// A singleton configuration block such as `logging`
    Config(Arc<ConfigBlockNode>),
}

impl Node {
    /// The component node, when this is one
    pub fn as_component(&self) -> Option<&Arc<ComponentNode>> {
        match self {
            Node::Component(node) => Some(node),
            Node::Config(_) => None,
        }
    }

    /// The config-block node, when this is one
    pub fn as_config(&self) -> Option<&Arc<ConfigBlockNode>> {
        match self {
            Node::Config(node) => Some(node),
            Node::Component(_) => None,
        }
    }
}

impl GraphNode for Node {
    fn node_id(&self) -> &str {
        match self {
            Node::Component(node) => &node.id().local_id,
            Node::Config(node) => node.name(),
        }
    }
}

/// A component vertex: registration, current block, evaluated arguments,
/// exports, health, and the running instance.
///
/// Interior state sits behind the node's own lock; the controller mutates
/// it only from the serialized reload path, while introspection reads
/// concurrently.
pub struct ComponentNode {
    id: ComponentId,
    registration: Registration,
    state: Mutex<ComponentState>,
}

struct ComponentState {
    block: Block,
    args: Option<Value>,
    exports: Value,
    health: Health,
    instance: Option<Arc<dyn Component>>,
}

impl ComponentNode {
    /// Create a node for a block that matched `registration`
    pub fn new(id: ComponentId, registration: Registration, block: Block) -> Self {
        ComponentNode {
            id,
            registration,
            state: Mutex::new(ComponentState {
                block,
                args: None,
                exports: Value::object([]),
                health: Health::unknown(),
                instance: None,
            }),
        }
    }

    /// The component's identity
    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    /// The component name, e.g. `metrics.relabel`
    pub fn component_name(&self) -> &'static str {
        self.registration.name
    }

    /// The user label, when the block carried one
    pub fn label(&self) -> Option<String> {
        self.lock().block.label.clone()
    }

    /// The registration backing this node
    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    /// The current configuration block
    pub fn block(&self) -> Block {
        self.lock().block.clone()
    }

    /// Replace the configuration block (reload apply phase)
    pub fn set_block(&self, block: Block) {
        self.lock().block = block;
    }

    /// The last successfully evaluated arguments
    pub fn args(&self) -> Option<Value> {
        self.lock().args.clone()
    }

    /// Record successfully evaluated arguments
    pub fn set_args(&self, args: Value) {
        self.lock().args = Some(args);
    }

    /// The current exports; an empty object until the component publishes
    pub fn exports(&self) -> Value {
        self.lock().exports.clone()
    }

    /// Store new exports. Returns true when they differ from the previous
    /// value, which is what gates dependant re-evaluation.
    pub fn set_exports(&self, exports: Value) -> bool {
        let mut state = self.lock();
        if state.exports == exports {
            return false;
        }
        state.exports = exports;
        true
    }

    /// Current health record
    pub fn health(&self) -> Health {
        self.lock().health.clone()
    }

    /// Replace the health record
    pub fn set_health(&self, health: Health) {
        self.lock().health = health;
    }

    /// The running instance, once built
    pub fn instance(&self) -> Option<Arc<dyn Component>> {
        self.lock().instance.clone()
    }

    /// Install a newly built instance
    pub fn set_instance(&self, instance: Arc<dyn Component>) {
        self.lock().instance = Some(instance);
    }

    /// Drop the instance (restart path)
    pub fn clear_instance(&self) {
        self.lock().instance = None;
    }

    fn lock(&self) -> MutexGuard<'_, ComponentState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

/// A singleton configuration block vertex, e.g. `logging`.
pub struct ConfigBlockNode {
    name: String,
    state: Mutex<ConfigState>,
}

struct ConfigState {
    block: Block,
    value: Option<Value>,
}

impl ConfigBlockNode {
    /// Create a node for a known configuration block
    pub fn new(block: Block) -> Self {
        ConfigBlockNode {
            name: block.name_str(),
            state: Mutex::new(ConfigState { block, value: None }),
        }
    }

    /// The block name, which is also the node id
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current configuration block
    pub fn block(&self) -> Block {
        self.lock().block.clone()
    }

    /// Replace the configuration block (reload apply phase)
    pub fn set_block(&self, block: Block) {
        self.lock().block = block;
    }

    /// The evaluated block body, once evaluated
    pub fn value(&self) -> Option<Value> {
        self.lock().value.clone()
    }

    /// Store the evaluated block body
    pub fn set_value(&self, value: Value) {
        self.lock().value = Some(value);
    }

    fn lock(&self) -> MutexGuard<'_, ConfigState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}
