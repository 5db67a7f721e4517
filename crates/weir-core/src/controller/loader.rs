//! Reload phase 1: turn source text into a validated candidate graph.
//!
//! Everything in this module is side-effect-free. Parse errors, unknown
//! component names, duplicate ids, schema violations, unresolvable
//! references, and cycles are all caught here, before the controller
//! touches any running state; a failure leaves the previous graph running
//! untouched.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use weir_syntax::ast::{Block, Body, Stmt};
use weir_syntax::eval::references;
use weir_syntax::{codes, parse_file, ArgSchema, Diagnostic, Field, Scope, Value};

use crate::component::{ComponentId, Registry};
use crate::controller::node::{ComponentNode, ConfigBlockNode, Node};
use crate::graph::{Graph, GraphNode};

/// Diagnostic codes produced by graph building.
pub mod load_codes {
    /// A block name is neither a registered component nor a known
    /// configuration block
    pub const ERR_UNKNOWN_COMPONENT: &str = "ERR_CONFIG_UNKNOWN_COMPONENT";

    /// Two blocks produced the same node id
    pub const ERR_DUPLICATE_ID: &str = "ERR_CONFIG_DUPLICATE_ID";

    /// The graph contains a dependency cycle
    pub const ERR_CIRCULAR_DEPENDENCY: &str = "ERR_CONFIG_CIRCULAR_DEPENDENCY";

    /// A reference resolves to a node that is not a component
    pub const ERR_NOT_A_COMPONENT: &str = "ERR_CONFIG_NOT_A_COMPONENT";
}

/// The `logging` block is the one singleton configuration block the
/// controller understands.
const LOGGING_BLOCK: &str = "logging";

const LOGGING_SCHEMA: ArgSchema = ArgSchema::new(&[
    Field::attr_optional("level"),
    Field::attr_optional("format"),
]);

/// A validated candidate graph plus what the apply phase needs.
pub struct LoadPlan {
    /// The new graph. Kept component nodes are the same `Arc`s as in the
    /// previous graph, so instance identity is preserved across reloads.
    pub graph: Graph<Node>,
    /// New configuration blocks per node id, applied after the swap
    pub blocks: HashMap<String, Block>,
    /// Node ids present in the new graph but not the old one
    pub added: Vec<String>,
    /// Component nodes present in the old graph but not the new one
    pub removed: Vec<Arc<ComponentNode>>,
    /// Non-fatal findings (extra structural fields and the like)
    pub warnings: Vec<Diagnostic>,
}

impl std::fmt::Debug for LoadPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadPlan").finish_non_exhaustive()
    }
}

/// Build and validate a candidate graph from source text.
pub fn build_graph(
    source: &str,
    registry: &Registry,
    previous: &Graph<Node>,
) -> Result<LoadPlan, Vec<Diagnostic>> {
    let file = parse_file(source)?;

    let mut diags = Vec::new();
    let warnings = Vec::new();
    let mut graph: Graph<Node> = Graph::new();
    let mut blocks: HashMap<String, Block> = HashMap::new();
    let mut added = Vec::new();

    // Pass 1: create nodes.
    for stmt in &file.body.stmts {
        let block = match stmt {
            Stmt::Block(block) => block,
            Stmt::Attribute(attr) => {
                diags.push(Diagnostic::error(
                    codes::ERR_PARSE,
                    format!("attribute {:?} is not allowed at the top level", attr.name),
                    attr.span,
                ));
                continue;
            }
        };

        let name = block.name_str();
        let node = if let Some(registration) = registry.get(&name) {
            schema_diags(&registration.args, &block.body, &mut diags);
            let node_id = block.node_id();
            let node = match previous.get_by_id(&node_id).and_then(Node::as_component) {
                // Same node id means same component type and label: keep
                // the existing node so the instance survives the reload.
                Some(existing) => Node::Component(Arc::clone(existing)),
                None => {
                    added.push(node_id.clone());
                    Node::Component(Arc::new(ComponentNode::new(
                        ComponentId::root(node_id.clone()),
                        registration.clone(),
                        block.clone(),
                    )))
                }
            };
            node
        } else if name == LOGGING_BLOCK {
            if block.label.is_some() {
                diags.push(Diagnostic::error(
                    codes::ERR_PARSE,
                    format!("configuration block {:?} does not take a label", name),
                    block.span,
                ));
                continue;
            }
            schema_diags(&LOGGING_SCHEMA, &block.body, &mut diags);
            match previous.get_by_id(&name).and_then(Node::as_config) {
                Some(existing) => Node::Config(Arc::clone(existing)),
                None => {
                    added.push(name.clone());
                    Node::Config(Arc::new(ConfigBlockNode::new(block.clone())))
                }
            }
        } else {
            diags.push(Diagnostic::error(
                load_codes::ERR_UNKNOWN_COMPONENT,
                format!("unrecognized component or configuration block {:?}", name),
                block.span,
            ));
            continue;
        };

        let node_id = node.node_id().to_string();
        if graph.add(node).is_err() {
            diags.push(Diagnostic::error(
                load_codes::ERR_DUPLICATE_ID,
                format!("duplicate block id {:?}", node_id),
                block.span,
            ));
            continue;
        }
        blocks.insert(node_id, block.clone());
    }

    // Pass 2: resolve references into edges.
    let stdlib_names: Vec<&'static str> = weir_syntax::scope::stdlib()
        .iter()
        .map(|f| f.name)
        .collect();

    for index in graph.indices().collect::<Vec<_>>() {
        let body = blocks
            .get(graph.node(index).map(|n| n.node_id()).unwrap_or_default())
            .map(|block| block.body.clone());
        let Some(body) = body else { continue };

        for reference in body_references(&body) {
            match resolve_reference(&reference, &graph) {
                Resolution::Component(target_index, remainder) => {
                    // A reference into the exports must name a declared
                    // export field.
                    if let Some(first) = remainder.first() {
                        let target = graph
                            .node(target_index)
                            .and_then(Node::as_component)
                            .expect("resolution targets a component");
                        if !target.registration().exports_field(first) {
                            diags.push(Diagnostic::error(
                                codes::ERR_TYPE,
                                format!(
                                    "{} does not export a field named {:?}",
                                    target.id().local_id,
                                    first
                                ),
                                reference.span,
                            ));
                            continue;
                        }
                    }
                    if let Err(err) = graph.add_edge(index, target_index) {
                        diags.push(Diagnostic::error(
                            load_codes::ERR_CIRCULAR_DEPENDENCY,
                            err.to_string(),
                            reference.span,
                        ));
                    }
                }
                Resolution::Config => {
                    diags.push(Diagnostic::error(
                        load_codes::ERR_NOT_A_COMPONENT,
                        format!("{} is not a component", reference.join()),
                        reference.span,
                    ));
                }
                Resolution::Undefined => {
                    if stdlib_names.contains(&reference.segments[0].as_str()) {
                        continue;
                    }
                    diags.push(Diagnostic::error(
                        codes::ERR_UNDEFINED,
                        format!("{} is not defined", reference.join()),
                        reference.span,
                    ));
                }
            }
        }
    }

    // Pass 3: the graph must be acyclic.
    if diags.is_empty() {
        if let Err(cycle) = graph.topo() {
            diags.push(Diagnostic::error_nospan(
                load_codes::ERR_CIRCULAR_DEPENDENCY,
                cycle.to_string(),
            ));
        }
    }

    if !diags.is_empty() {
        return Err(diags);
    }

    let removed = previous
        .indices()
        .filter_map(|index| previous.node(index))
        .filter_map(Node::as_component)
        .filter(|node| graph.get_by_id(&node.id().local_id).is_none())
        .map(Arc::clone)
        .collect();

    Ok(LoadPlan {
        graph,
        blocks,
        added,
        removed,
        warnings,
    })
}

fn schema_diags(schema: &ArgSchema, body: &Body, diags: &mut Vec<Diagnostic>) {
    diags.extend(schema.validate_body(body));
}

/// All references in a body, including those inside nested blocks.
pub fn body_references(body: &Body) -> Vec<weir_syntax::RefPath> {
    let mut out = Vec::new();
    for stmt in &body.stmts {
        match stmt {
            Stmt::Attribute(attr) => out.extend(references(&attr.value)),
            Stmt::Block(block) => out.extend(body_references(&block.body)),
        }
    }
    out
}

enum Resolution {
    /// Target node index and the remaining path into its exports
    Component(usize, Vec<String>),
    Config,
    Undefined,
}

/// Longest-prefix match of a reference path against node ids.
fn resolve_reference(reference: &weir_syntax::RefPath, graph: &Graph<Node>) -> Resolution {
    let segments = &reference.segments;
    for take in (1..=segments.len()).rev() {
        let candidate = segments[..take].join(".");
        if let Some(index) = graph.index_of(&candidate) {
            let remainder = segments[take..].to_vec();
            return match graph.node(index) {
                Some(Node::Component(_)) => Resolution::Component(index, remainder),
                Some(Node::Config(_)) => Resolution::Config,
                None => Resolution::Undefined,
            };
        }
    }
    Resolution::Undefined
}

/// Evaluate a block body into an arguments object.
///
/// Attributes evaluate in place. Nested blocks group by their first name
/// segment, each occurrence becoming one object in an array, in source
/// order; a block with a multi-segment name (`stage.regex`) contributes
/// its trailing segments as a `type` field so tagged-variant decoding can
/// dispatch on it.
pub fn eval_body(body: &Body, scope: &Scope) -> Result<BTreeMap<String, Value>, Vec<Diagnostic>> {
    let mut diags = Vec::new();
    let mut fields = BTreeMap::new();
    let mut groups: Vec<(String, Vec<Value>)> = Vec::new();

    for stmt in &body.stmts {
        match stmt {
            Stmt::Attribute(attr) => match weir_syntax::eval(&attr.value, scope) {
                Ok(value) => {
                    fields.insert(attr.name.clone(), value);
                }
                Err(diag) => diags.push(diag),
            },
            Stmt::Block(block) => match eval_body(&block.body, scope) {
                Ok(mut nested) => {
                    if block.name.len() > 1 {
                        nested.insert(
                            "type".to_string(),
                            Value::String(block.name[1..].join(".")),
                        );
                    }
                    let key = block.name[0].clone();
                    match groups.iter_mut().find(|(name, _)| *name == key) {
                        Some((_, items)) => items.push(Value::Object(nested)),
                        None => groups.push((key, vec![Value::Object(nested)])),
                    }
                }
                Err(nested_diags) => diags.extend(nested_diags),
            },
        }
    }

    for (name, items) in groups {
        fields.insert(name, Value::Array(items));
    }

    if diags.is_empty() {
        Ok(fields)
    } else {
        Err(diags)
    }
}

/// Build the evaluation scope for a node: every component dependency's
/// exports bound into a nested object tree by its id segments, plus the
/// builtin functions.
pub fn scope_for(graph: &Graph<Node>, index: usize) -> Scope {
    let mut tree: BTreeMap<String, Value> = BTreeMap::new();
    for &dep in graph.dependencies(index) {
        if let Some(node) = graph.node(dep).and_then(Node::as_component) {
            let segments: Vec<&str> = node.id().local_id.split('.').collect();
            insert_at_path(&mut tree, &segments, node.exports());
        }
    }
    Scope::with_stdlib(tree)
}

fn insert_at_path(tree: &mut BTreeMap<String, Value>, segments: &[&str], value: Value) {
    match segments {
        [] => {}
        [leaf] => {
            tree.insert(leaf.to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = tree
                .entry(head.to_string())
                .or_insert_with(|| Value::object([]));
            if !matches!(entry, Value::Object(_)) {
                *entry = Value::object([]);
            }
            if let Value::Object(nested) = entry {
                insert_at_path(nested, rest, value);
            }
        }
    }
}

/// The schema of the `logging` configuration block, shared with the apply
/// phase.
pub fn logging_schema() -> ArgSchema {
    LOGGING_SCHEMA
}
