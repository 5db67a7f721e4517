//! Directed acyclic graph of configuration nodes.
//!
//! Nodes live in an arena and are addressed by integer index; edges are two
//! compact adjacency vectors (forward = dependencies, reverse =
//! dependants). A separate map resolves node ids to indices. The graph
//! stores no back-pointers to its owner.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::error::CoreError;

/// Anything the graph can hold: nodes expose a stable string id.
pub trait GraphNode {
    /// The unique id of the node, e.g. `metrics.relabel.default`
    fn node_id(&self) -> &str;
}

/// Index of a node within a [`Graph`] arena.
pub type NodeIndex = usize;

/// An arena-backed DAG.
pub struct Graph<N> {
    nodes: Vec<Option<N>>,
    forward: Vec<Vec<NodeIndex>>,
    reverse: Vec<Vec<NodeIndex>>,
    by_id: HashMap<String, NodeIndex>,
}

impl<N: GraphNode> Default for Graph<N> {
    fn default() -> Self {
        Graph::new()
    }
}

impl<N: GraphNode> Graph<N> {
    /// An empty graph
    pub fn new() -> Self {
        Graph {
            nodes: Vec::new(),
            forward: Vec::new(),
            reverse: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True when the graph holds no nodes
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Add a node. Node ids must be unique.
    pub fn add(&mut self, node: N) -> Result<NodeIndex, CoreError> {
        let id = node.node_id().to_string();
        if self.by_id.contains_key(&id) {
            return Err(CoreError::Other(format!("duplicate node id {:?}", id)));
        }
        let index = self.nodes.len();
        self.nodes.push(Some(node));
        self.forward.push(Vec::new());
        self.reverse.push(Vec::new());
        self.by_id.insert(id, index);
        Ok(index)
    }

    /// Add an edge meaning `src` depends on `dst`. Duplicate edges
    /// collapse; self-edges are rejected (a node cannot depend on itself).
    pub fn add_edge(&mut self, src: NodeIndex, dst: NodeIndex) -> Result<(), CoreError> {
        if src == dst {
            let id = self.node(src).map(|n| n.node_id()).unwrap_or("?");
            return Err(CoreError::Other(format!("{} cannot reference itself", id)));
        }
        if self.node(src).is_none() || self.node(dst).is_none() {
            return Err(CoreError::Other("edge endpoint does not exist".to_string()));
        }
        if !self.forward[src].contains(&dst) {
            self.forward[src].push(dst);
            self.reverse[dst].push(src);
        }
        Ok(())
    }

    /// The node at an index, if still live
    pub fn node(&self, index: NodeIndex) -> Option<&N> {
        self.nodes.get(index).and_then(Option::as_ref)
    }

    /// Resolve a node id to its index
    pub fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.by_id.get(id).copied()
    }

    /// Fetch a node by id
    pub fn get_by_id(&self, id: &str) -> Option<&N> {
        self.index_of(id).and_then(|index| self.node(index))
    }

    /// All live node indices, in insertion order
    pub fn indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|_| index))
    }

    /// Out-edges: the nodes `index` depends on
    pub fn dependencies(&self, index: NodeIndex) -> &[NodeIndex] {
        self.forward.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// In-edges: the nodes that depend on `index`
    pub fn dependants(&self, index: NodeIndex) -> &[NodeIndex] {
        self.reverse.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every node reachable by following dependant edges from `start`,
    /// excluding `start` itself, in topological order. This is the set the
    /// controller re-evaluates when `start`'s exports change.
    pub fn transitive_dependants_topo(&self, start: NodeIndex) -> Vec<NodeIndex> {
        let mut reachable = HashSet::new();
        let mut stack = vec![start];
        while let Some(index) = stack.pop() {
            for &dep in self.dependants(index) {
                if reachable.insert(dep) {
                    stack.push(dep);
                }
            }
        }
        match self.topo() {
            Ok(order) => order
                .into_iter()
                .filter(|index| reachable.contains(index))
                .collect(),
            // The graph is validated acyclic before it is ever walked.
            Err(_) => Vec::new(),
        }
    }

    /// Remove a node and its edges. Returns the ids of former dependencies
    /// left with no dependants (orphans a caller may want to collect).
    pub fn remove(&mut self, index: NodeIndex) -> Option<Vec<String>> {
        let node = self.nodes.get_mut(index)?.take()?;
        self.by_id.remove(node.node_id());

        let deps = std::mem::take(&mut self.forward[index]);
        for &dep in &deps {
            self.reverse[dep].retain(|&src| src != index);
        }
        let dependants = std::mem::take(&mut self.reverse[index]);
        for &dependant in &dependants {
            self.forward[dependant].retain(|&dst| dst != index);
        }

        let orphans = deps
            .iter()
            .filter(|&&dep| self.reverse[dep].is_empty())
            .filter_map(|&dep| self.node(dep).map(|n| n.node_id().to_string()))
            .collect();
        Some(orphans)
    }

    /// Kahn's algorithm with a deterministic tie-break: among ready nodes,
    /// the smallest node id (lexicographic) comes first. Dependencies sort
    /// before their dependants. Returns [`CycleError`] when edges remain.
    pub fn topo(&self) -> Result<Vec<NodeIndex>, CycleError> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .indices()
            .map(|index| (index, self.dependencies(index).len()))
            .collect();

        let mut ready: BinaryHeap<Reverse<(String, NodeIndex)>> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&index, _)| {
                Reverse((self.node(index).expect("live node").node_id().to_string(), index))
            })
            .collect();

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(Reverse((_, index))) = ready.pop() {
            order.push(index);
            for &dependant in self.dependants(index) {
                let degree = in_degree.get_mut(&dependant).expect("edge endpoint is live");
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse((
                        self.node(dependant).expect("live node").node_id().to_string(),
                        dependant,
                    )));
                }
            }
        }

        if order.len() < self.len() {
            // The unremoved remainder contains at least one cycle; walk it
            // to produce a readable path.
            let remaining: HashSet<NodeIndex> = self
                .indices()
                .filter(|index| !order.contains(index))
                .collect();
            return Err(self.cycle_error(&remaining));
        }
        Ok(order)
    }

    /// Find a concrete cycle among the given nodes for error reporting.
    fn cycle_error(&self, remaining: &HashSet<NodeIndex>) -> CycleError {
        // Every remaining node has a dependency inside the remainder, so
        // following first-dependencies must revisit a node.
        let mut path = Vec::new();
        let mut seen = HashMap::new();
        let mut current = *remaining.iter().min().expect("remainder is non-empty");
        loop {
            if let Some(&position) = seen.get(&current) {
                let cycle = path[position..]
                    .iter()
                    .map(|&index: &NodeIndex| {
                        self.node(index).expect("live node").node_id().to_string()
                    })
                    .collect();
                return CycleError { cycle };
            }
            seen.insert(current, path.len());
            path.push(current);
            current = *self
                .dependencies(current)
                .iter()
                .find(|dep| remaining.contains(dep))
                .expect("cyclic node has an in-cycle dependency");
        }
    }
}

/// A dependency cycle, fatal to a reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    /// The node ids forming the cycle, in dependency order
    pub cycle: Vec<String>,
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut chain = self.cycle.join(" -> ");
        if let Some(first) = self.cycle.first() {
            chain.push_str(" -> ");
            chain.push_str(first);
        }
        write!(f, "circular dependency detected: {}", chain)
    }
}

impl std::error::Error for CycleError {}
