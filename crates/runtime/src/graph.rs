//! The dependency graph
//!
//! Nodes are the models of a system-of-systems; edges are its typed
//! dependencies. Lagged (previous-timestep) edges are carried separately:
//! they never gate execution within a timestep and are exempt from cycle
//! checks. The graph is rebuilt per timestep, since a decision module may
//! swap models between timesteps.

use std::fmt;

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use smif_metadata::RelativeTimestep;
use smif_model::SosModel;

/// One dependency edge, tagged with the variable it carries and its offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    pub source: String,
    pub sink: String,
    pub source_output: String,
    pub sink_input: String,
    pub timestep: RelativeTimestep,
}

/// Raised when the current-edge subgraph contains a cycle.
///
/// The cycle is reported in walk order, closing on the starting node, e.g.
/// `[A, B, A]`.
#[derive(Debug, Clone)]
pub struct CircularDependencyError {
    pub cycle: Vec<String>,
}

impl fmt::Display for CircularDependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "circular dependency: {}", self.cycle.join(" -> "))
    }
}

impl std::error::Error for CircularDependencyError {}

/// Directed graph of models with typed dependency edges.
pub struct DependencyGraph {
    /// Node names, lexicographically sorted for deterministic iteration
    nodes: Vec<String>,
    /// Edges gating execution within a timestep
    current_edges: Vec<GraphEdge>,
    /// Previous-timestep edges, exempt from cycles and gating
    lagged_edges: Vec<GraphEdge>,
    /// node -> nodes it feeds via current edges
    successors: IndexMap<String, IndexSet<String>>,
    /// node -> nodes feeding it via current edges
    predecessors: IndexMap<String, IndexSet<String>>,
}

impl DependencyGraph {
    /// Build from a system-of-systems model's members and dependencies.
    pub fn from_sos_model(sos: &SosModel) -> Self {
        let mut nodes: Vec<String> = sos.models().keys().cloned().collect();
        nodes.sort();

        let mut current_edges = Vec::new();
        let mut lagged_edges = Vec::new();
        for dep in sos.dependencies() {
            let edge = GraphEdge {
                source: dep.source.clone(),
                sink: dep.sink.clone(),
                source_output: dep.source_output.clone(),
                sink_input: dep.sink_input.clone(),
                timestep: dep.timestep,
            };
            if dep.is_lagged() {
                lagged_edges.push(edge);
            } else {
                current_edges.push(edge);
            }
        }

        Self::new(nodes, current_edges, lagged_edges)
    }

    pub fn new(
        nodes: Vec<String>,
        current_edges: Vec<GraphEdge>,
        lagged_edges: Vec<GraphEdge>,
    ) -> Self {
        let mut successors: IndexMap<String, IndexSet<String>> = nodes
            .iter()
            .map(|n| (n.clone(), IndexSet::new()))
            .collect();
        let mut predecessors: IndexMap<String, IndexSet<String>> = nodes
            .iter()
            .map(|n| (n.clone(), IndexSet::new()))
            .collect();
        for edge in &current_edges {
            if let Some(set) = successors.get_mut(&edge.source) {
                set.insert(edge.sink.clone());
            }
            if let Some(set) = predecessors.get_mut(&edge.sink) {
                set.insert(edge.source.clone());
            }
        }
        debug!(
            nodes = nodes.len(),
            current = current_edges.len(),
            lagged = lagged_edges.len(),
            "dependency graph built"
        );
        Self {
            nodes,
            current_edges,
            lagged_edges,
            successors,
            predecessors,
        }
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn current_edges(&self) -> &[GraphEdge] {
        &self.current_edges
    }

    pub fn lagged_edges(&self) -> &[GraphEdge] {
        &self.lagged_edges
    }

    /// Nodes with no current in-edges; typically the scenario models.
    pub fn roots(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| self.predecessors[*n].is_empty())
            .map(String::as_str)
            .collect()
    }

    /// Direct current-edge predecessors of a node.
    pub fn predecessors(&self, node: &str) -> impl Iterator<Item = &str> {
        self.predecessors
            .get(node)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// Strict descendants of a node via current edges.
    pub fn descendants(&self, node: &str) -> IndexSet<String> {
        let mut seen = IndexSet::new();
        let mut stack: Vec<&String> = match self.successors.get(node) {
            Some(set) => set.iter().collect(),
            None => Vec::new(),
        };
        while let Some(next) = stack.pop() {
            if seen.insert(next.clone()) {
                if let Some(set) = self.successors.get(next) {
                    stack.extend(set.iter());
                }
            }
        }
        seen
    }

    /// Reject cycles through current edges.
    ///
    /// Runs Tarjan's strongly-connected-components algorithm over the
    /// current-edge subgraph in deterministic (lexicographic) node order. A
    /// non-singleton component, or a current self-loop, is a cycle.
    pub fn validate(&self) -> Result<(), CircularDependencyError> {
        // Current self-loops never reach a non-singleton SCC
        for edge in &self.current_edges {
            if edge.source == edge.sink {
                return Err(CircularDependencyError {
                    cycle: vec![edge.source.clone(), edge.sink.clone()],
                });
            }
        }

        for component in self.strongly_connected_components() {
            if component.len() > 1 {
                return Err(CircularDependencyError {
                    cycle: self.cycle_through(&component),
                });
            }
        }
        Ok(())
    }

    /// Deterministic topological order of the current-edge subgraph, as
    /// levels: all nodes in a level have their predecessors in earlier
    /// levels, so a level may execute in parallel. Within a level, nodes
    /// are in lexicographic order.
    ///
    /// Call [`DependencyGraph::validate`] first; on a cyclic graph the
    /// residue nodes are dropped.
    pub fn levels(&self) -> Vec<Vec<String>> {
        let mut in_degree: IndexMap<&String, usize> = self
            .nodes
            .iter()
            .map(|n| (n, self.predecessors[n].len()))
            .collect();

        let mut levels = Vec::new();
        let mut current: Vec<&String> = self
            .nodes
            .iter()
            .filter(|n| in_degree[*n] == 0)
            .collect();

        while !current.is_empty() {
            current.sort();
            let mut next = Vec::new();
            for node in &current {
                for succ in &self.successors[*node] {
                    let degree = in_degree.get_mut(succ).expect("known node");
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(succ);
                    }
                }
            }
            levels.push(current.iter().map(|n| (*n).clone()).collect());
            current = next;
        }
        levels
    }

    /// Flat deterministic topological order.
    pub fn topological_order(&self) -> Vec<String> {
        self.levels().into_iter().flatten().collect()
    }

    /// Tarjan's SCC over current edges, visiting nodes in sorted order.
    fn strongly_connected_components(&self) -> Vec<Vec<String>> {
        struct Tarjan<'a> {
            graph: &'a DependencyGraph,
            index: usize,
            indices: IndexMap<&'a String, usize>,
            lowlinks: IndexMap<&'a String, usize>,
            on_stack: IndexSet<&'a String>,
            stack: Vec<&'a String>,
            components: Vec<Vec<String>>,
        }

        impl<'a> Tarjan<'a> {
            fn strongconnect(&mut self, node: &'a String) {
                self.indices.insert(node, self.index);
                self.lowlinks.insert(node, self.index);
                self.index += 1;
                self.stack.push(node);
                self.on_stack.insert(node);

                for succ in &self.graph.successors[node] {
                    if !self.indices.contains_key(succ) {
                        self.strongconnect(succ);
                        let low = self.lowlinks[succ].min(self.lowlinks[node]);
                        self.lowlinks.insert(node, low);
                    } else if self.on_stack.contains(succ) {
                        let low = self.indices[succ].min(self.lowlinks[node]);
                        self.lowlinks.insert(node, low);
                    }
                }

                if self.lowlinks[node] == self.indices[node] {
                    let mut component = Vec::new();
                    while let Some(top) = self.stack.pop() {
                        self.on_stack.swap_remove(top);
                        component.push(top.clone());
                        if top == node {
                            break;
                        }
                    }
                    component.sort();
                    self.components.push(component);
                }
            }
        }

        let mut tarjan = Tarjan {
            graph: self,
            index: 0,
            indices: IndexMap::new(),
            lowlinks: IndexMap::new(),
            on_stack: IndexSet::new(),
            stack: Vec::new(),
            components: Vec::new(),
        };
        for node in &self.nodes {
            if !tarjan.indices.contains_key(node) {
                tarjan.strongconnect(node);
            }
        }
        tarjan.components
    }

    /// A concrete cycle within a strongly connected component, reported in
    /// walk order and closed on the starting node.
    fn cycle_through(&self, component: &[String]) -> Vec<String> {
        let members: IndexSet<&String> = component.iter().collect();
        let start = &component[0];

        // Depth-first walk within the component until we return to start
        let mut path = vec![start.clone()];
        let mut visited: IndexSet<&String> = IndexSet::new();
        visited.insert(start);
        let mut current = start;
        loop {
            let mut next = None;
            let mut sorted: Vec<&String> = self.successors[current]
                .iter()
                .filter(|s| members.contains(s))
                .collect();
            sorted.sort();
            for succ in sorted {
                if succ == start {
                    path.push(start.clone());
                    return path;
                }
                if !visited.contains(succ) {
                    next = Some(succ);
                    break;
                }
            }
            match next {
                Some(succ) => {
                    visited.insert(succ);
                    path.push(succ.clone());
                    current = succ;
                }
                // Strong connectivity guarantees a way back; bail defensively
                None => return component.to_vec(),
            }
        }
    }
}
