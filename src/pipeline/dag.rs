// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

//! Step graph construction and ordering
//!
//! Edges point from the step creating a link to every step requiring it.
//! Building is permissive: requirements nobody creates are only reported
//! when the graph is sorted.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef, Reversed};
use petgraph::Direction;
use std::collections::{BTreeSet, HashSet};
use std::io::Write;
use std::sync::Arc;

use crate::errors::{MissingDependencies, StepflowError, StepflowResult};
use crate::pipeline::{has_all_links, has_any_link, link_names, Step, StepLink};

/// Index of a node in a [`StepGraph`]
pub type NodeId = usize;

/// A step and the steps consuming what it creates
pub struct StepNode {
    pub step: Arc<dyn Step>,
    /// Consumers, in input order
    pub children: Vec<NodeId>,
}

/// The dependency forest of a pipeline
pub struct StepGraph {
    nodes: Vec<StepNode>,
    roots: Vec<NodeId>,
    graph: DiGraph<NodeId, ()>,
}

impl StepGraph {
    /// Wire `steps` together by matching requirements against creations
    pub fn build(steps: Vec<Arc<dyn Step>>) -> Self {
        let requires: Vec<Vec<StepLink>> = steps.iter().map(|s| s.requires()).collect();
        let creates: Vec<Vec<StepLink>> = steps.iter().map(|s| s.creates()).collect();

        let mut graph = DiGraph::new();
        let mut nodes: Vec<StepNode> = steps
            .into_iter()
            .enumerate()
            .map(|(id, step)| {
                graph.add_node(id);
                StepNode {
                    step,
                    children: Vec::new(),
                }
            })
            .collect();

        let mut roots = Vec::new();
        for consumer in 0..nodes.len() {
            let mut is_root = true;
            for producer in 0..nodes.len() {
                if producer == consumer {
                    continue;
                }
                if has_any_link(&requires[consumer], &creates[producer]) {
                    nodes[producer].children.push(consumer);
                    graph.add_edge(NodeIndex::new(producer), NodeIndex::new(consumer), ());
                    is_root = false;
                }
            }
            if is_root {
                roots.push(consumer);
            }
        }

        tracing::debug!(
            steps = nodes.len(),
            roots = roots.len(),
            edges = graph.edge_count(),
            "built step graph"
        );

        Self {
            nodes,
            roots,
            graph,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes with no producer for any of their requirements
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> &StepNode {
        &self.nodes[id]
    }

    pub fn step(&self, id: NodeId) -> &Arc<dyn Step> {
        &self.nodes[id].step
    }

    /// Producers `id` directly depends on, in input order
    pub fn parents(&self, id: NodeId) -> Vec<NodeId> {
        let mut parents: Vec<NodeId> = self
            .graph
            .neighbors_directed(NodeIndex::new(id), Direction::Incoming)
            .map(|n| self.graph[n])
            .collect();
        parents.sort_unstable();
        parents
    }

    /// Find a node by step name
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|node| node.step.name() == name)
    }

    /// Step names for `ids`; nameless steps render by position
    pub fn node_names(&self, ids: &[NodeId]) -> Vec<String> {
        ids.iter()
            .map(|&id| {
                let name = self.nodes[id].step.name();
                if name.is_empty() {
                    format!("<step #{}>", id)
                } else {
                    name
                }
            })
            .collect()
    }

    /// Order nodes so every producer precedes its consumers
    ///
    /// A node is emitted once everything it requires has been created by an
    /// already emitted node and every step creating one of its requirements
    /// has been emitted. When a whole pass emits nothing, the remaining nodes
    /// can never run and the sort fails without a partial order.
    pub fn topological_sort(&self) -> StepflowResult<Vec<NodeId>> {
        let mut sorted = Vec::with_capacity(self.nodes.len());
        let mut satisfied: Vec<StepLink> = Vec::new();
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut frontier: Vec<NodeId> = self.roots.clone();

        while !frontier.is_empty() {
            let mut changed = false;
            let mut waiting: Vec<NodeId> = Vec::new();
            let mut queued: HashSet<NodeId> = HashSet::new();

            for id in frontier {
                let node = &self.nodes[id];
                for &child in &node.children {
                    if !seen.contains(&child) && queued.insert(child) {
                        waiting.push(child);
                    }
                }
                if seen.contains(&id) {
                    continue;
                }
                let parents_emitted = self.parents(id).iter().all(|p| seen.contains(p));
                if !parents_emitted || !has_all_links(&node.step.requires(), &satisfied) {
                    if queued.insert(id) {
                        waiting.push(id);
                    }
                    continue;
                }
                satisfied.extend(node.step.creates());
                sorted.push(id);
                seen.insert(id);
                changed = true;
            }

            if !changed && !waiting.is_empty() {
                break;
            }
            frontier = waiting;
        }

        if sorted.len() < self.nodes.len() {
            return Err(self.missing_dependencies(&seen, &satisfied));
        }

        Ok(sorted)
    }

    fn missing_dependencies(&self, seen: &HashSet<NodeId>, satisfied: &[StepLink]) -> StepflowError {
        let mut missing = Vec::new();
        for (id, node) in self.nodes.iter().enumerate() {
            if seen.contains(&id) {
                continue;
            }
            let requires = node.step.requires();
            let mut links: Vec<StepLink> = requires
                .iter()
                .filter(|link| !has_all_links(std::slice::from_ref(*link), satisfied))
                .cloned()
                .collect();
            if links.is_empty() {
                // Waiting on a producer that is itself stuck
                let stuck: Vec<StepLink> = self
                    .parents(id)
                    .into_iter()
                    .filter(|p| !seen.contains(p))
                    .flat_map(|p| self.nodes[p].step.creates())
                    .collect();
                links = requires
                    .into_iter()
                    .filter(|link| has_any_link(std::slice::from_ref(link), &stuck))
                    .collect();
            }
            let step = self.node_names(&[id]).remove(0);
            tracing::warn!(
                step = %step,
                missing = %link_names(&links).join(", "),
                "step is missing dependencies"
            );
            missing.push(MissingDependencies { step, links });
        }
        StepflowError::MissingDependencies { missing }
    }

    /// Nodes named by `targets` plus everything they transitively depend on
    pub fn dependency_closure(&self, targets: &[String]) -> StepflowResult<BTreeSet<NodeId>> {
        let mut closure = BTreeSet::new();
        let reversed = Reversed(&self.graph);

        for target in targets {
            let Some(id) = self.find(target) else {
                let known = self.node_names(&(0..self.nodes.len()).collect::<Vec<_>>());
                return Err(StepflowError::unknown_target(target, &known));
            };

            let mut dfs = Dfs::new(reversed, NodeIndex::new(id));
            while let Some(n) = dfs.next(reversed) {
                closure.insert(self.graph[n]);
            }
        }

        Ok(closure)
    }

    /// Check if `a` depends (directly or transitively) on `b`
    pub fn depends_on(&self, a: NodeId, b: NodeId) -> bool {
        petgraph::algo::has_path_connecting(&self.graph, NodeIndex::new(b), NodeIndex::new(a), None)
    }

    /// `<consumer> <producer>` per edge, for diagnostics
    pub fn to_digraph(&self) -> String {
        let mut out = String::new();
        for consumer in 0..self.nodes.len() {
            for producer in self.parents(consumer) {
                let names = self.node_names(&[consumer, producer]);
                out.push_str(&format!("{} {}\n", names[0], names[1]));
            }
        }
        out
    }

    /// Generate DOT diagram of the graph
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for edge in self.graph.edge_references() {
            let names = self.node_names(&[self.graph[edge.source()], self.graph[edge.target()]]);
            out.push_str(&format!("    \"{}\" -> \"{}\";\n", names[0], names[1]));
        }

        // Isolated nodes (no edges)
        for node in self.graph.node_indices() {
            if self.graph.neighbors_undirected(node).count() == 0 {
                let names = self.node_names(&[self.graph[node]]);
                out.push_str(&format!("    \"{}\";\n", names[0]));
            }
        }

        out.push_str("}\n");
        out
    }

    /// Generate Mermaid diagram of the graph
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        // Step names contain brackets and colons, so nodes get synthetic ids
        for (id, name) in self
            .node_names(&(0..self.nodes.len()).collect::<Vec<_>>())
            .into_iter()
            .enumerate()
        {
            out.push_str(&format!("    n{}[\"{}\"]\n", id, name));
        }

        for edge in self.graph.edge_references() {
            out.push_str(&format!(
                "    n{} --> n{}\n",
                self.graph[edge.source()],
                self.graph[edge.target()]
            ));
        }

        out
    }

    /// Generate text representation of execution order
    pub fn to_text(&self) -> StepflowResult<String> {
        let order = self.topological_sort()?;
        let mut out = String::new();

        for (i, &id) in order.iter().enumerate() {
            let name = self.node_names(&[id]).remove(0);
            let deps = self.node_names(&self.parents(id));

            out.push_str(&format!("{}. {}", i + 1, name));
            if !deps.is_empty() {
                out.push_str(&format!(" [depends: {}]", deps.join(", ")));
            }
            out.push('\n');
        }

        Ok(out)
    }
}

/// Write `<consumer> <producer>` for every pair of steps linked by a requirement
pub fn print_digraph<W: Write>(w: &mut W, steps: &[Arc<dyn Step>]) -> std::io::Result<()> {
    for (i, step) in steps.iter().enumerate() {
        for (j, other) in steps.iter().enumerate() {
            if i == j {
                continue;
            }
            if has_any_link(&step.requires(), &other.creates()) {
                writeln!(w, "{} {}", step.name(), other.name())?;
            }
        }
    }
    Ok(())
}
