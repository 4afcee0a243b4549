//! Runtime graph representation and publish-time validation.
//!
//! A published graph is a flat arena of nodes and edges (petgraph) indexed
//! by node id. Structure is checked once, at publish time; runs only walk it.

use std::collections::{HashMap, HashSet};

use petgraph::{
    Direction,
    algo::toposort,
    graph::{DiGraph, NodeIndex},
    visit::{Dfs, EdgeRef},
};

use crate::{
    FlowError, Result,
    model::GraphModel,
    workflow::{
        edge::{BranchLabel, Edge},
        node::{Node, NodeKind, TriggerConfig},
    },
};

#[derive(Debug, Clone)]
pub struct Graph {
    graph: DiGraph<Node, Edge>,
    index: HashMap<String, NodeIndex>,
}

impl Graph {
    /// Builds the graph from its wire model without structural checks.
    ///
    /// Fails on invalid node configs, duplicate ids and dangling edges.
    pub fn build(model: &GraphModel) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for node_model in &model.nodes {
            let node = Node::new(node_model)?;
            if index.contains_key(&node.id) {
                return Err(FlowError::validation(format!("duplicate node id '{}'", node.id), Some(&node.id)));
            }
            let id = node.id.clone();
            index.insert(id, graph.add_node(node));
        }

        let mut edge_ids = HashSet::new();
        for edge_model in &model.edges {
            let edge = Edge::new(edge_model)?;
            if !edge_ids.insert(edge.id.clone()) {
                return Err(FlowError::validation(format!("duplicate edge id '{}'", edge.id), Some(&edge.source)));
            }
            let from = *index
                .get(&edge.source)
                .ok_or_else(|| FlowError::validation(format!("edge {} starts at unknown node '{}'", edge.id, edge.source), None))?;
            let to = *index
                .get(&edge.target)
                .ok_or_else(|| FlowError::validation(format!("edge {} ends at unknown node '{}'", edge.id, edge.target), Some(&edge.source)))?;
            graph.add_edge(from, to, edge);
        }

        Ok(Self {
            graph,
            index,
        })
    }

    /// Builds and validates, the publish-time entry point.
    pub fn parse(model: &GraphModel) -> Result<Self> {
        let graph = Self::build(model)?;
        graph.validate()?;
        Ok(graph)
    }

    /// Checks the structural invariants of an executable graph.
    pub fn validate(&self) -> Result<()> {
        let g = &self.graph;

        let triggers = g.node_indices().filter(|idx| matches!(g[*idx].kind, NodeKind::Trigger(_))).collect::<Vec<_>>();
        let entry = match triggers.as_slice() {
            [] => return Err(FlowError::validation("graph has no trigger node", None)),
            [entry] => *entry,
            [_, second, ..] => return Err(FlowError::validation("graph has more than one trigger node", Some(&g[*second].id))),
        };
        if g.neighbors_directed(entry, Direction::Incoming).next().is_some() {
            return Err(FlowError::validation("trigger node cannot have incoming edges", Some(&g[entry].id)));
        }

        if let Err(cycle) = toposort(g, None) {
            return Err(FlowError::validation("graph contains a cycle", Some(&g[cycle.node_id()].id)));
        }

        let mut reached = HashSet::new();
        let mut dfs = Dfs::new(g, entry);
        while let Some(idx) = dfs.next(g) {
            reached.insert(idx);
        }
        if let Some(idx) = g.node_indices().find(|idx| !reached.contains(idx)) {
            return Err(FlowError::validation("node is not reachable from the trigger", Some(&g[idx].id)));
        }

        for idx in g.node_indices() {
            let node = &g[idx];
            let labels = g.edges_directed(idx, Direction::Outgoing).map(|e| e.weight().label).collect::<Vec<_>>();
            if let NodeKind::Condition(_) = node.kind {
                let count = |label| labels.iter().filter(|l| **l == Some(label)).count();
                if labels.len() != 2 || count(BranchLabel::True) != 1 || count(BranchLabel::False) != 1 {
                    return Err(FlowError::validation("condition node needs exactly one 'true' and one 'false' edge", Some(&node.id)));
                }
            } else {
                if labels.len() > 1 {
                    return Err(FlowError::validation(format!("{} node can have at most one outgoing edge", node.kind.name()), Some(&node.id)));
                }
                if labels.iter().any(Option::is_some) {
                    return Err(FlowError::validation("only edges leaving a condition node can be labeled", Some(&node.id)));
                }
            }
        }

        Ok(())
    }

    /// The trigger node.
    pub fn entry_node(&self) -> Result<&Node> {
        self.graph
            .node_indices()
            .map(|idx| &self.graph[idx])
            .find(|node| matches!(node.kind, NodeKind::Trigger(_)))
            .ok_or_else(|| FlowError::validation("no entry point", None))
    }

    pub fn trigger(&self) -> Result<&TriggerConfig> {
        match &self.entry_node()?.kind {
            NodeKind::Trigger(config) => Ok(config),
            _ => Err(FlowError::validation("no entry point", None)),
        }
    }

    pub fn node(
        &self,
        id: &str,
    ) -> Option<&Node> {
        self.index.get(id).map(|idx| &self.graph[*idx])
    }

    /// Successors of `id`. For a condition node only the edge labeled `branch` is followed.
    pub fn next_nodes(
        &self,
        id: &str,
        branch: Option<BranchLabel>,
    ) -> Result<Vec<&Node>> {
        let idx = self.index.get(id).ok_or_else(|| FlowError::NotFound(format!("node {}", id)))?;
        let is_condition = matches!(self.graph[*idx].kind, NodeKind::Condition(_));
        let mut next = self
            .graph
            .edges_directed(*idx, Direction::Outgoing)
            .filter(|e| !is_condition || e.weight().label == branch)
            .map(|e| (e.weight().id.as_str(), &self.graph[e.target()]))
            .collect::<Vec<_>>();
        next.sort_by(|a, b| a.0.cmp(b.0));
        Ok(next.into_iter().map(|(_, node)| node).collect())
    }
}
