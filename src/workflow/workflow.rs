//! Validated workflow graph.
//!
//! Wraps the wire model in a petgraph `DiGraph` whose node indices follow
//! document order, which the ordering below relies on for determinism.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::{
    Direction,
    graph::{DiGraph, NodeIndex},
};

use crate::{
    AutoflowError, Result, WorkflowModel,
    model::ExecutionConfig,
    workflow::node::{Node, NodeId},
};

#[derive(Debug, Clone)]
pub struct Workflow {
    id: String,
    version: u32,
    env: HashMap<String, serde_json::Value>,
    execution: ExecutionConfig,
    graph: DiGraph<Node, ()>,
    index: HashMap<NodeId, NodeIndex>,
}

impl Workflow {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn env(&self) -> &HashMap<String, serde_json::Value> {
        &self.env
    }

    pub fn execution(&self) -> &ExecutionConfig {
        &self.execution
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// get node by id
    pub fn get_node(
        &self,
        id: &str,
    ) -> Option<&Node> {
        self.index.get(id).map(|idx| &self.graph[*idx])
    }

    /// Nodes in document order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_indices().map(|idx| &self.graph[idx])
    }

    /// Direct predecessors of `id`, in document order.
    pub fn predecessors(
        &self,
        id: &str,
    ) -> Vec<&Node> {
        let Some(idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut preds: Vec<NodeIndex> = self.graph.neighbors_directed(*idx, Direction::Incoming).collect();
        preds.sort();
        preds.into_iter().map(|p| &self.graph[p]).collect()
    }

    /// Kahn's algorithm seeded with zero in-degree nodes in document order;
    /// nodes stuck on a cycle are appended afterwards in document order.
    ///
    /// Every node appears exactly once, whatever the shape of the graph.
    pub fn order_nodes(&self) -> Vec<&Node> {
        let mut in_degree: Vec<usize> = self.graph.node_indices().map(|idx| self.graph.neighbors_directed(idx, Direction::Incoming).count()).collect();

        let mut ready: VecDeque<NodeIndex> = self.graph.node_indices().filter(|idx| in_degree[idx.index()] == 0).collect();
        let mut visited = HashSet::with_capacity(self.graph.node_count());
        let mut order = Vec::with_capacity(self.graph.node_count());

        while let Some(idx) = ready.pop_front() {
            visited.insert(idx);
            order.push(idx);

            let mut successors: Vec<NodeIndex> = self.graph.neighbors_directed(idx, Direction::Outgoing).collect();
            successors.sort();
            for succ in successors {
                in_degree[succ.index()] -= 1;
                if in_degree[succ.index()] == 0 {
                    ready.push_back(succ);
                }
            }
        }

        order.extend(self.graph.node_indices().filter(|idx| !visited.contains(idx)));
        order.into_iter().map(|idx| &self.graph[idx]).collect()
    }

    pub fn is_acyclic(&self) -> bool {
        !petgraph::algo::is_cyclic_directed(&self.graph)
    }
}

impl TryFrom<&WorkflowModel> for Workflow {
    type Error = AutoflowError;

    fn try_from(model: &WorkflowModel) -> Result<Self> {
        if model.id.is_empty() {
            return Err(AutoflowError::Workflow("missing id in workflow".into()));
        }
        let mut graph: DiGraph<Node, ()> = DiGraph::with_capacity(model.nodes.len(), model.edges.len());
        let mut index = HashMap::new();

        for node in model.nodes.iter() {
            let node = Node::new(node)?;
            if index.contains_key(&node.id) {
                return Err(AutoflowError::Workflow(format!("duplicate node id '{}'", node.id)));
            }
            let nid = node.id.clone();
            index.insert(nid, graph.add_node(node));
        }

        let mut seen = HashSet::new();
        for edge in model.edges.iter() {
            let source = index.get(&edge.source).ok_or(AutoflowError::Edge(format!("source node {} not found", edge.source)))?;
            let target = index.get(&edge.target).ok_or(AutoflowError::Edge(format!("target node {} not found", edge.target)))?;
            // multi-edges collapse into one dependency
            if seen.insert((*source, *target)) {
                graph.add_edge(*source, *target, ());
            }
        }

        Ok(Self {
            id: model.id.clone(),
            version: model.version,
            env: model.env.clone(),
            execution: model.execution,
            graph,
            index,
        })
    }
}
