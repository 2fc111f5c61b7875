//! Stage dependency graph.

use std::collections::{HashMap, VecDeque};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use super::RollupStage;
use crate::error::{Error, Result};

/// A validated DAG of rollup stages with a fixed execution order.
#[derive(Debug, Clone)]
pub struct StageGraph {
    graph: DiGraph<RollupStage, ()>,
    order: Vec<RollupStage>,
}

impl StageGraph {
    /// Builds the graph for `stages`; edges point from dependency to dependent.
    ///
    /// Fails if a stage depends on one not in `stages`, or on a cycle.
    pub fn new(stages: &[RollupStage]) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut nodes: HashMap<RollupStage, NodeIndex> = HashMap::with_capacity(stages.len());
        let mut insertion_order = Vec::with_capacity(stages.len());

        for stage in stages {
            if nodes.contains_key(stage) {
                continue;
            }
            let idx = graph.add_node(*stage);
            nodes.insert(*stage, idx);
            insertion_order.push(idx);
        }

        for stage in stages {
            let to = nodes[stage];
            for dep in stage.dependencies() {
                let from = nodes.get(dep).copied().ok_or_else(|| {
                    Error::internal(format!("stage {} depends on unregistered stage {}", stage, dep))
                })?;
                if graph.find_edge(from, to).is_none() {
                    graph.add_edge(from, to, ());
                }
            }
        }

        let order = Self::topological_order(&graph, &insertion_order)?;
        Ok(Self { graph, order })
    }

    /// The full chain of derived tables.
    pub fn standard() -> Result<Self> {
        Self::new(&RollupStage::ALL)
    }

    /// Kahn's algorithm, ties broken by insertion order.
    fn topological_order(
        graph: &DiGraph<RollupStage, ()>,
        insertion_order: &[NodeIndex],
    ) -> Result<Vec<RollupStage>> {
        let mut in_degree: HashMap<NodeIndex, usize> = graph
            .node_indices()
            .map(|idx| (idx, graph.neighbors_directed(idx, Direction::Incoming).count()))
            .collect();

        let mut queue: VecDeque<NodeIndex> = insertion_order
            .iter()
            .filter(|idx| in_degree.get(*idx).copied().unwrap_or(0) == 0)
            .copied()
            .collect();

        let mut order = Vec::with_capacity(graph.node_count());
        while let Some(idx) = queue.pop_front() {
            order.push(graph[idx]);

            let mut next: Vec<NodeIndex> = graph.neighbors_directed(idx, Direction::Outgoing).collect();
            next.sort_by_key(|n| insertion_order.iter().position(|i| i == n).unwrap_or(usize::MAX));
            for n in next {
                if let Some(deg) = in_degree.get_mut(&n) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        queue.push_back(n);
                    }
                }
            }
        }

        if order.len() != graph.node_count() {
            let stuck: Vec<String> = insertion_order
                .iter()
                .filter(|idx| in_degree.get(*idx).copied().unwrap_or(0) > 0)
                .map(|idx| graph[*idx].to_string())
                .collect();
            return Err(Error::internal(format!(
                "rollup stages form a cycle: {}",
                stuck.join(", ")
            )));
        }
        Ok(order)
    }

    /// Stages in execution order.
    pub fn order(&self) -> &[RollupStage] {
        &self.order
    }

    /// Direct dependencies of a stage within this graph.
    pub fn upstream(&self, stage: RollupStage) -> Vec<RollupStage> {
        self.graph
            .node_indices()
            .find(|idx| self.graph[*idx] == stage)
            .map(|idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .map(|n| self.graph[n])
                    .collect()
            })
            .unwrap_or_default()
    }
}
