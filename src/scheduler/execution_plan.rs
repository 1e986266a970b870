use crate::{model::graph::ModelGraph, utils::error::EngineError};

pub type NodeId = usize;

/// Static dependency structure of a graph, computed once per model and reused
/// by every `predict` call.
pub struct ExecutionPlan {
    pub root_nodes: Vec<NodeId>,
    pub output_nodes: Vec<NodeId>,
    /// Inbound producers per node, one entry per edge, in declaration order.
    pub predecessors: Vec<Vec<NodeId>>,
    /// Outbound consumers per node, one entry per edge.
    pub dependents: Vec<Vec<NodeId>>,
    pub initial_dep_count: Vec<usize>,
    /// Any producer of this node fans out to more than one consumer.
    pub shared_inputs: Vec<bool>,
}

impl ExecutionPlan {
    pub fn total_nodes(&self) -> usize {
        self.initial_dep_count.len()
    }
}

pub fn create_execution_plan(graph: &ModelGraph) -> Result<ExecutionPlan, EngineError> {
    if graph.is_empty() {
        return Err(EngineError::Graph(
            "Scheduler cannot execute an empty graph".into(),
        ));
    }

    let resolve = |names: &[String]| -> Result<Vec<NodeId>, EngineError> {
        names
            .iter()
            .map(|name| {
                graph
                    .index_of(name)
                    .ok_or_else(|| EngineError::Graph(format!("unknown node '{}'", name)))
            })
            .collect()
    };

    let mut predecessors = Vec::with_capacity(graph.len());
    let mut dependents = Vec::with_capacity(graph.len());
    let mut root_nodes = Vec::new();
    let mut output_nodes = Vec::new();

    for (id, node) in graph.nodes().iter().enumerate() {
        predecessors.push(resolve(&node.inbound)?);
        dependents.push(resolve(&node.outbound)?);
        if node.is_input() {
            root_nodes.push(id);
        }
        if node.outbound.is_empty() {
            output_nodes.push(id);
        }
    }

    let initial_dep_count = predecessors.iter().map(Vec::len).collect();
    let shared_inputs = predecessors
        .iter()
        .map(|preds| preds.iter().any(|&p| dependents[p].len() > 1))
        .collect();

    Ok(ExecutionPlan {
        root_nodes,
        output_nodes,
        predecessors,
        dependents,
        initial_dep_count,
        shared_inputs,
    })
}
