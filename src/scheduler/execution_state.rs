use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::{
    compute::transfer::{TransferPolicy, prepare_input},
    layer::ComputeContext,
    model::graph::{ModelGraph, NodeKind},
    tensor::Tensor,
    utils::error::EngineError,
};

use super::execution_plan::{ExecutionPlan, NodeId};

#[derive(Clone, Copy, Debug, Default)]
pub struct ScheduleOptions {
    /// Keep accelerated results on the device between accelerated layers.
    pub pipeline_mode: bool,
    /// Yield the thread after every computed node.
    pub yield_between_layers: bool,
}

/// Results of one traversal.
#[derive(Debug)]
pub struct ExecutionOutcome {
    /// Node names in the order they completed, inputs first.
    pub order: Vec<String>,
    /// Every node's result, keyed by node name.
    pub results: FxHashMap<String, Tensor>,
}

/// Per-call node state. Dropped at the end of the call, so every `predict`
/// starts from a clean slate.
struct ExecutionState<'a> {
    graph: &'a ModelGraph,
    plan: &'a ExecutionPlan,
    options: ScheduleOptions,
    pending: Vec<usize>,
    visited: Vec<bool>,
    results: Vec<Option<Tensor>>,
    ready: VecDeque<NodeId>,
    order: Vec<NodeId>,
}

impl<'a> ExecutionState<'a> {
    fn new(graph: &'a ModelGraph, plan: &'a ExecutionPlan, options: ScheduleOptions) -> Self {
        let n = plan.total_nodes();
        Self {
            graph,
            plan,
            options,
            pending: plan.initial_dep_count.clone(),
            visited: vec![false; n],
            results: vec![None; n],
            ready: VecDeque::new(),
            order: Vec::with_capacity(n),
        }
    }

    fn seed(&mut self, mut seeds: FxHashMap<String, Tensor>) -> Result<(), EngineError> {
        let (graph, plan) = (self.graph, self.plan);
        for &root in &plan.root_nodes {
            let name = &graph.nodes()[root].name;
            let tensor = seeds
                .remove(name)
                .ok_or_else(|| EngineError::InvalidInput(format!("no value for input '{}'", name)))?;
            self.complete(root, tensor);
        }
        if let Some(extra) = seeds.keys().next() {
            return Err(EngineError::InvalidInput(format!(
                "'{}' is not an input of this model",
                extra
            )));
        }
        Ok(())
    }

    fn complete(&mut self, id: NodeId, result: Tensor) {
        self.results[id] = Some(result);
        self.visited[id] = true;
        self.order.push(id);
        for &dependent in &self.plan.dependents[id] {
            self.pending[dependent] = self.pending[dependent].saturating_sub(1);
            if self.pending[dependent] == 0 {
                self.ready.push_back(dependent);
            }
        }
    }

    fn run(&mut self, ctx: &ComputeContext) -> Result<(), EngineError> {
        while let Some(id) = self.ready.pop_front() {
            if self.visited[id] {
                continue;
            }
            let result = self.compute(id, ctx)?;
            self.complete(id, result);
            if self.options.yield_between_layers {
                std::thread::yield_now();
            }
        }

        let stalled: Vec<&str> = self
            .visited
            .iter()
            .enumerate()
            .filter(|&(_, &done)| !done)
            .map(|(id, _)| self.graph.nodes()[id].name.as_str())
            .collect();
        if !stalled.is_empty() {
            return Err(EngineError::Graph(format!(
                "traversal stalled, never computed: {}",
                stalled.join(", ")
            )));
        }
        Ok(())
    }

    fn compute(&self, id: NodeId, ctx: &ComputeContext) -> Result<Tensor, EngineError> {
        let node = &self.graph.nodes()[id];
        let layer = match &node.kind {
            NodeKind::Compute(layer) => layer,
            NodeKind::Input { .. } => {
                return Err(EngineError::Graph(format!(
                    "input '{}' was scheduled without a seeded value",
                    node.name
                )));
            }
        };

        let mut inputs = Vec::with_capacity(self.plan.predecessors[id].len());
        for &producer in &self.plan.predecessors[id] {
            let tensor = self.results[producer].clone().ok_or_else(|| {
                EngineError::Graph(format!(
                    "'{}' became ready before '{}' produced a result",
                    node.name,
                    self.graph.nodes()[producer].name
                ))
            })?;
            let producer_pipelined = self.options.pipeline_mode
                && self.graph.nodes()[producer]
                    .layer()
                    .is_some_and(|l| l.is_accelerated());
            let policy = TransferPolicy {
                consumer_accepts_accelerated: layer.supports_accelerated()
                    && layer.is_accelerated(),
                producer_pipelined,
                shared: self.plan.shared_inputs[id],
            };
            inputs.push(prepare_input(&node.name, tensor, policy)?);
        }

        debug!(
            node = %node.name,
            class = %node.class_name,
            inputs = inputs.len(),
            "computing node"
        );
        let output = if inputs.len() == 1 {
            let input = inputs.pop().ok_or_else(|| EngineError::layer(&node.name, "missing input"))?;
            layer.call(input, ctx)?
        } else {
            layer.call_merge(inputs, ctx)?
        };
        trace!(node = %node.name, shape = ?output.shape(), device = ?output.device(), "node complete");
        Ok(output)
    }

    fn finish(self) -> ExecutionOutcome {
        let nodes = self.graph.nodes();
        let order = self.order.iter().map(|&id| nodes[id].name.clone()).collect();
        let results = self
            .results
            .into_iter()
            .enumerate()
            .filter_map(|(id, result)| result.map(|t| (nodes[id].name.clone(), t)))
            .collect();
        ExecutionOutcome { order, results }
    }
}

/// Run one forward pass. Every input node must be seeded; every other node
/// is computed exactly once, after all of its producers.
pub fn execute_plan(
    graph: &ModelGraph,
    plan: &ExecutionPlan,
    seeds: FxHashMap<String, Tensor>,
    ctx: &ComputeContext,
    options: ScheduleOptions,
) -> Result<ExecutionOutcome, EngineError> {
    let mut state = ExecutionState::new(graph, plan, options);
    state.seed(seeds)?;
    state.run(ctx)?;
    Ok(state.finish())
}
