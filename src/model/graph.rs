use rustc_hash::FxHashMap;
use tracing::debug;

use crate::{
    layer::{Layer, Layers, factory::INPUT_LAYER_CLASS},
    utils::error::EngineError,
};

use super::{
    description::{DescriptionForm, ModelDescription},
    weights::WeightBinder,
};

/// Name of the implicit input node of a Sequential description.
pub const SEQUENTIAL_INPUT_NAME: &str = "input";

pub enum NodeKind {
    // Seeded by predict, never computed
    Input { shape: Vec<usize> },
    Compute(Box<dyn Layer>),
}

pub struct LayerNode {
    pub name: String,
    pub class_name: String,
    pub kind: NodeKind,
    pub inbound: Vec<String>,
    pub outbound: Vec<String>,
}

impl LayerNode {
    pub fn input(name: impl Into<String>, shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            class_name: INPUT_LAYER_CLASS.to_string(),
            kind: NodeKind::Input { shape },
            inbound: Vec::new(),
            outbound: Vec::new(),
        }
    }

    pub fn compute(layer: Box<dyn Layer>, inbound: Vec<String>) -> Self {
        Self {
            name: layer.name().to_string(),
            class_name: layer.class_name().to_string(),
            kind: NodeKind::Compute(layer),
            inbound,
            outbound: Vec::new(),
        }
    }

    pub fn is_input(&self) -> bool {
        matches!(self.kind, NodeKind::Input { .. })
    }

    pub fn layer(&self) -> Option<&dyn Layer> {
        match &self.kind {
            NodeKind::Compute(layer) => Some(layer.as_ref()),
            NodeKind::Input { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputTensor {
    pub name: String,
    pub shape: Vec<usize>,
}

impl InputTensor {
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Nodes in declaration order, with outbound lists derived from inbound ones.
pub struct ModelGraph {
    form: DescriptionForm,
    nodes: Vec<LayerNode>,
    index: FxHashMap<String, usize>,
    inputs: Vec<InputTensor>,
}

impl ModelGraph {
    /// Link `nodes` by their inbound lists. Fails on duplicate names, on
    /// references to undeclared nodes, and on layers given the wrong number
    /// of inputs.
    pub fn new(form: DescriptionForm, mut nodes: Vec<LayerNode>) -> Result<Self, EngineError> {
        let mut index = FxHashMap::default();
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.name.clone(), i).is_some() {
                return Err(EngineError::Graph(format!(
                    "duplicate node name '{}'",
                    node.name
                )));
            }
        }

        let mut edges = Vec::new();
        for (i, node) in nodes.iter().enumerate() {
            if let Some(layer) = node.layer() {
                let (min, max) = layer.input_requirements();
                let count = node.inbound.len();
                if count < min || max.is_some_and(|m| count > m) {
                    return Err(EngineError::Graph(format!(
                        "'{}' ({}) has {} inbound nodes, expected {}..{}",
                        node.name,
                        node.class_name,
                        count,
                        min,
                        max.map_or("".to_string(), |m| m.to_string())
                    )));
                }
            }
            for source in &node.inbound {
                let &src = index.get(source).ok_or_else(|| {
                    EngineError::Graph(format!(
                        "'{}' references undeclared node '{}'",
                        node.name, source
                    ))
                })?;
                edges.push((src, i));
            }
        }

        for (src, dst) in edges {
            let name = nodes[dst].name.clone();
            nodes[src].outbound.push(name);
        }

        let inputs = nodes
            .iter()
            .filter_map(|node| match &node.kind {
                NodeKind::Input { shape } => Some(InputTensor {
                    name: node.name.clone(),
                    shape: shape.clone(),
                }),
                NodeKind::Compute(_) => None,
            })
            .collect::<Vec<_>>();

        if inputs.is_empty() {
            return Err(EngineError::Graph("model declares no inputs".into()));
        }

        Ok(Self {
            form,
            nodes,
            index,
            inputs,
        })
    }

    pub fn form(&self) -> DescriptionForm {
        self.form
    }

    pub fn nodes(&self) -> &[LayerNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn node(&self, name: &str) -> Option<&LayerNode> {
        self.index_of(name).map(|i| &self.nodes[i])
    }

    pub fn inputs(&self) -> &[InputTensor] {
        &self.inputs
    }

    /// Nodes with no outbound edges, in declaration order.
    pub fn output_nodes(&self) -> impl Iterator<Item = &LayerNode> {
        self.nodes.iter().filter(|node| node.outbound.is_empty())
    }

    pub fn layers_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Layer>> {
        self.nodes.iter_mut().filter_map(|node| match &mut node.kind {
            NodeKind::Compute(layer) => Some(layer),
            NodeKind::Input { .. } => None,
        })
    }

    pub fn parameter_count(&self) -> usize {
        self.nodes
            .iter()
            .filter_map(LayerNode::layer)
            .map(|layer| layer.parameter_count())
            .sum()
    }
}

/// Turns a parsed description into a linked graph with bound weights.
pub struct GraphBuilder<'a> {
    binder: &'a WeightBinder,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(binder: &'a WeightBinder) -> Self {
        Self { binder }
    }

    pub fn build(&self, description: &ModelDescription) -> Result<ModelGraph, EngineError> {
        let nodes = match description.form {
            DescriptionForm::Sequential => self.sequential_nodes(description)?,
            DescriptionForm::Graph => self.graph_nodes(description)?,
        };
        let graph = ModelGraph::new(description.form, nodes)?;
        debug!(
            nodes = graph.len(),
            inputs = graph.inputs().len(),
            parameters = graph.parameter_count(),
            "built model graph"
        );
        Ok(graph)
    }

    fn sequential_nodes(
        &self,
        description: &ModelDescription,
    ) -> Result<Vec<LayerNode>, EngineError> {
        let mut specs = description.layers.iter().enumerate().peekable();
        let mut nodes = Vec::with_capacity(description.layers.len() + 1);

        let first = specs
            .peek()
            .map(|(_, spec)| *spec)
            .ok_or_else(|| EngineError::Graph("Sequential model has no layers".into()))?;
        let first_params = first.params();
        let shape = first_params.input_shape()?.ok_or_else(|| {
            EngineError::Graph(format!(
                "first layer '{}' declares no input shape",
                first.resolved_name(0)
            ))
        })?;

        let mut previous = if first.class_name == INPUT_LAYER_CLASS {
            specs.next();
            first.resolved_name(0)
        } else {
            SEQUENTIAL_INPUT_NAME.to_string()
        };
        nodes.push(LayerNode::input(previous.clone(), shape));

        for (i, spec) in specs {
            if spec.class_name == INPUT_LAYER_CLASS {
                return Err(EngineError::Graph(format!(
                    "InputLayer '{}' may only appear first in a Sequential model",
                    spec.resolved_name(i)
                )));
            }
            let name = spec.resolved_name(i);
            let layer = self.build_layer(&name, &spec.class_name, spec)?;
            nodes.push(LayerNode::compute(layer, vec![previous]));
            previous = name;
        }
        Ok(nodes)
    }

    fn graph_nodes(&self, description: &ModelDescription) -> Result<Vec<LayerNode>, EngineError> {
        let mut nodes = Vec::with_capacity(description.layers.len());
        for (i, spec) in description.layers.iter().enumerate() {
            let name = spec.resolved_name(i);
            if spec.class_name == INPUT_LAYER_CLASS {
                let shape = spec.params().input_shape()?.ok_or_else(|| {
                    EngineError::Graph(format!("InputLayer '{}' declares no shape", name))
                })?;
                nodes.push(LayerNode::input(name, shape));
            } else {
                let layer = self.build_layer(&name, &spec.class_name, spec)?;
                nodes.push(LayerNode::compute(layer, spec.inbound_names()?));
            }
        }
        Ok(nodes)
    }

    fn build_layer(
        &self,
        name: &str,
        class_name: &str,
        spec: &super::description::LayerSpec,
    ) -> Result<Box<dyn Layer>, EngineError> {
        let mut layer = Layers::from_spec(name, class_name, &spec.params())?;
        let slots = layer.weight_names();
        if !slots.is_empty() {
            let weights = self.binder.bind(name, &slots)?;
            layer.set_weights(weights)?;
        }
        Ok(layer)
    }
}
