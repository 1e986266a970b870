use serde_json::Value;
use tracing::warn;

use crate::{model::params::LayerParams, utils::error::EngineError};

use super::{
    activations::{ActivationKind, ActivationLayer},
    batch_norm::BatchNormLayer,
    concat::ConcatLayer,
    dense::DenseLayer,
    dropout::DropoutLayer,
    element_wise::{ElementWiseLayer, ElementWiseOperation},
    layer::Layer,
    recurrent::{RecurrentCell, RecurrentConfig, RecurrentLayer},
    reshape::{RepeatVectorLayer, ReshapeLayer},
    wrappers::{BidirectionalLayer, MergeMode, TimeDistributedLayer},
};

/// Class identifier of input placeholders. These become input nodes, not layers.
pub const INPUT_LAYER_CLASS: &str = "InputLayer";

pub struct Layers;

impl Layers {
    /// Registry of every supported class identifier. Anything else is an
    /// `UnknownLayerClass` error at build time.
    pub fn from_spec(
        name: &str,
        class_name: &str,
        params: &LayerParams,
    ) -> Result<Box<dyn Layer>, EngineError> {
        let layer: Box<dyn Layer> = match class_name {
            "Dense" => Box::new(DenseLayer::new(
                name,
                params.usize("units")?,
                params.activation_or("activation", ActivationKind::Linear)?,
                params.bool_or("use_bias", true)?,
            )),
            "Activation" => Box::new(ActivationLayer::new(
                name,
                params.activation_or("activation", ActivationKind::Linear)?,
            )),
            "ReLU" => Self::relu(name),
            "Softmax" => {
                if params.i64_or("axis", -1)? != -1 {
                    return Err(EngineError::Configuration(format!(
                        "{}: softmax is only supported over the last axis",
                        name
                    )));
                }
                Self::softmax(name)
            }
            "Dropout" | "SpatialDropout1D" | "GaussianNoise" | "GaussianDropout" => {
                Box::new(DropoutLayer::new(name, params.f32_or("rate", 0.0)?))
            }
            "Flatten" => Self::flatten(name),
            "Reshape" => Self::reshape(name, params.i64_list("target_shape")?),
            "RepeatVector" => Box::new(RepeatVectorLayer::new(name, params.usize("n")?)),
            "BatchNormalization" => {
                let axis = params.i64_or("axis", -1)?;
                if axis != -1 {
                    warn!(
                        layer = name,
                        axis, "BatchNormalization normalises the last axis only, ignoring axis"
                    );
                }
                Box::new(BatchNormLayer::new(
                    name,
                    params.f32_or("epsilon", 1e-3)?,
                    params.bool_or("center", true)?,
                    params.bool_or("scale", true)?,
                ))
            }
            "SimpleRNN" => Self::recurrent(name, RecurrentCell::SimpleRNN, params)?,
            "LSTM" => Self::recurrent(name, RecurrentCell::LSTM, params)?,
            "GRU" => {
                let reset_after = params.bool_or("reset_after", true)?;
                Self::recurrent(name, RecurrentCell::GRU { reset_after }, params)?
            }
            "Add" => Self::element_wise(name, ElementWiseOperation::Add),
            "Subtract" => Self::element_wise(name, ElementWiseOperation::Subtract),
            "Multiply" => Self::element_wise(name, ElementWiseOperation::Multiply),
            "Average" => Self::element_wise(name, ElementWiseOperation::Average),
            "Maximum" => Self::element_wise(name, ElementWiseOperation::Maximum),
            "Minimum" => Self::element_wise(name, ElementWiseOperation::Minimum),
            "Concatenate" => Box::new(ConcatLayer::new(name, params.i64_or("axis", -1)?)),
            "Bidirectional" => Self::bidirectional(name, params)?,
            "TimeDistributed" => {
                let (inner_class, inner_params) = params.nested_layer("layer")?;
                let inner_name = inner_params.name().unwrap_or(name).to_string();
                let inner = Self::from_spec(&inner_name, &inner_class, &inner_params)?;
                Box::new(TimeDistributedLayer::new(name, inner))
            }
            other => return Err(EngineError::UnknownLayerClass(other.to_string())),
        };
        Ok(layer)
    }

    pub fn dense(name: &str, units: usize, activation: ActivationKind) -> Box<dyn Layer> {
        Box::new(DenseLayer::new(name, units, activation, true))
    }

    pub fn relu(name: &str) -> Box<dyn Layer> {
        Box::new(ActivationLayer::new(name, ActivationKind::ReLU))
    }

    pub fn softmax(name: &str) -> Box<dyn Layer> {
        Box::new(ActivationLayer::new(name, ActivationKind::Softmax))
    }

    pub fn flatten(name: &str) -> Box<dyn Layer> {
        Box::new(ReshapeLayer::flatten(name))
    }

    pub fn reshape(name: &str, target_shape: Vec<i64>) -> Box<dyn Layer> {
        Box::new(ReshapeLayer::new(name, target_shape))
    }

    pub fn element_wise(name: &str, operation: ElementWiseOperation) -> Box<dyn Layer> {
        Box::new(ElementWiseLayer::new(name, operation))
    }

    pub fn add(name: &str) -> Box<dyn Layer> {
        Self::element_wise(name, ElementWiseOperation::Add)
    }

    fn recurrent(
        name: &str,
        cell: RecurrentCell,
        params: &LayerParams,
    ) -> Result<Box<dyn Layer>, EngineError> {
        let config = RecurrentConfig {
            units: params.usize("units")?,
            activation: params.activation_or("activation", ActivationKind::Tanh)?,
            recurrent_activation: params
                .activation_or("recurrent_activation", ActivationKind::Sigmoid)?,
            use_bias: params.bool_or("use_bias", true)?,
            return_sequences: params.bool_or("return_sequences", false)?,
            go_backwards: params.bool_or("go_backwards", false)?,
        };
        if params.bool_or("stateful", false)? {
            return Err(EngineError::Configuration(format!(
                "{}: stateful recurrent layers are not supported",
                name
            )));
        }
        Ok(Box::new(RecurrentLayer::new(name, cell, config)))
    }

    fn bidirectional(name: &str, params: &LayerParams) -> Result<Box<dyn Layer>, EngineError> {
        let (inner_class, inner_params) = params.nested_layer("layer")?;
        if !matches!(inner_class.as_str(), "SimpleRNN" | "LSTM" | "GRU") {
            return Err(EngineError::Configuration(format!(
                "{}: Bidirectional wraps a recurrent layer, found {}",
                name, inner_class
            )));
        }
        let inner_name = inner_params.name().unwrap_or(name).to_string();
        let merge_mode = MergeMode::from_identifier(params.str_or("merge_mode", "concat")?)?;

        let go_backwards = inner_params.bool_or("go_backwards", false)?;
        let return_sequences = inner_params.bool_or("return_sequences", false)?;

        let forward = Self::from_spec(
            &format!("forward_{}", inner_name),
            &inner_class,
            &inner_params,
        )?;
        let backward = Self::from_spec(
            &format!("backward_{}", inner_name),
            &inner_class,
            &inner_params.with("go_backwards", Value::Bool(!go_backwards)),
        )?;

        Ok(Box::new(BidirectionalLayer::new(
            name,
            inner_name,
            forward,
            backward,
            merge_mode,
            return_sequences,
        )))
    }
}
