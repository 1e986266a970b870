use crate::{
    tensor::Tensor,
    utils::{error::EngineError, math::add_assign},
};

use super::{concat::concat_along, execution::ComputeContext, layer::Layer, recurrent::reverse_time};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeMode {
    Concat,
    Sum,
    Mul,
    Ave,
}

impl MergeMode {
    pub fn from_identifier(identifier: &str) -> Result<Self, EngineError> {
        match identifier {
            "concat" => Ok(MergeMode::Concat),
            "sum" => Ok(MergeMode::Sum),
            "mul" => Ok(MergeMode::Mul),
            "ave" => Ok(MergeMode::Ave),
            other => Err(EngineError::Configuration(format!(
                "unsupported Bidirectional merge_mode '{}'",
                other
            ))),
        }
    }

    fn identifier(&self) -> &'static str {
        match self {
            MergeMode::Concat => "concat",
            MergeMode::Sum => "sum",
            MergeMode::Mul => "mul",
            MergeMode::Ave => "ave",
        }
    }
}

/// Runs a recurrent layer forwards and a copy of it backwards over the same
/// sequence, then merges both outputs.
pub struct BidirectionalLayer {
    name: String,
    forward: Box<dyn Layer>,
    backward: Box<dyn Layer>,
    pub merge_mode: MergeMode,
    pub return_sequences: bool,
    // Prefix of the inner layer's weights, e.g. "lstm_1"
    inner_name: String,
}

impl BidirectionalLayer {
    pub fn new(
        name: impl Into<String>,
        inner_name: impl Into<String>,
        forward: Box<dyn Layer>,
        backward: Box<dyn Layer>,
        merge_mode: MergeMode,
        return_sequences: bool,
    ) -> Self {
        Self {
            name: name.into(),
            forward,
            backward,
            merge_mode,
            return_sequences,
            inner_name: inner_name.into(),
        }
    }
}

impl Layer for BidirectionalLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &'static str {
        "Bidirectional"
    }

    fn weight_names(&self) -> Vec<String> {
        let forward = self
            .forward
            .weight_names()
            .into_iter()
            .map(|slot| format!("forward_{}/{}", self.inner_name, slot));
        let backward = self
            .backward
            .weight_names()
            .into_iter()
            .map(|slot| format!("backward_{}/{}", self.inner_name, slot));
        forward.chain(backward).collect()
    }

    fn set_weights(&mut self, mut weights: Vec<Tensor>) -> Result<(), EngineError> {
        let forward_count = self.forward.weight_names().len();
        let backward_count = self.backward.weight_names().len();
        if weights.len() != forward_count + backward_count {
            return Err(EngineError::layer(
                &self.name,
                format!(
                    "expected {} weights, got {}",
                    forward_count + backward_count,
                    weights.len()
                ),
            ));
        }
        let backward = weights.split_off(forward_count);
        self.forward.set_weights(weights)?;
        self.backward.set_weights(backward)
    }

    fn parameter_count(&self) -> usize {
        self.forward.parameter_count() + self.backward.parameter_count()
    }

    fn config_string(&self) -> Option<String> {
        Some(format!(
            "layer={}, merge_mode={}",
            self.forward.class_name(),
            self.merge_mode.identifier()
        ))
    }

    fn call(&self, input: Tensor, ctx: &ComputeContext) -> Result<Tensor, EngineError> {
        let input = input.to_host()?;
        let forward = self.forward.call(input.clone(), ctx)?.to_host()?;
        let backward = self.backward.call(input, ctx)?.to_host()?;

        let shape = forward.shape().to_vec();
        if backward.shape() != shape.as_slice() {
            return Err(EngineError::layer(
                &self.name,
                format!(
                    "forward and backward outputs differ: {} vs {}",
                    forward.desc, backward.desc
                ),
            ));
        }

        let width = forward.desc.last_dim();
        let mut backward = backward.into_vec()?;
        if self.return_sequences {
            reverse_time(&mut backward, width);
        }
        let mut forward = forward.into_vec()?;

        match self.merge_mode {
            MergeMode::Concat => {
                let axis = shape.len().saturating_sub(1);
                let (shape, data) = concat_along(
                    &[(shape.as_slice(), forward.as_slice()), (shape.as_slice(), backward.as_slice())],
                    axis,
                )
                .map_err(|e| EngineError::layer(&self.name, e))?;
                ctx.emit(false, shape, data)
            }
            MergeMode::Sum => {
                add_assign(&mut forward, &backward);
                ctx.emit(false, shape, forward)
            }
            MergeMode::Mul => {
                for (f, b) in forward.iter_mut().zip(&backward) {
                    *f *= b;
                }
                ctx.emit(false, shape, forward)
            }
            MergeMode::Ave => {
                for (f, b) in forward.iter_mut().zip(&backward) {
                    *f = (*f + b) * 0.5;
                }
                ctx.emit(false, shape, forward)
            }
        }
    }
}

/// Applies the inner layer independently to every slice along the leading
/// (time) axis and stacks the results.
pub struct TimeDistributedLayer {
    name: String,
    inner: Box<dyn Layer>,
}

impl TimeDistributedLayer {
    pub fn new(name: impl Into<String>, inner: Box<dyn Layer>) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }
}

impl Layer for TimeDistributedLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &'static str {
        "TimeDistributed"
    }

    fn weight_names(&self) -> Vec<String> {
        self.inner.weight_names()
    }

    fn set_weights(&mut self, weights: Vec<Tensor>) -> Result<(), EngineError> {
        self.inner.set_weights(weights)
    }

    fn parameter_count(&self) -> usize {
        self.inner.parameter_count()
    }

    fn config_string(&self) -> Option<String> {
        Some(format!("layer={}", self.inner.class_name()))
    }

    fn call(&self, input: Tensor, ctx: &ComputeContext) -> Result<Tensor, EngineError> {
        let input = input.to_host()?;
        let shape = input.shape();
        if shape.len() < 2 {
            return Err(EngineError::layer(
                &self.name,
                format!("expected input with a time axis, got {}", input.desc),
            ));
        }

        let timesteps = shape[0];
        let slice_shape = shape[1..].to_vec();
        let slice_len: usize = slice_shape.iter().product();
        let x = input.host_slice()?;

        let mut out = Vec::new();
        let mut step_shape: Option<Vec<usize>> = None;
        for t in 0..timesteps {
            let slice = Tensor::new(
                slice_shape.clone(),
                x[t * slice_len..(t + 1) * slice_len].to_vec(),
            )?;
            let result = self.inner.call(slice, ctx)?.to_host()?;
            match &step_shape {
                Some(expected) if expected.as_slice() != result.shape() => {
                    return Err(EngineError::layer(
                        &self.name,
                        "inner layer produced inconsistent shapes across timesteps",
                    ));
                }
                Some(_) => {}
                None => step_shape = Some(result.shape().to_vec()),
            }
            out.extend_from_slice(result.host_slice()?);
        }

        let mut out_shape = vec![timesteps];
        out_shape.extend(step_shape.unwrap_or_default());
        ctx.emit(false, out_shape, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{
        activations::ActivationKind,
        dense::DenseLayer,
        recurrent::{RecurrentCell, RecurrentConfig, RecurrentLayer},
    };

    fn rnn(go_backwards: bool) -> Box<dyn Layer> {
        Box::new(RecurrentLayer::new(
            if go_backwards { "backward_rnn" } else { "forward_rnn" },
            RecurrentCell::SimpleRNN,
            RecurrentConfig {
                units: 1,
                activation: ActivationKind::Linear,
                recurrent_activation: ActivationKind::Sigmoid,
                use_bias: true,
                return_sequences: true,
                go_backwards,
            },
        ))
    }

    fn rnn_weights() -> Vec<Tensor> {
        vec![
            Tensor::new(vec![1, 1], vec![1.0]).unwrap(),
            Tensor::new(vec![1, 1], vec![1.0]).unwrap(),
            Tensor::new(vec![1], vec![0.0]).unwrap(),
        ]
    }

    #[test]
    fn bidirectional_names_and_merges() {
        let mut layer =
            BidirectionalLayer::new("bidi", "rnn", rnn(false), rnn(true), MergeMode::Concat, true);
        assert_eq!(
            layer.weight_names(),
            vec![
                "forward_rnn/kernel",
                "forward_rnn/recurrent_kernel",
                "forward_rnn/bias",
                "backward_rnn/kernel",
                "backward_rnn/recurrent_kernel",
                "backward_rnn/bias",
            ]
        );
        let mut weights = rnn_weights();
        weights.extend(rnn_weights());
        layer.set_weights(weights).unwrap();

        // forward running sums 1, 3, 6; backward 3, 5, 6 reversed back to time order
        let input = Tensor::new(vec![3, 1], vec![1.0, 2.0, 3.0]).unwrap();
        let out = layer.call(input, &ComputeContext::host()).unwrap();
        assert_eq!(out.shape(), &[3, 2]);
        assert_eq!(
            out.host_slice().unwrap(),
            &[1.0, 6.0, 3.0, 5.0, 6.0, 3.0]
        );
    }

    #[test]
    fn time_distributed_applies_per_step() {
        let mut inner = DenseLayer::new("dense", 1, ActivationKind::Linear, false);
        inner
            .set_weights(vec![Tensor::new(vec![2, 1], vec![1.0, 10.0]).unwrap()])
            .unwrap();
        let layer = TimeDistributedLayer::new("td", Box::new(inner));
        assert_eq!(layer.weight_names(), vec!["kernel"]);

        let input = Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let out = layer.call(input, &ComputeContext::host()).unwrap();
        assert_eq!(out.shape(), &[2, 1]);
        assert_eq!(out.host_slice().unwrap(), &[21.0, 43.0]);
    }
}
