use crate::{tensor::Tensor, utils::error::EngineError};

use super::execution::ComputeContext;

/// A node's computation. Layers hold configuration and weights only; the
/// scheduler owns all per-call state, so `call` takes `&self`.
pub trait Layer: Send + Sync {
    // Unique node name from the model description
    fn name(&self) -> &str;

    // Class identifier as it appears in the description, e.g. "Dense"
    fn class_name(&self) -> &'static str;

    /// Weight slots in binding order, relative to the layer name
    /// (`kernel`, `forward_lstm_1/bias`, ...).
    fn weight_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Receive bound weights in `weight_names` order and validate their shapes.
    fn set_weights(&mut self, weights: Vec<Tensor>) -> Result<(), EngineError> {
        if weights.is_empty() {
            Ok(())
        } else {
            Err(EngineError::layer(
                self.name(),
                format!("takes no weights, got {}", weights.len()),
            ))
        }
    }

    // Return the total number of parameters in this layer
    fn parameter_count(&self) -> usize {
        0
    }

    // For graph verification, how many inputs this layer requires (min and max)
    fn input_requirements(&self) -> (usize, Option<usize>) {
        (1, Some(1))
    }

    // Return optional configuration details for the layer
    fn config_string(&self) -> Option<String> {
        None
    }

    fn supports_accelerated(&self) -> bool {
        false
    }

    fn set_acceleration(&mut self, _enabled: bool) {}

    fn is_accelerated(&self) -> bool {
        false
    }

    fn call(&self, input: Tensor, ctx: &ComputeContext) -> Result<Tensor, EngineError>;

    fn call_merge(&self, inputs: Vec<Tensor>, _ctx: &ComputeContext) -> Result<Tensor, EngineError> {
        Err(EngineError::layer(
            self.name(),
            format!(
                "{} takes a single input, got {}",
                self.class_name(),
                inputs.len()
            ),
        ))
    }
}

/// Shape check shared by `set_weights` implementations.
pub(crate) fn expect_shape(
    layer: &str,
    slot: &str,
    tensor: &Tensor,
    expected: &[usize],
) -> Result<(), EngineError> {
    if tensor.shape() != expected {
        return Err(EngineError::layer(
            layer,
            format!(
                "weight '{}' has shape {:?}, expected {:?}",
                slot,
                tensor.shape(),
                expected
            ),
        ));
    }
    Ok(())
}

/// Check the weight count and hand back an iterator over them.
pub(crate) fn expect_count(
    layer: &str,
    weights: Vec<Tensor>,
    expected: usize,
) -> Result<std::vec::IntoIter<Tensor>, EngineError> {
    if weights.len() != expected {
        return Err(EngineError::layer(
            layer,
            format!("expected {} weights, got {}", expected, weights.len()),
        ));
    }
    Ok(weights.into_iter())
}
