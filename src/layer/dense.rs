use crate::{
    tensor::Tensor,
    utils::{error::EngineError, math::vec_mat_mul_acc},
};

use super::{
    activations::ActivationKind,
    execution::ComputeContext,
    layer::{Layer, expect_count, expect_shape},
};

/// Fully connected layer applied over the last axis. The kernel is stored
/// `[in_features, units]`, row-major.
pub struct DenseLayer {
    name: String,
    pub units: usize,
    pub activation: ActivationKind,
    pub use_bias: bool,
    kernel: Option<Tensor>,
    bias: Option<Tensor>,
    accelerated: bool,
}

impl DenseLayer {
    pub fn new(
        name: impl Into<String>,
        units: usize,
        activation: ActivationKind,
        use_bias: bool,
    ) -> Self {
        Self {
            name: name.into(),
            units,
            activation,
            use_bias,
            kernel: None,
            bias: None,
            accelerated: false,
        }
    }

    pub fn in_features(&self) -> Option<usize> {
        self.kernel.as_ref().map(|k| k.shape()[0])
    }
}

impl Layer for DenseLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &'static str {
        "Dense"
    }

    fn weight_names(&self) -> Vec<String> {
        if self.use_bias {
            vec!["kernel".into(), "bias".into()]
        } else {
            vec!["kernel".into()]
        }
    }

    fn set_weights(&mut self, weights: Vec<Tensor>) -> Result<(), EngineError> {
        let expected = if self.use_bias { 2 } else { 1 };
        let mut weights = expect_count(&self.name, weights, expected)?;

        let kernel = weights.next().ok_or_else(|| EngineError::layer(&self.name, "missing kernel"))?;
        if kernel.shape().len() != 2 || kernel.shape()[1] != self.units {
            return Err(EngineError::layer(
                &self.name,
                format!(
                    "kernel has shape {:?}, expected [in_features, {}]",
                    kernel.shape(),
                    self.units
                ),
            ));
        }
        self.kernel = Some(kernel);

        if let Some(bias) = weights.next() {
            expect_shape(&self.name, "bias", &bias, &[self.units])?;
            self.bias = Some(bias);
        }
        Ok(())
    }

    fn parameter_count(&self) -> usize {
        self.kernel.as_ref().map_or(0, |k| k.len()) + self.bias.as_ref().map_or(0, |b| b.len())
    }

    fn config_string(&self) -> Option<String> {
        Some(format!(
            "units={}, activation={}, bias={}",
            self.units, self.activation, self.use_bias
        ))
    }

    fn supports_accelerated(&self) -> bool {
        true
    }

    fn set_acceleration(&mut self, enabled: bool) {
        self.accelerated = enabled;
    }

    fn is_accelerated(&self) -> bool {
        self.accelerated
    }

    fn call(&self, input: Tensor, ctx: &ComputeContext) -> Result<Tensor, EngineError> {
        let kernel = self
            .kernel
            .as_ref()
            .ok_or_else(|| EngineError::layer(&self.name, "weights have not been set"))?;
        let kernel = kernel.host_slice()?;
        let in_features = kernel.len() / self.units.max(1);

        let input = input.to_host()?;
        if input.desc.last_dim() != in_features || input.shape().is_empty() {
            return Err(EngineError::layer(
                &self.name,
                format!(
                    "expected input with last dimension {}, got {}",
                    in_features, input.desc
                ),
            ));
        }

        let x = input.host_slice()?;
        let rows = x.len() / in_features.max(1);
        let mut out = vec![0.0f32; rows * self.units];

        for (row_in, row_out) in x
            .chunks(in_features.max(1))
            .zip(out.chunks_mut(self.units.max(1)))
        {
            vec_mat_mul_acc(row_in, kernel, self.units, row_out);
        }

        if let Some(bias) = &self.bias {
            let bias = bias.host_slice()?;
            for row_out in out.chunks_mut(self.units.max(1)) {
                for (o, b) in row_out.iter_mut().zip(bias) {
                    *o += b;
                }
            }
        }

        self.activation.apply(&mut out, self.units);

        let mut shape = input.shape().to_vec();
        if let Some(last) = shape.last_mut() {
            *last = self.units;
        }
        ctx.emit(self.accelerated, shape, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense(kernel: Vec<f32>, in_features: usize, bias: Vec<f32>) -> DenseLayer {
        let units = bias.len();
        let mut layer = DenseLayer::new("dense", units, ActivationKind::Linear, true);
        layer
            .set_weights(vec![
                Tensor::new(vec![in_features, units], kernel).unwrap(),
                Tensor::new(vec![units], bias).unwrap(),
            ])
            .unwrap();
        layer
    }

    #[test]
    fn multiplies_and_adds_bias() {
        // [1, 2] · [[1, 0, 1], [0, 1, 1]] + [0.5, 0, 0]
        let layer = dense(vec![1.0, 0.0, 1.0, 0.0, 1.0, 1.0], 2, vec![0.5, 0.0, 0.0]);
        let input = Tensor::new(vec![2], vec![1.0, 2.0]).unwrap();
        let out = layer.call(input, &ComputeContext::host()).unwrap();
        assert_eq!(out.shape(), &[3]);
        assert_eq!(out.host_slice().unwrap(), &[1.5, 2.0, 3.0]);
    }

    #[test]
    fn applies_over_last_axis() {
        let layer = dense(vec![1.0, 1.0], 2, vec![0.0]);
        let input = Tensor::new(vec![3, 2], vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0]).unwrap();
        let out = layer.call(input, &ComputeContext::host()).unwrap();
        assert_eq!(out.shape(), &[3, 1]);
        assert_eq!(out.host_slice().unwrap(), &[2.0, 4.0, 6.0]);
    }

    #[test]
    fn rejects_wrong_bias_shape() {
        let mut layer = DenseLayer::new("dense", 2, ActivationKind::Linear, true);
        let result = layer.set_weights(vec![
            Tensor::new(vec![1, 2], vec![1.0, 1.0]).unwrap(),
            Tensor::new(vec![3], vec![0.0; 3]).unwrap(),
        ]);
        assert!(matches!(result, Err(EngineError::Layer { .. })));
    }

    #[test]
    fn rejects_mismatched_input() {
        let layer = dense(vec![1.0, 1.0], 2, vec![0.0]);
        let input = Tensor::new(vec![3], vec![1.0; 3]).unwrap();
        assert!(layer.call(input, &ComputeContext::host()).is_err());
    }
}
