use crate::{tensor::Tensor, utils::error::EngineError};

use super::{
    execution::ComputeContext,
    layer::{Layer, expect_count},
};

/// Inference batch normalisation over the last axis using the moving
/// statistics: `(x - mean) / sqrt(var + epsilon) * gamma + beta`.
pub struct BatchNormLayer {
    name: String,
    pub epsilon: f32,
    pub center: bool,
    pub scale: bool,
    // Folded per-channel multiplier and offset, set with the weights
    multiplier: Vec<f32>,
    offset: Vec<f32>,
    accelerated: bool,
}

impl BatchNormLayer {
    pub fn new(name: impl Into<String>, epsilon: f32, center: bool, scale: bool) -> Self {
        Self {
            name: name.into(),
            epsilon,
            center,
            scale,
            multiplier: Vec::new(),
            offset: Vec::new(),
            accelerated: false,
        }
    }
}

impl Layer for BatchNormLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &'static str {
        "BatchNormalization"
    }

    fn weight_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(4);
        if self.scale {
            names.push("gamma".to_string());
        }
        if self.center {
            names.push("beta".to_string());
        }
        names.push("moving_mean".to_string());
        names.push("moving_variance".to_string());
        names
    }

    fn set_weights(&mut self, weights: Vec<Tensor>) -> Result<(), EngineError> {
        let expected = 2 + self.scale as usize + self.center as usize;
        let weights: Vec<Vec<f32>> = expect_count(&self.name, weights, expected)?
            .map(|w| w.host_slice().map(<[f32]>::to_vec))
            .collect::<Result<_, _>>()?;

        let channels = weights[expected - 1].len();
        if weights.iter().any(|w| w.len() != channels) {
            return Err(EngineError::layer(
                &self.name,
                "gamma, beta, moving_mean and moving_variance must share one length",
            ));
        }

        let mut weights = weights.into_iter();
        let gamma = if self.scale { weights.next() } else { None };
        let beta = if self.center { weights.next() } else { None };
        let (Some(mean), Some(variance)) = (weights.next(), weights.next()) else {
            return Err(EngineError::layer(&self.name, "missing moving statistics"));
        };

        self.multiplier = (0..channels)
            .map(|c| {
                let g = gamma.as_ref().map_or(1.0, |g| g[c]);
                g / (variance[c] + self.epsilon).sqrt()
            })
            .collect();
        self.offset = (0..channels)
            .map(|c| {
                let b = beta.as_ref().map_or(0.0, |b| b[c]);
                b - mean[c] * self.multiplier[c]
            })
            .collect();
        Ok(())
    }

    fn parameter_count(&self) -> usize {
        self.multiplier.len() * (2 + self.scale as usize + self.center as usize)
    }

    fn config_string(&self) -> Option<String> {
        Some(format!(
            "epsilon={}, center={}, scale={}",
            self.epsilon, self.center, self.scale
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
        let input = input.to_host()?;
        let channels = self.multiplier.len();
        if channels == 0 || input.desc.last_dim() != channels {
            return Err(EngineError::layer(
                &self.name,
                format!("expected {} channels on the last axis, got {}", channels, input.desc),
            ));
        }

        let shape = input.shape().to_vec();
        let mut data = input.into_vec()?;
        for row in data.chunks_mut(channels) {
            for ((v, m), o) in row.iter_mut().zip(&self.multiplier).zip(&self.offset) {
                *v = *v * m + o;
            }
        }
        ctx.emit(self.accelerated, shape, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn normalises_with_moving_stats() {
        let mut layer = BatchNormLayer::new("bn", 0.0, true, true);
        assert_eq!(
            layer.weight_names(),
            vec!["gamma", "beta", "moving_mean", "moving_variance"]
        );
        layer
            .set_weights(vec![
                Tensor::new(vec![2], vec![2.0, 1.0]).unwrap(),
                Tensor::new(vec![2], vec![1.0, 0.0]).unwrap(),
                Tensor::new(vec![2], vec![1.0, -1.0]).unwrap(),
                Tensor::new(vec![2], vec![4.0, 1.0]).unwrap(),
            ])
            .unwrap();

        let input = Tensor::new(vec![2], vec![3.0, 1.0]).unwrap();
        let out = layer.call(input, &ComputeContext::host()).unwrap();
        let out = out.host_slice().unwrap();
        // (3 - 1) / 2 * 2 + 1, (1 + 1) / 1 * 1 + 0
        assert_relative_eq!(out[0], 3.0);
        assert_relative_eq!(out[1], 2.0);
    }

    #[test]
    fn without_scale_or_center() {
        let mut layer = BatchNormLayer::new("bn", 0.0, false, false);
        assert_eq!(layer.weight_names(), vec!["moving_mean", "moving_variance"]);
        layer
            .set_weights(vec![
                Tensor::new(vec![1], vec![2.0]).unwrap(),
                Tensor::new(vec![1], vec![4.0]).unwrap(),
            ])
            .unwrap();
        let out = layer
            .call(Tensor::new(vec![1], vec![6.0]).unwrap(), &ComputeContext::host())
            .unwrap();
        assert_relative_eq!(out.host_slice().unwrap()[0], 2.0);
    }
}
