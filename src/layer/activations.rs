use std::fmt;

use crate::{tensor::Tensor, utils::error::EngineError};

use super::{execution::ComputeContext, layer::Layer};

const SELU_ALPHA: f32 = 1.673_263_2;
const SELU_SCALE: f32 = 1.050_701;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivationKind {
    Linear,
    ReLU,
    Sigmoid,
    HardSigmoid,
    Tanh,
    Softmax,
    Softplus,
    Softsign,
    ELU,
    SELU,
}

impl ActivationKind {
    /// Translate a description identifier. Accepts snake_case, camelCase and
    /// the capitalised class spellings (`hard_sigmoid`, `hardSigmoid`, `ReLU`).
    pub fn from_identifier(identifier: &str) -> Result<Self, EngineError> {
        let key: String = identifier
            .chars()
            .filter(|c| *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        let kind = match key.as_str() {
            "" | "linear" => ActivationKind::Linear,
            "relu" => ActivationKind::ReLU,
            "sigmoid" => ActivationKind::Sigmoid,
            "hardsigmoid" => ActivationKind::HardSigmoid,
            "tanh" => ActivationKind::Tanh,
            "softmax" => ActivationKind::Softmax,
            "softplus" => ActivationKind::Softplus,
            "softsign" => ActivationKind::Softsign,
            "elu" => ActivationKind::ELU,
            "selu" => ActivationKind::SELU,
            _ => {
                return Err(EngineError::Configuration(format!(
                    "unknown activation '{}'",
                    identifier
                )));
            }
        };
        Ok(kind)
    }

    pub fn identifier(&self) -> &'static str {
        match self {
            ActivationKind::Linear => "linear",
            ActivationKind::ReLU => "relu",
            ActivationKind::Sigmoid => "sigmoid",
            ActivationKind::HardSigmoid => "hard_sigmoid",
            ActivationKind::Tanh => "tanh",
            ActivationKind::Softmax => "softmax",
            ActivationKind::Softplus => "softplus",
            ActivationKind::Softsign => "softsign",
            ActivationKind::ELU => "elu",
            ActivationKind::SELU => "selu",
        }
    }

    pub fn apply_scalar(&self, x: f32) -> f32 {
        match self {
            ActivationKind::Linear | ActivationKind::Softmax => x,
            ActivationKind::ReLU => x.max(0.0),
            ActivationKind::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            ActivationKind::HardSigmoid => (0.2 * x + 0.5).clamp(0.0, 1.0),
            ActivationKind::Tanh => x.tanh(),
            ActivationKind::Softplus => x.exp().ln_1p(),
            ActivationKind::Softsign => x / (1.0 + x.abs()),
            ActivationKind::ELU => {
                if x > 0.0 {
                    x
                } else {
                    x.exp_m1()
                }
            }
            ActivationKind::SELU => {
                if x > 0.0 {
                    SELU_SCALE * x
                } else {
                    SELU_SCALE * SELU_ALPHA * x.exp_m1()
                }
            }
        }
    }

    /// Apply in place. Softmax normalises over consecutive rows of `row_len`.
    pub fn apply(&self, data: &mut [f32], row_len: usize) {
        match self {
            ActivationKind::Linear => {}
            ActivationKind::Softmax => {
                if row_len == 0 {
                    return;
                }
                for row in data.chunks_mut(row_len) {
                    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                    let mut sum = 0.0;
                    for v in row.iter_mut() {
                        *v = (*v - max).exp();
                        sum += *v;
                    }
                    for v in row.iter_mut() {
                        *v /= sum;
                    }
                }
            }
            _ => {
                for v in data.iter_mut() {
                    *v = self.apply_scalar(*v);
                }
            }
        }
    }
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

pub struct ActivationLayer {
    name: String,
    pub activation: ActivationKind,
    accelerated: bool,
}

impl ActivationLayer {
    pub fn new(name: impl Into<String>, activation: ActivationKind) -> Self {
        Self {
            name: name.into(),
            activation,
            accelerated: false,
        }
    }
}

impl Layer for ActivationLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &'static str {
        "Activation"
    }

    fn config_string(&self) -> Option<String> {
        Some(format!("activation={}", self.activation))
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
        let shape = input.shape().to_vec();
        let row_len = input.desc.last_dim();
        let mut data = input.into_vec()?;
        self.activation.apply(&mut data, row_len);
        ctx.emit(self.accelerated, shape, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn translates_identifier_spellings() {
        assert_eq!(
            ActivationKind::from_identifier("ReLU").unwrap(),
            ActivationKind::ReLU
        );
        assert_eq!(
            ActivationKind::from_identifier("hardSigmoid").unwrap(),
            ActivationKind::HardSigmoid
        );
        assert_eq!(
            ActivationKind::from_identifier("hard_sigmoid").unwrap(),
            ActivationKind::HardSigmoid
        );
        assert!(matches!(
            ActivationKind::from_identifier("swishy"),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn softmax_normalises_each_row() {
        let mut data = vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0];
        ActivationKind::Softmax.apply(&mut data, 3);
        assert_relative_eq!(data[0..3].iter().sum::<f32>(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(data[3], 1.0 / 3.0, epsilon = 1e-6);
        assert!(data[2] > data[1] && data[1] > data[0]);
    }

    #[test]
    fn scalar_activations() {
        assert_eq!(ActivationKind::ReLU.apply_scalar(-2.0), 0.0);
        assert_relative_eq!(ActivationKind::Sigmoid.apply_scalar(0.0), 0.5);
        assert_relative_eq!(ActivationKind::HardSigmoid.apply_scalar(1.0), 0.7);
        assert_eq!(ActivationKind::HardSigmoid.apply_scalar(10.0), 1.0);
        assert_relative_eq!(ActivationKind::Softsign.apply_scalar(1.0), 0.5);
        assert_relative_eq!(
            ActivationKind::ELU.apply_scalar(-1.0),
            (-1.0f32).exp() - 1.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn layer_keeps_shape() {
        let layer = ActivationLayer::new("act", ActivationKind::ReLU);
        let input = Tensor::new(vec![2, 2], vec![-1.0, 2.0, -3.0, 4.0]).unwrap();
        let out = layer.call(input, &ComputeContext::host()).unwrap();
        assert_eq!(out.shape(), &[2, 2]);
        assert_eq!(out.host_slice().unwrap(), &[0.0, 2.0, 0.0, 4.0]);
    }
}
