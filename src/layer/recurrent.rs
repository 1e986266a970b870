use crate::{
    tensor::Tensor,
    utils::{
        error::EngineError,
        math::{vec_mat_mul_acc, vec_mat_mul_cols_acc},
    },
};

use super::{
    activations::ActivationKind,
    execution::ComputeContext,
    layer::{Layer, expect_count, expect_shape},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecurrentCell {
    SimpleRNN,
    // Gate order i, f, c, o
    LSTM,
    // Gate order z, r, h
    GRU { reset_after: bool },
}

impl RecurrentCell {
    fn gates(&self) -> usize {
        match self {
            RecurrentCell::SimpleRNN => 1,
            RecurrentCell::LSTM => 4,
            RecurrentCell::GRU { .. } => 3,
        }
    }

    fn class_name(&self) -> &'static str {
        match self {
            RecurrentCell::SimpleRNN => "SimpleRNN",
            RecurrentCell::LSTM => "LSTM",
            RecurrentCell::GRU { .. } => "GRU",
        }
    }
}

#[derive(Clone, Debug)]
pub struct RecurrentConfig {
    pub units: usize,
    pub activation: ActivationKind,
    pub recurrent_activation: ActivationKind,
    pub use_bias: bool,
    pub return_sequences: bool,
    pub go_backwards: bool,
}

/// Recurrent layer over a `[timesteps, features]` input. Returns the last
/// hidden state `[units]`, or every state `[timesteps, units]` in processing
/// order when `return_sequences` is set.
pub struct RecurrentLayer {
    name: String,
    pub cell: RecurrentCell,
    pub config: RecurrentConfig,
    input_dim: usize,
    kernel: Vec<f32>,
    recurrent_kernel: Vec<f32>,
    // GRU with reset_after keeps input and recurrent biases separately
    bias: Vec<f32>,
    recurrent_bias: Vec<f32>,
}

impl RecurrentLayer {
    pub fn new(name: impl Into<String>, cell: RecurrentCell, config: RecurrentConfig) -> Self {
        Self {
            name: name.into(),
            cell,
            config,
            input_dim: 0,
            kernel: Vec::new(),
            recurrent_kernel: Vec::new(),
            bias: Vec::new(),
            recurrent_bias: Vec::new(),
        }
    }

    fn width(&self) -> usize {
        self.cell.gates() * self.config.units
    }

    fn step(&self, x: &[f32], h: &mut Vec<f32>, c: &mut [f32]) {
        let units = self.config.units;
        let width = self.width();
        let act = self.config.activation;
        let rec_act = self.config.recurrent_activation;

        let mut z = if self.bias.is_empty() {
            vec![0.0f32; width]
        } else {
            self.bias.clone()
        };
        vec_mat_mul_acc(x, &self.kernel, width, &mut z);

        match self.cell {
            RecurrentCell::SimpleRNN => {
                vec_mat_mul_acc(h, &self.recurrent_kernel, width, &mut z);
                act.apply(&mut z, units);
                *h = z;
            }
            RecurrentCell::LSTM => {
                vec_mat_mul_acc(h, &self.recurrent_kernel, width, &mut z);
                for j in 0..units {
                    let i = rec_act.apply_scalar(z[j]);
                    let f = rec_act.apply_scalar(z[units + j]);
                    let candidate = act.apply_scalar(z[2 * units + j]);
                    let o = rec_act.apply_scalar(z[3 * units + j]);
                    c[j] = f * c[j] + i * candidate;
                    h[j] = o * act.apply_scalar(c[j]);
                }
            }
            RecurrentCell::GRU { reset_after: false } => {
                let mut rec = vec![0.0f32; 2 * units];
                vec_mat_mul_cols_acc(h, &self.recurrent_kernel, width, 0, &mut rec);

                let update: Vec<f32> = (0..units)
                    .map(|j| rec_act.apply_scalar(z[j] + rec[j]))
                    .collect();
                let reset_h: Vec<f32> = (0..units)
                    .map(|j| rec_act.apply_scalar(z[units + j] + rec[units + j]) * h[j])
                    .collect();

                let mut candidate = vec![0.0f32; units];
                vec_mat_mul_cols_acc(
                    &reset_h,
                    &self.recurrent_kernel,
                    width,
                    2 * units,
                    &mut candidate,
                );
                for j in 0..units {
                    let hh = act.apply_scalar(z[2 * units + j] + candidate[j]);
                    h[j] = update[j] * h[j] + (1.0 - update[j]) * hh;
                }
            }
            RecurrentCell::GRU { reset_after: true } => {
                let mut rec = if self.recurrent_bias.is_empty() {
                    vec![0.0f32; width]
                } else {
                    self.recurrent_bias.clone()
                };
                vec_mat_mul_acc(h, &self.recurrent_kernel, width, &mut rec);
                for j in 0..units {
                    let update = rec_act.apply_scalar(z[j] + rec[j]);
                    let reset = rec_act.apply_scalar(z[units + j] + rec[units + j]);
                    let hh = act.apply_scalar(z[2 * units + j] + reset * rec[2 * units + j]);
                    h[j] = update * h[j] + (1.0 - update) * hh;
                }
            }
        }
    }
}

impl Layer for RecurrentLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &'static str {
        self.cell.class_name()
    }

    fn weight_names(&self) -> Vec<String> {
        let mut names = vec!["kernel".to_string(), "recurrent_kernel".to_string()];
        if self.config.use_bias {
            names.push("bias".to_string());
        }
        names
    }

    fn set_weights(&mut self, weights: Vec<Tensor>) -> Result<(), EngineError> {
        let expected = if self.config.use_bias { 3 } else { 2 };
        let mut weights = expect_count(&self.name, weights, expected)?;
        let units = self.config.units;
        let width = self.width();

        let kernel = weights
            .next()
            .ok_or_else(|| EngineError::layer(&self.name, "missing kernel"))?;
        if kernel.shape().len() != 2 || kernel.shape()[1] != width {
            return Err(EngineError::layer(
                &self.name,
                format!(
                    "kernel has shape {:?}, expected [input_dim, {}]",
                    kernel.shape(),
                    width
                ),
            ));
        }
        let recurrent_kernel = weights
            .next()
            .ok_or_else(|| EngineError::layer(&self.name, "missing recurrent_kernel"))?;
        expect_shape(&self.name, "recurrent_kernel", &recurrent_kernel, &[units, width])?;

        self.input_dim = kernel.shape()[0];
        self.kernel = kernel.host_slice()?.to_vec();
        self.recurrent_kernel = recurrent_kernel.host_slice()?.to_vec();

        if let Some(bias) = weights.next() {
            match self.cell {
                RecurrentCell::GRU { reset_after: true } => {
                    expect_shape(&self.name, "bias", &bias, &[2, width])?;
                    let data = bias.host_slice()?;
                    self.bias = data[..width].to_vec();
                    self.recurrent_bias = data[width..].to_vec();
                }
                _ => {
                    expect_shape(&self.name, "bias", &bias, &[width])?;
                    self.bias = bias.host_slice()?.to_vec();
                }
            }
        }
        Ok(())
    }

    fn parameter_count(&self) -> usize {
        self.kernel.len() + self.recurrent_kernel.len() + self.bias.len() + self.recurrent_bias.len()
    }

    fn config_string(&self) -> Option<String> {
        Some(format!(
            "units={}, return_sequences={}, go_backwards={}",
            self.config.units, self.config.return_sequences, self.config.go_backwards
        ))
    }

    fn call(&self, input: Tensor, ctx: &ComputeContext) -> Result<Tensor, EngineError> {
        if self.kernel.is_empty() {
            return Err(EngineError::layer(&self.name, "weights have not been set"));
        }
        let input = input.to_host()?;
        let shape = input.shape();
        if shape.len() != 2 || shape[1] != self.input_dim {
            return Err(EngineError::layer(
                &self.name,
                format!(
                    "expected input [timesteps, {}], got {}",
                    self.input_dim, input.desc
                ),
            ));
        }

        let timesteps = shape[0];
        let units = self.config.units;
        let x = input.host_slice()?;

        let mut h = vec![0.0f32; units];
        let mut c = vec![0.0f32; units];
        let mut sequence = Vec::with_capacity(if self.config.return_sequences {
            timesteps * units
        } else {
            0
        });

        let order: Box<dyn Iterator<Item = usize>> = if self.config.go_backwards {
            Box::new((0..timesteps).rev())
        } else {
            Box::new(0..timesteps)
        };

        for t in order {
            let xt = &x[t * self.input_dim..(t + 1) * self.input_dim];
            self.step(xt, &mut h, &mut c);
            if self.config.return_sequences {
                sequence.extend_from_slice(&h);
            }
        }

        if self.config.return_sequences {
            ctx.emit(false, vec![timesteps, units], sequence)
        } else {
            ctx.emit(false, vec![units], h)
        }
    }
}

/// Reverse the leading (time) axis of a row-major `[timesteps, width]` buffer.
pub(crate) fn reverse_time(data: &mut [f32], width: usize) {
    if width == 0 {
        return;
    }
    let timesteps = data.len() / width;
    for t in 0..timesteps / 2 {
        let (head, tail) = data.split_at_mut((timesteps - 1 - t) * width);
        head[t * width..(t + 1) * width].swap_with_slice(&mut tail[..width]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config(units: usize, return_sequences: bool, go_backwards: bool) -> RecurrentConfig {
        RecurrentConfig {
            units,
            activation: ActivationKind::Linear,
            recurrent_activation: ActivationKind::Sigmoid,
            use_bias: true,
            return_sequences,
            go_backwards,
        }
    }

    fn simple_rnn(return_sequences: bool, go_backwards: bool) -> RecurrentLayer {
        let mut layer = RecurrentLayer::new(
            "rnn",
            RecurrentCell::SimpleRNN,
            config(1, return_sequences, go_backwards),
        );
        // h_t = x_t + 0.5 h_{t-1}
        layer
            .set_weights(vec![
                Tensor::new(vec![1, 1], vec![1.0]).unwrap(),
                Tensor::new(vec![1, 1], vec![0.5]).unwrap(),
                Tensor::new(vec![1], vec![0.0]).unwrap(),
            ])
            .unwrap();
        layer
    }

    #[test]
    fn simple_rnn_accumulates_state() {
        let input = Tensor::new(vec![3, 1], vec![1.0, 2.0, 4.0]).unwrap();
        let out = simple_rnn(true, false)
            .call(input.clone(), &ComputeContext::host())
            .unwrap();
        assert_eq!(out.shape(), &[3, 1]);
        assert_eq!(out.host_slice().unwrap(), &[1.0, 2.5, 5.25]);

        let last = simple_rnn(false, false)
            .call(input, &ComputeContext::host())
            .unwrap();
        assert_eq!(last.shape(), &[1]);
        assert_eq!(last.host_slice().unwrap(), &[5.25]);
    }

    #[test]
    fn go_backwards_processes_reversed() {
        let input = Tensor::new(vec![3, 1], vec![1.0, 2.0, 4.0]).unwrap();
        let out = simple_rnn(false, true)
            .call(input, &ComputeContext::host())
            .unwrap();
        // 4, 2 + 2, 1 + 2
        assert_eq!(out.host_slice().unwrap(), &[3.0]);
    }

    #[test]
    fn lstm_single_step_matches_closed_form() {
        let mut layer = RecurrentLayer::new("lstm", RecurrentCell::LSTM, config(1, false, false));
        layer.config.activation = ActivationKind::Tanh;
        layer
            .set_weights(vec![
                Tensor::new(vec![1, 4], vec![1.0, 1.0, 1.0, 1.0]).unwrap(),
                Tensor::new(vec![1, 4], vec![0.0; 4]).unwrap(),
                Tensor::new(vec![4], vec![0.0; 4]).unwrap(),
            ])
            .unwrap();
        let out = layer
            .call(Tensor::new(vec![1, 1], vec![1.0]).unwrap(), &ComputeContext::host())
            .unwrap();

        let sig = 1.0 / (1.0 + (-1.0f32).exp());
        let c = sig * 1.0f32.tanh();
        assert_relative_eq!(out.host_slice().unwrap()[0], sig * c.tanh(), epsilon = 1e-6);
    }

    #[test]
    fn gru_variants_agree_without_recurrent_bias() {
        let kernel = vec![0.3, -0.2, 0.5];
        let recurrent = vec![0.1, 0.4, -0.3];
        let input = Tensor::new(vec![2, 1], vec![1.0, -1.0]).unwrap();

        let mut before = RecurrentLayer::new(
            "gru",
            RecurrentCell::GRU { reset_after: false },
            config(1, false, false),
        );
        before.config.activation = ActivationKind::Tanh;
        before
            .set_weights(vec![
                Tensor::new(vec![1, 3], kernel.clone()).unwrap(),
                Tensor::new(vec![1, 3], recurrent.clone()).unwrap(),
                Tensor::new(vec![3], vec![0.0; 3]).unwrap(),
            ])
            .unwrap();

        let mut after = RecurrentLayer::new(
            "gru",
            RecurrentCell::GRU { reset_after: true },
            config(1, false, false),
        );
        after.config.activation = ActivationKind::Tanh;
        after
            .set_weights(vec![
                Tensor::new(vec![1, 3], kernel).unwrap(),
                Tensor::new(vec![1, 3], recurrent).unwrap(),
                Tensor::new(vec![2, 3], vec![0.0; 6]).unwrap(),
            ])
            .unwrap();

        // With one unit r * (h U) == (r * h) U, so both formulations match.
        let a = before.call(input.clone(), &ComputeContext::host()).unwrap();
        let b = after.call(input, &ComputeContext::host()).unwrap();
        assert_relative_eq!(
            a.host_slice().unwrap()[0],
            b.host_slice().unwrap()[0],
            epsilon = 1e-6
        );
    }

    #[test]
    fn reverses_time_axis() {
        let mut data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        reverse_time(&mut data, 2);
        assert_eq!(data, vec![5.0, 6.0, 3.0, 4.0, 1.0, 2.0]);
    }
}
