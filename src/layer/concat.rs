use crate::{
    tensor::{Tensor, TensorDesc},
    utils::error::EngineError,
};

use super::{execution::ComputeContext, layer::Layer};

pub struct ConcatLayer {
    name: String,
    // Keras-style axis, counting the batch dimension
    pub axis: i64,
    accelerated: bool,
}

impl ConcatLayer {
    pub fn new(name: impl Into<String>, axis: i64) -> Self {
        Self {
            name: name.into(),
            axis,
            accelerated: false,
        }
    }
}

/// Concatenate row-major tensors along `axis`. All other dimensions must match.
pub(crate) fn concat_along(
    parts: &[(&[usize], &[f32])],
    axis: usize,
) -> Result<(Vec<usize>, Vec<f32>), String> {
    let (first_shape, _) = parts.first().ok_or("nothing to concatenate")?;
    if axis >= first_shape.len() {
        return Err(format!("axis {} out of range for {:?}", axis, first_shape));
    }

    for (shape, _) in &parts[1..] {
        let compatible = shape.len() == first_shape.len()
            && shape
                .iter()
                .zip(first_shape.iter())
                .enumerate()
                .all(|(i, (a, b))| i == axis || a == b);
        if !compatible {
            return Err(format!(
                "cannot concatenate {:?} with {:?} on axis {}",
                first_shape, shape, axis
            ));
        }
    }

    let outer: usize = first_shape[..axis].iter().product();
    let inner: usize = first_shape[axis + 1..].iter().product();

    let mut out_shape = first_shape.to_vec();
    out_shape[axis] = parts.iter().map(|(shape, _)| shape[axis]).sum();

    let mut out = Vec::with_capacity(out_shape.iter().product());
    for o in 0..outer {
        for (shape, data) in parts {
            let block = shape[axis] * inner;
            out.extend_from_slice(&data[o * block..(o + 1) * block]);
        }
    }
    Ok((out_shape, out))
}

impl Layer for ConcatLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &'static str {
        "Concatenate"
    }

    fn config_string(&self) -> Option<String> {
        Some(format!("axis={}", self.axis))
    }

    fn input_requirements(&self) -> (usize, Option<usize>) {
        (2, None)
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

    fn call(&self, _input: Tensor, _ctx: &ComputeContext) -> Result<Tensor, EngineError> {
        Err(EngineError::layer(
            &self.name,
            "Concatenate requires at least 2 inputs, got 1",
        ))
    }

    fn call_merge(&self, inputs: Vec<Tensor>, ctx: &ComputeContext) -> Result<Tensor, EngineError> {
        let inputs = inputs
            .into_iter()
            .map(Tensor::to_host)
            .collect::<Result<Vec<_>, _>>()?;

        let first = inputs
            .first()
            .ok_or_else(|| EngineError::layer(&self.name, "no inputs"))?;
        let axis = TensorDesc::new(first.shape().to_vec())
            .resolve_axis(self.axis)
            .ok_or_else(|| {
                EngineError::layer(
                    &self.name,
                    format!("axis {} out of range for {}", self.axis, first.desc),
                )
            })?;

        let mut parts = Vec::with_capacity(inputs.len());
        for input in &inputs {
            parts.push((input.shape(), input.host_slice()?));
        }

        let (shape, data) =
            concat_along(&parts, axis).map_err(|e| EngineError::layer(&self.name, e))?;
        ctx.emit(self.accelerated, shape, data)
    }
}
