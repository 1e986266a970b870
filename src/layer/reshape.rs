use crate::{tensor::Tensor, utils::error::EngineError};

use super::{execution::ComputeContext, layer::Layer};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReshapeKind {
    Flatten,
    // Target dims, at most one of which may be -1
    Reshape(Vec<i64>),
}

/// Shape-only layers: Flatten and Reshape.
pub struct ReshapeLayer {
    name: String,
    pub kind: ReshapeKind,
    accelerated: bool,
}

impl ReshapeLayer {
    pub fn flatten(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ReshapeKind::Flatten,
            accelerated: false,
        }
    }

    pub fn new(name: impl Into<String>, target_shape: Vec<i64>) -> Self {
        Self {
            name: name.into(),
            kind: ReshapeKind::Reshape(target_shape),
            accelerated: false,
        }
    }

    fn resolve_shape(&self, input: &Tensor) -> Result<Vec<usize>, EngineError> {
        let total = input.len();
        let target = match &self.kind {
            ReshapeKind::Flatten => return Ok(vec![total]),
            ReshapeKind::Reshape(target) => target,
        };

        let inferred: Vec<usize> = target
            .iter()
            .enumerate()
            .filter(|(_, d)| **d < 0)
            .map(|(i, _)| i)
            .collect();
        if inferred.len() > 1 {
            return Err(EngineError::layer(
                &self.name,
                format!("target shape {:?} has more than one unknown dimension", target),
            ));
        }

        let known: usize = target
            .iter()
            .filter(|d| **d >= 0)
            .map(|d| *d as usize)
            .product();

        let mut shape: Vec<usize> = target.iter().map(|d| (*d).max(0) as usize).collect();
        if let Some(&i) = inferred.first() {
            if known == 0 || total % known != 0 {
                return Err(EngineError::layer(
                    &self.name,
                    format!("cannot infer dimension of {:?} from {} values", target, total),
                ));
            }
            shape[i] = total / known;
        }
        Ok(shape)
    }
}

impl Layer for ReshapeLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &'static str {
        match self.kind {
            ReshapeKind::Flatten => "Flatten",
            ReshapeKind::Reshape(_) => "Reshape",
        }
    }

    fn config_string(&self) -> Option<String> {
        match &self.kind {
            ReshapeKind::Flatten => None,
            ReshapeKind::Reshape(target) => Some(format!("target_shape={:?}", target)),
        }
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
        let shape = self.resolve_shape(&input)?;
        let reshaped = input
            .reshape(shape)
            .map_err(|e| EngineError::layer(&self.name, e.to_string()))?;
        ctx.place(self.accelerated, reshaped)
    }
}

/// `[d] -> [n, d]`.
pub struct RepeatVectorLayer {
    name: String,
    pub n: usize,
}

impl RepeatVectorLayer {
    pub fn new(name: impl Into<String>, n: usize) -> Self {
        Self {
            name: name.into(),
            n,
        }
    }
}

impl Layer for RepeatVectorLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &'static str {
        "RepeatVector"
    }

    fn config_string(&self) -> Option<String> {
        Some(format!("n={}", self.n))
    }

    fn call(&self, input: Tensor, ctx: &ComputeContext) -> Result<Tensor, EngineError> {
        let input = input.to_host()?;
        if input.shape().len() != 1 {
            return Err(EngineError::layer(
                &self.name,
                format!("expected a 1D input, got {}", input.desc),
            ));
        }
        let x = input.host_slice()?;
        let out = x.repeat(self.n);
        ctx.emit(false, vec![self.n, x.len()], out)
    }
}
