use crate::{tensor::Tensor, utils::error::EngineError};

use super::{execution::ComputeContext, layer::Layer};

/// Inference-time dropout: identity.
pub struct DropoutLayer {
    name: String,
    pub rate: f32,
    accelerated: bool,
}

impl DropoutLayer {
    pub fn new(name: impl Into<String>, rate: f32) -> Self {
        Self {
            name: name.into(),
            rate,
            accelerated: false,
        }
    }
}

impl Layer for DropoutLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &'static str {
        "Dropout"
    }

    fn config_string(&self) -> Option<String> {
        Some(format!("rate={}", self.rate))
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
        ctx.place(self.accelerated, input)
    }
}
