use crate::{tensor::Tensor, utils::error::EngineError};

use super::{execution::ComputeContext, layer::Layer};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementWiseOperation {
    Add,
    Subtract,
    Multiply,
    Average,
    Maximum,
    Minimum,
}

impl ElementWiseOperation {
    fn name(&self) -> &'static str {
        match self {
            ElementWiseOperation::Add => "Add",
            ElementWiseOperation::Subtract => "Subtract",
            ElementWiseOperation::Multiply => "Multiply",
            ElementWiseOperation::Average => "Average",
            ElementWiseOperation::Maximum => "Maximum",
            ElementWiseOperation::Minimum => "Minimum",
        }
    }

    fn combine(&self, acc: f32, x: f32) -> f32 {
        match self {
            ElementWiseOperation::Add | ElementWiseOperation::Average => acc + x,
            ElementWiseOperation::Subtract => acc - x,
            ElementWiseOperation::Multiply => acc * x,
            ElementWiseOperation::Maximum => acc.max(x),
            ElementWiseOperation::Minimum => acc.min(x),
        }
    }
}

/// Merge layers combining same-shaped inputs element by element.
pub struct ElementWiseLayer {
    name: String,
    pub operation: ElementWiseOperation,
    accelerated: bool,
}

impl ElementWiseLayer {
    pub fn new(name: impl Into<String>, operation: ElementWiseOperation) -> Self {
        Self {
            name: name.into(),
            operation,
            accelerated: false,
        }
    }
}

impl Layer for ElementWiseLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &'static str {
        self.operation.name()
    }

    fn input_requirements(&self) -> (usize, Option<usize>) {
        match self.operation {
            ElementWiseOperation::Subtract => (2, Some(2)),
            _ => (2, None),
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

    fn call(&self, _input: Tensor, _ctx: &ComputeContext) -> Result<Tensor, EngineError> {
        Err(EngineError::layer(
            &self.name,
            format!("{} requires at least 2 inputs, got 1", self.operation.name()),
        ))
    }

    fn call_merge(&self, inputs: Vec<Tensor>, ctx: &ComputeContext) -> Result<Tensor, EngineError> {
        let (min, max) = self.input_requirements();
        if inputs.len() < min || max.is_some_and(|m| inputs.len() > m) {
            return Err(EngineError::layer(
                &self.name,
                format!(
                    "{} got {} inputs, expected {}{}",
                    self.operation.name(),
                    inputs.len(),
                    min,
                    if max.is_some() { "" } else { " or more" }
                ),
            ));
        }

        let count = inputs.len();
        let mut inputs = inputs.into_iter();
        let first = match inputs.next() {
            Some(first) => first.to_host()?,
            None => return Err(EngineError::layer(&self.name, "no inputs")),
        };
        let shape = first.shape().to_vec();
        let mut acc = first.into_vec()?;

        for input in inputs {
            let input = input.to_host()?;
            if input.shape() != shape.as_slice() {
                return Err(EngineError::layer(
                    &self.name,
                    format!(
                        "{} requires matching shapes: {:?} vs {:?}",
                        self.operation.name(),
                        shape,
                        input.shape()
                    ),
                ));
            }
            for (a, &x) in acc.iter_mut().zip(input.host_slice()?) {
                *a = self.operation.combine(*a, x);
            }
        }

        if self.operation == ElementWiseOperation::Average {
            let scale = 1.0 / count as f32;
            acc.iter_mut().for_each(|a| *a *= scale);
        }

        ctx.emit(self.accelerated, shape, acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merge(op: ElementWiseOperation, inputs: Vec<Vec<f32>>) -> Result<Vec<f32>, EngineError> {
        let layer = ElementWiseLayer::new("merge", op);
        let tensors = inputs
            .into_iter()
            .map(|v| Tensor::new(vec![v.len()], v).unwrap())
            .collect();
        layer
            .call_merge(tensors, &ComputeContext::host())?
            .into_vec()
    }

    #[test]
    fn combines_inputs() {
        let a = vec![1.0, 5.0];
        let b = vec![3.0, 2.0];
        assert_eq!(
            merge(ElementWiseOperation::Add, vec![a.clone(), b.clone()]).unwrap(),
            vec![4.0, 7.0]
        );
        assert_eq!(
            merge(ElementWiseOperation::Subtract, vec![a.clone(), b.clone()]).unwrap(),
            vec![-2.0, 3.0]
        );
        assert_eq!(
            merge(ElementWiseOperation::Average, vec![a.clone(), b.clone()]).unwrap(),
            vec![2.0, 3.5]
        );
        assert_eq!(
            merge(ElementWiseOperation::Maximum, vec![a, b]).unwrap(),
            vec![3.0, 5.0]
        );
    }

    #[test]
    fn subtract_takes_exactly_two() {
        let result = merge(
            ElementWiseOperation::Subtract,
            vec![vec![1.0], vec![1.0], vec![1.0]],
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_shape_mismatch() {
        assert!(merge(ElementWiseOperation::Add, vec![vec![1.0], vec![1.0, 2.0]]).is_err());
    }
}
