#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use layerflow::{
    ComputeContext, EngineError, Layer, ModelArtifacts, ModelDescription, Tensor,
    WeightMetadataEntry,
};

/// Accumulates a raw weight buffer and its metadata table.
#[derive(Default)]
pub struct WeightsBuilder {
    values: Vec<f32>,
    entries: Vec<WeightMetadataEntry>,
}

impl WeightsBuilder {
    pub fn add(mut self, layer: &str, weight: &str, shape: Vec<usize>, values: Vec<f32>) -> Self {
        assert_eq!(shape.iter().product::<usize>(), values.len());
        self.entries.push(WeightMetadataEntry {
            layer_name: layer.to_string(),
            weight_name: format!("{}/{}:0", layer, weight),
            offset: self.values.len(),
            length: values.len(),
            shape,
        });
        self.values.extend(values);
        self
    }

    pub fn dense(self, layer: &str, inputs: usize, units: usize, kernel: Vec<f32>, bias: Vec<f32>) -> Self {
        self.add(layer, "kernel", vec![inputs, units], kernel)
            .add(layer, "bias", vec![units], bias)
    }

    pub fn artifacts(self, description: &str) -> ModelArtifacts {
        ModelArtifacts::new(
            ModelDescription::from_json(description).unwrap(),
            self.values,
            self.entries,
        )
    }

    pub fn raw(&self) -> &[f32] {
        &self.values
    }

    pub fn metadata_json(&self) -> String {
        let rows: Vec<String> = self
            .entries
            .iter()
            .map(|e| {
                format!(
                    r#"{{"layer_name": "{}", "weight_name": "{}", "offset": {}, "length": {}, "shape": {:?}}}"#,
                    e.layer_name, e.weight_name, e.offset, e.length, e.shape
                )
            })
            .collect();
        format!("[{}]", rows.join(","))
    }
}

/// Adds one to every element and counts its invocations. With several inputs
/// it sums them first.
pub struct CountingLayer {
    name: String,
    pub calls: Arc<AtomicUsize>,
}

impl CountingLayer {
    pub fn new(name: &str) -> (Box<dyn Layer>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let layer = Self {
            name: name.to_string(),
            calls: calls.clone(),
        };
        (Box::new(layer), calls)
    }
}

impl Layer for CountingLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &'static str {
        "Counting"
    }

    fn input_requirements(&self) -> (usize, Option<usize>) {
        (1, None)
    }

    fn call(&self, input: Tensor, ctx: &ComputeContext) -> Result<Tensor, EngineError> {
        self.call_merge(vec![input], ctx)
    }

    fn call_merge(&self, inputs: Vec<Tensor>, ctx: &ComputeContext) -> Result<Tensor, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let shape = inputs[0].shape().to_vec();
        let mut out = vec![1.0; inputs[0].len()];
        for input in inputs {
            for (o, x) in out.iter_mut().zip(input.into_vec()?) {
                *o += x;
            }
        }
        ctx.emit(false, shape, out)
    }
}

/// Records the tensors it receives and the tensor it returns.
pub struct ProbeLayer {
    name: String,
    accelerated: bool,
    pub seen: Arc<Mutex<Vec<Tensor>>>,
    pub produced: Arc<Mutex<Option<Tensor>>>,
}

pub struct ProbeHandles {
    pub seen: Arc<Mutex<Vec<Tensor>>>,
    pub produced: Arc<Mutex<Option<Tensor>>>,
}

impl ProbeLayer {
    pub fn new(name: &str, accelerated: bool) -> (Box<dyn Layer>, ProbeHandles) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let produced = Arc::new(Mutex::new(None));
        let layer = Self {
            name: name.to_string(),
            accelerated,
            seen: seen.clone(),
            produced: produced.clone(),
        };
        (Box::new(layer), ProbeHandles { seen, produced })
    }
}

impl Layer for ProbeLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &'static str {
        "Probe"
    }

    fn supports_accelerated(&self) -> bool {
        true
    }

    fn is_accelerated(&self) -> bool {
        self.accelerated
    }

    fn call(&self, input: Tensor, ctx: &ComputeContext) -> Result<Tensor, EngineError> {
        self.seen.lock().unwrap().push(input.clone());
        let shape = input.shape().to_vec();
        let data = input.into_vec()?;
        let out = ctx.emit(self.accelerated, shape, data)?;
        *self.produced.lock().unwrap() = Some(out.clone());
        Ok(out)
    }
}

/// Fails for any input whose first element is negative.
pub struct FailingLayer {
    pub name: String,
}

impl Layer for FailingLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &'static str {
        "Failing"
    }

    fn call(&self, input: Tensor, ctx: &ComputeContext) -> Result<Tensor, EngineError> {
        if input.host_slice()?.first().is_some_and(|&v| v < 0.0) {
            return Err(EngineError::layer(&self.name, "negative input"));
        }
        ctx.place(false, input)
    }
}
