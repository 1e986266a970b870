use std::sync::Arc;

use serde::Deserialize;

use crate::{tensor::Tensor, utils::error::EngineError};

/// One region of the raw weight buffer. Offsets and lengths count `f32`
/// elements.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct WeightMetadataEntry {
    #[serde(alias = "layerName")]
    pub layer_name: String,
    #[serde(alias = "weightName")]
    pub weight_name: String,
    pub offset: usize,
    pub length: usize,
    pub shape: Vec<usize>,
}

impl WeightMetadataEntry {
    pub fn parse_table(bytes: &[u8]) -> Result<Vec<Self>, EngineError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Resolves a layer's weight slots to views over the shared raw buffer.
pub struct WeightBinder {
    raw: Arc<Vec<f32>>,
    metadata: Vec<WeightMetadataEntry>,
}

impl WeightBinder {
    pub fn new(raw: Arc<Vec<f32>>, metadata: Vec<WeightMetadataEntry>) -> Self {
        Self { raw, metadata }
    }

    pub fn empty() -> Self {
        Self::new(Arc::new(Vec::new()), Vec::new())
    }

    /// One tensor per slot, in slot order. Each slot must match exactly one
    /// entry whose weight name starts with `{layer_name}/{slot}`.
    pub fn bind(&self, layer_name: &str, slots: &[String]) -> Result<Vec<Tensor>, EngineError> {
        slots
            .iter()
            .map(|slot| self.bind_slot(layer_name, slot))
            .collect()
    }

    fn bind_slot(&self, layer_name: &str, slot: &str) -> Result<Tensor, EngineError> {
        let pattern = format!("{}/{}", layer_name, slot);
        let mut matches = self
            .metadata
            .iter()
            .filter(|entry| entry.layer_name == layer_name && entry.weight_name.starts_with(&pattern));

        let entry = match (matches.next(), matches.next()) {
            (Some(entry), None) => entry,
            (first, second) => {
                let count = first.iter().count() + second.iter().count() + matches.count();
                return Err(EngineError::MissingWeight {
                    layer: layer_name.to_string(),
                    weight: slot.to_string(),
                    matches: count,
                });
            }
        };

        let expected: usize = entry.shape.iter().product();
        if expected != entry.length {
            return Err(EngineError::InvalidWeightData(format!(
                "'{}' declares shape {:?} ({} values) but length {}",
                entry.weight_name, entry.shape, expected, entry.length
            )));
        }

        Tensor::from_shared(entry.shape.clone(), self.raw.clone(), entry.offset).map_err(|e| {
            EngineError::InvalidWeightData(format!("'{}': {}", entry.weight_name, e))
        })
    }
}
