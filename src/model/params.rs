use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::{layer::activations::ActivationKind, utils::{error::EngineError, naming::to_snake_case}};

/// A layer's `config` object with keys normalised to snake_case. `null`
/// values read as absent.
#[derive(Clone, Debug, Default)]
pub struct LayerParams {
    values: FxHashMap<String, Value>,
}

impl LayerParams {
    pub fn from_config(config: &Value) -> Self {
        let values = match config {
            Value::Object(map) => map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (to_snake_case(k), v.clone()))
                .collect(),
            _ => FxHashMap::default(),
        };
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Copy with `key` replaced.
    pub fn with(&self, key: &str, value: Value) -> Self {
        let mut values = self.values.clone();
        values.insert(key.to_string(), value);
        Self { values }
    }

    pub fn name(&self) -> Option<&str> {
        self.get("name").and_then(Value::as_str)
    }

    fn invalid(key: &str, expected: &str, value: &Value) -> EngineError {
        EngineError::Configuration(format!(
            "'{}' should be {}, found {}",
            key, expected, value
        ))
    }

    pub fn usize(&self, key: &str) -> Result<usize, EngineError> {
        match self.get(key) {
            Some(v) => v
                .as_u64()
                .map(|n| n as usize)
                .ok_or_else(|| Self::invalid(key, "a non-negative integer", v)),
            None => Err(EngineError::Configuration(format!(
                "missing required parameter '{}'",
                key
            ))),
        }
    }

    pub fn i64_or(&self, key: &str, default: i64) -> Result<i64, EngineError> {
        match self.get(key) {
            Some(v) => v.as_i64().ok_or_else(|| Self::invalid(key, "an integer", v)),
            None => Ok(default),
        }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, EngineError> {
        match self.get(key) {
            Some(v) => v.as_bool().ok_or_else(|| Self::invalid(key, "a boolean", v)),
            None => Ok(default),
        }
    }

    pub fn f32_or(&self, key: &str, default: f32) -> Result<f32, EngineError> {
        match self.get(key) {
            Some(v) => v
                .as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| Self::invalid(key, "a number", v)),
            None => Ok(default),
        }
    }

    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str, EngineError> {
        match self.get(key) {
            Some(v) => v.as_str().ok_or_else(|| Self::invalid(key, "a string", v)),
            None => Ok(default),
        }
    }

    pub fn activation_or(
        &self,
        key: &str,
        default: ActivationKind,
    ) -> Result<ActivationKind, EngineError> {
        match self.get(key) {
            Some(Value::String(s)) => ActivationKind::from_identifier(s),
            Some(v) => Err(Self::invalid(key, "an activation name", v)),
            None => Ok(default),
        }
    }

    pub fn i64_list(&self, key: &str) -> Result<Vec<i64>, EngineError> {
        let value = self.get(key).ok_or_else(|| {
            EngineError::Configuration(format!("missing required parameter '{}'", key))
        })?;
        let items = value
            .as_array()
            .ok_or_else(|| Self::invalid(key, "a list of integers", value))?;
        items
            .iter()
            .map(|item| {
                item.as_i64()
                    .ok_or_else(|| Self::invalid(key, "a list of integers", value))
            })
            .collect()
    }

    /// Declared input shape without the batch dimension. `batch_input_shape`
    /// and `batch_shape` carry a leading batch entry, `input_shape` does not.
    pub fn input_shape(&self) -> Result<Option<Vec<usize>>, EngineError> {
        let (key, skip_batch) = if self.contains("batch_input_shape") {
            ("batch_input_shape", true)
        } else if self.contains("batch_shape") {
            ("batch_shape", true)
        } else if self.contains("input_shape") {
            ("input_shape", false)
        } else {
            return Ok(None);
        };

        let value = &self.values[key];
        let items = value
            .as_array()
            .ok_or_else(|| Self::invalid(key, "a shape list", value))?;
        let dims = if skip_batch && !items.is_empty() {
            &items[1..]
        } else {
            &items[..]
        };

        dims.iter()
            .map(|d| {
                d.as_u64().map(|n| n as usize).ok_or_else(|| {
                    EngineError::Configuration(format!(
                        "'{}' must have fixed dimensions after the batch axis, found {}",
                        key, value
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    /// Nested `{class_name, config}` layer entry, as used by wrapper layers.
    pub fn nested_layer(&self, key: &str) -> Result<(String, LayerParams), EngineError> {
        let value = self.get(key).ok_or_else(|| {
            EngineError::Configuration(format!("wrapper is missing its '{}' layer", key))
        })?;
        let class_name = value
            .get("class_name")
            .and_then(Value::as_str)
            .ok_or_else(|| Self::invalid(key, "a layer entry with class_name", value))?;
        let config = value.get("config").cloned().unwrap_or(Value::Null);
        Ok((class_name.to_string(), LayerParams::from_config(&config)))
    }
}
