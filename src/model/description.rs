use serde::Deserialize;
use serde_json::Value;

use crate::utils::error::EngineError;

use super::params::LayerParams;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptionForm {
    Sequential,
    Graph,
}

/// One layer entry of an architecture file.
#[derive(Clone, Debug, Deserialize)]
pub struct LayerSpec {
    pub class_name: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub inbound_nodes: Vec<Value>,
}

impl LayerSpec {
    pub fn params(&self) -> LayerParams {
        LayerParams::from_config(&self.config)
    }

    /// Node name: the entry's own `name`, else `config.name`, else a name
    /// derived from the class and position.
    pub fn resolved_name(&self, index: usize) -> String {
        self.name
            .clone()
            .or_else(|| {
                self.config
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| {
                format!(
                    "{}_{}",
                    crate::utils::naming::to_snake_case(&self.class_name),
                    index + 1
                )
            })
    }

    /// Names of the nodes feeding this layer, taken from the first inbound
    /// node. Accepts both the nested-list form `[[["src", 0, 0, {}]]]` and the
    /// `{"args": [{"config": {"keras_history": ["src", 0, 0]}}]}` form.
    pub fn inbound_names(&self) -> Result<Vec<String>, EngineError> {
        let Some(first) = self.inbound_nodes.first() else {
            return Ok(Vec::new());
        };

        let mut names = Vec::new();
        match first {
            Value::Array(entries) => {
                for entry in entries {
                    let name = entry
                        .get(0)
                        .and_then(Value::as_str)
                        .or_else(|| entry.as_str())
                        .ok_or_else(|| invalid_inbound(&self.class_name, entry))?;
                    names.push(name.to_string());
                }
            }
            Value::Object(_) => collect_keras_history(first, &mut names),
            other => return Err(invalid_inbound(&self.class_name, other)),
        }
        Ok(names)
    }
}

fn invalid_inbound(class_name: &str, value: &Value) -> EngineError {
    EngineError::Graph(format!(
        "unrecognised inbound node entry for {}: {}",
        class_name, value
    ))
}

fn collect_keras_history(value: &Value, names: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            if let Some(source) = map
                .get("keras_history")
                .and_then(|h| h.get(0))
                .and_then(Value::as_str)
            {
                names.push(source.to_string());
                return;
            }
            if let Some(args) = map.get("args") {
                collect_keras_history(args, names);
            } else if let Some(config) = map.get("config") {
                collect_keras_history(config, names);
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_keras_history(item, names)),
        _ => {}
    }
}

#[derive(Deserialize)]
struct RawDescription {
    class_name: String,
    #[serde(default)]
    config: Value,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SequentialConfig {
    Layers(Vec<LayerSpec>),
    Named {
        #[serde(default)]
        name: Option<String>,
        layers: Vec<LayerSpec>,
    },
}

#[derive(Deserialize)]
struct GraphConfig {
    #[serde(default)]
    name: Option<String>,
    layers: Vec<LayerSpec>,
}

/// Parsed architecture file in either description form.
#[derive(Clone, Debug)]
pub struct ModelDescription {
    pub form: DescriptionForm,
    pub name: Option<String>,
    pub layers: Vec<LayerSpec>,
}

impl ModelDescription {
    pub fn from_value(value: Value) -> Result<Self, EngineError> {
        let raw: RawDescription = serde_json::from_value(value)?;
        match raw.class_name.as_str() {
            "Sequential" => {
                let (name, layers) = match serde_json::from_value(raw.config)? {
                    SequentialConfig::Layers(layers) => (None, layers),
                    SequentialConfig::Named { name, layers } => (name, layers),
                };
                Ok(Self {
                    form: DescriptionForm::Sequential,
                    name,
                    layers,
                })
            }
            "Model" | "Functional" => {
                let config: GraphConfig = serde_json::from_value(raw.config)?;
                Ok(Self {
                    form: DescriptionForm::Graph,
                    name: config.name,
                    layers: config.layers,
                })
            }
            other => Err(EngineError::UnknownLayerClass(format!(
                "{} (expected Sequential, Model or Functional at the top level)",
                other
            ))),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EngineError> {
        Self::from_value(serde_json::from_slice(bytes)?)
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Self::from_value(serde_json::from_str(json)?)
    }
}
