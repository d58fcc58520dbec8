use std::collections::HashSet;

use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;

use super::parameter::{Parameter, ParameterDef};

const DEFAULT_MODELS_JSON: &str = include_str!("../../resources/models.json");

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("model '{0}' is not registered")]
    NotFound(String),
    #[error("model registry is empty")]
    Empty,
    #[error("invalid model '{model}': {reason}")]
    InvalidModel { model: String, reason: String },
    #[error("invalid parameter '{parameter}' on model '{model}': {reason}")]
    InvalidParameter {
        model: String,
        parameter: String,
        reason: String,
    },
    #[error("model table could not be parsed: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub label: String,
    pub parameters: Vec<Parameter>,
}

impl ModelSpec {
    pub fn new(label: impl Into<String>, parameters: Vec<Parameter>) -> Self {
        Self {
            label: label.into(),
            parameters,
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|param| param.name == name)
    }

    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameter(name).is_some()
    }

    fn validate(&self, model_id: &str) -> Result<(), RegistryError> {
        if self.label.trim().is_empty() {
            return Err(RegistryError::InvalidModel {
                model: model_id.to_string(),
                reason: "label must not be empty".to_string(),
            });
        }
        let mut seen = HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(RegistryError::InvalidModel {
                    model: model_id.to_string(),
                    reason: format!("duplicate parameter '{}'", param.name),
                });
            }
            param
                .validate()
                .map_err(|reason| RegistryError::InvalidParameter {
                    model: model_id.to_string(),
                    parameter: param.name.clone(),
                    reason,
                })?;
        }
        Ok(())
    }
}

/// Entry for a model picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelOption {
    pub id: String,
    pub label: String,
}

/// Immutable table of selectable models, checked once when built.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    /// Builds from `models`, or from the compiled-in table when `None`.
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Result<Self, RegistryError> {
        let models = match models {
            Some(models) => models,
            None => parse_model_table(DEFAULT_MODELS_JSON)?,
        };
        if models.is_empty() {
            return Err(RegistryError::Empty);
        }
        for (model_id, spec) in &models {
            if model_id.trim().is_empty() {
                return Err(RegistryError::InvalidModel {
                    model: model_id.clone(),
                    reason: "model id must not be empty".to_string(),
                });
            }
            spec.validate(model_id)?;
        }
        Ok(Self { models })
    }

    pub fn builtin() -> Result<Self, RegistryError> {
        Self::new(None)
    }

    pub fn from_json(raw: &str) -> Result<Self, RegistryError> {
        Self::new(Some(parse_model_table(raw)?))
    }

    pub fn get(&self, model_id: &str) -> Result<&ModelSpec, RegistryError> {
        self.models
            .get(model_id)
            .ok_or_else(|| RegistryError::NotFound(model_id.to_string()))
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.models.contains_key(model_id)
    }

    pub fn list(&self) -> Vec<ModelOption> {
        self.models
            .iter()
            .map(|(id, spec)| ModelOption {
                id: id.clone(),
                label: spec.label.clone(),
            })
            .collect()
    }

    pub fn default_model_id(&self) -> Option<&str> {
        self.models.keys().next().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct ModelDef {
    id: String,
    label: String,
    parameters: Vec<ParameterDef>,
}

fn parse_model_table(raw: &str) -> Result<IndexMap<String, ModelSpec>, RegistryError> {
    let defs: Vec<ModelDef> =
        serde_json::from_str(raw).map_err(|err| RegistryError::Parse(err.to_string()))?;
    let mut models = IndexMap::new();
    for def in defs {
        if models.contains_key(&def.id) {
            return Err(RegistryError::InvalidModel {
                model: def.id,
                reason: "declared more than once".to_string(),
            });
        }
        let mut parameters = Vec::with_capacity(def.parameters.len());
        for param_def in def.parameters {
            let name = param_def.name.clone();
            let param =
                Parameter::try_from(param_def).map_err(|reason| RegistryError::InvalidParameter {
                    model: def.id.clone(),
                    parameter: name,
                    reason,
                })?;
            parameters.push(param);
        }
        models.insert(def.id, ModelSpec::new(def.label, parameters));
    }
    Ok(models)
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use crate::models::{ParamKind, ParamType, ParamValue, Parameter};

    use super::{ModelRegistry, ModelSpec, RegistryError};

    #[test]
    fn builtin_table_validates_and_keeps_order() {
        let registry = ModelRegistry::builtin().unwrap();
        let options = registry.list();
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].id, "fal-ai/flux/dev");
        assert_eq!(options[0].label, "Flux (Dev)");
        assert_eq!(options[1].id, "fal-ai/flux/schnell");
        assert_eq!(registry.default_model_id(), Some("fal-ai/flux/dev"));
    }

    #[test]
    fn builtin_prompt_comes_first() {
        let registry = ModelRegistry::builtin().unwrap();
        for option in registry.list() {
            let spec = registry.get(&option.id).unwrap();
            assert_eq!(spec.parameters[0].name, "prompt");
            assert_eq!(spec.parameters[0].param_type(), ParamType::String);
        }
        let schnell = registry.get("fal-ai/flux/schnell").unwrap();
        assert_eq!(
            schnell
                .parameter("num_inference_steps")
                .map(Parameter::default_value),
            Some(ParamValue::Integer(4))
        );
        assert!(!schnell.has_parameter("guidance_scale"));
    }

    #[test]
    fn get_unknown_model_is_not_found() {
        let registry = ModelRegistry::builtin().unwrap();
        assert_eq!(
            registry.get("unknown").unwrap_err(),
            RegistryError::NotFound("unknown".to_string())
        );
    }

    #[test]
    fn construction_rejects_empty_enum() {
        let mut models = IndexMap::new();
        models.insert(
            "demo/broken".to_string(),
            ModelSpec::new(
                "Broken",
                vec![Parameter::new(
                    "image_size",
                    "Size.",
                    ParamKind::Enum {
                        values: Vec::new(),
                        default: None,
                    },
                )],
            ),
        );
        let err = ModelRegistry::new(Some(models)).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::InvalidParameter { ref parameter, .. } if parameter == "image_size"
        ));
    }

    #[test]
    fn construction_rejects_duplicate_parameters() {
        let prompt = Parameter::new("prompt", "Prompt.", ParamKind::String { default: None });
        let mut models = IndexMap::new();
        models.insert(
            "demo/dupe".to_string(),
            ModelSpec::new("Dupe", vec![prompt.clone(), prompt]),
        );
        assert!(matches!(
            ModelRegistry::new(Some(models)),
            Err(RegistryError::InvalidModel { .. })
        ));
    }

    #[test]
    fn construction_rejects_empty_table() {
        assert_eq!(
            ModelRegistry::new(Some(IndexMap::new())).unwrap_err(),
            RegistryError::Empty
        );
        assert_eq!(ModelRegistry::from_json("[]").unwrap_err(), RegistryError::Empty);
    }

    #[test]
    fn from_json_reports_type_mismatch() {
        let raw = r#"[{"id": "demo/fast", "label": "Fast", "parameters": [
            {"name": "steps", "type": "integer", "description": "Steps.", "default": "four"}
        ]}]"#;
        let err = ModelRegistry::from_json(raw).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::InvalidParameter { ref model, .. } if model == "demo/fast"
        ));
    }

    #[test]
    fn from_json_rejects_default_outside_bounds() {
        let raw = r#"[{"id": "demo/fast", "label": "Fast", "parameters": [
            {"name": "steps", "type": "integer", "description": "Steps.",
             "default": 40, "min": 1, "max": 10, "step": 1}
        ]}]"#;
        assert!(ModelRegistry::from_json(raw).is_err());
    }
}
