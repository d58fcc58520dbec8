use std::ops::Range;
use std::sync::Arc;

use indexmap::IndexMap;
use rand::Rng;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{ModelRegistry, ModelSpec, ParamKind, ParamValue, Parameter, RegistryError};

use super::controls::Control;

pub const REQUIRED_PARAMETER: &str = "prompt";
pub const SEED_PARAMETER: &str = "seed";
pub const STREAMING_KEY: &str = "streaming";
pub const SEED_RANGE: Range<i64> = 0..1_000_000;

pub const PROMPT_REQUIRED_MESSAGE: &str = "Prompt is required.";
pub const NO_IMAGES_MESSAGE: &str = "No images were generated. Please try again.";
pub const GENERATION_FAILED_MESSAGE: &str = "Failed to generate image. Please try again.";

#[derive(Debug, Clone, PartialEq)]
pub enum RequestState {
    Idle,
    InFlight,
    Succeeded(Vec<String>),
    Failed(String),
}

impl RequestState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::InFlight => "in_flight",
            Self::Succeeded(_) => "succeeded",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("model '{model}' has no field '{field}'")]
    UnknownField { model: String, field: String },
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("{}: {}", .0.field, .0.message)]
    Validation(FieldError),
    #[error("a generation request is already in flight")]
    InFlight,
}

/// Everything needed to run one generation, stamped with the epoch it was
/// issued under.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSubmission {
    pub epoch: u64,
    pub model_id: String,
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Applied(RequestState),
    Stale,
}

pub fn compute_defaults(spec: &ModelSpec) -> IndexMap<String, ParamValue> {
    spec.parameters
        .iter()
        .map(|param| (param.name.clone(), param.default_value()))
        .collect()
}

/// Per-session form: selected model, field values, streaming flag and the
/// request lifecycle.
#[derive(Debug, Clone)]
pub struct FormState {
    registry: Arc<ModelRegistry>,
    selected_model: String,
    spec: ModelSpec,
    fields: IndexMap<String, ParamValue>,
    streaming: bool,
    request: RequestState,
    field_error: Option<FieldError>,
    epoch: u64,
}

impl FormState {
    /// Mounts the form on `model_id`, or on the first registered model.
    pub fn new(registry: Arc<ModelRegistry>, model_id: Option<&str>) -> Result<Self, FormError> {
        let selected_model = match model_id {
            Some(model_id) => model_id.to_string(),
            None => registry
                .default_model_id()
                .ok_or(RegistryError::Empty)?
                .to_string(),
        };
        let spec = registry.get(&selected_model)?.clone();
        let fields = compute_defaults(&spec);
        Ok(Self {
            registry,
            selected_model,
            spec,
            fields,
            streaming: false,
            request: RequestState::Idle,
            field_error: None,
            epoch: 0,
        })
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn selected_model(&self) -> &str {
        &self.selected_model
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn field_values(&self) -> &IndexMap<String, ParamValue> {
        &self.fields
    }

    pub fn field_value(&self, name: &str) -> Option<&ParamValue> {
        self.fields.get(name)
    }

    pub fn streaming(&self) -> bool {
        self.streaming
    }

    pub fn set_streaming(&mut self, streaming: bool) {
        self.streaming = streaming;
    }

    pub fn request_state(&self) -> &RequestState {
        &self.request
    }

    pub fn is_in_flight(&self) -> bool {
        self.request == RequestState::InFlight
    }

    pub fn field_error(&self) -> Option<&FieldError> {
        self.field_error.as_ref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn controls(&self) -> Vec<(&Parameter, Control)> {
        self.spec
            .parameters
            .iter()
            .map(|param| (param, Control::for_parameter(param)))
            .collect()
    }

    /// Switches model and resets every field to the new defaults. Any
    /// outstanding or finished request is forgotten.
    pub fn select_model(&mut self, model_id: &str) -> Result<(), FormError> {
        let spec = self.registry.get(model_id)?.clone();
        self.fields = compute_defaults(&spec);
        self.spec = spec;
        self.selected_model = model_id.to_string();
        self.request = RequestState::Idle;
        self.field_error = None;
        self.epoch += 1;
        Ok(())
    }

    pub fn set_field_value(
        &mut self,
        name: &str,
        value: ParamValue,
    ) -> Result<&ParamValue, FormError> {
        let param = self.parameter(name)?;
        let coerced = param
            .coerce(value)
            .map_err(|reason| FormError::InvalidValue {
                field: name.to_string(),
                reason,
            })?;
        Ok(self.store(name, coerced))
    }

    pub fn set_field_text(&mut self, name: &str, raw: &str) -> Result<&ParamValue, FormError> {
        let param = self.parameter(name)?;
        let coerced = param
            .parse_text(raw)
            .map_err(|reason| FormError::InvalidValue {
                field: name.to_string(),
                reason,
            })?;
        Ok(self.store(name, coerced))
    }

    pub fn randomize_seed(&mut self) -> Option<i64> {
        self.randomize_seed_with(&mut rand::thread_rng())
    }

    pub fn randomize_seed_with<R: Rng>(&mut self, rng: &mut R) -> Option<i64> {
        let integer_seed = self
            .spec
            .parameter(SEED_PARAMETER)
            .is_some_and(|param| matches!(param.kind, ParamKind::Integer { .. }));
        if !integer_seed {
            return None;
        }
        let seed = rng.gen_range(SEED_RANGE);
        self.set_field_value(SEED_PARAMETER, ParamValue::Integer(seed))
            .ok()
            .and_then(ParamValue::as_i64)
    }

    /// Field values plus the client-side `streaming` flag.
    pub fn payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        for (name, value) in &self.fields {
            payload.insert(name.clone(), value.to_json());
        }
        payload.insert(STREAMING_KEY.to_string(), Value::Bool(self.streaming));
        payload
    }

    /// Validates the required prompt and moves to in-flight. A failed check
    /// leaves the request state untouched and records a field error.
    pub fn begin_submit(&mut self) -> Result<PendingSubmission, FormError> {
        if self.is_in_flight() {
            return Err(FormError::InFlight);
        }
        if self.spec.has_parameter(REQUIRED_PARAMETER) {
            let empty = self
                .fields
                .get(REQUIRED_PARAMETER)
                .map(|value| value.to_string().trim().is_empty())
                .unwrap_or(true);
            if empty {
                let error = FieldError {
                    field: REQUIRED_PARAMETER.to_string(),
                    message: PROMPT_REQUIRED_MESSAGE.to_string(),
                };
                self.field_error = Some(error.clone());
                return Err(FormError::Validation(error));
            }
        }

        self.field_error = None;
        self.epoch += 1;
        self.request = RequestState::InFlight;
        Ok(PendingSubmission {
            epoch: self.epoch,
            model_id: self.selected_model.clone(),
            payload: self.payload(),
        })
    }

    /// Applies a client outcome unless the form has moved on since `pending`
    /// was issued.
    pub fn complete(
        &mut self,
        pending: &PendingSubmission,
        outcome: anyhow::Result<Vec<String>>,
    ) -> Completion {
        if pending.epoch != self.epoch || !self.is_in_flight() {
            return Completion::Stale;
        }
        self.request = match outcome {
            Ok(urls) => {
                let urls: Vec<String> = urls
                    .into_iter()
                    .map(|url| url.trim().to_string())
                    .filter(|url| !url.is_empty())
                    .collect();
                if urls.is_empty() {
                    RequestState::Failed(NO_IMAGES_MESSAGE.to_string())
                } else {
                    RequestState::Succeeded(urls)
                }
            }
            Err(_) => RequestState::Failed(GENERATION_FAILED_MESSAGE.to_string()),
        };
        Completion::Applied(self.request.clone())
    }

    /// Drops a submission that never reached the client and returns to idle.
    /// Returns false when `pending` is no longer current.
    pub fn abort(&mut self, pending: &PendingSubmission) -> bool {
        if pending.epoch != self.epoch || !self.is_in_flight() {
            return false;
        }
        self.request = RequestState::Idle;
        self.epoch += 1;
        true
    }

    fn parameter(&self, name: &str) -> Result<&Parameter, FormError> {
        self.spec
            .parameter(name)
            .ok_or_else(|| FormError::UnknownField {
                model: self.selected_model.clone(),
                field: name.to_string(),
            })
    }

    fn store(&mut self, name: &str, value: ParamValue) -> &ParamValue {
        if self
            .field_error
            .as_ref()
            .is_some_and(|error| error.field == name)
        {
            self.field_error = None;
        }
        self.fields.insert(name.to_string(), value);
        &self.fields[name]
    }
}
