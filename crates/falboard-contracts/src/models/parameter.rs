use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single form value, typed by the parameter it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Boolean(value) => Value::Bool(*value),
            Self::Integer(value) => Value::Number((*value).into()),
            Self::Float(value) => serde_json::Number::from_f64(*value)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::String(value) => Value::String(value.clone()),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::String(value) => f.write_str(value),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

/// Declared type tag as it appears in the model table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Enum,
    Integer,
    Float,
    Boolean,
}

impl ParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Enum => "enum",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
        }
    }
}

/// Slider domain for a bounded numeric parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds<T> {
    pub min: T,
    pub max: T,
    pub step: T,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    String {
        default: Option<String>,
    },
    Enum {
        values: Vec<String>,
        default: Option<String>,
    },
    Integer {
        default: Option<i64>,
        bounds: Option<Bounds<i64>>,
    },
    Float {
        default: Option<f64>,
        bounds: Option<Bounds<f64>>,
    },
    Boolean {
        default: Option<bool>,
    },
}

impl ParamKind {
    pub fn param_type(&self) -> ParamType {
        match self {
            Self::String { .. } => ParamType::String,
            Self::Enum { .. } => ParamType::Enum,
            Self::Integer { .. } => ParamType::Integer,
            Self::Float { .. } => ParamType::Float,
            Self::Boolean { .. } => ParamType::Boolean,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub label: Option<String>,
    pub description: String,
    pub kind: ParamKind,
}

impl Parameter {
    pub fn new(name: impl Into<String>, description: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            label: None,
            description: description.into(),
            kind,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn display_label(&self) -> &str {
        self.label
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(self.name.as_str())
    }

    pub fn param_type(&self) -> ParamType {
        self.kind.param_type()
    }

    /// Value the form starts with: the declared default, else the type fallback
    /// (empty string, false, first enum value, numeric minimum or zero).
    pub fn default_value(&self) -> ParamValue {
        match &self.kind {
            ParamKind::String { default } => {
                ParamValue::String(default.clone().unwrap_or_default())
            }
            ParamKind::Enum { values, default } => ParamValue::String(
                default
                    .clone()
                    .or_else(|| values.first().cloned())
                    .unwrap_or_default(),
            ),
            ParamKind::Integer { default, bounds } => ParamValue::Integer(
                default.unwrap_or_else(|| bounds.map(|bounds| bounds.min).unwrap_or(0)),
            ),
            ParamKind::Float { default, bounds } => ParamValue::Float(
                default.unwrap_or_else(|| bounds.map(|bounds| bounds.min).unwrap_or(0.0)),
            ),
            ParamKind::Boolean { default } => ParamValue::Boolean(default.unwrap_or(false)),
        }
    }

    /// Coerces a typed value into this parameter's domain. Bounded numbers are
    /// clamped and snapped to the step grid instead of being rejected.
    pub fn coerce(&self, value: ParamValue) -> Result<ParamValue, String> {
        match &self.kind {
            ParamKind::String { .. } => Ok(ParamValue::String(value.to_string())),
            ParamKind::Enum { values, .. } => {
                let Some(raw) = value.as_str() else {
                    return Err(format!("expected one of {}", values.join(", ")));
                };
                if values.iter().any(|allowed| allowed == raw) {
                    Ok(ParamValue::String(raw.to_string()))
                } else {
                    Err(format!("'{raw}' is not one of {}", values.join(", ")))
                }
            }
            ParamKind::Integer { bounds, .. } => {
                let number = match value {
                    ParamValue::Integer(number) => number,
                    ParamValue::Float(number) if number.is_finite() => number.round() as i64,
                    ParamValue::String(raw) => return self.parse_text(&raw),
                    other => return Err(format!("expected an integer, got '{other}'")),
                };
                Ok(ParamValue::Integer(match bounds {
                    Some(bounds) => snap_integer(number, bounds),
                    None => number,
                }))
            }
            ParamKind::Float { bounds, .. } => {
                let number = match value {
                    ParamValue::Integer(number) => number as f64,
                    ParamValue::Float(number) => number,
                    ParamValue::String(raw) => return self.parse_text(&raw),
                    other => return Err(format!("expected a number, got '{other}'")),
                };
                if !number.is_finite() {
                    return Err("not a finite number".to_string());
                }
                Ok(ParamValue::Float(match bounds {
                    Some(bounds) => snap_float(number, bounds),
                    None => number,
                }))
            }
            ParamKind::Boolean { .. } => match value {
                ParamValue::Boolean(flag) => Ok(ParamValue::Boolean(flag)),
                ParamValue::Integer(number) => Ok(ParamValue::Boolean(number != 0)),
                ParamValue::String(raw) => self.parse_text(&raw),
                other => Err(format!("expected a boolean, got '{other}'")),
            },
        }
    }

    /// Parses raw control text by declared type, then coerces it.
    pub fn parse_text(&self, raw: &str) -> Result<ParamValue, String> {
        let trimmed = raw.trim();
        match &self.kind {
            ParamKind::String { .. } => Ok(ParamValue::String(raw.to_string())),
            ParamKind::Enum { .. } => self.coerce(ParamValue::String(trimmed.to_string())),
            ParamKind::Integer { .. } => {
                if let Ok(number) = trimmed.parse::<i64>() {
                    return self.coerce(ParamValue::Integer(number));
                }
                match trimmed.parse::<f64>() {
                    Ok(number) if number.is_finite() => self.coerce(ParamValue::Float(number)),
                    _ => Err(format!("'{trimmed}' is not an integer")),
                }
            }
            ParamKind::Float { .. } => match trimmed.parse::<f64>() {
                Ok(number) if number.is_finite() => self.coerce(ParamValue::Float(number)),
                _ => Err(format!("'{trimmed}' is not a number")),
            },
            ParamKind::Boolean { .. } => parse_bool(trimmed)
                .map(ParamValue::Boolean)
                .ok_or_else(|| format!("'{trimmed}' is not a boolean")),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("parameter name must not be empty".to_string());
        }
        match &self.kind {
            ParamKind::String { .. } | ParamKind::Boolean { .. } => Ok(()),
            ParamKind::Enum { values, default } => {
                if values.is_empty() {
                    return Err("enum parameter declares no values".to_string());
                }
                if let Some(default) = default {
                    if !values.contains(default) {
                        return Err(format!("default '{default}' is not an enum value"));
                    }
                }
                Ok(())
            }
            ParamKind::Integer { default, bounds } => {
                let Some(bounds) = bounds else {
                    return Ok(());
                };
                if bounds.min > bounds.max {
                    return Err(format!("min {} exceeds max {}", bounds.min, bounds.max));
                }
                if bounds.step <= 0 {
                    return Err("step must be positive".to_string());
                }
                match default {
                    Some(value) if *value < bounds.min || *value > bounds.max => Err(format!(
                        "default {value} outside [{}, {}]",
                        bounds.min, bounds.max
                    )),
                    _ => Ok(()),
                }
            }
            ParamKind::Float { default, bounds } => {
                if default.is_some_and(|value| !value.is_finite()) {
                    return Err("default must be finite".to_string());
                }
                let Some(bounds) = bounds else {
                    return Ok(());
                };
                if !(bounds.min.is_finite() && bounds.max.is_finite() && bounds.step.is_finite())
                {
                    return Err("bounds must be finite".to_string());
                }
                if bounds.min > bounds.max {
                    return Err(format!("min {} exceeds max {}", bounds.min, bounds.max));
                }
                if bounds.step <= 0.0 {
                    return Err("step must be positive".to_string());
                }
                match default {
                    Some(value) if *value < bounds.min || *value > bounds.max => Err(format!(
                        "default {value} outside [{}, {}]",
                        bounds.min, bounds.max
                    )),
                    _ => Ok(()),
                }
            }
        }
    }
}

/// One row of the compiled-in model table, before type checking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDef {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ParamValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
}

impl TryFrom<ParameterDef> for Parameter {
    type Error = String;

    fn try_from(def: ParameterDef) -> Result<Self, Self::Error> {
        let numeric = matches!(def.param_type, ParamType::Integer | ParamType::Float);
        let declared_bounds = [def.min, def.max, def.step]
            .iter()
            .filter(|item| item.is_some())
            .count();
        if !numeric && declared_bounds > 0 {
            return Err(format!(
                "min/max/step are only meaningful for numeric parameters, not {}",
                def.param_type.as_str()
            ));
        }
        if declared_bounds != 0 && declared_bounds != 3 {
            return Err("min, max and step must be declared together".to_string());
        }
        if def.enum_values.is_some() && def.param_type != ParamType::Enum {
            return Err("enumValues declared on a non-enum parameter".to_string());
        }

        let mismatch = |expected: &str| {
            format!(
                "default {:?} does not match declared type {expected}",
                def.default
            )
        };
        let kind = match def.param_type {
            ParamType::String => ParamKind::String {
                default: match &def.default {
                    None => None,
                    Some(ParamValue::String(value)) => Some(value.clone()),
                    Some(_) => return Err(mismatch("string")),
                },
            },
            ParamType::Enum => ParamKind::Enum {
                values: def.enum_values.clone().unwrap_or_default(),
                default: match &def.default {
                    None => None,
                    Some(ParamValue::String(value)) => Some(value.clone()),
                    Some(_) => return Err(mismatch("enum")),
                },
            },
            ParamType::Boolean => ParamKind::Boolean {
                default: match &def.default {
                    None => None,
                    Some(ParamValue::Boolean(value)) => Some(*value),
                    Some(_) => return Err(mismatch("boolean")),
                },
            },
            ParamType::Integer => {
                let bounds = match (def.min, def.max, def.step) {
                    (Some(min), Some(max), Some(step)) => Some(Bounds {
                        min: integral(min, "min")?,
                        max: integral(max, "max")?,
                        step: integral(step, "step")?,
                    }),
                    _ => None,
                };
                ParamKind::Integer {
                    default: match &def.default {
                        None => None,
                        Some(ParamValue::Integer(value)) => Some(*value),
                        Some(_) => return Err(mismatch("integer")),
                    },
                    bounds,
                }
            }
            ParamType::Float => {
                let bounds = match (def.min, def.max, def.step) {
                    (Some(min), Some(max), Some(step)) => Some(Bounds { min, max, step }),
                    _ => None,
                };
                ParamKind::Float {
                    default: match &def.default {
                        None => None,
                        Some(ParamValue::Float(value)) => Some(*value),
                        Some(ParamValue::Integer(value)) => Some(*value as f64),
                        Some(_) => return Err(mismatch("float")),
                    },
                    bounds,
                }
            }
        };

        Ok(Parameter {
            name: def.name,
            label: def.label,
            description: def.description,
            kind,
        })
    }
}

fn integral(value: f64, field: &str) -> Result<i64, String> {
    if !value.is_finite() || value.fract() != 0.0 {
        return Err(format!("{field} {value} is not an integer"));
    }
    Ok(value as i64)
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    let lowered = raw.trim().to_ascii_lowercase();
    if matches!(lowered.as_str(), "1" | "true" | "yes" | "on") {
        Some(true)
    } else if matches!(lowered.as_str(), "0" | "false" | "no" | "off") {
        Some(false)
    } else {
        None
    }
}

fn snap_integer(value: i64, bounds: &Bounds<i64>) -> i64 {
    let clamped = value.clamp(bounds.min, bounds.max);
    let offset = (clamped - bounds.min) as f64 / bounds.step as f64;
    let snapped = bounds.min + offset.round() as i64 * bounds.step;
    snapped.clamp(bounds.min, bounds.max)
}

fn snap_float(value: f64, bounds: &Bounds<f64>) -> f64 {
    let clamped = value.clamp(bounds.min, bounds.max);
    let steps = ((clamped - bounds.min) / bounds.step).round();
    let snapped = round_to(bounds.min + steps * bounds.step, decimal_places(bounds.step));
    snapped.clamp(bounds.min, bounds.max)
}

fn decimal_places(step: f64) -> i32 {
    let text = format!("{step}");
    text.split_once('.')
        .map(|(_, fraction)| fraction.len().min(10) as i32)
        .unwrap_or(0)
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
