use crate::models::{ParamKind, ParamValue, Parameter};

/// Input widget a parameter renders as.
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    TextInput,
    Select { options: Vec<String> },
    Slider { min: f64, max: f64, step: f64 },
    NumberInput { integer: bool },
    Toggle,
}

impl Control {
    pub fn for_parameter(param: &Parameter) -> Self {
        match &param.kind {
            ParamKind::String { .. } => Self::TextInput,
            ParamKind::Enum { values, .. } => Self::Select {
                options: values.clone(),
            },
            ParamKind::Integer {
                bounds: Some(bounds),
                ..
            } => Self::Slider {
                min: bounds.min as f64,
                max: bounds.max as f64,
                step: bounds.step as f64,
            },
            ParamKind::Integer { bounds: None, .. } => Self::NumberInput { integer: true },
            ParamKind::Float {
                bounds: Some(bounds),
                ..
            } => Self::Slider {
                min: bounds.min,
                max: bounds.max,
                step: bounds.step,
            },
            ParamKind::Float { bounds: None, .. } => Self::NumberInput { integer: false },
            ParamKind::Boolean { .. } => Self::Toggle,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::TextInput => "text".to_string(),
            Self::Select { options } => format!("select: {}", options.join(" | ")),
            Self::Slider { min, max, step } => format!("slider {min}..={max} step {step}"),
            Self::NumberInput { integer: true } => "integer".to_string(),
            Self::NumberInput { integer: false } => "number".to_string(),
            Self::Toggle => "toggle".to_string(),
        }
    }
}

/// One line of the plain-text form: label, control, current value.
pub fn render_field(param: &Parameter, value: Option<&ParamValue>, error: Option<&str>) -> String {
    let control = Control::for_parameter(param);
    let shown = match (value, &control) {
        (Some(ParamValue::String(text)), Control::TextInput) => format!("{text:?}"),
        (Some(ParamValue::Boolean(flag)), Control::Toggle) => {
            let mark = if *flag { "[x]" } else { "[ ]" };
            mark.to_string()
        }
        (Some(value), _) => value.to_string(),
        (None, _) => "-".to_string(),
    };
    let mut line = format!(
        "{} = {}  ({})",
        param.display_label(),
        shown,
        control.describe()
    );
    if !param.description.trim().is_empty() {
        line.push_str(" - ");
        line.push_str(param.description.trim());
    }
    if let Some(message) = error {
        line.push_str(&format!("\n    ! {message}"));
    }
    line
}
