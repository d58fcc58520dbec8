use anyhow::{bail, Context, Result};
use reqwest::blocking::Response as HttpResponse;
use serde_json::Value;

pub(crate) fn response_json_or_error(label: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{label} response body read failed"))?;
    if !status.is_success() {
        bail!("{label} failed ({code}): {}", truncate_text(&body, 512));
    }
    serde_json::from_str(&body).with_context(|| format!("{label} returned invalid JSON payload"))
}

/// Flattens an error and its causes into one line, dropping repeats.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() || parts.last().is_some_and(|last| last == trimmed) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
