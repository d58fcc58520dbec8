use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::AUTHORIZATION;
use serde_json::Value;

use crate::client::{GenerationClient, GenerationRequest, GenerationResponse};
use crate::http::{non_empty_env, response_json_or_error, truncate_text};

pub const DEFAULT_FAL_QUEUE_BASE: &str = "https://queue.fal.run";

#[derive(Debug, Clone, PartialEq)]
pub struct FalConfig {
    pub queue_base: String,
    pub api_key: Option<String>,
    /// Local cap on polling; `None` waits for as long as the queue takes.
    pub poll_timeout: Option<Duration>,
}

impl Default for FalConfig {
    fn default() -> Self {
        Self {
            queue_base: DEFAULT_FAL_QUEUE_BASE.to_string(),
            api_key: None,
            poll_timeout: None,
        }
    }
}

impl FalConfig {
    /// Reads `FAL_KEY` (or `FAL_API_KEY`) and `FAL_QUEUE_BASE`.
    pub fn from_env() -> Self {
        Self {
            queue_base: non_empty_env("FAL_QUEUE_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_FAL_QUEUE_BASE.to_string()),
            api_key: non_empty_env("FAL_KEY").or_else(|| non_empty_env("FAL_API_KEY")),
            poll_timeout: None,
        }
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Option<Duration>) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }
}

/// Client for the fal.ai request queue: submit, poll status, fetch result.
pub struct FalClient {
    config: FalConfig,
    http: HttpClient,
}

#[derive(Debug)]
struct QueueTicket {
    request_id: String,
    status_url: String,
    response_url: String,
}

impl FalClient {
    pub fn new(config: FalConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .build()
            .context("failed building Fal HTTP client")?;
        Ok(Self::with_http_client(config, http))
    }

    pub fn with_http_client(config: FalConfig, http: HttpClient) -> Self {
        Self { config, http }
    }

    pub fn config(&self) -> &FalConfig {
        &self.config
    }

    fn endpoint(&self, model_id: &str) -> String {
        let model_id = model_id.trim();
        if model_id.starts_with("http://") || model_id.starts_with("https://") {
            return model_id.to_string();
        }
        format!(
            "{}/{}",
            self.config.queue_base.trim_end_matches('/'),
            model_id.trim_start_matches('/')
        )
    }

    fn enqueue(&self, request: &GenerationRequest, api_key: &str) -> Result<QueueTicket> {
        let endpoint = self.endpoint(&request.model_id);
        let response = self
            .http
            .post(&endpoint)
            .header(AUTHORIZATION, format!("Key {api_key}"))
            .json(&Value::Object(request.input.clone()))
            .send()
            .with_context(|| format!("Fal submit request failed ({endpoint})"))?;
        let payload = response_json_or_error("Fal submit", response)?;

        let Some(request_id) = string_field(&payload, "request_id") else {
            bail!(
                "Fal submit response missing request_id: {}",
                truncate_text(&payload.to_string(), 512)
            );
        };
        let status_url = string_field(&payload, "status_url")
            .unwrap_or_else(|| format!("{endpoint}/requests/{request_id}/status"));
        let response_url = string_field(&payload, "response_url")
            .unwrap_or_else(|| format!("{endpoint}/requests/{request_id}"));
        Ok(QueueTicket {
            request_id,
            status_url,
            response_url,
        })
    }

    fn wait_until_completed(
        &self,
        ticket: &QueueTicket,
        request: &GenerationRequest,
        api_key: &str,
        logs: &mut Vec<String>,
    ) -> Result<()> {
        let poll_url = if request.logs {
            let separator = if ticket.status_url.contains('?') { '&' } else { '?' };
            format!("{}{separator}logs=1", ticket.status_url)
        } else {
            ticket.status_url.clone()
        };
        let started = Instant::now();
        loop {
            let response = self
                .http
                .get(&poll_url)
                .header(AUTHORIZATION, format!("Key {api_key}"))
                .send()
                .with_context(|| format!("Fal status request failed ({poll_url})"))?;
            let payload = response_json_or_error("Fal status", response)?;
            if request.logs {
                collect_new_logs(&payload, logs);
            }

            let status = string_field(&payload, "status")
                .unwrap_or_default()
                .to_ascii_uppercase();
            match status.as_str() {
                "COMPLETED" => {
                    if let Some(error) = payload.get("error").filter(|value| !value.is_null()) {
                        bail!("Fal request {} failed: {error}", ticket.request_id);
                    }
                    return Ok(());
                }
                "IN_QUEUE" | "IN_PROGRESS" => {}
                other => bail!(
                    "Fal request {} reported unexpected status '{other}'",
                    ticket.request_id
                ),
            }

            if let Some(timeout) = self.config.poll_timeout {
                if started.elapsed() >= timeout {
                    bail!(
                        "Fal polling timed out after {:.1}s",
                        timeout.as_secs_f64()
                    );
                }
            }
            thread::sleep(request.poll_interval);
        }
    }
}

impl GenerationClient for FalClient {
    fn name(&self) -> &str {
        "fal"
    }

    fn subscribe(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            bail!("FAL_KEY (or FAL_API_KEY) not set");
        };

        let ticket = self.enqueue(request, api_key)?;
        let mut logs = Vec::new();
        self.wait_until_completed(&ticket, request, api_key, &mut logs)?;

        let response = self
            .http
            .get(&ticket.response_url)
            .header(AUTHORIZATION, format!("Key {api_key}"))
            .send()
            .with_context(|| format!("Fal result request failed ({})", ticket.response_url))?;
        let data = response_json_or_error("Fal result", response)?;

        Ok(GenerationResponse {
            request_id: Some(ticket.request_id),
            data,
            logs,
        })
    }
}

fn string_field(payload: &Value, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

// The status endpoint returns the full log so far on every poll.
fn collect_new_logs(payload: &Value, logs: &mut Vec<String>) {
    let Some(rows) = payload.get("logs").and_then(Value::as_array) else {
        return;
    };
    for row in rows.iter().skip(logs.len()) {
        let message = row
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| row.as_str())
            .unwrap_or_default();
        logs.push(message.trim().to_string());
    }
}
