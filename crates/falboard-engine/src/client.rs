use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::{Map, Value};

use crate::dryrun::DryrunClient;
use crate::fal::{FalClient, FalConfig};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model_id: String,
    pub input: Map<String, Value>,
    pub poll_interval: Duration,
    pub logs: bool,
}

impl GenerationRequest {
    pub fn new(model_id: impl Into<String>, input: Map<String, Value>) -> Self {
        Self {
            model_id: model_id.into(),
            input,
            poll_interval: DEFAULT_POLL_INTERVAL,
            logs: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResponse {
    pub request_id: Option<String>,
    pub data: Value,
    pub logs: Vec<String>,
}

impl GenerationResponse {
    /// `data.images[*].url`, skipping blanks.
    pub fn image_urls(&self) -> Vec<String> {
        self.data
            .get("images")
            .and_then(Value::as_array)
            .map(|images| {
                images
                    .iter()
                    .filter_map(|image| image.get("url").and_then(Value::as_str))
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Submits a job to a hosted model and blocks until it resolves.
pub trait GenerationClient: Send + Sync {
    fn name(&self) -> &str;
    fn subscribe(&self, request: &GenerationRequest) -> Result<GenerationResponse>;
}

#[derive(Default)]
pub struct ClientRegistry {
    clients: BTreeMap<String, Arc<dyn GenerationClient>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<C: GenerationClient + 'static>(&mut self, client: C) {
        self.clients
            .insert(client.name().to_string(), Arc::new(client));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn GenerationClient>> {
        self.clients.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }
}

pub fn default_client_registry(fal: FalConfig) -> Result<ClientRegistry> {
    let mut registry = ClientRegistry::new();
    registry.register(DryrunClient);
    registry.register(FalClient::new(fal)?);
    Ok(registry)
}
