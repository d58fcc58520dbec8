use anyhow::Result;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::client::{GenerationClient, GenerationRequest, GenerationResponse};

/// Offline client that answers instantly with placeholder URLs derived from
/// the request, one per `num_images`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunClient;

impl DryrunClient {
    fn request_hash(request: &GenerationRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(request.model_id.as_bytes());
        hasher.update(serde_json::to_vec(&request.input).unwrap_or_default());
        hex::encode(hasher.finalize())
    }
}

impl GenerationClient for DryrunClient {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn subscribe(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        let count = request
            .input
            .get("num_images")
            .and_then(Value::as_u64)
            .unwrap_or(1)
            .max(1);
        let digest = Self::request_hash(request);
        let model_path = request.model_id.trim_matches('/');
        let images: Vec<Value> = (0..count)
            .map(|idx| {
                let url = format!(
                    "https://dryrun.falboard.invalid/{model_path}/{}-{idx:02}.png",
                    &digest[..12]
                );
                json!({"url": url, "content_type": "image/png"})
            })
            .collect();

        let logs = if request.logs {
            vec![format!("dryrun: synthesized {count} image(s)")]
        } else {
            Vec::new()
        };
        Ok(GenerationResponse {
            request_id: Some(format!("dryrun-{}", &digest[..16])),
            data: json!({
                "images": images,
                "seed": request.input.get("seed").cloned().unwrap_or(Value::Null),
                "prompt": request.input.get("prompt").cloned().unwrap_or(Value::Null),
            }),
            logs,
        })
    }
}
