mod client;
mod dryrun;
mod fal;
mod http;
mod session;

pub use client::{
    default_client_registry, ClientRegistry, GenerationClient, GenerationRequest,
    GenerationResponse, DEFAULT_POLL_INTERVAL,
};
pub use dryrun::DryrunClient;
pub use fal::{FalClient, FalConfig, DEFAULT_FAL_QUEUE_BASE};
pub use http::error_chain_text;
pub use session::{FormSession, RequestOptions};
