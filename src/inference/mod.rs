//! Turning sensor history into natural-language insights.
//!
//! The orchestrator renders recent readings into a short context, wraps it
//! in a chat prompt and asks a [`CompletionModel`] for an answer. When no
//! model is configured, or the call fails, a rule-based summary of the same
//! context is returned instead, so the periodic loop never stalls on the
//! backend.

pub mod context;
pub mod orchestrator;

#[cfg(feature = "http-model")]
pub mod llama;

pub use context::{build_prompt, fallback_summary, render_context, DEFAULT_QUERY};
pub use orchestrator::{
    ContextRecord, InferenceConfig, InferenceOrchestrator, InferenceResult, ResponseSource,
};

#[cfg(feature = "http-model")]
pub use llama::{LlamaClient, LlamaConfig};

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Sampling parameters passed to the model with every prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub stop: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 150,
            temperature: 0.7,
            top_p: 0.9,
            stop: vec!["<|end|>".to_string(), "<|user|>".to_string()],
        }
    }
}

/// Model call errors. None of these are fatal to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    /// No backend reachable or configured
    Unavailable(String),
    /// Transport failure
    Request(String),
    /// Backend answered with a non-success status
    Status { status: u16, message: String },
    /// Backend answer could not be decoded
    Decode(String),
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelError::Unavailable(msg) => write!(f, "Model unavailable: {msg}"),
            ModelError::Request(msg) => write!(f, "Model request error: {msg}"),
            ModelError::Status { status, message } => {
                write!(f, "Model server error ({status}): {message}")
            }
            ModelError::Decode(msg) => write!(f, "Model response error: {msg}"),
        }
    }
}

impl std::error::Error for ModelError {}

pub type CompletionFuture<'a> =
    Pin<Box<dyn Future<Output = Result<String, ModelError>> + Send + 'a>>;

/// An opaque text-completion capability.
pub trait CompletionModel: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    fn complete<'a>(
        &'a self,
        prompt: &'a str,
        params: &'a GenerationParams,
    ) -> CompletionFuture<'a>;
}
