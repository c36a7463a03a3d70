// Translation architecture
//
// - client: OpenAI-compatible chat completions transport
// - batch: chunking, prompt building, response parsing and bounded retries

pub mod batch;
pub mod client;

use async_trait::async_trait;

pub use batch::{BatchTranslator, ChunkOutcome, TranslationChunk, parse_bilingual_response};
pub use client::ChatCompletionClient;

use crate::config::TranslateConfig;
use crate::error::Result;

/// External text-generation service. Stateless: one system instruction and one
/// user body in, raw model text out.
#[async_trait]
pub trait TranslationService: Send + Sync {
    async fn complete(&self, system_prompt: &str, body: &str) -> Result<String>;
}

/// Factory for creating translation service instances
pub struct TranslationServiceFactory;

impl TranslationServiceFactory {
    /// Create the default service (OpenAI-compatible HTTP API)
    pub fn create_service(config: &TranslateConfig) -> Result<Box<dyn TranslationService>> {
        Ok(Box::new(ChatCompletionClient::new(config)?))
    }
}
