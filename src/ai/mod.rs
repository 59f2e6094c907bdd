mod client;
pub mod prompts;

use async_trait::async_trait;

use crate::models::GenerationResult;

pub use client::OpenAiClient;

/// A generative text capability: prompt plus token budget in, text or a
/// classified failure out. Implementations never return errors; every
/// failure mode is a `GenerationResult::Failed` value.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> GenerationResult;

    fn model_version(&self) -> &str;
}
