//! Multi-provider LLM abstraction layer
//!
//! Supports OpenAI, OpenRouter, LM Studio, Google Gemini, and any
//! OpenAI-compatible endpoint. Adapters implement the [`LlmProvider`] trait
//! and are looked up by name through a [`ProviderRegistry`].

pub mod gemini;
pub mod json;
pub mod lmstudio;
pub mod openai;
pub mod openai_compat;
pub mod openrouter;
pub mod registry;
pub mod sse;
pub mod stream;
pub mod transport;
pub mod types;

use std::future::Future;
use tokio_util::sync::CancellationToken;

pub use gemini::GeminiProvider;
pub use json::{GenerateJson, decode_json_output, strip_code_fence};
pub use lmstudio::LmStudioProvider;
pub use openai::OpenAiProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use openrouter::OpenRouterProvider;
pub use registry::ProviderRegistry;
pub use stream::ChatStream;
pub use transport::{HeaderTransport, HttpTransport, PoolSettings};
pub use types::{ChatChunk, GenerateOptions, LlmProvider, Message, Role, SamplingDefaults};

/// Run a backend call, giving up as soon as `ctx` is cancelled
pub(crate) async fn cancellable<T>(
    ctx: &CancellationToken,
    fut: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    tokio::select! {
        biased;
        _ = ctx.cancelled() => anyhow::bail!("request cancelled"),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancellable_passes_result_through() {
        let ctx = CancellationToken::new();
        let value = cancellable(&ctx, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_cancellable_aborts_pending_call() {
        let ctx = CancellationToken::new();
        let trigger = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = cancellable(&ctx, async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "request cancelled");
    }
}
