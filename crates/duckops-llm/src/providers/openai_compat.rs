//! OpenAI-compatible provider for Ollama, vLLM, Groq, Together, etc.
//!
//! Reuses the OpenAI wire format with a configurable base URL and name.

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

use super::openai::OpenAiProvider;
use super::stream::ChatStream;
use super::transport::{HeaderTransport, HttpTransport, default_client};
use super::types::{GenerateOptions, LlmProvider, Message, SamplingDefaults};

const COMPAT_MAX_TOKENS: u32 = 4096;
const COMPAT_TEMPERATURE: f32 = 0.7;

/// Prompt-caching hint sent to every compatible endpoint
pub const COMPAT_HEADERS: [(&str, &str); 1] = [("anthropic-beta", "prompt-caching-2024-07-31")];

/// OpenAI-compatible provider wrapping [`OpenAiProvider`] under a custom name
#[derive(Debug)]
pub struct OpenAiCompatProvider {
    inner: OpenAiProvider,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    ///
    /// - `name`: registry key and provider identity (e.g. "ollama", "groq")
    /// - `base_url`: the endpoint root (e.g. `http://localhost:11434/v1`)
    pub fn new(
        name: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> AnyResult<Self> {
        Self::with_transport(name, api_key, model, base_url, default_client()?)
    }

    pub fn with_transport<T>(
        name: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        base: T,
    ) -> AnyResult<Self>
    where
        T: HttpTransport + 'static,
    {
        let transport = HeaderTransport::new(COMPAT_HEADERS, base)?;
        Ok(Self {
            inner: OpenAiProvider::with_transport(
                name,
                api_key,
                base_url,
                Arc::new(transport),
                SamplingDefaults {
                    model: model.into(),
                    max_tokens: Some(COMPAT_MAX_TOKENS),
                    temperature: Some(COMPAT_TEMPERATURE),
                },
            ),
        })
    }

    pub fn model(&self) -> &str {
        self.inner.model()
    }

    pub fn base_url(&self) -> &str {
        self.inner.base_url()
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(
        &self,
        ctx: &CancellationToken,
        messages: &[Message],
        options: Option<&GenerateOptions>,
    ) -> Result<String> {
        self.inner.generate(ctx, messages, options).await
    }

    async fn stream(
        &self,
        ctx: &CancellationToken,
        messages: &[Message],
        options: Option<&GenerateOptions>,
    ) -> Result<ChatStream> {
        self.inner.stream(ctx, messages, options).await
    }

    async fn health_check(&self, ctx: &CancellationToken) -> Result<()> {
        self.inner.health_check(ctx).await
    }
}
