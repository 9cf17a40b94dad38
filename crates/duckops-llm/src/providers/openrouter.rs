//! OpenRouter provider
//!
//! OpenRouter speaks the OpenAI wire format. Requests go through a dedicated
//! pooled client and carry attribution and prompt-caching headers.

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

use super::openai::OpenAiProvider;
use super::stream::ChatStream;
use super::transport::{HeaderTransport, HttpTransport, PoolSettings};
use super::types::{GenerateOptions, LlmProvider, Message, SamplingDefaults};

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const OPENROUTER_DEFAULT_MODEL: &str = "arcee-ai/trinity-large-preview:free";
const OPENROUTER_MAX_TOKENS: u32 = 5000;

/// Headers stamped on every OpenRouter request
pub const OPENROUTER_HEADERS: [(&str, &str); 5] = [
    ("HTTP-Referer", "https://github.com/DuckOps/DuckOps"),
    ("X-Title", "DuckOps Agent"),
    ("Cache-Control", "max-age=3600"),
    ("X-OpenRouter-Client", "duckops"),
    // only honoured by Claude models
    ("anthropic-beta", "prompt-caching-2024-07-31"),
];

const OPENROUTER_POOL: PoolSettings = PoolSettings {
    max_idle_per_host: 100,
    idle_timeout: Duration::from_secs(90),
    request_timeout: Duration::from_secs(60),
};

/// OpenRouter endpoint and headers over [`OpenAiProvider`]
#[derive(Debug)]
pub struct OpenRouterProvider {
    inner: OpenAiProvider,
}

impl OpenRouterProvider {
    /// An empty `model` selects the free default model
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> AnyResult<Self> {
        let client = OPENROUTER_POOL.build_client()?;
        Self::with_transport(api_key, model, Arc::new(client))
    }

    /// Same as [`new`](Self::new) over a caller-supplied base transport
    pub fn with_transport<T>(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base: T,
    ) -> AnyResult<Self>
    where
        T: HttpTransport + 'static,
    {
        let mut model = model.into();
        if model.is_empty() {
            model = OPENROUTER_DEFAULT_MODEL.to_string();
        }
        let transport = HeaderTransport::new(OPENROUTER_HEADERS, base)?;

        Ok(Self {
            inner: OpenAiProvider::with_transport(
                "openrouter",
                api_key,
                OPENROUTER_BASE_URL,
                Arc::new(transport),
                SamplingDefaults {
                    model,
                    max_tokens: Some(OPENROUTER_MAX_TOKENS),
                    temperature: None,
                },
            ),
        })
    }

    pub fn model(&self) -> &str {
        self.inner.model()
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
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
