//! LM Studio local inference server
//!
//! LM Studio serves the OpenAI API on localhost and does not check API keys.

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;

use super::openai::OpenAiProvider;
use super::stream::ChatStream;
use super::transport::{HttpTransport, default_client};
use super::types::{GenerateOptions, LlmProvider, Message, SamplingDefaults};

pub const LMSTUDIO_BASE_URL: &str = "http://localhost:1234/v1";
/// LM Studio answers with whichever model is currently loaded
pub const LMSTUDIO_DEFAULT_MODEL: &str = "local-model";
const LMSTUDIO_PLACEHOLDER_KEY: &str = "not-needed";
const LMSTUDIO_MAX_TOKENS: u32 = 4000;

#[derive(Debug)]
pub struct LmStudioProvider {
    inner: OpenAiProvider,
}

impl LmStudioProvider {
    /// Empty arguments fall back to the local defaults
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> AnyResult<Self> {
        Ok(Self::with_transport(
            api_key,
            model,
            base_url,
            Arc::new(default_client()?),
        ))
    }

    pub fn with_transport(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let api_key = non_empty_or(api_key.into(), LMSTUDIO_PLACEHOLDER_KEY);
        let model = non_empty_or(model.into(), LMSTUDIO_DEFAULT_MODEL);
        let base_url = non_empty_or(base_url.into(), LMSTUDIO_BASE_URL);

        Self {
            inner: OpenAiProvider::with_transport(
                "lmstudio",
                api_key,
                base_url,
                transport,
                SamplingDefaults {
                    model,
                    max_tokens: Some(LMSTUDIO_MAX_TOKENS),
                    temperature: None,
                },
            ),
        }
    }

    pub fn model(&self) -> &str {
        self.inner.model()
    }

    pub fn base_url(&self) -> &str {
        self.inner.base_url()
    }
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

#[async_trait]
impl LlmProvider for LmStudioProvider {
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

    /// LM Studio does not reliably serve single model descriptors, so list instead
    async fn health_check(&self, ctx: &CancellationToken) -> Result<()> {
        let models = self.inner.list_models(ctx).await?;
        debug!("lmstudio health check ok: {} model(s) loaded", models.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::providers::transport::testing::StubTransport;

    #[test]
    fn test_lmstudio_defaults() {
        let p = LmStudioProvider::new("", "", "").unwrap();
        assert_eq!(p.name(), "lmstudio");
        assert_eq!(p.model(), "local-model");
        assert_eq!(p.base_url(), "http://localhost:1234/v1");
    }

    #[tokio::test]
    async fn test_lmstudio_uses_placeholder_key_and_custom_url() {
        let stub = StubTransport::new().respond(
            200,
            r#"{"choices":[{"message":{"content":"local"},"finish_reason":"stop"}]}"#,
        );
        let p = LmStudioProvider::with_transport(
            "",
            "qwen2.5",
            "http://10.0.0.5:1234/v1",
            stub.clone(),
        );
        let ctx = CancellationToken::new();

        let text = p.generate(&ctx, &[Message::user("hi")], None).await.unwrap();
        assert_eq!(text, "local");

        let seen = stub.last();
        assert_eq!(seen.url, "http://10.0.0.5:1234/v1/chat/completions");
        assert_eq!(seen.headers["authorization"], "Bearer not-needed");
        let body = seen.body.unwrap();
        assert_eq!(body["model"], "qwen2.5");
        assert_eq!(body["max_tokens"], 4000);
    }

    #[tokio::test]
    async fn test_health_check_lists_models() {
        let stub = StubTransport::new().respond(200, r#"{"object":"list","data":[]}"#);
        let p = LmStudioProvider::with_transport("", "", "", stub.clone());
        p.health_check(&CancellationToken::new()).await.unwrap();
        assert_eq!(stub.last().url, "http://localhost:1234/v1/models");
    }

    #[tokio::test]
    async fn test_health_check_unreachable() {
        let stub = StubTransport::new().respond(503, "loading model");
        let p = LmStudioProvider::with_transport("", "", "", stub.clone());
        let err = p.health_check(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AgentFailed);
    }
}
