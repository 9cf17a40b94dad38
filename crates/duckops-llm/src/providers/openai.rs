//! OpenAI provider (GPT-4o, o3, etc.)
//!
//! Also the shared implementation of the chat-completions protocol used by
//! OpenRouter, LM Studio and any OpenAI-compatible endpoint.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use reqwest::{Method, Request, Response, Url};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{BoxError, ErrorKind, LlmError, Result};

use super::cancellable;
use super::sse;
use super::stream::{ChatStream, spawn_producer};
use super::transport::{HttpTransport, default_client};
use super::types::{GenerateOptions, LlmProvider, Message, SamplingDefaults};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o";
const OPENAI_MAX_TOKENS: u32 = 5000;

/// Text deltas decoded from a chat-completions event stream
pub(crate) type DeltaStream = BoxStream<'static, std::result::Result<String, BoxError>>;

/// OpenAI chat-completions provider
pub struct OpenAiProvider {
    name: String,
    api_key: String,
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    defaults: SamplingDefaults,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl OpenAiProvider {
    /// OpenAI itself. An empty `model` selects GPT-4o.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> anyhow::Result<Self> {
        let mut model = model.into();
        if model.is_empty() {
            model = OPENAI_DEFAULT_MODEL.to_string();
        }
        Ok(Self::with_transport(
            "openai",
            api_key,
            OPENAI_BASE_URL,
            Arc::new(default_client()?),
            SamplingDefaults {
                model,
                max_tokens: Some(OPENAI_MAX_TOKENS),
                temperature: None,
            },
        ))
    }

    /// Any chat-completions endpoint, identified as `name`
    pub fn with_transport(
        name: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        defaults: SamplingDefaults,
    ) -> Self {
        Self {
            name: name.into(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            transport,
            defaults,
        }
    }

    pub fn model(&self) -> &str {
        &self.defaults.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the wire request for a chat completion
    fn chat_request(
        &self,
        messages: &[Message],
        options: Option<&GenerateOptions>,
        stream: bool,
    ) -> ChatCompletionRequest {
        let resolved = self.defaults.resolve(options);
        ChatCompletionRequest {
            model: resolved.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            max_tokens: resolved.max_tokens,
            temperature: resolved.temperature,
            top_p: resolved.top_p,
            stream,
        }
    }

    fn request(&self, method: Method, path: &str) -> anyhow::Result<Request> {
        let url = format!("{}/{}", self.base_url, path);
        let url =
            Url::parse(&url).with_context(|| format!("Invalid {} endpoint: {}", self.name, url))?;
        let mut request = Request::new(method, url);
        let headers = request.headers_mut();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if !self.api_key.is_empty() {
            let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .context("API key is not a valid header value")?;
            headers.insert(AUTHORIZATION, bearer);
        }
        Ok(request)
    }

    fn json_request(&self, path: &str, body: &impl Serialize) -> anyhow::Result<Request> {
        let mut request = self.request(Method::POST, path)?;
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        *request.body_mut() = Some(serde_json::to_vec(body)?.into());
        Ok(request)
    }

    async fn send(&self, request: Request) -> anyhow::Result<Response> {
        let response = self
            .transport
            .execute(request)
            .await
            .with_context(|| format!("Failed to send request to {} API", self.name))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "{} API request failed with status {}: {}",
                self.name,
                status,
                error_text
            ));
        }
        Ok(response)
    }

    async fn complete(
        &self,
        body: &ChatCompletionRequest,
    ) -> anyhow::Result<ChatCompletionResponse> {
        let request = self.json_request("chat/completions", body)?;
        let response = self.send(request).await?;
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} API response", self.name))
    }

    async fn open_stream(&self, body: &ChatCompletionRequest) -> anyhow::Result<DeltaStream> {
        let request = self.json_request("chat/completions", body)?;
        let response = self.send(request).await?;
        let deltas = sse::data_lines(response).map(|line| -> std::result::Result<String, BoxError> {
            let data = line?;
            let chunk: ChatCompletionChunk = serde_json::from_str(&data)
                .with_context(|| format!("Malformed stream chunk: {}", data))?;
            if let Some(err) = chunk.error {
                return Err(anyhow!("stream error from backend: {}", err.message).into());
            }
            Ok(chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .unwrap_or_default())
        });
        Ok(deltas.boxed())
    }

    async fn retrieve_model(&self, id: &str) -> anyhow::Result<ModelObject> {
        let request = self.request(Method::GET, &format!("models/{}", id))?;
        let response = self.send(request).await?;
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} model descriptor", self.name))
    }

    async fn fetch_models(&self) -> anyhow::Result<ModelList> {
        let request = self.request(Method::GET, "models")?;
        let response = self.send(request).await?;
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} model list", self.name))
    }

    /// Identifiers of the models the endpoint currently serves
    pub async fn list_models(&self, ctx: &CancellationToken) -> Result<Vec<String>> {
        let listing = cancellable(ctx, self.fetch_models()).await.map_err(|e| {
            LlmError::wrap(
                e,
                ErrorKind::AgentFailed,
                format!("{} model listing failed", self.name),
            )
        })?;
        Ok(listing.data.into_iter().map(|m| m.id).collect())
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        ctx: &CancellationToken,
        messages: &[Message],
        options: Option<&GenerateOptions>,
    ) -> Result<String> {
        if messages.is_empty() {
            return Ok(String::new());
        }

        let body = self.chat_request(messages, options, false);
        debug!(
            "{} request: model={}, messages={}",
            self.name,
            body.model,
            body.messages.len()
        );

        let response = cancellable(ctx, self.complete(&body)).await.map_err(|e| {
            LlmError::wrap(
                e,
                ErrorKind::AgentFailed,
                format!("{} generation failed", self.name),
            )
        })?;

        debug!(
            "{} response: choices={}, finish_reason={:?}",
            self.name,
            response.choices.len(),
            response.choices.first().and_then(|c| c.finish_reason.as_deref())
        );

        let choice = response.choices.into_iter().next().ok_or_else(|| {
            LlmError::new(
                ErrorKind::AgentFailed,
                format!("empty response received from {}", self.name),
            )
        })?;

        Ok(choice.message.content.unwrap_or_default())
    }

    async fn stream(
        &self,
        ctx: &CancellationToken,
        messages: &[Message],
        options: Option<&GenerateOptions>,
    ) -> Result<ChatStream> {
        if messages.is_empty() {
            return Err(LlmError::new(
                ErrorKind::InvalidInput,
                "no messages provided for streaming",
            ));
        }

        let body = self.chat_request(messages, options, true);
        debug!(
            "{} stream request: model={}, messages={}",
            self.name,
            body.model,
            body.messages.len()
        );

        let deltas = cancellable(ctx, self.open_stream(&body)).await.map_err(|e| {
            LlmError::wrap(
                e,
                ErrorKind::AgentFailed,
                format!("{} streaming error", self.name),
            )
        })?;

        Ok(spawn_producer(&self.name, ctx, deltas))
    }

    async fn health_check(&self, ctx: &CancellationToken) -> Result<()> {
        let model = cancellable(ctx, self.retrieve_model(&self.defaults.model))
            .await
            .map_err(|e| {
                LlmError::wrap(
                    e,
                    ErrorKind::AgentFailed,
                    format!("{} health check failed", self.name),
                )
            })?;
        debug!("{} health check ok: model={}", self.name, model.id);
        Ok(())
    }
}

// ── OpenAI wire types ──

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Clone, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl From<&Message> for WireMessage {
    fn from(m: &Message) -> Self {
        Self {
            role: m.role.as_str(),
            content: m.content.clone(),
            name: m.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ModelObject {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelObject>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::transport::testing::StubTransport;
    use crate::providers::types::Role;

    fn provider(stub: &Arc<StubTransport>) -> OpenAiProvider {
        OpenAiProvider::with_transport(
            "openai",
            "sk-secret-key",
            "https://api.openai.com/v1/",
            stub.clone(),
            SamplingDefaults {
                model: OPENAI_DEFAULT_MODEL.to_string(),
                max_tokens: Some(OPENAI_MAX_TOKENS),
                temperature: None,
            },
        )
    }

    fn completion(text: &str) -> String {
        serde_json::json!({
            "choices": [{
                "message": {"role": "assistant", "content": text},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2}
        })
        .to_string()
    }

    fn conversation() -> Vec<Message> {
        vec![
            Message::system("You are helpful."),
            Message::user("hi"),
            Message::assistant("hello"),
            Message::new(Role::Tool, "42").with_name("calc"),
            Message::user("thanks"),
        ]
    }

    #[tokio::test]
    async fn test_generate_sends_roles_verbatim() {
        let stub = StubTransport::new().respond(200, completion("Hello!"));
        let ctx = CancellationToken::new();

        let text = provider(&stub)
            .generate(&ctx, &conversation(), None)
            .await
            .unwrap();
        assert_eq!(text, "Hello!");

        let seen = stub.last();
        assert_eq!(seen.method, Method::POST);
        assert_eq!(seen.url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(seen.headers[AUTHORIZATION], "Bearer sk-secret-key");

        let body = seen.body.unwrap();
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 5000);
        assert!(body.get("temperature").is_none());
        assert!(body.get("stream").is_none());
        let roles: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool", "user"]);
        assert_eq!(body["messages"][3]["name"], "calc");
    }

    #[tokio::test]
    async fn test_generate_applies_options() {
        let stub = StubTransport::new().respond(200, completion("ok"));
        let ctx = CancellationToken::new();
        let opts = GenerateOptions::default()
            .with_model("gpt-4o-mini")
            .with_max_tokens(64)
            .with_temperature(0.3)
            .with_top_p(0.5);

        provider(&stub)
            .generate(&ctx, &[Message::user("hi")], Some(&opts))
            .await
            .unwrap();

        let body = stub.last().body.unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 64);
        assert!((body["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
        assert!((body["top_p"].as_f64().unwrap() - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_generate_empty_messages_skips_backend() {
        let stub = StubTransport::new();
        let ctx = CancellationToken::new();
        let text = provider(&stub).generate(&ctx, &[], None).await.unwrap();
        assert!(text.is_empty());
        assert_eq!(stub.count(), 0);
    }

    #[tokio::test]
    async fn test_generate_no_choices_is_agent_failure() {
        let stub = StubTransport::new().respond(200, r#"{"choices": []}"#);
        let ctx = CancellationToken::new();
        let err = provider(&stub)
            .generate(&ctx, &[Message::user("hi")], None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AgentFailed);
        assert_eq!(err.message(), "empty response received from openai");
    }

    #[tokio::test]
    async fn test_generate_http_error_keeps_cause() {
        let stub = StubTransport::new().respond(401, r#"{"error":{"message":"bad key"}}"#);
        let ctx = CancellationToken::new();
        let err = provider(&stub)
            .generate(&ctx, &[Message::user("hi")], None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AgentFailed);
        assert_eq!(err.message(), "openai generation failed");
        let cause = std::error::Error::source(&err).unwrap().to_string();
        assert!(cause.contains("401"));
        assert!(cause.contains("bad key"));
    }

    #[tokio::test]
    async fn test_generate_respects_cancellation() {
        let stub = StubTransport::new().respond(200, completion("late"));
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = provider(&stub)
            .generate(&ctx, &[Message::user("hi")], None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AgentFailed);
        assert_eq!(stub.count(), 0);
    }

    #[tokio::test]
    async fn test_stream_forwards_deltas() {
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: {\"choices\":[]}\n\n",
            "data: [DONE]\n\n",
        );
        let stub = StubTransport::new().respond(200, sse);
        let ctx = CancellationToken::new();

        let mut stream = provider(&stub)
            .stream(&ctx, &[Message::user("hi")], None)
            .await
            .unwrap();
        assert_eq!(stream.recv().await.unwrap().content, "Hel");
        assert_eq!(stream.recv().await.unwrap().content, "lo");
        assert!(stream.recv().await.is_none());

        let body = stub.last().body.unwrap();
        assert_eq!(body["stream"], true);
    }

    #[tokio::test]
    async fn test_stream_error_event_is_terminal() {
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\n",
            "data: {\"error\":{\"message\":\"upstream overloaded\",\"code\":502}}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}\n\n",
        );
        let stub = StubTransport::new().respond(200, sse);
        let ctx = CancellationToken::new();

        let mut stream = provider(&stub)
            .stream(&ctx, &[Message::user("hi")], None)
            .await
            .unwrap();
        assert_eq!(stream.recv().await.unwrap().content, "par");
        let err = stream.recv().await.unwrap().error.unwrap();
        assert_eq!(err.kind(), ErrorKind::AgentFailed);
        let cause = std::error::Error::source(&err).unwrap().to_string();
        assert!(cause.contains("upstream overloaded"));
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_empty_body_closes() {
        let stub = StubTransport::new().respond(200, "");
        let ctx = CancellationToken::new();
        let mut stream = provider(&stub)
            .stream(&ctx, &[Message::user("hi")], None)
            .await
            .unwrap();
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_empty_messages_is_invalid_input() {
        let stub = StubTransport::new();
        let ctx = CancellationToken::new();
        let err = provider(&stub).stream(&ctx, &[], None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(stub.count(), 0);
    }

    #[tokio::test]
    async fn test_stream_open_failure() {
        let stub = StubTransport::new().respond(500, "boom");
        let ctx = CancellationToken::new();
        let err = provider(&stub)
            .stream(&ctx, &[Message::user("hi")], None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AgentFailed);
        assert_eq!(err.message(), "openai streaming error");
    }

    #[tokio::test]
    async fn test_health_check_fetches_model() {
        let stub = StubTransport::new().respond(200, r#"{"id":"gpt-4o","object":"model"}"#);
        let ctx = CancellationToken::new();
        provider(&stub).health_check(&ctx).await.unwrap();

        let seen = stub.last();
        assert_eq!(seen.method, Method::GET);
        assert_eq!(seen.url, "https://api.openai.com/v1/models/gpt-4o");
    }

    #[tokio::test]
    async fn test_health_check_failure() {
        let stub = StubTransport::new().respond(404, "model not found");
        let ctx = CancellationToken::new();
        let err = provider(&stub).health_check(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AgentFailed);
    }

    #[tokio::test]
    async fn test_list_models() {
        let stub = StubTransport::new().respond(200, r#"{"data":[{"id":"a"},{"id":"b"}]}"#);
        let ctx = CancellationToken::new();
        let models = provider(&stub).list_models(&ctx).await.unwrap();
        assert_eq!(models, vec!["a", "b"]);
        assert_eq!(stub.last().url, "https://api.openai.com/v1/models");
    }

    #[test]
    fn test_new_defaults_model() {
        let p = OpenAiProvider::new("sk-test", "").unwrap();
        assert_eq!(p.name(), "openai");
        assert_eq!(p.model(), "gpt-4o");
        assert_eq!(p.base_url(), OPENAI_BASE_URL);
    }

    #[test]
    fn test_openai_provider_debug_hides_key() {
        let stub = StubTransport::new();
        let debug = format!("{:?}", provider(&stub));
        assert!(!debug.contains("sk-secret-key"));
        assert!(debug.contains("gpt-4o"));
    }
}
