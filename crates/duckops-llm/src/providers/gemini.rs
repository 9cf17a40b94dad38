//! Google Gemini provider
//!
//! Talks to the Generative Language REST API. The HTTP client is created once
//! in [`GeminiProvider::connect`] and shared by every call until
//! [`GeminiProvider::close`] releases it.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::RwLock;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderName, HeaderValue};
use reqwest::{Method, Request, Response, Url};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{BoxError, ErrorKind, LlmError, Result};

use super::cancellable;
use super::openai::DeltaStream;
use super::sse;
use super::stream::{ChatStream, spawn_producer};
use super::transport::{HttpTransport, default_client};
use super::types::{GenerateOptions, LlmProvider, Message, Role, SamplingDefaults};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-1.5-flash";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Google Gemini provider
pub struct GeminiProvider {
    api_key: String,
    base_url: String,
    defaults: SamplingDefaults,
    client: RwLock<Option<Arc<dyn HttpTransport>>>,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.defaults.model)
            .field("closed", &self.client.read().is_none())
            .finish()
    }
}

impl GeminiProvider {
    /// Open the persistent client. An empty `model` selects gemini-1.5-flash.
    pub async fn connect(
        ctx: &CancellationToken,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let client = cancellable(ctx, async { default_client() })
            .await
            .map_err(|e| {
                LlmError::wrap(
                    e,
                    ErrorKind::Internal,
                    "failed to initialize persistent gemini client",
                )
            })?;
        Ok(Self::with_transport(
            api_key,
            model,
            GEMINI_BASE_URL,
            Arc::new(client),
        ))
    }

    pub fn with_transport(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let mut model = model.into();
        if model.is_empty() {
            model = GEMINI_DEFAULT_MODEL.to_string();
        }
        Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            defaults: SamplingDefaults {
                model,
                max_tokens: None,
                temperature: None,
            },
            client: RwLock::new(Some(transport)),
        }
    }

    pub fn model(&self) -> &str {
        &self.defaults.model
    }

    /// Release the underlying client. Calls made afterwards fail.
    pub fn close(&self) {
        if self.client.write().take().is_some() {
            info!("Gemini client closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.client.read().is_none()
    }

    fn client(&self) -> Result<Arc<dyn HttpTransport>> {
        self.client
            .read()
            .clone()
            .ok_or_else(|| LlmError::new(ErrorKind::AgentFailed, "gemini client closed"))
    }

    /// Split into prior history and the new turn, in Gemini's role vocabulary
    fn to_gemini_contents(messages: &[Message]) -> Vec<GeminiContent> {
        let Some((last, history)) = messages.split_last() else {
            return Vec::new();
        };
        let mut contents: Vec<GeminiContent> = history
            .iter()
            .map(|m| GeminiContent::text(gemini_role(m.role), &m.content))
            .collect();
        contents.push(GeminiContent::text("user", &last.content));
        contents
    }

    fn content_request(
        &self,
        messages: &[Message],
        options: Option<&GenerateOptions>,
    ) -> (String, GenerateContentRequest) {
        let resolved = self.defaults.resolve(options);
        let config = GenerationConfig {
            max_output_tokens: resolved.max_tokens,
            temperature: resolved.temperature,
            top_p: resolved.top_p,
        };
        let body = GenerateContentRequest {
            contents: Self::to_gemini_contents(messages),
            generation_config: (!config.is_empty()).then_some(config),
        };
        (resolved.model, body)
    }

    fn request(&self, method: Method, path_and_query: &str) -> anyhow::Result<Request> {
        let url = format!("{}/v1beta/{}", self.base_url, path_and_query);
        let url = Url::parse(&url).with_context(|| format!("Invalid Gemini endpoint: {}", url))?;
        let mut request = Request::new(method, url);
        let headers = request.headers_mut();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static(API_KEY_HEADER),
            HeaderValue::from_str(&self.api_key).context("API key is not a valid header value")?,
        );
        Ok(request)
    }

    fn json_request(&self, path_and_query: &str, body: &impl Serialize) -> anyhow::Result<Request> {
        let mut request = self.request(Method::POST, path_and_query)?;
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        *request.body_mut() = Some(serde_json::to_vec(body)?.into());
        Ok(request)
    }

    async fn send(client: &dyn HttpTransport, request: Request) -> anyhow::Result<Response> {
        let response = client
            .execute(request)
            .await
            .context("Failed to send request to Gemini API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Gemini API request failed with status {}: {}",
                status,
                error_text
            ));
        }
        Ok(response)
    }

    async fn complete(
        &self,
        client: &dyn HttpTransport,
        model: &str,
        body: &GenerateContentRequest,
    ) -> anyhow::Result<GenerateContentResponse> {
        let request = self.json_request(&format!("models/{}:generateContent", model), body)?;
        let response = Self::send(client, request).await?;
        response
            .json()
            .await
            .context("Failed to parse Gemini API response")
    }

    async fn open_stream(
        &self,
        client: &dyn HttpTransport,
        model: &str,
        body: &GenerateContentRequest,
    ) -> anyhow::Result<DeltaStream> {
        let request =
            self.json_request(&format!("models/{}:streamGenerateContent?alt=sse", model), body)?;
        let response = Self::send(client, request).await?;
        let deltas = sse::data_lines(response).map(|line| -> std::result::Result<String, BoxError> {
            let data = line?;
            let event: GenerateContentResponse = serde_json::from_str(&data)
                .with_context(|| format!("Malformed Gemini stream event: {}", data))?;
            if let Some(err) = event.error {
                return Err(anyhow!("stream error from Gemini: {}", err.message).into());
            }
            Ok(event
                .candidates
                .into_iter()
                .next()
                .map(|c| c.content.joined_text())
                .unwrap_or_default())
        });
        Ok(deltas.boxed())
    }

    async fn list_one_model(&self, client: &dyn HttpTransport) -> anyhow::Result<ModelList> {
        let request = self.request(Method::GET, "models?pageSize=1")?;
        let response = Self::send(client, request).await?;
        response
            .json()
            .await
            .context("Failed to parse Gemini model list")
    }
}

fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::Assistant => "model",
        _ => "user",
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
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
        let client = self.client()?;

        let (model, body) = self.content_request(messages, options);
        debug!(
            "Gemini request: model={}, contents={}",
            model,
            body.contents.len()
        );

        let response = cancellable(ctx, self.complete(client.as_ref(), &model, &body))
            .await
            .map_err(|e| {
                LlmError::wrap(e, ErrorKind::AgentFailed, "failed to generate from gemini API")
            })?;

        debug!("Gemini response: candidates={}", response.candidates.len());

        match response.candidates.into_iter().next() {
            Some(candidate) if !candidate.content.parts.is_empty() => {
                Ok(candidate.content.joined_text())
            }
            _ => Err(LlmError::new(
                ErrorKind::AgentFailed,
                "empty response generated from gemini",
            )),
        }
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
        let client = self.client()?;

        let (model, body) = self.content_request(messages, options);
        debug!(
            "Gemini stream request: model={}, contents={}",
            model,
            body.contents.len()
        );

        let deltas = cancellable(ctx, self.open_stream(client.as_ref(), &model, &body))
            .await
            .map_err(|e| LlmError::wrap(e, ErrorKind::AgentFailed, "gemini streaming error"))?;

        Ok(spawn_producer(self.name(), ctx, deltas))
    }

    async fn health_check(&self, ctx: &CancellationToken) -> Result<()> {
        let client = self.client()?;
        let listing = cancellable(ctx, self.list_one_model(client.as_ref()))
            .await
            .map_err(|e| LlmError::wrap(e, ErrorKind::AgentFailed, "gemini health check failed"))?;
        debug!("Gemini health check ok: {} model(s) listed", listing.models.len());
        Ok(())
    }
}

// ── Gemini wire types ──

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

impl GeminiContent {
    fn text(role: &str, text: &str) -> Self {
        Self {
            role: role.to_string(),
            parts: vec![GeminiPart {
                text: Some(text.to_string()),
            }],
        }
    }

    /// Concatenated text parts; other part kinds are ignored
    fn joined_text(&self) -> String {
        self.parts.iter().filter_map(|p| p.text.as_deref()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

impl GenerationConfig {
    fn is_empty(&self) -> bool {
        self.max_output_tokens.is_none() && self.temperature.is_none() && self.top_p.is_none()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    error: Option<GeminiErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: GeminiContent,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiErrorBody {
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<serde_json::Value>,
}
