//! Provider-agnostic types exchanged across the LLM port

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{LlmError, Result};

use super::stream::ChatStream;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One turn of a conversation. Slices of messages are in chronological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Used for tool calling on backends that support it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Per-call overrides. Unset fields, and numeric values of zero or below,
/// fall back to the adapter's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
}

impl GenerateOptions {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref().filter(|m| !m.is_empty())
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.max_tokens.filter(|n| *n > 0)
    }

    pub fn temperature(&self) -> Option<f32> {
        self.temperature.filter(|t| *t > 0.0)
    }

    pub fn top_p(&self) -> Option<f32> {
        self.top_p.filter(|p| *p > 0.0)
    }
}

/// Adapter-level defaults that [`GenerateOptions`] override
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingDefaults {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Effective parameters for a single backend call
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOptions {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

impl SamplingDefaults {
    pub fn resolve(&self, options: Option<&GenerateOptions>) -> ResolvedOptions {
        let options = options.cloned().unwrap_or_default();
        ResolvedOptions {
            model: options
                .model()
                .map(str::to_string)
                .unwrap_or_else(|| self.model.clone()),
            max_tokens: options.max_tokens().or(self.max_tokens),
            temperature: options.temperature().or(self.temperature),
            top_p: options.top_p(),
        }
    }
}

/// One increment of a streamed completion
#[derive(Debug, Default)]
pub struct ChatChunk {
    pub content: String,
    pub error: Option<LlmError>,
    /// Reserved end marker. Streams end by closing, so adapters never set it.
    pub done: bool,
}

impl ChatChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn failed(error: LlmError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Trait that every LLM backend adapter implements
///
/// Every operation takes a [`CancellationToken`]; cancelling it aborts the
/// in-flight backend call. Structured output is available on every provider
/// through [`GenerateJson`](super::json::GenerateJson).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stable provider identifier (e.g. "openai", "gemini")
    fn name(&self) -> &str;

    /// Single blocking round trip returning the reply text
    async fn generate(
        &self,
        ctx: &CancellationToken,
        messages: &[Message],
        options: Option<&GenerateOptions>,
    ) -> Result<String>;

    /// Open a streamed completion. The returned stream ends when the backend
    /// finishes or after a terminal error chunk. Cancelling `ctx` ends it with
    /// an `AgentFailed` "request cancelled" chunk.
    async fn stream(
        &self,
        ctx: &CancellationToken,
        messages: &[Message],
        options: Option<&GenerateOptions>,
    ) -> Result<ChatStream>;

    /// Cheapest request that proves the backend is reachable and authenticated
    async fn health_check(&self, ctx: &CancellationToken) -> Result<()>;
}
