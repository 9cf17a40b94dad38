//! duckops-llm - Uniform interface over cloud and local LLM backends
//!
//! This crate provides:
//! - The [`LlmProvider`] port with blocking, streaming and health operations
//! - Adapters for OpenAI, OpenRouter, LM Studio, Gemini and OpenAI-compatible endpoints
//! - A [`ProviderRegistry`] resolving providers by name with a default fallback
//! - Structured JSON output via [`GenerateJson`]
//! - TOML configuration and secret resolution

pub mod config;
pub mod error;
pub mod providers;
pub mod secrets;

// Re-export main types for convenience
pub use config::{Config, ProviderConfig, config_dir};
pub use error::{ErrorKind, LlmError, Result};
pub use providers::{
    ChatChunk, ChatStream, GeminiProvider, GenerateJson, GenerateOptions, LlmProvider,
    LmStudioProvider, Message, OpenAiCompatProvider, OpenAiProvider, OpenRouterProvider,
    ProviderRegistry, Role,
};
pub use secrets::{SecretStore, get_secret, must_get_secret};
