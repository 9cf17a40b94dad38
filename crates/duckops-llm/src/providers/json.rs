//! Structured output: run a completion and decode it as JSON
//!
//! Models often wrap JSON in a markdown fence. A single leading ```` ```json ````
//! or bare ```` ``` ```` fence and its closing marker are removed before
//! parsing. Anything more elaborate (several blocks, prose around the fence)
//! is left untouched and fails to parse.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ErrorKind, LlmError, Result};

use super::types::{GenerateOptions, LlmProvider, Message};

const JSON_FENCE: &str = "```json";
const FENCE: &str = "```";

/// Structured-output generation, available on every [`LlmProvider`]
#[async_trait]
pub trait GenerateJson: LlmProvider {
    /// Generate a completion and decode it into `T`
    ///
    /// Failures from `generate` are returned unchanged. Output that is not
    /// valid JSON for `T` yields `InvalidInput` with the stripped text under
    /// the `raw_response` context key.
    async fn generate_json<T>(
        &self,
        ctx: &CancellationToken,
        messages: &[Message],
        options: Option<&GenerateOptions>,
    ) -> Result<T>
    where
        T: DeserializeOwned + Send;
}

#[async_trait]
impl<P: LlmProvider + ?Sized> GenerateJson for P {
    async fn generate_json<T>(
        &self,
        ctx: &CancellationToken,
        messages: &[Message],
        options: Option<&GenerateOptions>,
    ) -> Result<T>
    where
        T: DeserializeOwned + Send,
    {
        let raw = self.generate(ctx, messages, options).await?;
        decode_json_output(&raw)
    }
}

/// Strip an optional code fence from `raw` and parse the remainder
pub fn decode_json_output<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let cleaned = strip_code_fence(raw);
    serde_json::from_str(cleaned).map_err(|e| {
        debug!("LLM output is not valid JSON: {}", e);
        LlmError::wrap(e, ErrorKind::InvalidInput, "invalid llm json response")
            .with_context("raw_response", cleaned)
    })
}

/// Remove a surrounding ```` ```json ```` or ```` ``` ```` fence, if present
pub fn strip_code_fence(raw: &str) -> &str {
    let text = raw.trim();
    let inner = if let Some(rest) = text.strip_prefix(JSON_FENCE) {
        rest
    } else if let Some(rest) = text.strip_prefix(FENCE) {
        rest
    } else {
        return text;
    };
    inner.strip_suffix(FENCE).unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::stream::ChatStream;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Finding {
        severity: String,
        score: u32,
    }

    /// Provider that answers every request with a fixed reply
    struct CannedProvider {
        reply: std::result::Result<String, ErrorKind>,
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        async fn generate(
            &self,
            _ctx: &CancellationToken,
            _messages: &[Message],
            _options: Option<&GenerateOptions>,
        ) -> Result<String> {
            self.reply
                .clone()
                .map_err(|kind| LlmError::new(kind, "canned generation failed"))
        }

        async fn stream(
            &self,
            _ctx: &CancellationToken,
            _messages: &[Message],
            _options: Option<&GenerateOptions>,
        ) -> Result<ChatStream> {
            Err(LlmError::new(ErrorKind::AgentFailed, "not streamed"))
        }

        async fn health_check(&self, _ctx: &CancellationToken) -> Result<()> {
            Ok(())
        }
    }

    fn canned(reply: &str) -> CannedProvider {
        CannedProvider {
            reply: Ok(reply.to_string()),
        }
    }

    #[test]
    fn test_strip_json_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn test_strip_generic_fence() {
        assert_eq!(strip_code_fence("  ```\n[1, 2]\n```  "), "[1, 2]");
    }

    #[test]
    fn test_strip_leaves_plain_text() {
        assert_eq!(strip_code_fence("  {\"a\":1}\n"), "{\"a\":1}");
        assert_eq!(strip_code_fence("here you go: ```json {}```"), "here you go: ```json {}```");
    }

    #[test]
    fn test_strip_unterminated_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn test_decode_fenced_object() {
        let value: serde_json::Value = decode_json_output("```json\n{\"a\":1}\n```").unwrap();
        assert_eq!(value, serde_json::json!({"a": 1}));
    }

    #[test]
    fn test_decode_invalid_keeps_stripped_text() {
        let err = decode_json_output::<serde_json::Value>("```\nnot json at all\n```").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(err.context()["raw_response"], "not json at all");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_multiple_blocks_fail_to_parse() {
        let raw = "```json\n{\"a\":1}\n```\n```json\n{\"b\":2}\n```";
        let err = decode_json_output::<serde_json::Value>(raw).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_generate_json_into_struct() {
        let provider = canned("```json\n{\"severity\": \"high\", \"score\": 9}\n```");
        let ctx = CancellationToken::new();
        let finding: Finding = provider
            .generate_json(&ctx, &[Message::user("scan")], None)
            .await
            .unwrap();
        assert_eq!(
            finding,
            Finding {
                severity: "high".to_string(),
                score: 9
            }
        );
    }

    #[tokio::test]
    async fn test_generate_json_through_trait_object() {
        let provider: std::sync::Arc<dyn LlmProvider> =
            std::sync::Arc::new(canned("{\"k\": \"v\"}"));
        let ctx = CancellationToken::new();
        let map: HashMap<String, String> = provider
            .generate_json(&ctx, &[Message::user("x")], None)
            .await
            .unwrap();
        assert_eq!(map["k"], "v");
    }

    #[tokio::test]
    async fn test_generate_json_shape_mismatch() {
        let provider = canned("{\"severity\": 3}");
        let ctx = CancellationToken::new();
        let err = provider
            .generate_json::<Finding>(&ctx, &[Message::user("scan")], None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(err.context()["raw_response"], "{\"severity\": 3}");
    }

    #[tokio::test]
    async fn test_generate_json_propagates_generate_failure() {
        let provider = CannedProvider {
            reply: Err(ErrorKind::AgentFailed),
        };
        let ctx = CancellationToken::new();
        let err = provider
            .generate_json::<Finding>(&ctx, &[Message::user("scan")], None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AgentFailed);
        assert_eq!(err.message(), "canned generation failed");
        assert!(err.context().is_empty());
    }
}
