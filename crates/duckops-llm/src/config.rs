//! Provider configuration loading
//!
//! ```toml
//! default = "openrouter"
//!
//! [providers.openrouter]
//! api_key = "${OPENROUTER_API_KEY}"
//!
//! [providers.lmstudio]
//! base_url = "http://localhost:1234/v1"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::secrets::{SecretStore, process_env};

/// Registry key used when no default provider is configured
pub const DEFAULT_PROVIDER_NAME: &str = "default";

/// Connection settings for one backend
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub base_url: String,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    /// Provider used when a lookup names nothing registered
    #[serde(default)]
    pub default: String,
}

/// Mask a secret string for safe display in Debug output / logs.
/// Shows first 3 and last 4 chars for keys longer than 7 chars, otherwise "***".
fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".duckops")
}

impl Config {
    pub fn load(custom_path: Option<&Path>) -> Result<Self> {
        let path = custom_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| config_dir().join("config.toml"));

        // Refuse configs that other users can read
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(&path) {
                let mode = metadata.permissions().mode();
                if mode & 0o077 != 0 {
                    return Err(anyhow::anyhow!(
                        "Config file {:?} has overly permissive permissions ({:o}). \
                         It may contain secrets. Fix with: chmod 600 {:?}",
                        path,
                        mode & 0o777,
                        path
                    ));
                }
            }
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        debug!(
            "Loaded config from {}: {} provider(s)",
            path.display(),
            config.providers.len()
        );
        Ok(config)
    }

    /// Expand allowlisted `${VAR}` references from the process environment, then parse
    pub fn parse(content: &str) -> Result<Self> {
        Self::parse_with_env(content, process_env)
    }

    pub fn parse_with_env(content: &str, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        for name in hardcoded_key_names(content) {
            warn!(
                "API key for '{}' is hardcoded in config file. For security, use environment \
                 variables: api_key = \"${{{}}}\"",
                name,
                env_key_for(&name)
            );
        }

        let expanded = expand_env_vars(content, env);
        Ok(toml::from_str(&expanded)?)
    }

    /// Registry default, or [`DEFAULT_PROVIDER_NAME`] when unset
    pub fn default_name(&self) -> &str {
        if self.default.is_empty() {
            DEFAULT_PROVIDER_NAME
        } else {
            &self.default
        }
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    /// Fill empty API keys from `{NAME}_API_KEY` or the `{name}_api_key` secret file
    pub fn resolve_secrets(&mut self, store: &SecretStore) {
        for (name, provider) in self.providers.iter_mut() {
            if !provider.api_key.is_empty() {
                continue;
            }
            let key = store.get(&env_key_for(name), &format!("{}_api_key", name), "");
            if !key.is_empty() {
                debug!("Resolved API key for '{}' from secrets", name);
                provider.api_key = key;
            }
        }
    }
}

/// `open-router` becomes `OPEN_ROUTER_API_KEY`
fn env_key_for(name: &str) -> String {
    format!("{}_API_KEY", name.to_uppercase().replace('-', "_"))
}

fn looks_hardcoded(api_key: &str) -> bool {
    !api_key.is_empty() && api_key != "not-needed" && !api_key.contains("${")
}

/// Providers whose API key is written literally, judged before expansion
fn hardcoded_key_names(content: &str) -> Vec<String> {
    let Ok(raw) = toml::from_str::<Config>(content) else {
        return Vec::new();
    };
    let mut names: Vec<String> = raw
        .providers
        .into_iter()
        .filter(|(_, provider)| looks_hardcoded(&provider.api_key))
        .map(|(name, _)| name)
        .collect();
    names.sort();
    names
}

/// Allowlist of environment variable names that may be expanded in config files.
/// This prevents an attacker who can modify the config from reading arbitrary env vars.
const ALLOWED_ENV_VARS: &[&str] = &[
    "OPENAI_API_KEY",
    "OPENROUTER_API_KEY",
    "LMSTUDIO_API_KEY",
    "GEMINI_API_KEY",
    "GOOGLE_API_KEY",
    "GROQ_API_KEY",
    "TOGETHER_API_KEY",
    "DEEPSEEK_API_KEY",
    "MISTRAL_API_KEY",
    "OLLAMA_HOST",
    "DUCKOPS_DEFAULT_PROVIDER",
    "HOME",
    "USER",
];

fn expand_env_vars(s: &str, env: impl Fn(&str) -> Option<String>) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !ALLOWED_ENV_VARS.contains(&var_name.as_str()) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            // Leave the ${VAR} unexpanded so it's obvious
            pos = abs_start + end + 1;
            continue;
        }

        let value = env(&var_name).unwrap_or_default();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value.len();
    }
    result
}
