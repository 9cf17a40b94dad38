//! Secret lookup for API keys
//!
//! A secret resolves from, in order: a non-empty environment variable, a
//! mounted secret file (`/run/secrets/{name}`, trimmed), then a fallback.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::{ErrorKind, LlmError, Result};

pub const DEFAULT_SECRETS_DIR: &str = "/run/secrets";

/// Source of environment variables
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Reads the process environment
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Resolves secrets against an environment and a secret-file directory
#[derive(Clone)]
pub struct SecretStore {
    dir: PathBuf,
    env: EnvLookup,
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore").field("dir", &self.dir).finish()
    }
}

impl Default for SecretStore {
    fn default() -> Self {
        Self::new(DEFAULT_SECRETS_DIR)
    }
}

impl SecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            env: Arc::new(process_env),
        }
    }

    /// Read variables from `env` instead of the process environment
    pub fn with_env<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(env);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn env_var(&self, key: &str) -> Option<String> {
        (self.env)(key)
    }

    pub fn get(&self, env_key: &str, secret_name: &str, fallback: &str) -> String {
        if let Some(value) = self.env_var(env_key).filter(|v| !v.is_empty()) {
            debug!("Secret {} resolved from environment", env_key);
            return value;
        }

        if !secret_name.is_empty() {
            let path = self.dir.join(secret_name);
            if let Ok(contents) = std::fs::read_to_string(&path) {
                debug!("Secret {} resolved from {}", secret_name, path.display());
                return contents.trim().to_string();
            }
        }

        fallback.to_string()
    }

    /// Like [`get`](Self::get) with no fallback; an unresolved secret is `NotFound`
    pub fn must_get(&self, env_key: &str, secret_name: &str) -> Result<String> {
        let value = self.get(env_key, secret_name, "");
        if value.is_empty() {
            return Err(LlmError::new(ErrorKind::NotFound, "required secret not found")
                .with_context("env", env_key)
                .with_context("secret", secret_name));
        }
        Ok(value)
    }
}

/// Resolve a secret against the process environment and default secrets directory
pub fn get_secret(env_key: &str, secret_name: &str, fallback: &str) -> String {
    SecretStore::default().get(env_key, secret_name, fallback)
}

pub fn must_get_secret(env_key: &str, secret_name: &str) -> Result<String> {
    SecretStore::default().must_get(env_key, secret_name)
}
