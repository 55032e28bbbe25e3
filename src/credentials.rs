//! API credential lookup.
//!
//! One environment variable (named by `[credentials].api_key_env`) holds the
//! key for both the embedding and the completion service. It is checked once
//! at startup, before any document is read; every front end fails fast when
//! it is missing.

use std::fmt;
use thiserror::Error;

use crate::config::Config;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("{0} is not set")]
    Missing(String),
    #[error("{0} is set but empty")]
    Empty(String),
}

/// An API key read from the environment. Never printed.
#[derive(Clone)]
pub struct ApiKey {
    var: String,
    value: String,
}

impl ApiKey {
    pub fn new(var: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            value: value.into(),
        }
    }

    /// The secret itself, for request headers.
    pub fn expose(&self) -> &str {
        &self.value
    }

    /// Name of the environment variable the key came from.
    pub fn var(&self) -> &str {
        &self.var
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("var", &self.var)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Read the configured API key from the process environment.
pub fn load_api_key(config: &Config) -> Result<ApiKey, CredentialError> {
    let var = config.credentials.api_key_env.as_str();
    api_key_from(var, std::env::var(var).ok())
}

fn api_key_from(var: &str, value: Option<String>) -> Result<ApiKey, CredentialError> {
    match value {
        None => Err(CredentialError::Missing(var.to_string())),
        Some(v) if v.trim().is_empty() => Err(CredentialError::Empty(var.to_string())),
        Some(v) => Ok(ApiKey::new(var, v.trim())),
    }
}
