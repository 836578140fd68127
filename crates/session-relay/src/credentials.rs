//! Credential sources for the `auth` frame.
//!
//! The client asks for a token on every (re)connect and never caches it,
//! since access tokens rotate.

use crate::{RelayError, RelayResult};
use async_trait::async_trait;

/// Supplies a short-lived bearer token.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Current access token, `None` when signed out.
    async fn access_token(&self) -> RelayResult<Option<String>>;
}

/// A fixed token, or none at all.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    token: Option<String>,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn access_token(&self) -> RelayResult<Option<String>> {
        Ok(self.token.clone())
    }
}

/// Reads the token from an environment variable at each call.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl CredentialSource for EnvCredentials {
    async fn access_token(&self) -> RelayResult<Option<String>> {
        match std::env::var(&self.var) {
            Ok(value) if value.trim().is_empty() => Ok(None),
            Ok(value) => Ok(Some(value.trim().to_string())),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(RelayError::Credentials(format!("{}: {}", self.var, e))),
        }
    }
}
