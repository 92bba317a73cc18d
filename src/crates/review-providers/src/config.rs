//! Configuration for the HTTP-backed capability providers

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Connection settings shared by the remote providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteProviderConfig {
    /// API key for authentication.
    pub api_key: String,

    /// Base URL of the service, e.g. "https://models.internal.example.com/v1".
    pub base_url: String,

    /// Model name/identifier passed through in requests.
    pub model: String,

    /// Request timeout duration.
    #[serde(default = "default_timeout")]
    pub timeout: Duration,
}

impl RemoteProviderConfig {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
            timeout: default_timeout(),
        }
    }

    /// Read configuration from the environment.
    pub fn from_env(key_var: &str, default_base_url: &str, default_model: &str) -> Option<Self> {
        let api_key = std::env::var(key_var).ok()?;
        let base_url =
            std::env::var("REVIEW_PROVIDER_URL").unwrap_or_else(|_| default_base_url.to_string());
        let model =
            std::env::var("REVIEW_PROVIDER_MODEL").unwrap_or_else(|_| default_model.to_string());
        Some(Self::new(api_key, base_url, model))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
