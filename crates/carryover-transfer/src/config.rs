//! Transfer settings.
//!
//! Settings are read from TOML:
//!
//! ```toml
//! request_timeout_ms = 30000
//! user_agent = "carryover/0.1"
//!
//! [providers.pod]
//! base_url = "https://pod.example.com"
//! auth_base_url = "https://idp.example.com"
//! app_key = "carryover-app"
//! app_secret = "env::POD_APP_SECRET"
//! ```
//!
//! Credential values (`app_key`, `app_secret`) support secret references:
//! - `env::VAR_NAME`: resolved from the environment
//! - plain text: used as-is

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::AppCredentials;
use crate::error::{TransferError, TransferResult};

/// Settings shared by every destination service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Timeout for API calls, in milliseconds.
    pub request_timeout_ms: u64,

    /// Read timeout for file uploads, in milliseconds.
    pub file_upload_read_timeout_ms: u64,

    /// Write timeout for file uploads, in milliseconds.
    ///
    /// reqwest exposes no separate write timeout, so this only widens the
    /// overall upload timeout when it is the larger of the two.
    pub file_upload_write_timeout_ms: u64,

    /// User-Agent header sent with every request.
    pub user_agent: String,

    /// Per-service settings, keyed by service id (`pod`, `neil`).
    pub providers: HashMap<String, ProviderSettings>,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            file_upload_read_timeout_ms: 60_000,
            file_upload_write_timeout_ms: 60_000,
            user_agent: concat!("carryover/", env!("CARGO_PKG_VERSION")).to_string(),
            providers: HashMap::new(),
        }
    }
}

/// Settings for one destination service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Base URL of the destination API.
    pub base_url: String,

    /// Base URL of the identity provider, if it differs from `base_url`.
    pub auth_base_url: Option<String>,

    /// OAuth client id (supports the `env::` prefix).
    pub app_key: Option<String>,

    /// OAuth client secret (supports the `env::` prefix).
    pub app_secret: Option<String>,
}

impl TransferSettings {
    /// Parses settings from a TOML string.
    pub fn from_toml_str(content: &str) -> TransferResult<Self> {
        let settings: Self = toml::from_str(content).map_err(|e| {
            TransferError::configuration(format!("failed to parse settings: {}", e))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from a TOML file.
    pub fn from_file(path: &Path) -> TransferResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TransferError::configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Builder method to add a service.
    pub fn with_provider(mut self, service_id: impl Into<String>, provider: ProviderSettings) -> Self {
        self.providers.insert(service_id.into(), provider);
        self
    }

    /// Validates the settings.
    pub fn validate(&self) -> TransferResult<()> {
        for (name, value) in [
            ("request_timeout_ms", self.request_timeout_ms),
            ("file_upload_read_timeout_ms", self.file_upload_read_timeout_ms),
            ("file_upload_write_timeout_ms", self.file_upload_write_timeout_ms),
        ] {
            if value == 0 {
                return Err(TransferError::configuration(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        for (service_id, provider) in &self.providers {
            provider.validate().map_err(|e| {
                TransferError::configuration(format!("[providers.{}] {}", service_id, e.message()))
            })?;
        }
        Ok(())
    }

    /// Returns the settings for `service_id`.
    pub fn provider(&self, service_id: &str) -> TransferResult<&ProviderSettings> {
        self.providers.get(service_id).ok_or_else(|| {
            TransferError::configuration(format!("no settings for service '{}'", service_id))
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// The overall timeout applied to uploads.
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(
            self.file_upload_read_timeout_ms
                .max(self.file_upload_write_timeout_ms),
        )
    }

    /// Builds the client used for API calls and token requests.
    pub fn http_client(&self) -> TransferResult<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.request_timeout())
            .user_agent(&self.user_agent)
            .build()
            .map_err(|e| TransferError::configuration("failed to build HTTP client").with_source(e))
    }

    /// Builds the client used for uploads and media downloads.
    pub fn upload_client(&self) -> TransferResult<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.upload_timeout())
            .read_timeout(Duration::from_millis(self.file_upload_read_timeout_ms))
            .user_agent(&self.user_agent)
            .build()
            .map_err(|e| {
                TransferError::configuration("failed to build upload client").with_source(e)
            })
    }
}

impl ProviderSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Builder method to set the app credentials.
    pub fn with_app_credentials(mut self, key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.app_key = Some(key.into());
        self.app_secret = Some(secret.into());
        self
    }

    /// Builder method to set the identity provider base URL.
    pub fn with_auth_base_url(mut self, url: impl Into<String>) -> Self {
        self.auth_base_url = Some(url.into());
        self
    }

    pub fn validate(&self) -> TransferResult<()> {
        self.base_url()?;
        if let Some(ref auth) = self.auth_base_url {
            parse_url("auth_base_url", auth)?;
        }
        Ok(())
    }

    pub fn base_url(&self) -> TransferResult<Url> {
        if self.base_url.is_empty() {
            return Err(TransferError::configuration("base_url is required"));
        }
        parse_url("base_url", &self.base_url)
    }

    /// The identity provider base URL, defaulting to `base_url`.
    pub fn auth_base_url(&self) -> &str {
        self.auth_base_url.as_deref().unwrap_or(&self.base_url)
    }

    /// Resolves the app key and secret.
    pub fn app_credentials(&self) -> TransferResult<AppCredentials> {
        let key = required_secret("app_key", self.app_key.as_deref())?;
        let secret = required_secret("app_secret", self.app_secret.as_deref())?;
        Ok(AppCredentials::new(key, secret))
    }
}

/// Resolves a value that may reference a secret.
///
/// `env::VAR` reads `$VAR`; anything else is returned unchanged.
pub fn resolve_secret(value: &str) -> TransferResult<String> {
    match value.strip_prefix("env::") {
        Some(var) => std::env::var(var).map_err(|_| {
            TransferError::configuration(format!("environment variable `{}` is not set", var))
        }),
        None => Ok(value.to_string()),
    }
}

fn required_secret(name: &str, value: Option<&str>) -> TransferResult<String> {
    let resolved = resolve_secret(value.unwrap_or_default())?;
    if resolved.trim().is_empty() {
        return Err(TransferError::configuration(format!("{} is required", name)));
    }
    Ok(resolved)
}

fn parse_url(name: &str, value: &str) -> TransferResult<Url> {
    Url::parse(value)
        .map_err(|e| TransferError::configuration(format!("invalid {} '{}': {}", name, value, e)))
}
