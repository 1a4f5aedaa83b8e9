//! OAuth2 authorization-code flow: authorization URL and token exchange.
//!
//! Whether a provider uses a client secret or PKCE is fixed on its
//! [`OAuth2Config`] as an [`AuthFlavor`]. A [`OAuth2DataGenerator`] lives
//! for one authorization round trip; for PKCE providers it holds the
//! verifier between building the URL and exchanging the code.

use std::collections::{BTreeMap, HashMap};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use carryover_core::DataType;
use tracing::{debug, info};
use url::Url;

use crate::auth::pkce::{AuthExtras, CODE_CHALLENGE_METHOD, PkceCodeGenerator};
use crate::auth::tokens::{AuthData, TokenResponse};
use crate::error::{TransferError, TransferResult};

/// How a provider proves the client's identity at token exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthFlavor {
    /// Confidential client: `client_secret` is sent with the code.
    Standard,
    /// Public client: `code_verifier` is sent instead of a secret.
    Pkce,
}

/// Whether the authorization is for reading from or writing to a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMode {
    Import,
    Export,
}

/// The application's registered client id and secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AppCredentials {
    pub key: String,
    pub secret: String,
}

impl AppCredentials {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppCredentials")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Static OAuth2 description of one provider.
#[derive(Debug, Clone)]
pub struct OAuth2Config {
    pub service_name: String,
    pub auth_url: String,
    pub token_url: String,
    pub import_scopes: HashMap<DataType, Vec<String>>,
    pub export_scopes: HashMap<DataType, Vec<String>>,
    pub flavor: AuthFlavor,
    /// Extra query parameters appended to the authorization URL.
    pub additional_auth_url_parameters: BTreeMap<String, String>,
}

impl OAuth2Config {
    pub fn new(
        service_name: impl Into<String>,
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
        flavor: AuthFlavor,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            auth_url: auth_url.into(),
            token_url: token_url.into(),
            import_scopes: HashMap::new(),
            export_scopes: HashMap::new(),
            flavor,
            additional_auth_url_parameters: BTreeMap::new(),
        }
    }

    /// Builder method to grant the same scopes for import and export of
    /// a data type.
    pub fn with_scopes(mut self, data_type: DataType, scopes: &[&str]) -> Self {
        let scopes: Vec<String> = scopes.iter().map(|s| s.to_string()).collect();
        self.import_scopes.insert(data_type, scopes.clone());
        self.export_scopes.insert(data_type, scopes);
        self
    }

    /// Builder method to add an extra authorization URL parameter.
    pub fn with_auth_url_parameter(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.additional_auth_url_parameters
            .insert(key.into(), value.into());
        self
    }

    /// Solid-style pod identity provider. Uses PKCE.
    pub fn pod(idp_base: &str) -> Self {
        let base = idp_base.trim_end_matches('/');
        Self::new(
            "Pod",
            format!("{}/idp/auth", base),
            format!("{}/idp/token", base),
            AuthFlavor::Pkce,
        )
        .with_scopes(DataType::Photos, &["openid"])
        .with_scopes(DataType::Calendar, &["openid"])
        .with_scopes(DataType::Tasks, &["openid"])
    }

    /// UAA-style account server. Uses a client secret.
    pub fn neil(uaa_base: &str) -> Self {
        let base = uaa_base.trim_end_matches('/');
        Self::new(
            "Neil",
            format!("{}/uaa/oauth/authorize", base),
            format!("{}/uaa/oauth/token", base),
            AuthFlavor::Standard,
        )
        .with_scopes(DataType::Photos, &["role_user"])
        .with_scopes(DataType::Videos, &["role_user"])
        .with_scopes(DataType::Order, &["role_user"])
    }

    /// Validates the configuration.
    pub fn validate(&self) -> TransferResult<()> {
        if self.service_name.is_empty() {
            return Err(TransferError::configuration("config is missing service name"));
        }
        if self.auth_url.is_empty() {
            return Err(TransferError::configuration("config is missing auth url"));
        }
        if self.token_url.is_empty() {
            return Err(TransferError::configuration("config is missing token url"));
        }
        Url::parse(&self.auth_url).map_err(|e| {
            TransferError::configuration(format!("invalid auth url '{}': {}", self.auth_url, e))
        })?;
        Url::parse(&self.token_url).map_err(|e| {
            TransferError::configuration(format!("invalid token url '{}': {}", self.token_url, e))
        })?;
        Ok(())
    }

    fn scopes_for(&self, data_type: DataType, mode: AuthMode) -> Vec<String> {
        let scopes = match mode {
            AuthMode::Import => &self.import_scopes,
            AuthMode::Export => &self.export_scopes,
        };
        scopes.get(&data_type).cloned().unwrap_or_default()
    }
}

/// Where to send the user and where to exchange the resulting code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFlowConfiguration {
    pub auth_url: String,
    pub token_url: String,
}

/// Drives one authorization round trip for one provider and data type.
pub struct OAuth2DataGenerator {
    config: OAuth2Config,
    app_credentials: AppCredentials,
    scopes: Vec<String>,
    extras: AuthExtras,
    http_client: reqwest::Client,
}

impl OAuth2DataGenerator {
    /// Validates `config` and, for PKCE providers, generates the verifier
    /// used for the rest of this round trip.
    pub fn new(
        config: OAuth2Config,
        app_credentials: AppCredentials,
        http_client: reqwest::Client,
        data_type: DataType,
        mode: AuthMode,
    ) -> TransferResult<Self> {
        config.validate()?;
        let scopes = config.scopes_for(data_type, mode);
        let extras = match config.flavor {
            AuthFlavor::Standard => AuthExtras::None,
            AuthFlavor::Pkce => AuthExtras::Pkce(PkceCodeGenerator::generate()),
        };
        Ok(Self::with_extras(config, app_credentials, http_client, scopes, extras))
    }

    fn with_extras(
        config: OAuth2Config,
        app_credentials: AppCredentials,
        http_client: reqwest::Client,
        scopes: Vec<String>,
        extras: AuthExtras,
    ) -> Self {
        Self {
            config,
            app_credentials,
            scopes,
            extras,
            http_client,
        }
    }

    pub fn extras(&self) -> &AuthExtras {
        &self.extras
    }

    /// Builds the authorization URL the user is redirected to.
    ///
    /// `state` carries the job id, base64url-encoded.
    pub fn generate_configuration(
        &self,
        callback_url: &str,
        job_id: &str,
    ) -> TransferResult<AuthFlowConfiguration> {
        let mut url = Url::parse(&self.config.auth_url).map_err(|e| {
            TransferError::configuration(format!("could not produce auth url: {}", e))
        })?;
        let state = URL_SAFE.encode(job_id.as_bytes());

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.app_credentials.key)
                .append_pair("redirect_uri", callback_url)
                .append_pair("scope", &self.scopes.join(" "))
                .append_pair("state", &state);
            if let Some(pkce) = self.extras.pkce() {
                query
                    .append_pair("code_challenge_method", CODE_CHALLENGE_METHOD)
                    .append_pair("code_challenge", pkce.code_challenge());
            }
            for (key, value) in &self.config.additional_auth_url_parameters {
                query.append_pair(key, value);
            }
        }

        debug!(service = %self.config.service_name, "built authorization url");
        Ok(AuthFlowConfiguration {
            auth_url: url.into(),
            token_url: self.config.token_url.clone(),
        })
    }

    /// Exchanges the authorization code for tokens.
    ///
    /// `extra` must be empty and `initial` absent; neither applies to an
    /// OAuth2 flow.
    pub async fn generate_auth_data(
        &self,
        callback_url: &str,
        auth_code: &str,
        extra: Option<&str>,
        initial: Option<&AuthData>,
    ) -> TransferResult<AuthData> {
        if extra.is_some_and(|e| !e.is_empty()) {
            return Err(TransferError::configuration(
                "extra data not expected for OAuth flow",
            ));
        }
        if initial.is_some() {
            return Err(TransferError::configuration(format!(
                "initial auth data not expected for {}",
                self.config.service_name
            )));
        }

        let mut params = vec![
            ("client_id", self.app_credentials.key.as_str()),
            ("grant_type", "authorization_code"),
            ("redirect_uri", callback_url),
            ("code", auth_code),
        ];
        match self.extras.pkce() {
            Some(pkce) => params.push(("code_verifier", pkce.code_verifier())),
            None => params.push(("client_secret", self.app_credentials.secret.as_str())),
        }

        let response = self
            .http_client
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(TransferError::auth_refresh("token exchange failed")
                .with_status(status.as_u16())
                .with_body(&body)
                .with_provider(self.config.service_name.clone()));
        }

        let tokens = TokenResponse::parse(&body)?;
        info!(service = %self.config.service_name, "obtained tokens");
        Ok(AuthData::new(
            tokens.access_token,
            tokens.refresh_token.unwrap_or_default(),
            self.config.token_url.clone(),
        ))
    }
}
