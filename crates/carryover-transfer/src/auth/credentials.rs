//! Per-session credential ownership and refresh.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::BoxFuture;
use crate::auth::oauth::AppCredentials;
use crate::auth::tokens::{AuthData, Credential, TokenResponse};
use crate::error::{TransferError, TransferResult};

/// Exchanges a refresh token for a new access token.
pub trait TokenRefresher: Send + Sync {
    fn refresh<'a>(
        &'a self,
        token_url: &'a str,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, TransferResult<TokenResponse>>;
}

/// Refreshes tokens with a `grant_type=refresh_token` form POST.
pub struct OAuthTokenRefresher {
    http_client: reqwest::Client,
    app_credentials: AppCredentials,
}

impl OAuthTokenRefresher {
    pub fn new(http_client: reqwest::Client, app_credentials: AppCredentials) -> Self {
        Self {
            http_client,
            app_credentials,
        }
    }
}

impl TokenRefresher for OAuthTokenRefresher {
    fn refresh<'a>(
        &'a self,
        token_url: &'a str,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, TransferResult<TokenResponse>> {
        Box::pin(async move {
            let params = [
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.app_credentials.key.as_str()),
                ("client_secret", self.app_credentials.secret.as_str()),
            ];

            let response = self
                .http_client
                .post(token_url)
                .form(&params)
                .send()
                .await?;

            let status = response.status();
            let body = response.text().await?;

            if !status.is_success() {
                return Err(TransferError::auth_refresh(format!(
                    "token refresh rejected by {}",
                    token_url
                ))
                .with_status(status.as_u16())
                .with_body(&body));
            }

            TokenResponse::parse(&body)
        })
    }
}

/// Owns the single credential of one authenticated session.
///
/// Refreshes are single-flight: callers that hit a 401 at the same time
/// queue on one lock, and only the first one talks to the token endpoint.
pub struct CredentialStore {
    refresher: Arc<dyn TokenRefresher>,
    credential: RwLock<Option<Credential>>,
    refresh_lock: Mutex<()>,
}

impl CredentialStore {
    pub fn new(refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            refresher,
            credential: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Returns the cached credential, creating it from `auth_data` on
    /// first use. No network call is made.
    pub fn get_or_create_credential(&self, auth_data: &AuthData) -> TransferResult<Credential> {
        if let Some(credential) = self.current() {
            return Ok(credential);
        }

        let mut slot = self
            .credential
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(ref credential) = *slot {
            return Ok(credential.clone());
        }
        let credential = Credential::from_auth_data(auth_data)?;
        debug!(token_server = %credential.token_server_url, "created session credential");
        *slot = Some(credential.clone());
        Ok(credential)
    }

    /// Returns a clone of the live credential, if one was created.
    pub fn current(&self) -> Option<Credential> {
        self.credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the access token to attach to the next request.
    pub fn access_token(&self) -> TransferResult<String> {
        self.current()
            .map(|c| c.access_token)
            .ok_or_else(|| TransferError::configuration("no credential for this session"))
    }

    /// Refreshes the credential after `seen_access_token` was rejected.
    ///
    /// If the live access token already differs from the one the caller
    /// sent, someone else refreshed in the meantime and the current
    /// credential is returned as is.
    pub async fn refresh(&self, seen_access_token: &str) -> TransferResult<Credential> {
        let _guard = self.refresh_lock.lock().await;

        let current = self
            .current()
            .ok_or_else(|| TransferError::auth_refresh("no credential to refresh"))?;

        if current.access_token != seen_access_token {
            debug!("credential was refreshed by a concurrent request");
            return Ok(current);
        }

        if current.refresh_token.is_empty() {
            warn!("access token rejected and no refresh token is available");
            return Err(TransferError::auth_refresh(
                "access token rejected and no refresh token is available",
            ));
        }

        let response = self
            .refresher
            .refresh(&current.token_server_url, &current.refresh_token)
            .await?;

        let mut slot = self
            .credential
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let credential = slot.get_or_insert(current);
        credential.apply(response);
        info!("refreshed access token");
        Ok(credential.clone())
    }
}

#[cfg(test)]
impl CredentialStore {
    /// Marks the live credential as already expired.
    pub(crate) fn expire_now(&self) {
        let mut slot = self
            .credential
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(credential) = slot.as_mut() {
            credential.expires_at = Some(chrono::Utc::now() - chrono::Duration::seconds(1));
        }
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("credential", &self.current())
            .finish_non_exhaustive()
    }
}
