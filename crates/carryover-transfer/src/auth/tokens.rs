//! OAuth token types.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TransferError, TransferResult};

/// Seconds shaved off a server-declared lifetime so a token is refreshed
/// before it actually lapses.
const EXPIRY_BUFFER_SECS: i64 = 60;

/// Tokens handed over by the caller at session start.
///
/// Never mutated; the live, refreshable copy is a [`Credential`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthData {
    pub access_token: String,
    pub refresh_token: String,
    pub token_server_url: String,
}

impl AuthData {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        token_server_url: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            token_server_url: token_server_url.into(),
        }
    }
}

impl std::fmt::Debug for AuthData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthData")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_server_url", &self.token_server_url)
            .finish()
    }
}

/// The live OAuth2 credential of one authenticated session.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    /// When the access token expires, if the server said so.
    pub expires_at: Option<DateTime<Utc>>,
    /// Token endpoint used to refresh this credential.
    pub token_server_url: String,
    /// When the access token was last obtained.
    pub last_refresh: DateTime<Utc>,
}

impl Credential {
    /// Builds a credential from caller-supplied tokens.
    ///
    /// Fails if the access token is empty.
    pub fn from_auth_data(auth_data: &AuthData) -> TransferResult<Self> {
        if auth_data.access_token.is_empty() {
            return Err(TransferError::configuration(
                "auth data is missing an access token",
            ));
        }
        Ok(Self {
            access_token: auth_data.access_token.clone(),
            refresh_token: auth_data.refresh_token.clone(),
            expires_at: None,
            token_server_url: auth_data.token_server_url.clone(),
            last_refresh: Utc::now(),
        })
    }

    /// Returns true if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() >= expires_at,
            None => false,
        }
    }

    /// Applies a token endpoint response in place.
    ///
    /// The refresh token and expiry are only replaced when the response
    /// carries them.
    pub fn apply(&mut self, response: TokenResponse) {
        self.access_token = response.access_token;
        if let Some(refresh_token) = response.refresh_token.filter(|t| !t.is_empty()) {
            self.refresh_token = refresh_token;
        }
        if let Some(secs) = response.expires_in {
            self.expires_at = expiry_after(secs);
        }
        self.last_refresh = Utc::now();
    }
}

/// Expiry for a token that lives `secs` seconds from now, minus the buffer.
///
/// A lifetime too large to represent means the token never expires.
fn expiry_after(secs: i64) -> Option<DateTime<Utc>> {
    let lifetime = TimeDelta::try_seconds(secs.saturating_sub(EXPIRY_BUFFER_SECS))?;
    Utc::now().checked_add_signed(lifetime)
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &!self.refresh_token.is_empty())
            .field("expires_at", &self.expires_at)
            .field("token_server_url", &self.token_server_url)
            .field("last_refresh", &self.last_refresh)
            .finish()
    }
}

/// Response from an OAuth token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl TokenResponse {
    /// Parses a token endpoint body.
    pub fn parse(body: &str) -> TransferResult<Self> {
        let response: TokenResponse = serde_json::from_str(body).map_err(|e| {
            TransferError::malformed_response(format!("invalid token response: {}", e))
                .with_body(body)
        })?;
        if response.access_token.is_empty() {
            return Err(TransferError::malformed_response(
                "token response has an empty access_token",
            ));
        }
        if let Some(secs) = response.expires_in.filter(|secs| *secs < 0) {
            return Err(TransferError::malformed_response(format!(
                "token response has a negative expires_in: {}",
                secs
            ))
            .with_body(body));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_data() -> AuthData {
        AuthData::new("access", "refresh", "https://idp.example.com/token")
    }

    #[test]
    fn credential_from_auth_data() {
        let credential = Credential::from_auth_data(&auth_data()).unwrap();
        assert_eq!(credential.access_token, "access");
        assert_eq!(credential.refresh_token, "refresh");
        assert!(credential.expires_at.is_none());
        assert!(!credential.is_expired());
    }

    #[test]
    fn credential_rejects_empty_access_token() {
        let data = AuthData::new("", "refresh", "https://idp.example.com/token");
        let err = Credential::from_auth_data(&data).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn apply_keeps_refresh_token_when_absent() {
        let mut credential = Credential::from_auth_data(&auth_data()).unwrap();
        credential.apply(TokenResponse::parse(r#"{"access_token":"new"}"#).unwrap());
        assert_eq!(credential.access_token, "new");
        assert_eq!(credential.refresh_token, "refresh");
        assert!(credential.expires_at.is_none());
    }

    #[test]
    fn apply_rotates_refresh_token_and_expiry() {
        let mut credential = Credential::from_auth_data(&auth_data()).unwrap();
        let response = TokenResponse::parse(
            r#"{"access_token":"new","refresh_token":"rotated","expires_in":3600}"#,
        )
        .unwrap();
        credential.apply(response);
        assert_eq!(credential.refresh_token, "rotated");
        assert!(credential.expires_at.is_some());
        assert!(!credential.is_expired());
    }

    #[test]
    fn expired_credential() {
        let mut credential = Credential::from_auth_data(&auth_data()).unwrap();
        credential.expires_at = Some(Utc::now() - TimeDelta::hours(1));
        assert!(credential.is_expired());
    }

    #[test]
    fn huge_lifetime_never_expires() {
        let mut credential = Credential::from_auth_data(&auth_data()).unwrap();
        credential.expires_at = Some(Utc::now());
        let response =
            TokenResponse::parse(r#"{"access_token":"n","expires_in":9000000000000}"#).unwrap();
        credential.apply(response);
        assert_eq!(credential.access_token, "n");
        assert!(credential.expires_at.is_none());
        assert!(!credential.is_expired());

        credential.apply(TokenResponse {
            access_token: "m".to_string(),
            refresh_token: None,
            expires_in: Some(i64::MAX),
        });
        assert!(credential.expires_at.is_none());
    }

    #[test]
    fn short_lifetime_is_already_expired() {
        let mut credential = Credential::from_auth_data(&auth_data()).unwrap();
        credential.apply(TokenResponse::parse(r#"{"access_token":"n","expires_in":0}"#).unwrap());
        assert!(credential.is_expired());
    }

    #[test]
    fn negative_lifetime_is_rejected() {
        let err = TokenResponse::parse(r#"{"access_token":"n","expires_in":-5}"#).unwrap_err();
        assert_eq!(
            err.code(),
            crate::error::TransferErrorCode::MalformedResponse
        );
    }

    #[test]
    fn token_response_rejects_garbage() {
        let err = TokenResponse::parse("<html>").unwrap_err();
        assert_eq!(
            err.code(),
            crate::error::TransferErrorCode::MalformedResponse
        );
        assert!(TokenResponse::parse(r#"{"access_token":""}"#).is_err());
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let debug = format!("{:?}", auth_data());
        assert!(!debug.contains("access\""));
        assert!(debug.contains("<redacted>"));
    }
}
