//! OAuth2 credentials: authorization, PKCE and refresh.

pub mod credentials;
pub mod oauth;
pub mod pkce;
pub mod tokens;

pub use credentials::{CredentialStore, OAuthTokenRefresher, TokenRefresher};
pub use oauth::{
    AppCredentials, AuthFlavor, AuthFlowConfiguration, AuthMode, OAuth2Config, OAuth2DataGenerator,
};
pub use pkce::{AuthExtras, PkceCodeGenerator, PkcePair};
pub use tokens::{AuthData, Credential, TokenResponse};
