use url::Url;

use super::error::AuthError;
use super::state::SessionState;
use crate::encryptor::StringEncryptor;
use crate::oauth::{OidcClient, OidcConfig};
use crate::store::UserStore;

/// Boundary configuration: the OIDC client plus the session secret.
///
/// Use [`from_env()`](AccountConfig::from_env) for convention-based setup,
/// or [`new()`](AccountConfig::new) with pre-built collaborators for full
/// control.
pub struct AccountConfig {
    client: OidcClient,
    encryptor: StringEncryptor,
}

impl AccountConfig {
    #[must_use]
    pub fn new(client: OidcClient, encryptor: StringEncryptor) -> Self {
        Self { client, encryptor }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `GOVUK_OIDC_CLIENT_ID`: OAuth2 client ID
    /// - `GOVUK_OIDC_CLIENT_SECRET`: OAuth2 client secret
    /// - `GOVUK_OIDC_REDIRECT_URI`: OAuth2 callback URI (must be a valid URL)
    /// - `SESSION_SECRET`: 32-byte capsule encryption key, hex or base64
    ///
    /// # Optional env vars
    /// - `GOVUK_OIDC_AUTH_URL`: Override the authorize endpoint
    /// - `GOVUK_OIDC_TOKEN_URL`: Override the token endpoint
    /// - `GOVUK_OIDC_USERINFO_URL`: Override the userinfo endpoint
    /// - `GOVUK_OIDC_SCOPES`: Comma-separated OAuth2 scopes
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if required env vars are missing or
    /// invalid.
    pub fn from_env() -> Result<Self, AuthError> {
        let client_id = std::env::var("GOVUK_OIDC_CLIENT_ID")
            .map_err(|_| AuthError::Config("GOVUK_OIDC_CLIENT_ID is required".into()))?;
        let client_secret = std::env::var("GOVUK_OIDC_CLIENT_SECRET")
            .map_err(|_| AuthError::Config("GOVUK_OIDC_CLIENT_SECRET is required".into()))?;
        let redirect_uri_str = std::env::var("GOVUK_OIDC_REDIRECT_URI")
            .map_err(|_| AuthError::Config("GOVUK_OIDC_REDIRECT_URI is required".into()))?;
        let redirect_uri: Url = redirect_uri_str
            .parse()
            .map_err(|e| AuthError::Config(format!("GOVUK_OIDC_REDIRECT_URI: {e}")))?;

        let mut config = OidcConfig::new(client_id, client_secret, redirect_uri);

        if let Ok(url_str) = std::env::var("GOVUK_OIDC_AUTH_URL") {
            let url: Url = url_str
                .parse()
                .map_err(|e| AuthError::Config(format!("GOVUK_OIDC_AUTH_URL: {e}")))?;
            config = config.with_auth_url(url);
        }
        if let Ok(url_str) = std::env::var("GOVUK_OIDC_TOKEN_URL") {
            let url: Url = url_str
                .parse()
                .map_err(|e| AuthError::Config(format!("GOVUK_OIDC_TOKEN_URL: {e}")))?;
            config = config.with_token_url(url);
        }
        if let Ok(url_str) = std::env::var("GOVUK_OIDC_USERINFO_URL") {
            let url: Url = url_str
                .parse()
                .map_err(|e| AuthError::Config(format!("GOVUK_OIDC_USERINFO_URL: {e}")))?;
            config = config.with_userinfo_url(url);
        }
        if let Ok(scopes) = std::env::var("GOVUK_OIDC_SCOPES") {
            config =
                config.with_scopes(scopes.split(',').map(|s| s.trim().to_string()).collect());
        }

        let secret = std::env::var("SESSION_SECRET")
            .map_err(|_| AuthError::Config("SESSION_SECRET is required".into()))?;
        let encryptor = StringEncryptor::from_secret(&secret)
            .map_err(|e| AuthError::Config(format!("SESSION_SECRET: {e}")))?;

        Ok(Self::new(OidcClient::new(config), encryptor))
    }

    /// Wire the configuration and a user store into boundary state.
    #[must_use]
    pub fn into_state<S: UserStore>(self, store: S) -> SessionState<S> {
        SessionState::new(self.encryptor, self.client, store)
    }
}
