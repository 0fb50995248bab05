use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use crate::error::Error;

/// OIDC provider configuration.
///
/// Required fields are constructor parameters — no runtime "missing field"
/// errors.
///
/// ```rust,ignore
/// use govuk_account_session::OidcConfig;
///
/// let config = OidcConfig::new("client-id", "client-secret", "https://my-app.gov.uk/callback".parse()?);
/// // Optional overrides via chaining:
/// let config = config
///     .with_userinfo_url("https://oidc.integration.account.gov.uk/userinfo".parse()?);
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct OidcConfig {
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
    pub(crate) auth_url: Url,
    pub(crate) token_url: Url,
    pub(crate) userinfo_url: Url,
    pub(crate) redirect_uri: Url,
    pub(crate) scopes: Vec<String>,
    pub(crate) request_timeout: Duration,
}

impl OidcConfig {
    /// Create a new provider configuration.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: Url,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri,
            auth_url: "https://oidc.account.gov.uk/authorize"
                .parse()
                .expect("valid default URL"),
            token_url: "https://oidc.account.gov.uk/token"
                .parse()
                .expect("valid default URL"),
            userinfo_url: "https://oidc.account.gov.uk/userinfo"
                .parse()
                .expect("valid default URL"),
            scopes: vec!["openid".into(), "email".into()],
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Override the authorization endpoint.
    #[must_use]
    pub fn with_auth_url(mut self, url: Url) -> Self {
        self.auth_url = url;
        self
    }

    /// Override the token endpoint.
    #[must_use]
    pub fn with_token_url(mut self, url: Url) -> Self {
        self.token_url = url;
        self
    }

    /// Override the userinfo endpoint.
    #[must_use]
    pub fn with_userinfo_url(mut self, url: Url) -> Self {
        self.userinfo_url = url;
        self
    }

    /// Override the OAuth2 scopes (default: `["openid", "email"]`).
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Override the per-request timeout (default: 30 seconds).
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// OAuth2 client ID.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Authorization endpoint URL.
    #[must_use]
    pub fn auth_url(&self) -> &Url {
        &self.auth_url
    }

    /// Token endpoint URL.
    #[must_use]
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// Userinfo endpoint URL.
    #[must_use]
    pub fn userinfo_url(&self) -> &Url {
        &self.userinfo_url
    }

    /// OAuth2 redirect URI.
    #[must_use]
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    /// Requested OAuth2 scopes.
    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }
}

/// Token response from the provider's token endpoint.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

/// Result of an OAuth-backed call, together with the token pair that was
/// current when it completed.
///
/// Callers must overwrite their stored tokens with these values even when
/// they look unchanged — a transparent refresh may have rotated them.
#[derive(Debug, Clone)]
pub struct OAuthResponse {
    pub result: Map<String, Value>,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Client for the identity provider's OAuth endpoints.
pub struct OidcClient {
    config: OidcConfig,
    http: reqwest::Client,
}

impl OidcClient {
    /// Create a new client.
    #[must_use]
    pub fn new(config: OidcConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Build the authorization endpoint URL for a new login.
    ///
    /// `state` and `nonce` come from [`crate::nonce`] and are persisted by
    /// the caller for the callback. `mfa` selects the vector of trust the
    /// provider must satisfy.
    #[must_use]
    pub fn auth_uri(&self, state: &str, nonce: &str, mfa: bool) -> String {
        let vtr = if mfa { r#"["Cl.Cm"]"# } else { r#"["Cl"]"# };
        let scope = self.config.scopes.join(" ");

        let mut url = self.config.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("state", state)
            .append_pair("nonce", nonce)
            .append_pair("vtr", vtr)
            .append_pair("scope", &scope);

        url.into()
    }

    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or [`Error::OAuth`] if
    /// the token endpoint returns an error.
    pub async fn callback(&self, code: &str) -> Result<TokenResponse, Error> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(self.config.token_url.clone())
            .timeout(self.config.request_timeout)
            .form(&params)
            .send()
            .await?;

        let response = Self::ensure_success(response, "token exchange").await?;
        response.json::<TokenResponse>().await.map_err(Into::into)
    }

    /// Fetch identity claims for the current token pair.
    ///
    /// If the provider reports the access token as expired and a refresh
    /// token is available, a new access token is minted and the call is
    /// retried exactly once; a second failure is terminal. The returned
    /// [`OAuthResponse`] carries the token pair that was current when the
    /// call completed — possibly rotated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or [`Error::OAuth`] on
    /// an unrecoverable provider error (invalid refresh token, revoked
    /// grant, non-expiry rejection).
    pub async fn userinfo(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<OAuthResponse, Error> {
        match self.fetch_userinfo(access_token).await {
            Ok(claims) => Ok(OAuthResponse {
                result: claims,
                access_token: access_token.to_owned(),
                refresh_token: refresh_token.map(ToOwned::to_owned),
            }),
            Err(err) if err.is_token_expired() => {
                let Some(refresh_token) = refresh_token else {
                    return Err(err);
                };
                let tokens = self.refresh(refresh_token).await?;
                let claims = self.fetch_userinfo(&tokens.access_token).await?;
                Ok(OAuthResponse {
                    result: claims,
                    access_token: tokens.access_token,
                    refresh_token: tokens
                        .refresh_token
                        .or_else(|| Some(refresh_token.to_owned())),
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Mint a new access token from a refresh token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or [`Error::OAuth`] if
    /// the grant is rejected.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, Error> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(self.config.token_url.clone())
            .timeout(self.config.request_timeout)
            .form(&params)
            .send()
            .await?;

        let response = Self::ensure_success(response, "token refresh").await?;
        response.json::<TokenResponse>().await.map_err(Into::into)
    }

    async fn fetch_userinfo(&self, access_token: &str) -> Result<Map<String, Value>, Error> {
        let response = self
            .http
            .get(self.config.userinfo_url.clone())
            .timeout(self.config.request_timeout)
            .bearer_auth(access_token)
            .send()
            .await?;

        let response = Self::ensure_success(response, "userinfo").await?;
        response
            .json::<Map<String, Value>>()
            .await
            .map_err(Into::into)
    }

    /// Checks HTTP response status; returns the response on success or an
    /// error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(Error::OAuth {
            operation,
            status: Some(status),
            detail: body,
        })
    }
}
