use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::attributes::{AttributeKind, UserAttribute};
use crate::encryptor::StringEncryptor;
use crate::error::Error;
use crate::oauth::OidcClient;
use crate::store::{StoreError, UserRecord, UserStore};
use crate::types::Sub;

/// Capsule schema version written by this release.
pub const CURRENT_VERSION: u32 = 1;

/// Frontends append transient flash data to the session header after this
/// delimiter; it is not part of the capsule.
const FLASH_DELIMITER: &str = "$$";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SessionError {
    /// Payload predates the digital identity scheme; the user must
    /// reauthenticate from scratch.
    #[error("session predates the digital identity scheme")]
    SessionTooOld,
    /// Payload carries a schema version this release does not understand.
    #[error("unsupported session version {0}")]
    SessionVersionInvalid(u32),
    /// A supposedly-cached attribute has no value on the user record.
    /// Cached attributes are populated at account-creation or claims
    /// time, so absence is a provisioning bug, not a transient condition.
    #[error("cached attribute {0:?} has no value")]
    MissingCachedAttribute(&'static str),
    #[error("unknown attribute {0:?}")]
    UnknownAttribute(String),
    /// Mutation attempted after the capsule was serialised.
    #[error("session is frozen")]
    Frozen,
    #[error("session payload is malformed")]
    Malformed,
    #[error("session could not be encrypted")]
    Crypto,
    #[error(transparent)]
    OAuth(#[from] Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    /// True for errors that mean "this session is no longer valid": the
    /// decode boundary collapses exactly these into "no session".
    fn invalidates_session(&self) -> bool {
        matches!(
            self,
            Self::SessionTooOld | Self::SessionVersionInvalid(_) | Self::Malformed | Self::OAuth(_)
        )
    }
}

/// Wire form of the capsule, inside the encrypted envelope.
#[derive(Debug, Serialize, Deserialize)]
struct SessionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<Sub>,
    #[serde(default)]
    digital_identity_session: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mfa: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<u32>,
    /// Pre-versioning payloads recorded an authentication level instead of
    /// an MFA flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    level_of_authentication: Option<String>,
}

/// Tokens from a completed authorization-code exchange, used to construct
/// a fresh capsule at login time.
#[derive(Debug, Clone, Default)]
pub struct LoginCredentials {
    pub access_token: String,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Subject identifier, when the caller already extracted it from the
    /// ID token. Fetched from the claims endpoint otherwise.
    pub user_id: Option<Sub>,
    pub mfa: bool,
}

/// The session capsule: OAuth credentials and identity claims carried
/// across stateless requests inside an encrypted header value.
///
/// Request-scoped. Created per request by [`decode`](Self::decode) or per
/// login by [`from_login`](Self::from_login), discarded after
/// [`serialise`](Self::serialise). Serialising freezes the capsule: the
/// client now holds a fixed token, so any further mutation would produce
/// state invisible to it and is rejected with [`SessionError::Frozen`].
pub struct AccountSession {
    access_token: String,
    id_token: Option<String>,
    refresh_token: Option<String>,
    user_id: Sub,
    mfa: bool,
    frozen: bool,
    client: Arc<OidcClient>,
    userinfo: Option<Map<String, Value>>,
    user: Option<UserRecord>,
}

impl AccountSession {
    /// Construct a capsule from a fresh login.
    ///
    /// Derives the subject identifier via the claims endpoint when the
    /// caller did not supply one, updating the token pair per the refresh
    /// protocol.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::OAuth`] if the claims fetch fails. Unlike
    /// [`decode`](Self::decode), this propagates: at login time the caller
    /// decides how to react to a provider failure.
    pub async fn from_login(
        client: Arc<OidcClient>,
        credentials: LoginCredentials,
    ) -> Result<Self, SessionError> {
        Self::build(
            client,
            credentials.access_token,
            credentials.id_token,
            credentials.refresh_token,
            credentials.user_id,
            credentials.mfa,
        )
        .await
    }

    /// Decode an opaque client-supplied session header value.
    ///
    /// Returns `None` for everything that should be treated as "not
    /// logged in": a blank or absent header, a token that fails
    /// authentication, a payload from before the digital identity scheme,
    /// an unknown schema version, or a provider rejection while resolving
    /// the subject. The internal cause is recorded via `tracing` but never
    /// surfaced — a forced-reauth condition must look identical to an
    /// absent session at this layer.
    pub async fn decode(
        encoded: Option<&str>,
        encryptor: &StringEncryptor,
        client: Arc<OidcClient>,
    ) -> Option<Self> {
        let encoded = encoded?
            .split(FLASH_DELIMITER)
            .next()
            .unwrap_or_default()
            .trim();
        if encoded.is_empty() {
            return None;
        }

        let serialised = encryptor.decrypt_string(encoded)?;
        let value: Value = match serde_json::from_str(&serialised) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(%err, "session payload failed to parse");
                return None;
            }
        };
        if value.as_object().is_none_or(Map::is_empty) {
            return None;
        }
        let payload: SessionPayload = match serde_json::from_value(value) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::debug!(%err, "session payload failed to parse");
                return None;
            }
        };

        match Self::from_payload(client, payload).await {
            Ok(session) => Some(session),
            Err(err) if err.invalidates_session() => {
                tracing::info!(%err, "treating account session as logged out");
                None
            }
            Err(err) => {
                tracing::error!(%err, "unexpected error decoding account session");
                None
            }
        }
    }

    /// Construct a capsule from a decrypted payload.
    async fn from_payload(
        client: Arc<OidcClient>,
        payload: SessionPayload,
    ) -> Result<Self, SessionError> {
        if !payload.digital_identity_session {
            return Err(SessionError::SessionTooOld);
        }
        let access_token = payload.access_token.ok_or(SessionError::Malformed)?;

        match payload.version {
            Some(CURRENT_VERSION) => {
                let user_id = payload.user_id.ok_or(SessionError::Malformed)?;
                Ok(Self {
                    access_token,
                    id_token: payload.id_token,
                    refresh_token: payload.refresh_token,
                    user_id,
                    mfa: payload.mfa.unwrap_or(false),
                    frozen: false,
                    client,
                    userinfo: None,
                    user: None,
                })
            }
            Some(version) => Err(SessionError::SessionVersionInvalid(version)),
            None => {
                // Legacy payload: derive what the current schema records
                // explicitly.
                let mfa = payload.mfa.unwrap_or_else(|| {
                    payload.level_of_authentication.as_deref() == Some("level1")
                });
                Self::build(
                    client,
                    access_token,
                    payload.id_token,
                    payload.refresh_token,
                    payload.user_id,
                    mfa,
                )
                .await
            }
        }
    }

    async fn build(
        client: Arc<OidcClient>,
        access_token: String,
        id_token: Option<String>,
        refresh_token: Option<String>,
        user_id: Option<Sub>,
        mfa: bool,
    ) -> Result<Self, SessionError> {
        let mut access_token = access_token;
        let mut refresh_token = refresh_token;
        let mut userinfo = None;

        let user_id = match user_id {
            Some(sub) => sub,
            None => {
                let response = client
                    .userinfo(&access_token, refresh_token.as_deref())
                    .await?;
                access_token = response.access_token;
                refresh_token = response.refresh_token;

                let claims = apply_claims_shim(response.result);
                let sub = claims
                    .get("sub")
                    .and_then(Value::as_str)
                    .map(Sub::from)
                    .ok_or(SessionError::Malformed)?;
                userinfo = Some(claims);
                sub
            }
        };

        Ok(Self {
            access_token,
            id_token,
            refresh_token,
            user_id,
            mfa,
            frozen: false,
            client,
            userinfo,
            user: None,
        })
    }

    /// Subject identifier. Derived once at construction, never changes.
    #[must_use]
    pub fn user_id(&self) -> &Sub {
        &self.user_id
    }

    /// OIDC identity token from the initial login, when present.
    #[must_use]
    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref()
    }

    /// Whether the login satisfied multi-factor requirements.
    #[must_use]
    pub fn mfa(&self) -> bool {
        self.mfa
    }

    /// True once [`serialise`](Self::serialise) has been called.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Seal the capsule into an opaque header value and freeze it.
    ///
    /// Freezing is idempotent: serialising an already-frozen capsule
    /// re-encrypts the current state without further mutation. Decoding
    /// the output under the same secret reproduces an equivalent,
    /// unfrozen capsule.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Crypto`] if encryption fails.
    pub fn serialise(&mut self, encryptor: &StringEncryptor) -> Result<String, SessionError> {
        self.frozen = true;
        let json =
            serde_json::to_string(&self.to_payload()).map_err(|_| SessionError::Crypto)?;
        encryptor
            .encrypt_string(&json)
            .map_err(|_| SessionError::Crypto)
    }

    fn to_payload(&self) -> SessionPayload {
        SessionPayload {
            id_token: self.id_token.clone(),
            user_id: Some(self.user_id.clone()),
            digital_identity_session: true,
            mfa: Some(self.mfa),
            access_token: Some(self.access_token.clone()),
            refresh_token: self.refresh_token.clone(),
            version: Some(CURRENT_VERSION),
            level_of_authentication: None,
        }
    }

    /// Read the requested attributes, merged into one mapping of non-null
    /// values.
    ///
    /// Cached attributes come from the user record, live ones from the
    /// provider's claims.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownAttribute`] for a name outside the
    /// registry, [`SessionError::MissingCachedAttribute`] when a cached
    /// attribute has no value on the record, [`SessionError::Frozen`] when
    /// a live attribute is requested after serialisation, and
    /// [`SessionError::OAuth`] / [`SessionError::Store`] from the
    /// collaborators.
    pub async fn get_attributes<S: UserStore>(
        &mut self,
        names: &[&str],
        store: &S,
    ) -> Result<Map<String, Value>, SessionError> {
        let attributes = resolve_names(names)?;
        let mut values = Map::new();

        if attributes
            .iter()
            .any(|a| a.kind() == AttributeKind::Cached)
        {
            let record = self.user(store).await?;
            for attribute in attributes.iter().filter(|a| a.kind() == AttributeKind::Cached) {
                match record.get(*attribute) {
                    Some(value) if !value.is_null() => {
                        values.insert(attribute.name().to_owned(), value);
                    }
                    _ => {
                        return Err(SessionError::MissingCachedAttribute(attribute.name()));
                    }
                }
            }
        }

        if attributes.iter().any(|a| a.kind() == AttributeKind::Live) {
            let claims = self.userinfo().await?;
            for attribute in attributes.iter().filter(|a| a.kind() == AttributeKind::Live) {
                if let Some(value) = claims.get(attribute.name()) {
                    if !value.is_null() {
                        values.insert(attribute.name().to_owned(), value.clone());
                    }
                }
            }
        }

        Ok(values)
    }

    /// Write the given attribute values onto the user record.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Frozen`] after serialisation,
    /// [`SessionError::UnknownAttribute`] for a name outside the registry,
    /// and [`SessionError::Store`] when the store rejects the write
    /// (validation failure such as a duplicate email).
    pub async fn set_attributes<S: UserStore>(
        &mut self,
        attributes: &Map<String, Value>,
        store: &S,
    ) -> Result<(), SessionError> {
        if self.frozen {
            return Err(SessionError::Frozen);
        }

        let mut writes = Vec::with_capacity(attributes.len());
        for (name, value) in attributes {
            let attribute = UserAttribute::from_name(name)
                .ok_or_else(|| SessionError::UnknownAttribute(name.clone()))?;
            writes.push((attribute, value.clone()));
        }

        self.user(store).await?;
        let record = store.write_attributes(&self.user_id, writes).await?;
        self.user = Some(record);
        Ok(())
    }

    /// Identity claims from the provider, fetched once per capsule and
    /// reused afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Frozen`] after serialisation and
    /// [`SessionError::OAuth`] on provider failure.
    pub async fn userinfo(&mut self) -> Result<Map<String, Value>, SessionError> {
        if let Some(claims) = &self.userinfo {
            return Ok(claims.clone());
        }
        let result = self.oidc_do().await?;
        let claims = apply_claims_shim(result);
        self.userinfo = Some(claims.clone());
        Ok(claims)
    }

    /// One provider round trip: freeze check, call with the current token
    /// pair, persist whatever tokens come back.
    async fn oidc_do(&mut self) -> Result<Map<String, Value>, SessionError> {
        if self.frozen {
            return Err(SessionError::Frozen);
        }
        let response = self
            .client
            .userinfo(&self.access_token, self.refresh_token.as_deref())
            .await?;
        self.access_token = response.access_token;
        self.refresh_token = response.refresh_token;
        Ok(response.result)
    }

    /// Resolved user record, fetched (creating if absent) once per capsule.
    async fn user<S: UserStore>(&mut self, store: &S) -> Result<UserRecord, SessionError> {
        if let Some(record) = &self.user {
            return Ok(record.clone());
        }
        let record = store.find_or_create_by_sub(&self.user_id, None).await?;
        self.user = Some(record.clone());
        Ok(record)
    }
}

impl std::fmt::Debug for AccountSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountSession")
            .field("user_id", &self.user_id)
            .field("mfa", &self.mfa)
            .field("frozen", &self.frozen)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

fn resolve_names(names: &[&str]) -> Result<Vec<UserAttribute>, SessionError> {
    names
        .iter()
        .map(|name| {
            UserAttribute::from_name(name)
                .ok_or_else(|| SessionError::UnknownAttribute((*name).to_owned()))
        })
        .collect()
}

// TODO: drop this once consuming apps stop reading has_unconfirmed_email.
fn apply_claims_shim(mut claims: Map<String, Value>) -> Map<String, Value> {
    claims.insert("has_unconfirmed_email".to_owned(), Value::Bool(false));
    claims
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::OidcConfig;
    use crate::store::MemoryUserStore;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn encryptor() -> StringEncryptor {
        StringEncryptor::new([7u8; 32])
    }

    fn other_encryptor() -> StringEncryptor {
        StringEncryptor::new([8u8; 32])
    }

    fn offline_client() -> Arc<OidcClient> {
        Arc::new(OidcClient::new(OidcConfig::new(
            "client-id",
            "client-secret",
            "https://example.gov.uk/callback".parse().unwrap(),
        )))
    }

    fn server_client(server: &MockServer) -> Arc<OidcClient> {
        let config = OidcConfig::new(
            "client-id",
            "client-secret",
            "https://example.gov.uk/callback".parse().unwrap(),
        )
        .with_token_url(format!("{}/token", server.uri()).parse().unwrap())
        .with_userinfo_url(format!("{}/userinfo", server.uri()).parse().unwrap());
        Arc::new(OidcClient::new(config))
    }

    fn encrypt_json(value: Value) -> String {
        encryptor().encrypt_string(&value.to_string()).unwrap()
    }

    async fn decode(token: &str) -> Option<AccountSession> {
        AccountSession::decode(Some(token), &encryptor(), offline_client()).await
    }

    fn current_payload() -> Value {
        json!({
            "id_token": "IDT",
            "user_id": "sub-1",
            "digital_identity_session": true,
            "mfa": true,
            "access_token": "AT1",
            "refresh_token": "RT1",
            "version": 1,
        })
    }

    #[tokio::test]
    async fn round_trip_preserves_all_fields() {
        let mut session = decode(&encrypt_json(current_payload())).await.unwrap();
        let token = session.serialise(&encryptor()).unwrap();

        let again = decode(&token).await.unwrap();
        assert_eq!(again.user_id().as_str(), "sub-1");
        assert_eq!(again.id_token(), Some("IDT"));
        assert!(again.mfa());
        assert_eq!(again.access_token, "AT1");
        assert_eq!(again.refresh_token.as_deref(), Some("RT1"));
        assert!(!again.is_frozen());
    }

    #[tokio::test]
    async fn minimal_payload_scenario() {
        let token = encrypt_json(json!({
            "digital_identity_session": true,
            "access_token": "AT1",
            "user_id": "sub-1",
            "mfa": false,
        }));

        let session = decode(&token).await.unwrap();
        assert_eq!(session.user_id().as_str(), "sub-1");
        assert!(!session.mfa());

        let other =
            AccountSession::decode(Some(&token), &other_encryptor(), offline_client()).await;
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn tampered_token_decodes_to_no_session() {
        use base64::Engine;
        use base64::engine::general_purpose::STANDARD as BASE64;

        let token = encrypt_json(current_payload());
        let mut sealed = BASE64.decode(&token).unwrap();
        let mid = sealed.len() / 2;
        sealed[mid] ^= 0x01;

        assert!(decode(&BASE64.encode(sealed)).await.is_none());
    }

    #[tokio::test]
    async fn blank_and_absent_headers_are_no_session() {
        assert!(
            AccountSession::decode(None, &encryptor(), offline_client())
                .await
                .is_none()
        );
        assert!(decode("").await.is_none());
        assert!(decode("   ").await.is_none());
        assert!(decode("$$some-flash-data").await.is_none());
    }

    #[tokio::test]
    async fn flash_suffix_is_stripped_before_decryption() {
        let token = encrypt_json(current_payload());
        let with_flash = format!("{token}$$success,Your settings were saved");

        let session = decode(&with_flash).await.unwrap();
        assert_eq!(session.user_id().as_str(), "sub-1");
    }

    #[tokio::test]
    async fn payload_without_identity_marker_is_no_session() {
        let token = encrypt_json(json!({
            "access_token": "AT1",
            "user_id": "sub-1",
            "mfa": false,
        }));
        assert!(decode(&token).await.is_none());
    }

    #[tokio::test]
    async fn unknown_version_is_no_session() {
        let mut payload = current_payload();
        payload["version"] = json!(2);
        assert!(decode(&encrypt_json(payload)).await.is_none());
    }

    #[tokio::test]
    async fn empty_payload_is_no_session() {
        assert!(decode(&encrypt_json(json!({}))).await.is_none());
    }

    #[tokio::test]
    async fn legacy_payload_derives_mfa_from_authentication_level() {
        let token = encrypt_json(json!({
            "digital_identity_session": true,
            "access_token": "AT1",
            "user_id": "sub-1",
            "level_of_authentication": "level1",
        }));
        let session = decode(&token).await.unwrap();
        assert!(session.mfa());

        let token = encrypt_json(json!({
            "digital_identity_session": true,
            "access_token": "AT1",
            "user_id": "sub-1",
            "level_of_authentication": "level0",
        }));
        let session = decode(&token).await.unwrap();
        assert!(!session.mfa());
    }

    #[tokio::test]
    async fn legacy_payload_derives_subject_from_claims() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", "Bearer AT1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sub": "sub-9"})))
            .mount(&server)
            .await;

        let token = encrypt_json(json!({
            "digital_identity_session": true,
            "access_token": "AT1",
        }));
        let session = AccountSession::decode(Some(&token), &encryptor(), server_client(&server))
            .await
            .unwrap();
        assert_eq!(session.user_id().as_str(), "sub-9");
    }

    #[tokio::test]
    async fn provider_rejection_during_decode_is_no_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})),
            )
            .mount(&server)
            .await;

        let token = encrypt_json(json!({
            "digital_identity_session": true,
            "access_token": "expired",
            "refresh_token": "revoked",
        }));
        let session =
            AccountSession::decode(Some(&token), &encryptor(), server_client(&server)).await;
        assert!(session.is_none());
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_into_the_capsule() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", "Bearer AT1"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", "Bearer AT2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sub": "sub-1"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "AT2",
                "refresh_token": "RT2",
            })))
            .mount(&server)
            .await;

        let token = encrypt_json(current_payload());
        let mut session = AccountSession::decode(Some(&token), &encryptor(), server_client(&server))
            .await
            .unwrap();

        session.userinfo().await.unwrap();

        let resealed = session.serialise(&encryptor()).unwrap();
        let reopened = encryptor().decrypt_string(&resealed).unwrap();
        let payload: Value = serde_json::from_str(&reopened).unwrap();
        assert_eq!(payload["access_token"], "AT2");
        assert_eq!(payload["refresh_token"], "RT2");
        assert_eq!(payload["version"], 1);
    }

    #[tokio::test]
    async fn userinfo_applies_unconfirmed_email_shim() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sub": "sub-1",
                "has_unconfirmed_email": true,
            })))
            .mount(&server)
            .await;

        let token = encrypt_json(current_payload());
        let mut session = AccountSession::decode(Some(&token), &encryptor(), server_client(&server))
            .await
            .unwrap();

        let claims = session.userinfo().await.unwrap();
        assert_eq!(claims["has_unconfirmed_email"], false);
    }

    #[tokio::test]
    async fn serialise_freezes_the_capsule() {
        let store = MemoryUserStore::default();
        let mut session = decode(&encrypt_json(current_payload())).await.unwrap();

        session.serialise(&encryptor()).unwrap();
        assert!(session.is_frozen());

        let err = session.userinfo().await.unwrap_err();
        assert!(matches!(err, SessionError::Frozen));

        let mut writes = Map::new();
        writes.insert("email".to_owned(), json!("a@example.com"));
        let err = session.set_attributes(&writes, &store).await.unwrap_err();
        assert!(matches!(err, SessionError::Frozen));

        // Re-serialising is allowed and the output still round-trips.
        let token = session.serialise(&encryptor()).unwrap();
        let again = decode(&token).await.unwrap();
        assert_eq!(again.user_id().as_str(), "sub-1");
        assert!(!again.is_frozen());
    }

    #[tokio::test]
    async fn cached_reads_still_work_after_freezing() {
        let store = MemoryUserStore::default();
        let mut session = decode(&encrypt_json(current_payload())).await.unwrap();
        let mut writes = Map::new();
        writes.insert("email".to_owned(), json!("a@example.com"));
        session.set_attributes(&writes, &store).await.unwrap();

        session.serialise(&encryptor()).unwrap();

        let values = session.get_attributes(&["email"], &store).await.unwrap();
        assert_eq!(values["email"], "a@example.com");
    }

    #[tokio::test]
    async fn missing_cached_attribute_is_an_error() {
        let store = MemoryUserStore::default();
        let mut session = decode(&encrypt_json(current_payload())).await.unwrap();

        let err = session
            .get_attributes(&["email"], &store)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::MissingCachedAttribute("email")
        ));

        let mut writes = Map::new();
        writes.insert("email".to_owned(), json!("a@example.com"));
        session.set_attributes(&writes, &store).await.unwrap();

        let values = session.get_attributes(&["email"], &store).await.unwrap();
        assert_eq!(values["email"], "a@example.com");
    }

    #[tokio::test]
    async fn live_attributes_come_from_claims() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sub": "sub-1",
                "has_unconfirmed_email": true,
            })))
            .mount(&server)
            .await;

        let store = MemoryUserStore::default();
        let token = encrypt_json(current_payload());
        let mut session = AccountSession::decode(Some(&token), &encryptor(), server_client(&server))
            .await
            .unwrap();
        let mut writes = Map::new();
        writes.insert("email".to_owned(), json!("a@example.com"));
        session.set_attributes(&writes, &store).await.unwrap();

        let values = session
            .get_attributes(&["email", "has_unconfirmed_email"], &store)
            .await
            .unwrap();
        assert_eq!(values["email"], "a@example.com");
        // Shimmed for backward compatibility, regardless of the claim.
        assert_eq!(values["has_unconfirmed_email"], false);
    }

    #[tokio::test]
    async fn unknown_attribute_names_are_rejected() {
        let store = MemoryUserStore::default();
        let mut session = decode(&encrypt_json(current_payload())).await.unwrap();

        let err = session
            .get_attributes(&["favourite_colour"], &store)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::UnknownAttribute(name) if name == "favourite_colour"));
    }

    #[tokio::test]
    async fn set_attributes_surfaces_store_validation() {
        let store = MemoryUserStore::default();
        let other = decode(&encrypt_json(json!({
            "digital_identity_session": true,
            "access_token": "AT",
            "user_id": "sub-2",
            "mfa": false,
            "version": 1,
        })))
        .await
        .unwrap();
        let mut other = other;
        let mut writes = Map::new();
        writes.insert("email".to_owned(), json!("taken@example.com"));
        other.set_attributes(&writes, &store).await.unwrap();

        let mut session = decode(&encrypt_json(current_payload())).await.unwrap();
        let err = session.set_attributes(&writes, &store).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Store(StoreError::Validation(_))
        ));
    }

    #[test]
    fn debug_redacts_tokens() {
        let payload = serde_json::from_value::<SessionPayload>(current_payload()).unwrap();
        let session = AccountSession {
            access_token: payload.access_token.unwrap(),
            id_token: payload.id_token,
            refresh_token: payload.refresh_token,
            user_id: payload.user_id.unwrap(),
            mfa: true,
            frozen: false,
            client: offline_client(),
            userinfo: None,
            user: None,
        };
        let debug = format!("{session:?}");
        assert!(!debug.contains("AT1"));
        assert!(!debug.contains("RT1"));
        assert!(debug.contains("sub-1"));
    }
}
