use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, header};
use std::convert::Infallible;

use super::error::AuthError;
use super::state::SessionState;
use crate::session::AccountSession;
use crate::store::UserStore;

/// Name of the session header.
///
/// Header lookup is case-insensitive, so both the modern
/// `GOVUK-Account-Session` casing and the legacy `Govuk-Account-Session`
/// casing sent by older frontends resolve here.
pub const SESSION_HEADER: &str = "govuk-account-session";

impl<S: UserStore> FromRequestParts<SessionState<S>> for AccountSession {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SessionState<S>,
    ) -> Result<Self, Self::Rejection> {
        let encoded = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok());

        AccountSession::decode(encoded, &state.encryptor, state.client.clone())
            .await
            .ok_or(AuthError::Unauthenticated)
    }
}

impl<S: UserStore> OptionalFromRequestParts<SessionState<S>> for AccountSession {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SessionState<S>,
    ) -> Result<Option<Self>, Self::Rejection> {
        let encoded = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok());

        Ok(AccountSession::decode(encoded, &state.encryptor, state.client.clone()).await)
    }
}

/// Sets the re-serialised capsule on a response, with the `Vary` entry
/// caches need to key on it.
///
/// # Errors
///
/// Returns [`AuthError::Internal`] if the token is not a valid header
/// value (it always is for tokens produced by `serialise`).
pub fn set_session_header(headers: &mut HeaderMap, token: &str) -> Result<(), AuthError> {
    let value = HeaderValue::from_str(token)
        .map_err(|_| AuthError::Internal("session token is not a valid header value".into()))?;
    headers.insert(SESSION_HEADER, value);
    headers.append(header::VARY, HeaderValue::from_static(SESSION_HEADER));
    Ok(())
}
