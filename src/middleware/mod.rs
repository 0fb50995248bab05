//! Session boundary for axum applications.
//!
//! Decodes the `GOVUK-Account-Session` header into an
//! [`AccountSession`](crate::session::AccountSession) before request
//! handlers run, and short-circuits with `401 Unauthorized` when the
//! header is missing or undecodable.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use govuk_account_session::middleware::{AccountConfig, set_session_header};
//! use govuk_account_session::{AccountSession, MemoryUserStore};
//!
//! // 1. Configure from environment
//! let state = AccountConfig::from_env()?.into_state(MemoryUserStore::default());
//!
//! // 2. Take `AccountSession` (or `Option<AccountSession>`) as an extractor
//! async fn handler(mut session: AccountSession) -> impl IntoResponse {
//!     // ... use the session, then re-serialise it for the response:
//!     // set_session_header(response.headers_mut(), &token)?;
//! }
//!
//! let app = axum::Router::new()
//!     .route("/attributes", axum::routing::get(handler))
//!     .with_state(state);
//! ```

mod config;
mod error;
mod extractor;
mod state;

pub use config::AccountConfig;
pub use error::AuthError;
pub use extractor::{SESSION_HEADER, set_session_header};
pub use state::SessionState;
