#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The identity provider rejected an OAuth operation.
    #[error("OAuth {operation} failed (status {status:?}): {detail}")]
    OAuth {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// True when the provider signalled an expired access token, the one
    /// condition the refresh protocol recovers from.
    #[must_use]
    pub fn is_token_expired(&self) -> bool {
        matches!(
            self,
            Self::OAuth {
                status: Some(401),
                ..
            }
        )
    }
}
