use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

/// OIDC subject identifier (OAuth `sub` claim).
///
/// Opaque, issued by the identity provider and stable for the lifetime of
/// an account. Local user records store this as the sole link to the
/// external identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct Sub(pub String);

impl Sub {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Sub {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}
