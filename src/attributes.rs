use serde::{Deserialize, Serialize};

/// Storage classification for a named user attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    /// Stored on the local user record, populated at account-creation or
    /// claims time and trusted until the next refresh.
    Cached,
    /// Always fetched fresh from the identity provider's claims.
    Live,
}

/// Registry of the named user attributes clients may read or write.
///
/// Replaces lookup-by-column-name with an explicit enumeration: a name
/// outside this registry does not resolve, rather than silently reading
/// nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAttribute {
    Email,
    EmailVerified,
    HasUnconfirmedEmail,
    TransitionCheckerState,
    CookieConsent,
    FeedbackConsent,
    HasReceivedTransitionCheckerOnboardingEmail,
}

impl UserAttribute {
    pub const ALL: [UserAttribute; 7] = [
        Self::Email,
        Self::EmailVerified,
        Self::HasUnconfirmedEmail,
        Self::TransitionCheckerState,
        Self::CookieConsent,
        Self::FeedbackConsent,
        Self::HasReceivedTransitionCheckerOnboardingEmail,
    ];

    /// How values for this attribute are stored and read.
    #[must_use]
    pub fn kind(self) -> AttributeKind {
        match self {
            Self::HasUnconfirmedEmail => AttributeKind::Live,
            _ => AttributeKind::Cached,
        }
    }

    /// Wire name of the attribute.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::EmailVerified => "email_verified",
            Self::HasUnconfirmedEmail => "has_unconfirmed_email",
            Self::TransitionCheckerState => "transition_checker_state",
            Self::CookieConsent => "cookie_consent",
            Self::FeedbackConsent => "feedback_consent",
            Self::HasReceivedTransitionCheckerOnboardingEmail => {
                "has_received_transition_checker_onboarding_email"
            }
        }
    }

    /// Resolve a wire name against the registry.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }
}
