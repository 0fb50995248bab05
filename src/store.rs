use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Mutex;

use serde_json::Value;
use time::OffsetDateTime;

use crate::attributes::UserAttribute;
use crate::types::Sub;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("no user record for subject")]
    NotFound,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Local user record keyed by OIDC subject.
///
/// Holds the cached attribute columns plus the optional legacy subject
/// used for migration-in-place.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub sub: Sub,
    pub legacy_sub: Option<Sub>,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
    pub has_unconfirmed_email: Option<bool>,
    pub transition_checker_state: Option<Value>,
    pub cookie_consent: Option<bool>,
    pub feedback_consent: Option<bool>,
    pub has_received_transition_checker_onboarding_email: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl UserRecord {
    #[must_use]
    pub fn new(sub: Sub, legacy_sub: Option<Sub>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            sub,
            legacy_sub,
            email: None,
            email_verified: None,
            has_unconfirmed_email: None,
            transition_checker_state: None,
            cookie_consent: None,
            feedback_consent: None,
            has_received_transition_checker_onboarding_email: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reads one attribute column; `None` when unset.
    #[must_use]
    pub fn get(&self, attribute: UserAttribute) -> Option<Value> {
        match attribute {
            UserAttribute::Email => self.email.clone().map(Value::String),
            UserAttribute::EmailVerified => self.email_verified.map(Value::Bool),
            UserAttribute::HasUnconfirmedEmail => self.has_unconfirmed_email.map(Value::Bool),
            UserAttribute::TransitionCheckerState => self.transition_checker_state.clone(),
            UserAttribute::CookieConsent => self.cookie_consent.map(Value::Bool),
            UserAttribute::FeedbackConsent => self.feedback_consent.map(Value::Bool),
            UserAttribute::HasReceivedTransitionCheckerOnboardingEmail => Some(Value::Bool(
                self.has_received_transition_checker_onboarding_email,
            )),
        }
    }

    /// Applies one attribute write. Type mismatches are validation errors.
    fn set(&mut self, attribute: UserAttribute, value: Value) -> Result<(), StoreError> {
        fn expect_bool(attribute: UserAttribute, value: Value) -> Result<bool, StoreError> {
            value.as_bool().ok_or_else(|| {
                StoreError::Validation(format!("{}: expected a boolean", attribute.name()))
            })
        }

        match attribute {
            UserAttribute::Email => {
                let email = value.as_str().ok_or_else(|| {
                    StoreError::Validation("email: expected a string".to_owned())
                })?;
                self.email = Some(email.to_owned());
            }
            UserAttribute::EmailVerified => {
                self.email_verified = Some(expect_bool(attribute, value)?);
            }
            UserAttribute::HasUnconfirmedEmail => {
                self.has_unconfirmed_email = Some(expect_bool(attribute, value)?);
            }
            UserAttribute::TransitionCheckerState => {
                self.transition_checker_state = Some(value);
            }
            UserAttribute::CookieConsent => {
                self.cookie_consent = Some(expect_bool(attribute, value)?);
            }
            UserAttribute::FeedbackConsent => {
                self.feedback_consent = Some(expect_bool(attribute, value)?);
            }
            UserAttribute::HasReceivedTransitionCheckerOnboardingEmail => {
                self.has_received_transition_checker_onboarding_email =
                    expect_bool(attribute, value)?;
            }
        }
        Ok(())
    }
}

/// Consumer-provided user persistence.
///
/// Implementations back the session capsule's user lookups. Each method is
/// a single atomic unit against the backing store: a concurrent duplicate
/// create must fail on the subject's uniqueness constraint, not produce
/// two rows.
pub trait UserStore: Send + Sync + 'static {
    /// Look up a record by subject.
    ///
    /// When `legacy_sub` is given and no record exists under `sub`, the
    /// record found under `legacy_sub` has its subject rewritten to `sub`
    /// in place, atomically with the lookup.
    fn find_by_sub(
        &self,
        sub: &Sub,
        legacy_sub: Option<&Sub>,
    ) -> impl Future<Output = Result<UserRecord, StoreError>> + Send;

    /// Look up a record as [`find_by_sub`](Self::find_by_sub), creating it
    /// if absent. Creation removes any logout notice held against `sub`
    /// first: a prior logout must not block a brand-new account sharing
    /// the identifier.
    fn find_or_create_by_sub(
        &self,
        sub: &Sub,
        legacy_sub: Option<&Sub>,
    ) -> impl Future<Output = Result<UserRecord, StoreError>> + Send;

    /// Write the given attribute values onto the record for `sub`,
    /// returning the updated record. `Null` values are skipped, not
    /// written.
    fn write_attributes(
        &self,
        sub: &Sub,
        attributes: Vec<(UserAttribute, Value)>,
    ) -> impl Future<Output = Result<UserRecord, StoreError>> + Send;

    /// Delete the record for `sub`, writing a tombstone in the same
    /// atomic unit so a replayed capsule is recognizably "deleted" rather
    /// than "never existed".
    fn delete(&self, sub: &Sub) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[derive(Default)]
struct Inner {
    users: HashMap<Sub, UserRecord>,
    tombstones: HashSet<Sub>,
    logout_notices: HashSet<Sub>,
}

/// In-memory [`UserStore`] for tests and development.
///
/// The single mutex is the transactional unit: every trait method runs
/// its whole lookup-and-mutate sequence under one lock acquisition.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: Mutex<Inner>,
}

impl MemoryUserStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("user store lock poisoned".to_owned()))
    }

    /// Record that `sub` has logged out of the identity provider.
    pub fn add_logout_notice(&self, sub: &Sub) -> Result<(), StoreError> {
        self.lock()?.logout_notices.insert(sub.clone());
        Ok(())
    }

    /// True while a logout notice is held against `sub`.
    pub fn has_logout_notice(&self, sub: &Sub) -> Result<bool, StoreError> {
        Ok(self.lock()?.logout_notices.contains(sub))
    }

    /// True once a record for `sub` has been deleted.
    pub fn has_tombstone(&self, sub: &Sub) -> Result<bool, StoreError> {
        Ok(self.lock()?.tombstones.contains(sub))
    }

    fn find_in(inner: &mut Inner, sub: &Sub, legacy_sub: Option<&Sub>) -> Option<UserRecord> {
        if let Some(record) = inner.users.get(sub) {
            return Some(record.clone());
        }

        let legacy_sub = legacy_sub?;
        let old_key = inner
            .users
            .values()
            .find(|record| record.legacy_sub.as_ref() == Some(legacy_sub))
            .map(|record| record.sub.clone())?;

        // Migration-in-place: rewrite the record's subject to the new value.
        let mut record = inner.users.remove(&old_key)?;
        record.sub = sub.clone();
        record.updated_at = OffsetDateTime::now_utc();
        inner.users.insert(sub.clone(), record.clone());
        Some(record)
    }
}

impl UserStore for MemoryUserStore {
    async fn find_by_sub(
        &self,
        sub: &Sub,
        legacy_sub: Option<&Sub>,
    ) -> Result<UserRecord, StoreError> {
        let mut inner = self.lock()?;
        Self::find_in(&mut inner, sub, legacy_sub).ok_or(StoreError::NotFound)
    }

    async fn find_or_create_by_sub(
        &self,
        sub: &Sub,
        legacy_sub: Option<&Sub>,
    ) -> Result<UserRecord, StoreError> {
        let mut inner = self.lock()?;
        if let Some(record) = Self::find_in(&mut inner, sub, legacy_sub) {
            return Ok(record);
        }

        inner.logout_notices.remove(sub);
        let record = UserRecord::new(sub.clone(), legacy_sub.cloned());
        inner.users.insert(sub.clone(), record.clone());
        Ok(record)
    }

    async fn write_attributes(
        &self,
        sub: &Sub,
        attributes: Vec<(UserAttribute, Value)>,
    ) -> Result<UserRecord, StoreError> {
        let mut inner = self.lock()?;

        for (attribute, value) in &attributes {
            if *attribute == UserAttribute::Email {
                if let Some(email) = value.as_str() {
                    let taken = inner
                        .users
                        .values()
                        .any(|record| record.sub != *sub && record.email.as_deref() == Some(email));
                    if taken {
                        return Err(StoreError::Validation(
                            "email is already in use".to_owned(),
                        ));
                    }
                }
            }
        }

        let record = inner.users.get_mut(sub).ok_or(StoreError::NotFound)?;
        for (attribute, value) in attributes {
            if value.is_null() {
                continue;
            }
            record.set(attribute, value)?;
        }
        record.updated_at = OffsetDateTime::now_utc();
        Ok(record.clone())
    }

    async fn delete(&self, sub: &Sub) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.users.remove(sub).ok_or(StoreError::NotFound)?;
        inner.tombstones.insert(sub.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sub(s: &str) -> Sub {
        Sub::from(s)
    }

    #[tokio::test]
    async fn creates_when_absent_and_finds_when_present() {
        let store = MemoryUserStore::default();
        let created = store
            .find_or_create_by_sub(&sub("sub-1"), None)
            .await
            .unwrap();
        assert_eq!(created.sub, sub("sub-1"));

        let found = store
            .find_or_create_by_sub(&sub("sub-1"), None)
            .await
            .unwrap();
        assert_eq!(found.sub, created.sub);
        assert_eq!(found.created_at, created.created_at);
    }

    #[tokio::test]
    async fn find_without_create_reports_not_found() {
        let store = MemoryUserStore::default();
        assert!(matches!(
            store.find_by_sub(&sub("missing"), None).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn legacy_migration_is_idempotent() {
        let store = MemoryUserStore::default();
        let legacy = sub("L");
        let new = sub("N");

        store
            .find_or_create_by_sub(&legacy, None)
            .await
            .unwrap();
        {
            let mut inner = store.inner.lock().unwrap();
            let record = inner.users.get_mut(&legacy).unwrap();
            record.legacy_sub = Some(legacy.clone());
            record.email = Some("someone@example.com".to_owned());
        }

        let migrated = store
            .find_or_create_by_sub(&new, Some(&legacy))
            .await
            .unwrap();
        assert_eq!(migrated.sub, new);
        assert_eq!(migrated.email.as_deref(), Some("someone@example.com"));

        // Second resolve finds the record directly under the new subject.
        let again = store
            .find_or_create_by_sub(&new, Some(&legacy))
            .await
            .unwrap();
        assert_eq!(again.sub, new);
        assert_eq!(store.inner.lock().unwrap().users.len(), 1);
    }

    #[tokio::test]
    async fn create_removes_logout_notice() {
        let store = MemoryUserStore::default();
        store.add_logout_notice(&sub("sub-1")).unwrap();
        assert!(store.has_logout_notice(&sub("sub-1")).unwrap());

        store
            .find_or_create_by_sub(&sub("sub-1"), None)
            .await
            .unwrap();
        assert!(!store.has_logout_notice(&sub("sub-1")).unwrap());
    }

    #[tokio::test]
    async fn delete_writes_tombstone() {
        let store = MemoryUserStore::default();
        store
            .find_or_create_by_sub(&sub("sub-1"), None)
            .await
            .unwrap();

        store.delete(&sub("sub-1")).await.unwrap();
        assert!(store.has_tombstone(&sub("sub-1")).unwrap());
        assert!(matches!(
            store.find_by_sub(&sub("sub-1"), None).await,
            Err(StoreError::NotFound)
        ));

        // Never-created subjects have no tombstone.
        assert!(!store.has_tombstone(&sub("sub-2")).unwrap());
    }

    #[tokio::test]
    async fn null_attribute_values_are_skipped() {
        let store = MemoryUserStore::default();
        store
            .find_or_create_by_sub(&sub("sub-1"), None)
            .await
            .unwrap();
        store
            .write_attributes(
                &sub("sub-1"),
                vec![
                    (UserAttribute::Email, json!("a@example.com")),
                    (UserAttribute::EmailVerified, json!(true)),
                ],
            )
            .await
            .unwrap();

        let updated = store
            .write_attributes(
                &sub("sub-1"),
                vec![
                    (UserAttribute::Email, json!("b@example.com")),
                    (UserAttribute::EmailVerified, Value::Null),
                ],
            )
            .await
            .unwrap();

        assert_eq!(updated.email.as_deref(), Some("b@example.com"));
        assert_eq!(updated.email_verified, Some(true));
    }

    #[tokio::test]
    async fn duplicate_email_is_a_validation_error() {
        let store = MemoryUserStore::default();
        store
            .find_or_create_by_sub(&sub("sub-1"), None)
            .await
            .unwrap();
        store
            .find_or_create_by_sub(&sub("sub-2"), None)
            .await
            .unwrap();
        store
            .write_attributes(&sub("sub-1"), vec![(UserAttribute::Email, json!("shared@example.com"))])
            .await
            .unwrap();

        let err = store
            .write_attributes(&sub("sub-2"), vec![(UserAttribute::Email, json!("shared@example.com"))])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn wrong_attribute_type_is_a_validation_error() {
        let store = MemoryUserStore::default();
        store
            .find_or_create_by_sub(&sub("sub-1"), None)
            .await
            .unwrap();

        let err = store
            .write_attributes(
                &sub("sub-1"),
                vec![(UserAttribute::EmailVerified, json!("yes"))],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }
}
