use std::sync::Arc;

use crate::encryptor::StringEncryptor;
use crate::oauth::OidcClient;

/// Shared state for the session boundary.
pub struct SessionState<S> {
    pub(super) encryptor: Arc<StringEncryptor>,
    pub(super) client: Arc<OidcClient>,
    pub(super) store: Arc<S>,
}

impl<S> SessionState<S> {
    #[must_use]
    pub fn new(encryptor: StringEncryptor, client: OidcClient, store: S) -> Self {
        Self {
            encryptor: Arc::new(encryptor),
            client: Arc::new(client),
            store: Arc::new(store),
        }
    }

    #[must_use]
    pub fn encryptor(&self) -> &StringEncryptor {
        &self.encryptor
    }

    #[must_use]
    pub fn client(&self) -> &Arc<OidcClient> {
        &self.client
    }

    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

// Manual Clone: avoid derive adding an `S: Clone` bound.
impl<S> Clone for SessionState<S> {
    fn clone(&self) -> Self {
        Self {
            encryptor: self.encryptor.clone(),
            client: self.client.clone(),
            store: self.store.clone(),
        }
    }
}
