use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;

use crate::storage::KeyValueStore;

pub const USERNAME_KEY: &str = "username";
pub const TOKEN_KEY: &str = "token";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("username is required")]
    MissingUsername,
    #[error("credential is required")]
    MissingCredential,
}

/// Snapshot of who is signed in.
///
/// `is_authenticated` holds only when both the username and the credential
/// are present; a username alone is not a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub is_authenticated: bool,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn signed_in(username: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            is_authenticated: true,
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }

    fn from_parts(username: Option<String>, credential: Option<String>) -> Self {
        let username = username.filter(|name| !name.trim().is_empty());
        let credential = credential.filter(|token| !token.trim().is_empty());
        match (username, credential) {
            (Some(username), Some(credential)) => Self::signed_in(username, credential),
            _ => Self::anonymous(),
        }
    }

    pub fn is_author_of(&self, author: &str) -> bool {
        self.username.as_deref() == Some(author)
    }
}

/// Source of the credential attached to authorized requests.
pub trait CredentialProvider: Send + Sync {
    fn credential(&self) -> Option<String>;
}

/// Single owner of the session state and its durable copy.
pub struct Manager {
    store: Arc<dyn KeyValueStore>,
    state: RwLock<Session>,
}

impl Manager {
    /// Rebuilds the session from durable storage.
    pub fn restore(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let username = store.get(USERNAME_KEY)?;
        let credential = store.get(TOKEN_KEY)?;
        let session = Session::from_parts(username, credential);
        if session.is_authenticated {
            log::debug!("session: restored {:?}", session.username);
        }
        Ok(Self {
            store,
            state: RwLock::new(session),
        })
    }

    pub fn session(&self) -> Session {
        self.state.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read().is_authenticated
    }

    pub fn username(&self) -> Option<String> {
        self.state.read().username.clone()
    }

    pub fn login(&self, username: &str, credential: &str) -> Result<Session> {
        let username = username.trim();
        if username.is_empty() {
            return Err(SessionError::MissingUsername.into());
        }
        if credential.trim().is_empty() {
            return Err(SessionError::MissingCredential.into());
        }

        self.store.set(USERNAME_KEY, username)?;
        self.store.set(TOKEN_KEY, credential)?;

        let session = Session::signed_in(username, credential);
        *self.state.write() = session.clone();
        log::info!("session: signed in as {username}");
        Ok(session)
    }

    pub fn logout(&self) -> Result<()> {
        *self.state.write() = Session::anonymous();
        self.store.remove(TOKEN_KEY)?;
        self.store.remove(USERNAME_KEY)?;
        log::info!("session: signed out");
        Ok(())
    }
}

impl CredentialProvider for Manager {
    fn credential(&self) -> Option<String> {
        let state = self.state.read();
        if state.is_authenticated {
            state.credential.clone()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn manager() -> (Arc<MemoryStore>, Manager) {
        let store = Arc::new(MemoryStore::new());
        let manager = Manager::restore(store.clone()).unwrap();
        (store, manager)
    }

    #[test]
    fn starts_anonymous() {
        let (_, manager) = manager();
        assert_eq!(manager.session(), Session::anonymous());
        assert!(manager.credential().is_none());
    }

    #[test]
    fn login_persists_and_restores() {
        let (store, manager) = manager();
        manager.login("carol", "abc123").unwrap();
        assert!(manager.is_authenticated());
        assert_eq!(manager.credential().as_deref(), Some("abc123"));

        let restored = Manager::restore(store).unwrap();
        assert_eq!(restored.session(), Session::signed_in("carol", "abc123"));
    }

    #[test]
    fn username_alone_is_not_a_session() {
        let store = Arc::new(MemoryStore::new());
        store.set(USERNAME_KEY, "carol").unwrap();
        let manager = Manager::restore(store).unwrap();
        assert!(!manager.is_authenticated());
        assert_eq!(manager.username(), None);
    }

    #[test]
    fn logout_clears_both_keys_and_is_idempotent() {
        let (store, manager) = manager();
        manager.login("carol", "abc123").unwrap();
        manager.logout().unwrap();
        manager.logout().unwrap();
        assert!(!manager.is_authenticated());
        assert_eq!(store.get(USERNAME_KEY).unwrap(), None);
        assert_eq!(store.get(TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn login_requires_credential() {
        let (store, manager) = manager();
        let err = manager.login("carol", "  ").unwrap_err();
        assert!(err.downcast_ref::<SessionError>().is_some());
        assert_eq!(store.get(USERNAME_KEY).unwrap(), None);
    }
}
