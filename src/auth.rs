use std::collections::HashMap;

use async_trait::async_trait;
use email_address::EmailAddress;
use tokio::sync::{watch, Mutex};

use crate::entities::AuthorId;

#[derive(Debug, ::thiserror::Error)]
pub enum AuthError {
    #[error("user already exists. please login.")]
    AlreadyRegistered,
    #[error("invalid email address.")]
    InvalidEmail,
    #[error("invalid credentials.")]
    BadCredentials,
    #[error("not signed in.")]
    NotSignedIn,
    #[error("authentication backend failed.")]
    Backend(::anyhow::Error),
}

/// External identity boundary. Sessions are pushed over a watch channel, the
/// latest value is always the whole truth about who is signed in.
#[async_trait]
pub trait IdentityProvider {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthorId, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthorId, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    async fn current(&self) -> Option<AuthorId>;

    fn subscribe(&self) -> watch::Receiver<Option<AuthorId>>;

    /// Deletes the account at the provider only. Stored documents are not
    /// touched.
    async fn delete_account(&self) -> Result<(), AuthError>;
}

pub struct MemoryIdentityProvider {
    accounts: Mutex<HashMap<AuthorId, String>>,
    session: watch::Sender<Option<AuthorId>>,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        let (session, _) = watch::channel(None);

        Self {
            accounts: Mutex::new(HashMap::new()),
            session,
        }
    }
}
impl Default for MemoryIdentityProvider {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthorId, AuthError> {
        if !EmailAddress::is_valid(email) {
            return Err(AuthError::InvalidEmail);
        }

        let id = AuthorId::new(email);
        let mut accounts = self.accounts.lock().await;

        if accounts.contains_key(&id) {
            return Err(AuthError::AlreadyRegistered);
        }

        // minimum cost, this provider only ever backs tests and demos
        let hashed = ::bcrypt::hash(password, 4).map_err(|e| AuthError::Backend(e.into()))?;
        accounts.insert(id.clone(), hashed);

        self.session.send_replace(Some(id.clone()));

        Ok(id)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthorId, AuthError> {
        let id = AuthorId::new(email);

        let accounts = self.accounts.lock().await;
        let hashed = accounts.get(&id).ok_or(AuthError::BadCredentials)?;

        if !::bcrypt::verify(password, hashed).unwrap_or(false) {
            return Err(AuthError::BadCredentials);
        }

        self.session.send_replace(Some(id.clone()));

        Ok(id)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.session.send_replace(None);

        Ok(())
    }

    async fn current(&self) -> Option<AuthorId> { self.session.borrow().clone() }

    fn subscribe(&self) -> watch::Receiver<Option<AuthorId>> { self.session.subscribe() }

    async fn delete_account(&self) -> Result<(), AuthError> {
        let id = self
            .session
            .borrow()
            .clone()
            .ok_or(AuthError::NotSignedIn)?;

        self.accounts.lock().await.remove(&id);
        self.session.send_replace(None);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_credentials() {
        let provider = MemoryIdentityProvider::new();

        let id = provider
            .sign_up("alice@example.com", "hunter2")
            .await
            .unwrap();
        assert_eq!(provider.current().await, Some(id.clone()));

        provider.sign_out().await.unwrap();
        assert_eq!(provider.current().await, None);

        let back = provider
            .sign_in("Alice@Example.com", "hunter2")
            .await
            .unwrap();
        assert_eq!(back, id);
    }

    #[tokio::test]
    async fn rejects_bad_input() {
        let provider = MemoryIdentityProvider::new();
        provider
            .sign_up("alice@example.com", "hunter2")
            .await
            .unwrap();

        assert!(matches!(
            provider.sign_in("alice@example.com", "letmein").await,
            Err(AuthError::BadCredentials)
        ));

        assert!(matches!(
            provider.sign_up("alice@example.com", "other").await,
            Err(AuthError::AlreadyRegistered)
        ));

        assert!(matches!(
            provider.sign_up("not-an-email", "x").await,
            Err(AuthError::InvalidEmail)
        ));
    }

    #[tokio::test]
    async fn pushes_session_changes() {
        let provider = MemoryIdentityProvider::new();
        let mut sessions = provider.subscribe();

        provider
            .sign_up("alice@example.com", "hunter2")
            .await
            .unwrap();
        sessions.changed().await.unwrap();
        assert!(sessions.borrow_and_update().is_some());

        provider.sign_out().await.unwrap();
        sessions.changed().await.unwrap();
        assert!(sessions.borrow_and_update().is_none());
    }

    #[tokio::test]
    async fn delete_account_revokes_credentials() {
        let provider = MemoryIdentityProvider::new();
        provider
            .sign_up("alice@example.com", "hunter2")
            .await
            .unwrap();

        provider.delete_account().await.unwrap();

        assert_eq!(provider.current().await, None);
        assert!(provider
            .sign_in("alice@example.com", "hunter2")
            .await
            .is_err());
    }
}
