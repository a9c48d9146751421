use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::auth::{AuthError, IdentityProvider};
use crate::entities::{AuthorId, EdgeId, User};
use crate::repositories::{
    FollowRepository, PostRepository, RepositoryError, StatsRepository, UserMutation,
    UserRepository,
};

mod feed;
mod follow;
mod post;
mod stats;

pub use feed::{AuthorCard, AuthorPage, FeedEntry};
pub use follow::AuthorHit;

#[derive(Debug, ::thiserror::Error)]
pub enum HandlerError {
    #[error("not signed in.")]
    NotSignedIn,
    #[error("{0} cannot be empty.")]
    EmptyField(&'static str),
    #[error("user already exists. please login.")]
    AlreadyRegistered,
    #[error("cannot find post.")]
    PostNotFound,
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// Whatever went wrong in the store, callers get the generic line. The
    /// detail is logged where the failure was seen.
    #[error("failed, please try again.")]
    Store(::anyhow::Error),
}

fn store_err(e: RepositoryError) -> HandlerError {
    tracing::error!("store failure - {}", e);

    HandlerError::Store(::anyhow::anyhow!(e))
}

pub struct Handler {
    pub user_repository: Arc<dyn UserRepository + Sync + Send>,
    pub post_repository: Arc<dyn PostRepository + Sync + Send>,
    pub follow_repository: Arc<dyn FollowRepository + Sync + Send>,
    pub stats_repository: Arc<dyn StatsRepository + Sync + Send>,
    pub identity: Arc<dyn IdentityProvider + Sync + Send>,
    /// Edge ids this handler has itself observed, keyed by followed author.
    /// `unfollow` only ever deletes through here.
    followed_edges: Arc<Mutex<HashMap<AuthorId, EdgeId>>>,
}

impl Handler {
    pub fn new_with(
        user_repository: Arc<dyn UserRepository + Sync + Send>,
        post_repository: Arc<dyn PostRepository + Sync + Send>,
        follow_repository: Arc<dyn FollowRepository + Sync + Send>,
        stats_repository: Arc<dyn StatsRepository + Sync + Send>,
        identity: Arc<dyn IdentityProvider + Sync + Send>,
    ) -> Self {
        Self {
            user_repository,
            post_repository,
            follow_repository,
            stats_repository,
            identity,
            followed_edges: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn viewer(&self) -> Result<AuthorId, HandlerError> {
        self.identity
            .current()
            .await
            .ok_or(HandlerError::NotSignedIn)
    }

    #[tracing::instrument(skip(self, password))]
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<User, HandlerError> {
        if name.trim().is_empty() {
            return Err(HandlerError::EmptyField("name"));
        }

        let probe = AuthorId::new(email);
        match self.user_repository.find(&probe).await {
            Ok(_) => return Err(HandlerError::AlreadyRegistered),
            Err(RepositoryError::NotFound) => (),
            Err(e) => return Err(store_err(e)),
        }

        let id = self.identity.sign_up(email, password).await?;

        let new_user = User {
            id,
            name: name.trim().to_owned(),
            image: None,
        };

        let inserted = self
            .user_repository
            .insert(new_user.clone())
            .await
            .map_err(store_err)?;
        if !inserted {
            return Err(HandlerError::AlreadyRegistered);
        }

        Ok(new_user)
    }

    #[tracing::instrument(skip(self, password))]
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthorId, HandlerError> {
        let id = self.identity.sign_in(email, password).await?;

        // edges were observed by whoever was signed in before
        self.followed_edges.lock().await.clear();

        Ok(id)
    }

    #[tracing::instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<(), HandlerError> {
        self.identity.sign_out().await?;
        self.followed_edges.lock().await.clear();

        Ok(())
    }

    pub async fn current_author(&self) -> Option<AuthorId> { self.identity.current().await }

    #[tracing::instrument(skip(self))]
    pub async fn update_profile(
        &self,
        name: Option<String>,
        image: Option<String>,
    ) -> Result<User, HandlerError> {
        let viewer = self.viewer().await?;

        let updated = self
            .user_repository
            .upsert(&viewer, UserMutation { name, image })
            .await
            .map_err(store_err)?;

        Ok(updated)
    }

    /// Removes the account at the identity provider only. Posts, comments,
    /// likes and follow edges stay behind, readable as before.
    #[tracing::instrument(skip(self))]
    pub async fn delete_account(&self) -> Result<(), HandlerError> {
        self.identity.delete_account().await?;
        self.followed_edges.lock().await.clear();

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Handler;

    pub async fn registered(email: &str, name: &str) -> Handler {
        let handler = crate::constructors::in_memory();

        handler.register(email, "hunter2", name).await.unwrap();

        handler
    }
}

#[cfg(test)]
mod tests {
    use super::testing::registered;
    use super::*;

    #[tokio::test]
    async fn register_rejects_known_email() {
        let handler = registered("alice@example.com", "Alice").await;
        handler.sign_out().await.unwrap();

        let err = handler
            .register("Alice@Example.com", "other", "Imposter")
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::AlreadyRegistered));
    }

    #[tokio::test]
    async fn anonymous_callers_are_refused() {
        let handler = crate::constructors::in_memory();

        assert!(matches!(
            handler.create_post("t", "c", "a").await.unwrap_err(),
            HandlerError::NotSignedIn
        ));

        assert!(matches!(
            handler.follow(AuthorId::new("a@example.com")).await.unwrap_err(),
            HandlerError::NotSignedIn
        ));

        assert!(matches!(
            handler.update_profile(None, None).await.unwrap_err(),
            HandlerError::NotSignedIn
        ));
    }

    #[tokio::test]
    async fn profile_updates_merge() {
        let handler = registered("alice@example.com", "Alice").await;

        handler
            .update_profile(Some("Alice L.".into()), None)
            .await
            .unwrap();
        let after = handler
            .update_profile(None, Some("https://example.com/alice.png".into()))
            .await
            .unwrap();

        assert_eq!(after.name, "Alice L.");
        assert_eq!(after.image.as_deref(), Some("https://example.com/alice.png"));
    }

    #[tokio::test]
    async fn delete_account_keeps_documents() {
        let handler = registered("alice@example.com", "Alice").await;
        let alice = AuthorId::new("alice@example.com");
        handler
            .create_post("Hello", "<p>world</p>", "Alice")
            .await
            .unwrap();

        handler.delete_account().await.unwrap();

        assert!(handler
            .sign_in("alice@example.com", "hunter2")
            .await
            .is_err());
        assert_eq!(handler.posts_by(&alice).await.unwrap().len(), 1);
        assert_eq!(handler.author_card(&alice).await.unwrap().name, "Alice");
    }

    #[tokio::test]
    async fn reader_follows_what_they_searched() {
        let handler = registered("alice@example.com", "Alice").await;
        handler
            .create_post("Hello", "<p>first post</p>", "Alice")
            .await
            .unwrap();
        handler.sign_out().await.unwrap();

        handler
            .register("bob@example.com", "hunter2", "Bob")
            .await
            .unwrap();

        let hits = handler.search_authors("Al").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].author, "Alice");

        handler.follow(hits[0].author_id.clone()).await.unwrap();

        let feed = handler.compose_personal_feed().await.unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].post.title, "Hello");
        assert_eq!(feed[0].author.name, "Alice");
    }
}
