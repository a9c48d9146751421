use std::collections::HashSet;

use super::{store_err, Handler, HandlerError};
use crate::entities::{AuthorId, Comment, Post, PostId, PostStatus};
use crate::repositories::{PostQuery, PostRepository, RepositoryError};
use crate::sanitize::sanitize_html;

impl Handler {
    /// Stores a new active post under the signed-in author. The markup is
    /// sanitized here, at the door; everything downstream treats `content`
    /// as trusted.
    #[tracing::instrument(skip(self, content))]
    pub async fn create_post(
        &self,
        title: &str,
        content: &str,
        author_name: &str,
    ) -> Result<Post, HandlerError> {
        let viewer = self.viewer().await?;

        if title.trim().is_empty() {
            return Err(HandlerError::EmptyField("title"));
        }
        if content.trim().is_empty() {
            return Err(HandlerError::EmptyField("content"));
        }
        if author_name.trim().is_empty() {
            return Err(HandlerError::EmptyField("author"));
        }

        let new_post = Post {
            id: PostId(::uuid::Uuid::new_v4()),
            title: title.trim().to_owned(),
            content: sanitize_html(content),
            author: author_name.trim().to_owned(),
            author_id: viewer,
            date: ::chrono::Utc::now().date_naive(),
            likes: HashSet::new(),
            comments: Vec::new(),
            status: PostStatus::Active,
        };

        let inserted = self
            .post_repository
            .insert(new_post.clone())
            .await
            .map_err(store_err)?;
        if !inserted {
            return Err(HandlerError::Store(::anyhow::anyhow!(
                "fresh post id collided."
            )));
        }

        Ok(new_post)
    }

    /// `None` is the normal answer for an id that never existed or whose
    /// post was removed for good.
    #[tracing::instrument(skip(self))]
    pub async fn get_post(&self, id: PostId) -> Result<Option<Post>, HandlerError> {
        match self.post_repository.find(id).await {
            Ok(post) => Ok(Some(post)),
            Err(RepositoryError::NotFound) => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    /// Takes the post out of every feed without touching its content.
    /// Already-deleted posts are left alone and reported with `false`.
    #[tracing::instrument(skip(self))]
    pub async fn soft_delete(&self, id: PostId) -> Result<bool, HandlerError> {
        self.transition(id, PostStatus::Active, PostStatus::Deleted)
            .await
    }

    /// Puts a soft-deleted post back, bytes unchanged.
    #[tracing::instrument(skip(self))]
    pub async fn restore(&self, id: PostId) -> Result<bool, HandlerError> {
        self.transition(id, PostStatus::Deleted, PostStatus::Active)
            .await
    }

    async fn transition(
        &self,
        id: PostId,
        from: PostStatus,
        to: PostStatus,
    ) -> Result<bool, HandlerError> {
        match self.post_repository.set_status(id, from, to).await {
            Ok(flipped) => Ok(flipped),
            Err(RepositoryError::NotFound) => Err(HandlerError::PostNotFound),
            Err(e) => Err(store_err(e)),
        }
    }

    /// Adds the signed-in author to the post's likes. Liking twice is the
    /// same as liking once.
    #[tracing::instrument(skip(self))]
    pub async fn like(&self, id: PostId) -> Result<bool, HandlerError> {
        let viewer = self.viewer().await?;

        match self.post_repository.insert_liked(id, viewer).await {
            Ok(added) => Ok(added),
            Err(RepositoryError::NotFound) => Err(HandlerError::PostNotFound),
            Err(e) => Err(store_err(e)),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_comment(&self, id: PostId, text: &str) -> Result<Comment, HandlerError> {
        let viewer = self.viewer().await?;

        if text.trim().is_empty() {
            return Err(HandlerError::EmptyField("comment"));
        }

        let comment = Comment {
            text: text.trim().to_owned(),
            author_id: viewer,
        };

        match self.post_repository.insert_comment(id, comment.clone()).await {
            Ok(_) => Ok(comment),
            Err(RepositoryError::NotFound) => Err(HandlerError::PostNotFound),
            Err(e) => Err(store_err(e)),
        }
    }

    /// Moderation view over everything currently taken down.
    #[tracing::instrument(skip(self))]
    pub async fn deleted_posts(&self) -> Result<Vec<Post>, HandlerError> {
        let mut posts = self
            .post_repository
            .finds(PostQuery {
                status: Some(PostStatus::Deleted),
                ..PostQuery::default()
            })
            .await
            .map_err(store_err)?;
        posts.sort_by(|a, b| b.date.cmp(&a.date));

        Ok(posts)
    }

    /// Active posts by one author, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn posts_by(&self, author: &AuthorId) -> Result<Vec<Post>, HandlerError> {
        let mut authors = HashSet::new();
        authors.insert(author.clone());

        let mut posts = self
            .post_repository
            .finds(PostQuery {
                status: Some(PostStatus::Active),
                author_in: Some(authors),
                author_name: None,
                limit: None,
            })
            .await
            .map_err(store_err)?;
        posts.sort_by(|a, b| b.date.cmp(&a.date));

        Ok(posts)
    }
}
