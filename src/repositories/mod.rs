use std::collections::HashSet;
use std::ops::Bound;

use async_trait::async_trait;

use crate::entities::{
    AuthorId, Comment, EdgeId, FollowEdge, Post, PostId, PostStatus, User, UserStats,
};

pub(crate) mod mock;
pub(crate) mod mongo;

type Result<T> = ::std::result::Result<T, RepositoryError>;

/// Latest full result of a live query. The storage side is the single writer,
/// dropping the receiver is the only way to end the subscription.
pub type Snapshots<T> = ::tokio::sync::watch::Receiver<T>;

#[async_trait]
pub trait UserRepository {
    async fn insert(&self, item: User) -> Result<bool>;

    async fn find(&self, id: &AuthorId) -> Result<User>;
    async fn find_all(&self) -> Result<Vec<User>>;

    /// Creates the document when absent, otherwise merges the set fields in.
    async fn upsert(&self, id: &AuthorId, mutation: UserMutation) -> Result<User>;
}

#[async_trait]
pub trait PostRepository {
    async fn insert(&self, item: Post) -> Result<bool>;

    async fn find(&self, id: PostId) -> Result<Post>;
    async fn finds(&self, query: PostQuery) -> Result<Vec<Post>>;

    async fn subscribe(&self, query: PostQuery) -> Result<Snapshots<Vec<Post>>>;

    /// Atomic transition. `false` means the document was not in `from`, so a
    /// post is observed in exactly one status at any instant.
    async fn set_status(&self, id: PostId, from: PostStatus, to: PostStatus) -> Result<bool>;

    async fn insert_liked(&self, id: PostId, liker: AuthorId) -> Result<bool>;
    async fn insert_comment(&self, id: PostId, comment: Comment) -> Result<bool>;
}

#[async_trait]
pub trait FollowRepository {
    async fn insert(&self, item: FollowEdge) -> Result<bool>;
    async fn delete(&self, id: EdgeId) -> Result<bool>;

    async fn finds(&self, query: FollowQuery) -> Result<Vec<FollowEdge>>;
    async fn count(&self, query: FollowQuery) -> Result<u32>;

    async fn subscribe(&self, query: FollowQuery) -> Result<Snapshots<Vec<FollowEdge>>>;
}

#[async_trait]
pub trait StatsRepository {
    async fn find(&self, author: &AuthorId) -> Result<Option<UserStats>>;

    /// First writer wins. `false` means a snapshot for this author already
    /// existed and the given one was discarded.
    async fn insert_new(&self, item: UserStats) -> Result<bool>;

    async fn delete(&self, author: &AuthorId) -> Result<bool>;
}

#[derive(Debug, Clone, Default)]
pub struct PostQuery {
    pub status: Option<PostStatus>,
    pub author_in: Option<HashSet<AuthorId>>,
    pub author_name: Option<(Bound<String>, Bound<String>)>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct FollowQuery {
    pub author: Option<AuthorId>,
    pub followed_by: Option<AuthorId>,
}

#[derive(Debug, Clone, Default)]
pub struct UserMutation {
    pub name: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug)]
pub enum RepositoryError {
    NotFound,
    NoUnique { matched: u32 },
    Internal(anyhow::Error),
}

impl ::std::fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        match self {
            RepositoryError::NotFound => write!(f, "cannot find object."),
            RepositoryError::NoUnique { matched } => write!(
                f,
                "expected unique object, found non-unique objects (matched: {})",
                matched
            ),
            RepositoryError::Internal(e) => write!(f, "internal error: {}", e),
        }
    }
}

impl ::std::error::Error for RepositoryError {}
