pub(crate) mod auth;
mod constructors;
pub(crate) mod entities;
pub(crate) mod handlers;
pub(crate) mod repositories;
pub(crate) mod sanitize;

pub use auth::{AuthError, IdentityProvider, MemoryIdentityProvider};
pub use constructors::*;
pub use entities::{
    AuthorId, Comment, EdgeId, FollowEdge, Post, PostId, PostStatus, User, UserStats,
};
pub use handlers::{AuthorCard, AuthorHit, AuthorPage, FeedEntry, Handler, HandlerError};
pub use repositories::{
    FollowQuery, FollowRepository, PostQuery, PostRepository, RepositoryError, Snapshots,
    StatsRepository, UserMutation, UserRepository,
};
pub use sanitize::sanitize_html;
