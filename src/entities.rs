use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// Normalized sign-in email. Every collection references authors by this key,
/// display names are resolved at render time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AuthorId(String);

impl AuthorId {
    pub fn new(email: impl Into<String>) -> Self {
        Self(email.into().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl ::std::fmt::Display for AuthorId {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[test]
fn author_id_normalizes() {
    assert_eq!(
        AuthorId::new(" Alice@Example.COM "),
        AuthorId::new("alice@example.com")
    );

    assert_eq!(AuthorId::new("alice@example.com").as_str(), "alice@example.com");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PostId(pub Uuid);

impl ::std::fmt::Display for PostId {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(pub Uuid);

impl ::std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: AuthorId,
    pub name: String,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostStatus {
    Active,
    Deleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: PostId,
    pub title: String,
    /// Sanitized markup. Raw editor output never reaches storage.
    pub content: String,
    /// Display name captured at creation time.
    pub author: String,
    pub author_id: AuthorId,
    pub date: NaiveDate,
    pub likes: HashSet<AuthorId>,
    pub comments: Vec<Comment>,
    pub status: PostStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub text: String,
    pub author_id: AuthorId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FollowEdge {
    pub id: EdgeId,
    /// The followed author.
    pub author: AuthorId,
    /// The follower.
    pub followed_by: AuthorId,
    pub followed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserStats {
    pub author: AuthorId,
    pub followers: Vec<AuthorId>,
    pub following: Vec<AuthorId>,
    pub follower_count: u32,
    pub following_count: u32,
}
