use std::collections::{HashMap, HashSet};
use std::ops::Bound;

use smallvec::SmallVec;
use tokio::sync::{watch, Mutex};

use super::{store_err, Handler, HandlerError};
use crate::entities::{AuthorId, EdgeId, FollowEdge, Post, PostStatus};
use crate::repositories::{FollowQuery, FollowRepository, PostQuery, PostRepository, Snapshots};

/// How many authors a prefix lookup offers at most.
const SUGGESTION_LIMIT: u32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct AuthorHit {
    pub author: String,
    pub author_id: AuthorId,
}

impl Handler {
    #[tracing::instrument(skip(self))]
    pub async fn follow(&self, author: AuthorId) -> Result<FollowEdge, HandlerError> {
        let viewer = self.viewer().await?;

        let edge = FollowEdge {
            id: EdgeId(::uuid::Uuid::new_v4()),
            author: author.clone(),
            followed_by: viewer,
            followed_at: ::chrono::Utc::now(),
        };

        let inserted = self
            .follow_repository
            .insert(edge.clone())
            .await
            .map_err(store_err)?;
        if !inserted {
            return Err(HandlerError::Store(::anyhow::anyhow!(
                "fresh edge id collided."
            )));
        }

        self.followed_edges.lock().await.insert(author, edge.id);

        Ok(edge)
    }

    /// Deletes the edge this handler saw itself create or fetch. When the
    /// author was never observed as followed here, nothing is deleted and
    /// `false` comes back.
    #[tracing::instrument(skip(self))]
    pub async fn unfollow(&self, author: &AuthorId) -> Result<bool, HandlerError> {
        self.viewer().await?;

        let cached = self.followed_edges.lock().await.get(author).copied();
        let id = match cached {
            Some(id) => id,
            None => return Ok(false),
        };

        let removed = self
            .follow_repository
            .delete(id)
            .await
            .map_err(store_err)?;
        if removed {
            self.followed_edges.lock().await.remove(author);
        }

        Ok(removed)
    }

    /// Live view of who the signed-in author follows. Every change to the
    /// edge set lands as a fresh snapshot; the unfollow cache is refreshed
    /// along the way.
    #[tracing::instrument(skip(self))]
    pub async fn following(&self) -> Result<Snapshots<Vec<AuthorId>>, HandlerError> {
        let viewer = self.viewer().await?;

        let mut edges = self
            .follow_repository
            .subscribe(FollowQuery {
                author: None,
                followed_by: Some(viewer),
            })
            .await
            .map_err(store_err)?;

        let cache = self.followed_edges.clone();
        let snapshot = edges.borrow_and_update().clone();
        let initial = remember_edges(&cache, &snapshot).await;

        let (tx, rx) = watch::channel(initial);
        ::tokio::spawn(async move {
            loop {
                ::tokio::select! {
                    _ = tx.closed() => break,
                    changed = edges.changed() => {
                        if changed.is_err() {
                            break;
                        }

                        let snapshot = edges.borrow_and_update().clone();
                        let authors = remember_edges(&cache, &snapshot).await;
                        if tx.send(authors).is_err() {
                            break;
                        }
                    },
                }
            }
        });

        Ok(rx)
    }

    /// One-shot variant of `following`, likewise refreshing the unfollow
    /// cache.
    #[tracing::instrument(skip(self))]
    pub async fn refresh_followed(&self) -> Result<Vec<AuthorId>, HandlerError> {
        let viewer = self.viewer().await?;

        let edges = self
            .follow_repository
            .finds(FollowQuery {
                author: None,
                followed_by: Some(viewer),
            })
            .await
            .map_err(store_err)?;

        Ok(remember_edges(&self.followed_edges, &edges).await)
    }

    #[tracing::instrument(skip(self))]
    pub async fn followers_of(&self, author: &AuthorId) -> Result<u32, HandlerError> {
        self.follow_repository
            .count(FollowQuery {
                author: Some(author.clone()),
                followed_by: None,
            })
            .await
            .map_err(store_err)
    }

    /// Authors whose display name starts with `prefix`, drawn from active
    /// posts. At most `SUGGESTION_LIMIT` hits, deduplicated by author.
    #[tracing::instrument(skip(self))]
    pub async fn search_authors(
        &self,
        prefix: &str,
    ) -> Result<SmallVec<[AuthorHit; 5]>, HandlerError> {
        let term = prefix.trim();
        if term.is_empty() {
            return Ok(SmallVec::new());
        }

        // "\u{f8ff}" sorts after every printable char, closing the range
        // right at the prefix
        let posts = self
            .post_repository
            .finds(PostQuery {
                status: Some(PostStatus::Active),
                author_in: None,
                author_name: Some((
                    Bound::Included(term.to_owned()),
                    Bound::Included(format!("{}\u{f8ff}", term)),
                )),
                limit: Some(SUGGESTION_LIMIT),
            })
            .await
            .map_err(store_err)?;

        Ok(distinct_authors(posts).collect())
    }

    /// Every author with at least one active post, in first-seen order.
    #[tracing::instrument(skip(self))]
    pub async fn authors(&self) -> Result<Vec<AuthorHit>, HandlerError> {
        let posts = self
            .post_repository
            .finds(PostQuery {
                status: Some(PostStatus::Active),
                ..PostQuery::default()
            })
            .await
            .map_err(store_err)?;

        Ok(distinct_authors(posts).collect())
    }
}

async fn remember_edges(
    cache: &Mutex<HashMap<AuthorId, EdgeId>>,
    edges: &[FollowEdge],
) -> Vec<AuthorId> {
    let mut cached = cache.lock().await;
    cached.clear();

    let mut seen = HashSet::new();
    let mut authors = Vec::new();
    for edge in edges {
        cached.insert(edge.author.clone(), edge.id);
        if seen.insert(edge.author.clone()) {
            authors.push(edge.author.clone());
        }
    }

    authors
}

fn distinct_authors(posts: Vec<Post>) -> impl Iterator<Item = AuthorHit> {
    let mut seen = HashSet::new();
    posts.into_iter().filter_map(move |post| {
        seen.insert(post.author_id.clone()).then(|| AuthorHit {
            author: post.author,
            author_id: post.author_id,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::super::testing::registered;
    use super::*;

    #[tokio::test]
    async fn follow_then_unfollow_round_trips() {
        let handler = registered("bob@example.com", "Bob").await;
        let alice = AuthorId::new("alice@example.com");

        handler.follow(alice.clone()).await.unwrap();
        assert_eq!(handler.refresh_followed().await.unwrap(), vec![alice.clone()]);

        assert!(handler.unfollow(&alice).await.unwrap());
        assert!(handler.refresh_followed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unfollow_without_observed_edge_deletes_nothing() {
        let handler = registered("bob@example.com", "Bob").await;
        let alice = AuthorId::new("alice@example.com");

        assert!(!handler.unfollow(&alice).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_follows_stack() {
        let handler = registered("bob@example.com", "Bob").await;
        let alice = AuthorId::new("alice@example.com");

        handler.follow(alice.clone()).await.unwrap();
        handler.follow(alice.clone()).await.unwrap();

        assert_eq!(handler.followers_of(&alice).await.unwrap(), 2);

        // the cache holds one edge per author, so one unfollow removes one
        assert!(handler.unfollow(&alice).await.unwrap());
        assert_eq!(handler.followers_of(&alice).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn following_pushes_changes() {
        let handler = registered("bob@example.com", "Bob").await;
        let alice = AuthorId::new("alice@example.com");

        let mut rx = handler.following().await.unwrap();
        assert!(rx.borrow_and_update().is_empty());

        handler.follow(alice.clone()).await.unwrap();

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), vec![alice]);
    }

    #[tokio::test]
    async fn search_deduplicates_and_misses_cleanly() {
        let handler = registered("alice@example.com", "Alice").await;
        handler
            .create_post("One", "<p>x</p>", "Alice")
            .await
            .unwrap();
        handler
            .create_post("Two", "<p>y</p>", "Alice")
            .await
            .unwrap();

        let hits = handler.search_authors("Al").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].author, "Alice");

        assert!(handler.search_authors("Zed").await.unwrap().is_empty());
        assert!(handler.search_authors("   ").await.unwrap().is_empty());
    }
}
