use std::collections::{HashMap, HashSet};

use tokio::sync::watch;

use super::{store_err, Handler, HandlerError};
use crate::entities::{AuthorId, FollowEdge, Post, PostStatus, User, UserStats};
use crate::repositories::{
    FollowQuery, FollowRepository, PostQuery, PostRepository, RepositoryError, Snapshots,
    UserRepository,
};

const DEFAULT_AUTHOR_NAME: &str = "Anonymous";
const DEFAULT_AVATAR: &str = "/avatar.png";

#[derive(Debug, Clone, PartialEq)]
pub struct AuthorCard {
    pub name: String,
    pub avatar: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub post: Post,
    pub author: AuthorCard,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthorPage {
    pub author: AuthorCard,
    pub posts: Vec<Post>,
    pub stats: UserStats,
}

impl Handler {
    /// Live snapshots of every active post. Ordering and author cards are
    /// `compose_global_feed`'s job.
    #[tracing::instrument(skip(self))]
    pub async fn global_feed(&self) -> Result<Snapshots<Vec<Post>>, HandlerError> {
        self.post_repository
            .subscribe(PostQuery {
                status: Some(PostStatus::Active),
                ..PostQuery::default()
            })
            .await
            .map_err(store_err)
    }

    #[tracing::instrument(skip(self))]
    pub async fn compose_global_feed(&self) -> Result<Vec<FeedEntry>, HandlerError> {
        let posts = self
            .post_repository
            .finds(PostQuery {
                status: Some(PostStatus::Active),
                ..PostQuery::default()
            })
            .await
            .map_err(store_err)?;

        self.compose(posts).await
    }

    /// Live snapshots of active posts by the authors the signed-in author
    /// follows. Following nobody yields an empty feed, not everything.
    /// Changing the follow set re-targets the feed on the fly.
    #[tracing::instrument(skip(self))]
    pub async fn personal_feed(&self) -> Result<Snapshots<Vec<Post>>, HandlerError> {
        let viewer = self.viewer().await?;

        let mut following = self
            .follow_repository
            .subscribe(FollowQuery {
                author: None,
                followed_by: Some(viewer),
            })
            .await
            .map_err(store_err)?;

        let authors = authors_of(&following.borrow_and_update());
        let (initial, mut inner) = if authors.is_empty() {
            (Vec::new(), None)
        } else {
            let mut sub = self
                .post_repository
                .subscribe(feed_query(authors))
                .await
                .map_err(store_err)?;
            let snapshot = sub.borrow_and_update().clone();
            (snapshot, Some(sub))
        };

        let post_repository = self.post_repository.clone();
        let (tx, rx) = watch::channel(initial);
        ::tokio::spawn(async move {
            loop {
                ::tokio::select! {
                    _ = tx.closed() => break,
                    changed = following.changed() => {
                        if changed.is_err() {
                            break;
                        }

                        let authors = authors_of(&following.borrow_and_update());
                        if authors.is_empty() {
                            inner = None;
                            if tx.send(Vec::new()).is_err() {
                                break;
                            }
                            continue;
                        }

                        match post_repository.subscribe(feed_query(authors)).await {
                            Ok(mut sub) => {
                                let snapshot = sub.borrow_and_update().clone();
                                inner = Some(sub);
                                if tx.send(snapshot).is_err() {
                                    break;
                                }
                            },
                            Err(e) => {
                                tracing::warn!("could not re-target feed - {}", e);
                                break;
                            },
                        }
                    },
                    changed = poll_inner(&mut inner) => {
                        if changed.is_err() {
                            break;
                        }

                        let snapshot = match inner.as_mut() {
                            Some(sub) => sub.borrow_and_update().clone(),
                            None => continue,
                        };
                        if tx.send(snapshot).is_err() {
                            break;
                        }
                    },
                }
            }
        });

        Ok(rx)
    }

    #[tracing::instrument(skip(self))]
    pub async fn compose_personal_feed(&self) -> Result<Vec<FeedEntry>, HandlerError> {
        let viewer = self.viewer().await?;

        let edges = self
            .follow_repository
            .finds(FollowQuery {
                author: None,
                followed_by: Some(viewer),
            })
            .await
            .map_err(store_err)?;

        let authors = authors_of(&edges);
        if authors.is_empty() {
            return Ok(Vec::new());
        }

        let posts = self
            .post_repository
            .finds(feed_query(authors))
            .await
            .map_err(store_err)?;

        self.compose(posts).await
    }

    /// Name and avatar for an author, with defaults standing in wherever
    /// the profile is absent or blank.
    #[tracing::instrument(skip(self))]
    pub async fn author_card(&self, author: &AuthorId) -> Result<AuthorCard, HandlerError> {
        match self.user_repository.find(author).await {
            Ok(user) => Ok(card_of(user)),
            Err(RepositoryError::NotFound) => Ok(unknown_author()),
            Err(e) => Err(store_err(e)),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn author_page(&self, author: &AuthorId) -> Result<AuthorPage, HandlerError> {
        let card = self.author_card(author).await?;
        let posts = self.posts_by(author).await?;
        let stats = self.author_stats(author).await?;

        Ok(AuthorPage {
            author: card,
            posts,
            stats,
        })
    }

    async fn compose(&self, mut posts: Vec<Post>) -> Result<Vec<FeedEntry>, HandlerError> {
        posts.sort_by(|a, b| b.date.cmp(&a.date));

        let users = self
            .user_repository
            .find_all()
            .await
            .map_err(store_err)?;
        let cards = users
            .into_iter()
            .map(|user| (user.id.clone(), card_of(user)))
            .collect::<HashMap<_, _>>();

        Ok(posts
            .into_iter()
            .map(|post| {
                let author = cards
                    .get(&post.author_id)
                    .cloned()
                    .unwrap_or_else(unknown_author);
                FeedEntry { post, author }
            })
            .collect())
    }
}

fn card_of(user: User) -> AuthorCard {
    let User { id: _, name, image } = user;

    AuthorCard {
        name: if name.is_empty() {
            DEFAULT_AUTHOR_NAME.to_owned()
        } else {
            name
        },
        avatar: image.unwrap_or_else(|| DEFAULT_AVATAR.to_owned()),
    }
}

fn unknown_author() -> AuthorCard {
    AuthorCard {
        name: DEFAULT_AUTHOR_NAME.to_owned(),
        avatar: DEFAULT_AVATAR.to_owned(),
    }
}

fn authors_of(edges: &[FollowEdge]) -> HashSet<AuthorId> {
    edges.iter().map(|edge| edge.author.clone()).collect()
}

fn feed_query(authors: HashSet<AuthorId>) -> PostQuery {
    PostQuery {
        status: Some(PostStatus::Active),
        author_in: Some(authors),
        author_name: None,
        limit: None,
    }
}

async fn poll_inner(
    inner: &mut Option<Snapshots<Vec<Post>>>,
) -> Result<(), watch::error::RecvError> {
    match inner {
        Some(sub) => sub.changed().await,
        None => ::std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::registered;
    use super::*;
    use crate::entities::{Comment, PostId};

    fn post_by(author: &AuthorId, title: &str, date: &str) -> Post {
        Post {
            id: PostId(::uuid::Uuid::new_v4()),
            title: title.to_owned(),
            content: "<p>body</p>".to_owned(),
            author: "Alice".to_owned(),
            author_id: author.clone(),
            date: date.parse().unwrap(),
            likes: HashSet::new(),
            comments: Vec::<Comment>::new(),
            status: PostStatus::Active,
        }
    }

    #[tokio::test]
    async fn global_composition_sorts_newest_first() {
        let handler = registered("alice@example.com", "Alice").await;
        let alice = AuthorId::new("alice@example.com");

        handler
            .post_repository
            .insert(post_by(&alice, "Old", "2024-01-01"))
            .await
            .unwrap();
        handler
            .post_repository
            .insert(post_by(&alice, "New", "2024-03-01"))
            .await
            .unwrap();

        let feed = handler.compose_global_feed().await.unwrap();
        let titles = feed.iter().map(|e| e.post.title.as_str()).collect::<Vec<_>>();

        assert_eq!(titles, vec!["New", "Old"]);
    }

    #[tokio::test]
    async fn missing_profiles_fall_back_to_defaults() {
        let handler = registered("alice@example.com", "Alice").await;
        let ghost = AuthorId::new("ghost@example.com");

        handler
            .post_repository
            .insert(post_by(&ghost, "Haunted", "2024-02-02"))
            .await
            .unwrap();

        let feed = handler.compose_global_feed().await.unwrap();
        assert_eq!(feed[0].author.name, DEFAULT_AUTHOR_NAME);
        assert_eq!(feed[0].author.avatar, DEFAULT_AVATAR);

        let card = handler.author_card(&ghost).await.unwrap();
        assert_eq!(card, unknown_author());
    }

    #[tokio::test]
    async fn personal_feed_is_empty_without_follows() {
        let handler = registered("bob@example.com", "Bob").await;
        let alice = AuthorId::new("alice@example.com");

        handler
            .post_repository
            .insert(post_by(&alice, "Unseen", "2024-02-02"))
            .await
            .unwrap();

        let mut rx = handler.personal_feed().await.unwrap();
        assert!(rx.borrow_and_update().is_empty());

        assert!(handler.compose_personal_feed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn personal_feed_re_targets_as_follows_change() {
        let handler = registered("bob@example.com", "Bob").await;
        let alice = AuthorId::new("alice@example.com");
        let carol = AuthorId::new("carol@example.com");

        handler
            .post_repository
            .insert(post_by(&alice, "From Alice", "2024-02-02"))
            .await
            .unwrap();
        handler
            .post_repository
            .insert(post_by(&carol, "From Carol", "2024-02-03"))
            .await
            .unwrap();

        let mut rx = handler.personal_feed().await.unwrap();
        assert!(rx.borrow_and_update().is_empty());

        handler.follow(alice.clone()).await.unwrap();
        rx.changed().await.unwrap();
        let titles = rx
            .borrow_and_update()
            .iter()
            .map(|p| p.title.clone())
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["From Alice".to_owned()]);

        handler.unfollow(&alice).await.unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_empty());
    }

    #[tokio::test]
    async fn personal_feed_sees_new_posts_live() {
        let handler = registered("bob@example.com", "Bob").await;
        let alice = AuthorId::new("alice@example.com");

        handler.follow(alice.clone()).await.unwrap();

        let mut rx = handler.personal_feed().await.unwrap();
        assert!(rx.borrow_and_update().is_empty());

        handler
            .post_repository
            .insert(post_by(&alice, "Fresh", "2024-02-02"))
            .await
            .unwrap();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 1);
    }

    #[tokio::test]
    async fn author_page_collects_card_posts_and_stats() {
        let handler = registered("alice@example.com", "Alice").await;
        let alice = AuthorId::new("alice@example.com");

        handler
            .create_post("Hello", "<p>first</p>", "Alice")
            .await
            .unwrap();
        handler.sign_out().await.unwrap();
        handler
            .register("bob@example.com", "hunter2", "Bob")
            .await
            .unwrap();
        handler.follow(alice.clone()).await.unwrap();

        let page = handler.author_page(&alice).await.unwrap();
        assert_eq!(page.author.name, "Alice");
        assert_eq!(page.posts.len(), 1);
        assert_eq!(page.stats.follower_count, 1);
    }
}
