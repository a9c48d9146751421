use std::ops::RangeBounds;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};

use super::{
    FollowQuery, FollowRepository, PostQuery, PostRepository, RepositoryError, Result, Snapshots,
    StatsRepository, UserMutation, UserRepository,
};
use crate::entities::{AuthorId, Comment, EdgeId, FollowEdge, Post, PostId, PostStatus, User, UserStats};

type Filter<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

pub struct InMemoryRepository<T> {
    items: Mutex<Vec<T>>,
    watchers: Mutex<Vec<Watcher<T>>>,
}

struct Watcher<T> {
    filter: Filter<T>,
    limit: Option<usize>,
    tx: watch::Sender<Vec<T>>,
}

impl<T> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(vec![]),
            watchers: Mutex::new(vec![]),
        }
    }
}
impl<T> Default for InMemoryRepository<T> {
    fn default() -> Self { Self::new() }
}

impl<T: Clone> InMemoryRepository<T> {
    async fn watch(&self, filter: Filter<T>, limit: Option<usize>) -> Snapshots<Vec<T>> {
        let items = self.items.lock().await;
        let mut watchers = self.watchers.lock().await;

        let (tx, rx) = watch::channel(snapshot_of(&items, &filter, limit));
        watchers.push(Watcher { filter, limit, tx });

        rx
    }

    /// Re-runs every watcher's query against the current items. Watchers whose
    /// receiver is gone are dropped here.
    async fn publish(&self) {
        let items = self.items.lock().await;
        let mut watchers = self.watchers.lock().await;

        watchers.retain(|w| w.tx.send(snapshot_of(&items, &w.filter, w.limit)).is_ok());
    }
}

fn snapshot_of<T: Clone>(items: &[T], filter: &Filter<T>, limit: Option<usize>) -> Vec<T> {
    items
        .iter()
        .filter(|v| filter(v))
        .take(limit.unwrap_or(usize::MAX))
        .cloned()
        .collect()
}

#[inline]
fn find_mut<T, P>(v: &mut Vec<T>, predicate: P) -> Result<&mut T>
where P: FnMut(&&mut T) -> bool {
    let mut res = v.iter_mut().filter(predicate).collect::<Vec<_>>();

    match res.len() {
        0 => Err(RepositoryError::NotFound),
        1 => Ok(res.remove(0)),
        i => Err(RepositoryError::NoUnique { matched: i as u32 }),
    }
}

#[inline]
fn find_ref<T, P>(v: &Vec<T>, predicate: P) -> Result<&T>
where P: FnMut(&&T) -> bool {
    let mut res = v.iter().filter(predicate).collect::<Vec<_>>();

    match res.len() {
        0 => Err(RepositoryError::NotFound),
        1 => Ok(res.remove(0)),
        i => Err(RepositoryError::NoUnique { matched: i as u32 }),
    }
}

fn matches_post(q: &PostQuery, post: &Post) -> bool {
    q.status.map(|s| post.status == s).unwrap_or(true)
        && q.author_in
            .as_ref()
            .map(|s| s.contains(&post.author_id))
            .unwrap_or(true)
        && q.author_name
            .as_ref()
            .map(|r| r.contains(&post.author))
            .unwrap_or(true)
}

fn matches_edge(q: &FollowQuery, edge: &FollowEdge) -> bool {
    q.author.as_ref().map(|a| edge.author == *a).unwrap_or(true)
        && q.followed_by
            .as_ref()
            .map(|f| edge.followed_by == *f)
            .unwrap_or(true)
}

#[async_trait]
impl UserRepository for InMemoryRepository<User> {
    async fn insert(&self, item: User) -> Result<bool> {
        let mut guard = self.items.lock().await;

        match find_ref(&guard, |v| v.id == item.id) {
            Ok(_) => return Ok(false),
            Err(RepositoryError::NotFound) => (),
            Err(e) => return Err(e),
        }

        guard.push(item);
        Ok(true)
    }

    async fn find(&self, id: &AuthorId) -> Result<User> {
        let guard = self.items.lock().await;

        Ok(find_ref(&guard, |v| v.id == *id)?.clone())
    }

    async fn find_all(&self) -> Result<Vec<User>> { Ok(self.items.lock().await.to_vec()) }

    async fn upsert(&self, id: &AuthorId, mutation: UserMutation) -> Result<User> {
        let mut guard = self.items.lock().await;

        let missing = matches!(
            find_ref(&guard, |v| v.id == *id),
            Err(RepositoryError::NotFound)
        );
        if missing {
            guard.push(User {
                id: id.clone(),
                name: String::new(),
                image: None,
            });
        }

        let item = find_mut(&mut guard, |v| v.id == *id)?;

        let UserMutation { name, image } = mutation;
        if let Some(val) = name {
            item.name = val;
        }
        if let Some(val) = image {
            item.image = Some(val);
        }

        Ok(item.clone())
    }
}

#[async_trait]
impl PostRepository for InMemoryRepository<Post> {
    async fn insert(&self, item: Post) -> Result<bool> {
        {
            let mut guard = self.items.lock().await;

            match find_ref(&guard, |v| v.id == item.id) {
                Ok(_) => return Ok(false),
                Err(RepositoryError::NotFound) => (),
                Err(e) => return Err(e),
            }

            guard.push(item);
        }

        self.publish().await;
        Ok(true)
    }

    async fn find(&self, id: PostId) -> Result<Post> {
        let guard = self.items.lock().await;

        Ok(find_ref(&guard, |v| v.id == id)?.clone())
    }

    async fn finds(&self, query: PostQuery) -> Result<Vec<Post>> {
        let guard = self.items.lock().await;

        Ok(guard
            .iter()
            .filter(|p| matches_post(&query, p))
            .take(query.limit.map(|n| n as usize).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn subscribe(&self, query: PostQuery) -> Result<Snapshots<Vec<Post>>> {
        let limit = query.limit.map(|n| n as usize);
        let filter: Filter<Post> = Box::new(move |p| matches_post(&query, p));

        Ok(self.watch(filter, limit).await)
    }

    async fn set_status(&self, id: PostId, from: PostStatus, to: PostStatus) -> Result<bool> {
        let hit = {
            let mut guard = self.items.lock().await;
            let item = find_mut(&mut guard, |v| v.id == id)?;

            if item.status != from {
                false
            } else {
                item.status = to;
                true
            }
        };

        if hit {
            self.publish().await;
        }

        Ok(hit)
    }

    async fn insert_liked(&self, id: PostId, liker: AuthorId) -> Result<bool> {
        let inserted = {
            let mut guard = self.items.lock().await;
            let item = find_mut(&mut guard, |v| v.id == id)?;

            item.likes.insert(liker)
        };

        if inserted {
            self.publish().await;
        }

        Ok(inserted)
    }

    async fn insert_comment(&self, id: PostId, comment: Comment) -> Result<bool> {
        {
            let mut guard = self.items.lock().await;
            let item = find_mut(&mut guard, |v| v.id == id)?;

            item.comments.push(comment);
        }

        self.publish().await;
        Ok(true)
    }
}

#[async_trait]
impl FollowRepository for InMemoryRepository<FollowEdge> {
    async fn insert(&self, item: FollowEdge) -> Result<bool> {
        {
            let mut guard = self.items.lock().await;

            match find_ref(&guard, |v| v.id == item.id) {
                Ok(_) => return Ok(false),
                Err(RepositoryError::NotFound) => (),
                Err(e) => return Err(e),
            }

            // the same (author, followed_by) pair may appear any number of times
            guard.push(item);
        }

        self.publish().await;
        Ok(true)
    }

    async fn delete(&self, id: EdgeId) -> Result<bool> {
        let removed = {
            let mut guard = self.items.lock().await;

            match guard.iter().position(|v| v.id == id) {
                Some(i) => {
                    guard.remove(i);
                    true
                }
                None => false,
            }
        };

        if removed {
            self.publish().await;
        }

        Ok(removed)
    }

    async fn finds(&self, query: FollowQuery) -> Result<Vec<FollowEdge>> {
        let guard = self.items.lock().await;

        Ok(guard
            .iter()
            .filter(|e| matches_edge(&query, e))
            .cloned()
            .collect())
    }

    async fn count(&self, query: FollowQuery) -> Result<u32> {
        let guard = self.items.lock().await;

        Ok(guard.iter().filter(|e| matches_edge(&query, e)).count() as u32)
    }

    async fn subscribe(&self, query: FollowQuery) -> Result<Snapshots<Vec<FollowEdge>>> {
        let filter: Filter<FollowEdge> = Box::new(move |e| matches_edge(&query, e));

        Ok(self.watch(filter, None).await)
    }
}

#[async_trait]
impl StatsRepository for InMemoryRepository<UserStats> {
    async fn find(&self, author: &AuthorId) -> Result<Option<UserStats>> {
        let guard = self.items.lock().await;

        match find_ref(&guard, |v| v.author == *author) {
            Ok(item) => Ok(Some(item.clone())),
            Err(RepositoryError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn insert_new(&self, item: UserStats) -> Result<bool> {
        let mut guard = self.items.lock().await;

        match find_ref(&guard, |v| v.author == item.author) {
            Ok(_) => return Ok(false),
            Err(RepositoryError::NotFound) => (),
            Err(e) => return Err(e),
        }

        guard.push(item);
        Ok(true)
    }

    async fn delete(&self, author: &AuthorId) -> Result<bool> {
        let mut guard = self.items.lock().await;

        match guard.iter().position(|v| v.author == *author) {
            Some(i) => {
                guard.remove(i);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn example_post(author: &str, title: &str) -> Post {
        Post {
            id: PostId(Uuid::new_v4()),
            title: title.into(),
            content: String::from("<p>text</p>"),
            author: String::from("someone"),
            author_id: AuthorId::new(author),
            date: Utc::now().date_naive(),
            likes: HashSet::new(),
            comments: vec![],
            status: PostStatus::Active,
        }
    }

    #[tokio::test]
    async fn subscribe_tracks_mutations() {
        let repo = InMemoryRepository::<Post>::new();

        let mut feed = repo
            .subscribe(PostQuery {
                status: Some(PostStatus::Active),
                ..PostQuery::default()
            })
            .await
            .unwrap();
        assert!(feed.borrow_and_update().is_empty());

        repo.insert(example_post("a@example.com", "one")).await.unwrap();
        feed.changed().await.unwrap();
        assert_eq!(feed.borrow_and_update().len(), 1);

        let id = repo.finds(PostQuery::default()).await.unwrap()[0].id;
        repo.set_status(id, PostStatus::Active, PostStatus::Deleted)
            .await
            .unwrap();
        feed.changed().await.unwrap();
        assert!(feed.borrow_and_update().is_empty());
    }

    #[tokio::test]
    async fn dropped_receivers_are_pruned() {
        let repo = InMemoryRepository::<Post>::new();

        let feed = repo.subscribe(PostQuery::default()).await.unwrap();
        drop(feed);

        repo.insert(example_post("a@example.com", "one")).await.unwrap();

        assert_eq!(repo.watchers.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn status_transition_is_compare_and_set() {
        let repo = InMemoryRepository::<Post>::new();
        let post = example_post("a@example.com", "one");
        let id = post.id;
        repo.insert(post).await.unwrap();

        assert!(repo
            .set_status(id, PostStatus::Active, PostStatus::Deleted)
            .await
            .unwrap());
        assert!(!repo
            .set_status(id, PostStatus::Active, PostStatus::Deleted)
            .await
            .unwrap());

        assert_eq!(repo.find(id).await.unwrap().status, PostStatus::Deleted);
    }

    #[tokio::test]
    async fn likes_are_a_set() {
        let repo = InMemoryRepository::<Post>::new();
        let post = example_post("a@example.com", "one");
        let id = post.id;
        repo.insert(post).await.unwrap();

        let liker = AuthorId::new("b@example.com");
        assert!(repo.insert_liked(id, liker.clone()).await.unwrap());
        assert!(!repo.insert_liked(id, liker).await.unwrap());

        assert_eq!(repo.find(id).await.unwrap().likes.len(), 1);
    }
}
