use std::collections::HashSet;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use mongodb::bson::{doc, Document};
use mongodb::change_stream::event::ChangeStreamEvent;
use mongodb::change_stream::ChangeStream;
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use mongodb::{Collection, Database};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::Instrument;

use self::type_convert::status_str;
use super::{
    FollowQuery, FollowRepository, PostQuery, PostRepository, RepositoryError, Result, Snapshots,
    StatsRepository, UserMutation, UserRepository,
};
use crate::entities::{
    AuthorId, Comment, EdgeId, FollowEdge, Post, PostId, PostStatus, User, UserStats,
};

mod type_convert;

pub struct MongoUserRepository {
    coll: Collection<MongoUserModel>,
}

impl MongoUserRepository {
    pub async fn new_with(db: Database) -> ::anyhow::Result<Self> {
        db.run_command(
            doc! {
                "createIndexes": "user",
                "indexes": [{
                    "name": "unique_id",
                    "key": { "id": 1 },
                    "unique": true
                }],
            },
            None,
        )
        .await
        .map_err(::anyhow::Error::new)?;

        let coll = db.collection("user");

        Ok(Self { coll })
    }
}

pub struct MongoPostRepository {
    coll: Collection<MongoPostModel>,
}

impl MongoPostRepository {
    pub async fn new_with(db: Database) -> ::anyhow::Result<Self> {
        db.run_command(
            doc! {
                "createIndexes": "post",
                "indexes": [
                    {
                        "name": "unique_id",
                        "key": { "id": 1 },
                        "unique": true
                    },
                    {
                        "name": "author_name",
                        "key": { "author": 1 }
                    },
                    {
                        "name": "status_author",
                        "key": { "status": 1, "author_id": 1 }
                    },
                ],
            },
            None,
        )
        .await
        .map_err(::anyhow::Error::new)?;

        let coll = db.collection("post");

        Ok(Self { coll })
    }
}

pub struct MongoFollowRepository {
    coll: Collection<MongoFollowModel>,
}

impl MongoFollowRepository {
    pub async fn new_with(db: Database) -> ::anyhow::Result<Self> {
        db.run_command(
            doc! {
                "createIndexes": "follow",
                "indexes": [
                    {
                        "name": "unique_id",
                        "key": { "id": 1 },
                        "unique": true
                    },
                    {
                        "name": "author",
                        "key": { "author": 1 }
                    },
                    {
                        "name": "followed_by",
                        "key": { "followed_by": 1 }
                    },
                ],
            },
            None,
        )
        .await
        .map_err(::anyhow::Error::new)?;

        let coll = db.collection("follow");

        Ok(Self { coll })
    }
}

pub struct MongoStatsRepository {
    coll: Collection<MongoStatsModel>,
}

impl MongoStatsRepository {
    pub async fn new_with(db: Database) -> ::anyhow::Result<Self> {
        db.run_command(
            doc! {
                "createIndexes": "user_stats",
                "indexes": [{
                    "name": "unique_author",
                    "key": { "author": 1 },
                    "unique": true
                }],
            },
            None,
        )
        .await
        .map_err(::anyhow::Error::new)?;

        let coll = db.collection("user_stats");

        Ok(Self { coll })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MongoUserModel {
    id: String,
    name: String,
    image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MongoPostModel {
    id: String,
    title: String,
    content: String,
    author: String,
    author_id: String,
    date: String,
    likes: HashSet<String>,
    comments: Vec<MongoCommentModel>,
    status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MongoCommentModel {
    text: String,
    author_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MongoFollowModel {
    id: String,
    author: String,
    followed_by: String,
    followed_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MongoStatsModel {
    author: String,
    followers: Vec<String>,
    following: Vec<String>,
    follower_count: i64,
    following_count: i64,
}

#[async_trait]
impl UserRepository for MongoUserRepository {
    async fn insert(&self, item: User) -> Result<bool> {
        let model: MongoUserModel = item.into();

        try_unique_check(self.coll.insert_one(model, None).await)
    }

    async fn find(&self, id: &AuthorId) -> Result<User> {
        let model = convert_404_or(convert_repo_err(
            self.coll.find_one(doc! { "id": id.to_string() }, None).await,
        )?)?;

        Ok(model.into())
    }

    async fn find_all(&self) -> Result<Vec<User>> {
        let res = convert_repo_err(
            convert_repo_err(self.coll.find(doc! {}, None).await)?
                .try_collect::<Vec<_>>()
                .await,
        )?
        .drain(..)
        .map(|m| m.into())
        .collect();

        Ok(res)
    }

    async fn upsert(&self, id: &AuthorId, mutation: UserMutation) -> Result<User> {
        let UserMutation { name, image } = mutation;

        let mut set = doc! {};
        let mut on_insert = doc! {};

        match name {
            Some(val) => {
                set.insert("name", val);
            }
            None => {
                on_insert.insert("name", "");
            }
        }
        match image {
            Some(val) => {
                set.insert("image", val);
            }
            None => {
                on_insert.insert("image", ::mongodb::bson::Bson::Null);
            }
        }

        let mut update = doc! {};
        if !set.is_empty() {
            update.insert("$set", set);
        }
        if !on_insert.is_empty() {
            update.insert("$setOnInsert", on_insert);
        }

        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        let model = convert_404_or(convert_repo_err(
            self.coll
                .find_one_and_update(doc! { "id": id.to_string() }, update, options)
                .await,
        )?)?;

        Ok(model.into())
    }
}

async fn find_posts(coll: &Collection<MongoPostModel>, query: PostQuery) -> Result<Vec<Post>> {
    let options = FindOptions::builder()
        .limit(query.limit.map(|n| n as i64))
        .build();
    let query_doc: Document = query.into();

    let res = convert_repo_err(
        convert_repo_err(coll.find(query_doc, options).await)?
            .try_collect::<Vec<_>>()
            .await,
    )?
    .drain(..)
    .map(|m| m.into())
    .collect();

    Ok(res)
}

#[async_trait]
impl PostRepository for MongoPostRepository {
    async fn insert(&self, item: Post) -> Result<bool> {
        let model: MongoPostModel = item.into();

        try_unique_check(self.coll.insert_one(model, None).await)
    }

    async fn find(&self, id: PostId) -> Result<Post> {
        let model = convert_404_or(convert_repo_err(
            self.coll.find_one(doc! { "id": id.to_string() }, None).await,
        )?)?;

        Ok(model.into())
    }

    async fn finds(&self, query: PostQuery) -> Result<Vec<Post>> {
        find_posts(&self.coll, query).await
    }

    async fn subscribe(&self, query: PostQuery) -> Result<Snapshots<Vec<Post>>> {
        // open the stream first so nothing between snapshot and stream is lost
        let events = convert_repo_err(
            self.coll
                .watch(::std::iter::empty::<Document>(), None)
                .await,
        )?;

        let initial = find_posts(&self.coll, query.clone()).await?;
        let (tx, rx) = watch::channel(initial);

        spawn_live_query(events, self.coll.clone(), tx, move |coll| {
            let query = query.clone();
            async move { find_posts(&coll, query).await }
        });

        Ok(rx)
    }

    async fn set_status(&self, id: PostId, from: PostStatus, to: PostStatus) -> Result<bool> {
        let res = convert_repo_err(
            self.coll
                .update_one(
                    doc! { "id": id.to_string(), "status": status_str(from) },
                    doc! { "$set": { "status": status_str(to) } },
                    None,
                )
                .await,
        )?;

        if to_bool(res.matched_count) {
            return Ok(true);
        }

        let exists = to_bool(convert_repo_err(
            self.coll
                .count_documents(doc! { "id": id.to_string() }, None)
                .await,
        )?);
        convert_404(exists)?;

        Ok(false)
    }

    async fn insert_liked(&self, id: PostId, liker: AuthorId) -> Result<bool> {
        let res = convert_repo_err(
            self.coll
                .update_one(
                    doc! { "id": id.to_string() },
                    doc! { "$addToSet": { "likes": liker.to_string() } },
                    None,
                )
                .await,
        )?;

        convert_404(to_bool(res.matched_count))?;
        Ok(to_bool(res.modified_count))
    }

    async fn insert_comment(&self, id: PostId, comment: Comment) -> Result<bool> {
        let model: MongoCommentModel = comment.into();
        let entry = convert_repo_err(::mongodb::bson::to_bson(&model))?;

        let res = convert_repo_err(
            self.coll
                .update_one(
                    doc! { "id": id.to_string() },
                    doc! { "$push": { "comments": entry } },
                    None,
                )
                .await,
        )?;

        convert_404(to_bool(res.matched_count))?;
        Ok(to_bool(res.modified_count))
    }
}

async fn find_edges(
    coll: &Collection<MongoFollowModel>,
    query: FollowQuery,
) -> Result<Vec<FollowEdge>> {
    let query_doc: Document = query.into();

    let res = convert_repo_err(
        convert_repo_err(coll.find(query_doc, None).await)?
            .try_collect::<Vec<_>>()
            .await,
    )?
    .drain(..)
    .map(|m| m.into())
    .collect();

    Ok(res)
}

#[async_trait]
impl FollowRepository for MongoFollowRepository {
    async fn insert(&self, item: FollowEdge) -> Result<bool> {
        let model: MongoFollowModel = item.into();

        try_unique_check(self.coll.insert_one(model, None).await)
    }

    async fn delete(&self, id: EdgeId) -> Result<bool> {
        let res = convert_repo_err(self.coll.delete_one(doc! { "id": id.to_string() }, None).await)?;

        Ok(to_bool(res.deleted_count))
    }

    async fn finds(&self, query: FollowQuery) -> Result<Vec<FollowEdge>> {
        find_edges(&self.coll, query).await
    }

    async fn count(&self, query: FollowQuery) -> Result<u32> {
        let query_doc: Document = query.into();

        let res = convert_repo_err(self.coll.count_documents(query_doc, None).await)?;

        Ok(res as u32)
    }

    async fn subscribe(&self, query: FollowQuery) -> Result<Snapshots<Vec<FollowEdge>>> {
        let events = convert_repo_err(
            self.coll
                .watch(::std::iter::empty::<Document>(), None)
                .await,
        )?;

        let initial = find_edges(&self.coll, query.clone()).await?;
        let (tx, rx) = watch::channel(initial);

        spawn_live_query(events, self.coll.clone(), tx, move |coll| {
            let query = query.clone();
            async move { find_edges(&coll, query).await }
        });

        Ok(rx)
    }
}

#[async_trait]
impl StatsRepository for MongoStatsRepository {
    async fn find(&self, author: &AuthorId) -> Result<Option<UserStats>> {
        let res = convert_repo_err(
            self.coll
                .find_one(doc! { "author": author.to_string() }, None)
                .await,
        )?;

        Ok(res.map(|m| m.into()))
    }

    async fn insert_new(&self, item: UserStats) -> Result<bool> {
        let model: MongoStatsModel = item.into();

        try_unique_check(self.coll.insert_one(model, None).await)
    }

    async fn delete(&self, author: &AuthorId) -> Result<bool> {
        let res = convert_repo_err(
            self.coll
                .delete_one(doc! { "author": author.to_string() }, None)
                .await,
        )?;

        Ok(to_bool(res.deleted_count))
    }
}

/// Re-runs the query on every change event and pushes the fresh result. The
/// pump stops when the receiver goes away or the stream errors, consumers
/// observe the latter as the channel closing.
fn spawn_live_query<M, T, F, Fut>(
    mut events: ChangeStream<ChangeStreamEvent<M>>,
    coll: Collection<M>,
    tx: watch::Sender<Vec<T>>,
    requery: F,
) where
    M: ::serde::de::DeserializeOwned + Unpin + Send + Sync + 'static,
    T: Send + Sync + 'static,
    F: Fn(Collection<M>) -> Fut + Send + Sync + 'static,
    Fut: ::std::future::Future<Output = Result<Vec<T>>> + Send + 'static,
{
    let span = tracing::trace_span!("live_query", coll = coll.name());

    ::tokio::spawn(
        async move {
            loop {
                let event = ::tokio::select! {
                    _ = tx.closed() => break,
                    event = events.next() => event,
                };

                match event {
                    Some(Ok(_)) => (),
                    Some(Err(e)) => {
                        tracing::warn!("change stream ended: {}", e);
                        break;
                    }
                    None => break,
                }

                let snapshot = match requery(coll.clone()).await {
                    Ok(items) => items,
                    Err(e) => {
                        tracing::warn!("failed to re-run live query: {}", e);
                        break;
                    }
                };

                if tx.send(snapshot).is_err() {
                    break;
                }
            }
        }
        .instrument(span),
    );
}

fn convert_repo_err<T, E>(result: ::core::result::Result<T, E>) -> Result<T>
where E: Sync + Send + ::std::error::Error + 'static {
    result.map_err(|e| RepositoryError::Internal(anyhow!(e)))
}

fn try_unique_check<T>(result: ::mongodb::error::Result<T>) -> Result<bool> {
    match match match result {
        Ok(_) => return Ok(true),
        Err(e) => (*e.kind.clone(), e),
    } {
        (
            ::mongodb::error::ErrorKind::Write(::mongodb::error::WriteFailure::WriteError(e)),
            src,
        ) => (e.code, src),
        (_, src) => return Err(RepositoryError::Internal(anyhow!(src))),
    } {
        (11000, _) => Ok(false),
        (_, src) => Err(RepositoryError::Internal(anyhow!(src))),
    }
}

fn convert_404_or<T>(option: Option<T>) -> Result<T> {
    match option {
        Some(t) => Ok(t),
        None => Err(RepositoryError::NotFound),
    }
}

fn convert_404(b: bool) -> Result<()> {
    match b {
        true => Ok(()),
        false => Err(RepositoryError::NotFound),
    }
}

fn to_bool<N>(number: N) -> bool
where N: ::core::convert::TryInto<i8> + ::core::fmt::Debug + Clone {
    match match ::core::convert::TryInto::<i8>::try_into(number.clone()) {
        Ok(n) => n,
        Err(_) => unreachable!("expected 0 or 1, found: {:?}", number),
    } {
        0 => false,
        1 => true,
        n => unreachable!("expected 0 or 1, found: {}", n),
    }
}
