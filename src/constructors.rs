use std::sync::Arc;

use crate::auth::{IdentityProvider, MemoryIdentityProvider};
use crate::entities::{FollowEdge, Post, User, UserStats};
use crate::handlers::Handler;
use crate::repositories::mock::InMemoryRepository;
use crate::repositories::mongo::{
    MongoFollowRepository, MongoPostRepository, MongoStatsRepository, MongoUserRepository,
};

/// Everything in process, nothing persisted. Identity is backed by the
/// in-memory provider.
pub fn in_memory() -> Handler {
    Handler::new_with(
        Arc::new(InMemoryRepository::<User>::new()),
        Arc::new(InMemoryRepository::<Post>::new()),
        Arc::new(InMemoryRepository::<FollowEdge>::new()),
        Arc::new(InMemoryRepository::<UserStats>::new()),
        Arc::new(MemoryIdentityProvider::new()),
    )
}

/// Documents in mongodb, identity wherever the caller keeps it.
pub async fn mongo(
    uri_str: impl AsRef<str>,
    db_name: impl AsRef<str>,
    identity: Arc<dyn IdentityProvider + Sync + Send>,
) -> ::anyhow::Result<Handler> {
    let c = ::mongodb::Client::with_uri_str(uri_str.as_ref()).await?;
    let db = c.database(db_name.as_ref());

    Ok(Handler::new_with(
        Arc::new(MongoUserRepository::new_with(db.clone()).await?),
        Arc::new(MongoPostRepository::new_with(db.clone()).await?),
        Arc::new(MongoFollowRepository::new_with(db.clone()).await?),
        Arc::new(MongoStatsRepository::new_with(db).await?),
        identity,
    ))
}
