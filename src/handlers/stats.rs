use super::{store_err, Handler, HandlerError};
use crate::entities::{AuthorId, UserStats};
use crate::repositories::{FollowQuery, FollowRepository, StatsRepository};

impl Handler {
    /// Follower and following numbers for an author. The first call computes
    /// them from the edge set and stores the result; every later call serves
    /// that stored snapshot however old it is, until `invalidate_stats`
    /// drops it.
    #[tracing::instrument(skip(self))]
    pub async fn author_stats(&self, author: &AuthorId) -> Result<UserStats, HandlerError> {
        if let Some(cached) = self
            .stats_repository
            .find(author)
            .await
            .map_err(store_err)?
        {
            return Ok(cached);
        }

        let computed = self.compute_stats(author).await?;

        let stored = self
            .stats_repository
            .insert_new(computed.clone())
            .await
            .map_err(store_err)?;
        if !stored {
            // lost the race, read what the winner wrote
            if let Some(winner) = self
                .stats_repository
                .find(author)
                .await
                .map_err(store_err)?
            {
                return Ok(winner);
            }
        }

        Ok(computed)
    }

    /// Drops the stored snapshot so the next `author_stats` recomputes.
    #[tracing::instrument(skip(self))]
    pub async fn invalidate_stats(&self, author: &AuthorId) -> Result<bool, HandlerError> {
        self.stats_repository
            .delete(author)
            .await
            .map_err(store_err)
    }

    async fn compute_stats(&self, author: &AuthorId) -> Result<UserStats, HandlerError> {
        let follower_edges = self
            .follow_repository
            .finds(FollowQuery {
                author: Some(author.clone()),
                followed_by: None,
            })
            .await
            .map_err(store_err)?;
        let following_edges = self
            .follow_repository
            .finds(FollowQuery {
                author: None,
                followed_by: Some(author.clone()),
            })
            .await
            .map_err(store_err)?;

        // raw per-edge numbers, so doubled-up follows count twice
        let followers = follower_edges
            .into_iter()
            .map(|edge| edge.followed_by)
            .collect::<Vec<_>>();
        let following = following_edges
            .into_iter()
            .map(|edge| edge.author)
            .collect::<Vec<_>>();

        Ok(UserStats {
            follower_count: followers.len() as u32,
            following_count: following.len() as u32,
            author: author.clone(),
            followers,
            following,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::registered;
    use super::*;

    #[tokio::test]
    async fn stats_freeze_at_first_read() {
        let handler = registered("bob@example.com", "Bob").await;
        let alice = AuthorId::new("alice@example.com");

        handler.follow(alice.clone()).await.unwrap();

        let first = handler.author_stats(&alice).await.unwrap();
        assert_eq!(first.follower_count, 1);
        assert_eq!(first.followers, vec![AuthorId::new("bob@example.com")]);

        handler.follow(alice.clone()).await.unwrap();

        let second = handler.author_stats(&alice).await.unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn invalidation_lets_stats_catch_up() {
        let handler = registered("bob@example.com", "Bob").await;
        let alice = AuthorId::new("alice@example.com");

        handler.follow(alice.clone()).await.unwrap();
        assert_eq!(handler.author_stats(&alice).await.unwrap().follower_count, 1);

        handler.follow(alice.clone()).await.unwrap();
        assert!(handler.invalidate_stats(&alice).await.unwrap());

        // duplicate edges are counted as-is
        assert_eq!(handler.author_stats(&alice).await.unwrap().follower_count, 2);
    }

    #[tokio::test]
    async fn concurrent_first_reads_agree() {
        let handler = registered("bob@example.com", "Bob").await;
        let alice = AuthorId::new("alice@example.com");

        handler.follow(alice.clone()).await.unwrap();

        let (a, b) = ::tokio::join!(
            handler.author_stats(&alice),
            handler.author_stats(&alice)
        );

        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[tokio::test]
    async fn both_directions_are_reported() {
        let handler = registered("bob@example.com", "Bob").await;
        let alice = AuthorId::new("alice@example.com");
        let bob = AuthorId::new("bob@example.com");

        handler.follow(alice.clone()).await.unwrap();

        let stats = handler.author_stats(&bob).await.unwrap();
        assert_eq!(stats.follower_count, 0);
        assert_eq!(stats.following_count, 1);
        assert_eq!(stats.following, vec![alice]);
    }
}
