mod repository;
mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Feed, InsertOutcome, NewPost};

pub use repository::Repository;

#[cfg(test)]
pub(crate) use repository::tests::{seed_feed, test_repo};

/// The scheduler's view of registered feeds.
#[async_trait]
pub trait FeedDirectory: Send + Sync {
    /// Feed with the oldest `last_fetched_at`, never-fetched feeds first,
    /// ties broken by id.
    async fn next_feed_to_poll(&self) -> Result<Option<Feed>>;

    async fn mark_fetched(&self, feed_id: Uuid, fetched_at: DateTime<Utc>) -> Result<()>;
}

/// Append-only post storage, unique by URL.
#[async_trait]
pub trait PostStore: Send + Sync {
    async fn insert_post(&self, post: NewPost) -> Result<InsertOutcome>;
}
