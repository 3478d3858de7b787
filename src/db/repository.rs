use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Feed, FeedFollow, InsertOutcome, NewFeed, NewPost, Post, User};

use super::schema::SCHEMA;
use super::{FeedDirectory, PostStore};

const FEED_COLUMNS: &str =
    "f.id, f.name, f.url, f.user_id, f.last_fetched_at, f.created_at, f.updated_at";

const POST_COLUMNS: &str = "p.id, p.feed_id, p.title, p.url, p.description, p.published_at, \
                            p.created_at, p.updated_at, f.name AS feed_name";

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            // Set busy timeout to 5 seconds to handle concurrent access
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            // Enable WAL mode for better concurrency
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
            conn.execute_batch("PRAGMA foreign_keys=ON;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // User operations

    pub async fn create_user(&self, name: &str) -> Result<User> {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        let row = user.clone();
        let inserted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "INSERT INTO users (id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(name) DO NOTHING",
                    params![
                        row.id.to_string(),
                        row.name,
                        format_timestamp(&row.created_at),
                        format_timestamp(&row.updated_at),
                    ],
                )?;
                Ok(changed > 0)
            })
            .await?;

        if !inserted {
            return Err(AppError::UserExists(user.name));
        }
        Ok(user)
    }

    pub async fn get_user_by_name(&self, name: &str) -> Result<Option<User>> {
        let name = name.to_string();
        let user = self
            .conn
            .call(move |conn| {
                let user = conn
                    .query_row(
                        "SELECT id, name, created_at, updated_at FROM users WHERE name = ?1",
                        params![name],
                        user_from_row,
                    )
                    .optional()?;
                Ok(user)
            })
            .await?;
        Ok(user)
    }

    pub async fn get_users(&self) -> Result<Vec<User>> {
        let users = self
            .conn
            .call(|conn| {
                let mut stmt = conn
                    .prepare("SELECT id, name, created_at, updated_at FROM users ORDER BY name")?;
                let users = stmt
                    .query_map([], user_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(users)
            })
            .await?;
        Ok(users)
    }

    /// Removes every user, feed, follow and post.
    pub async fn reset(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM posts", [])?;
                tx.execute("DELETE FROM feed_follows", [])?;
                tx.execute("DELETE FROM feeds", [])?;
                tx.execute("DELETE FROM users", [])?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Feed operations

    pub async fn create_feed(&self, feed: NewFeed) -> Result<Feed> {
        let now = Utc::now();
        let feed = Feed {
            id: Uuid::new_v4(),
            name: feed.name,
            url: feed.url,
            user_id: feed.user_id,
            last_fetched_at: None,
            created_at: now,
            updated_at: now,
        };
        let row = feed.clone();
        let inserted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "INSERT INTO feeds (id, name, url, user_id, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(url) DO NOTHING",
                    params![
                        row.id.to_string(),
                        row.name,
                        row.url,
                        row.user_id.to_string(),
                        format_timestamp(&row.created_at),
                        format_timestamp(&row.updated_at),
                    ],
                )?;
                Ok(changed > 0)
            })
            .await?;

        if !inserted {
            return Err(AppError::FeedExists(feed.url));
        }
        Ok(feed)
    }

    /// All feeds paired with the name of the user who registered them.
    pub async fn get_feeds_with_owner(&self) -> Result<Vec<(Feed, String)>> {
        let feeds = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {FEED_COLUMNS}, u.name FROM feeds f
                     JOIN users u ON f.user_id = u.id
                     ORDER BY f.created_at, f.id"
                ))?;
                let feeds = stmt
                    .query_map([], |row| Ok((feed_from_row(row)?, row.get::<_, String>(7)?)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(feeds)
            })
            .await?;
        Ok(feeds)
    }

    pub async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let url = url.to_string();
        let feed = self
            .conn
            .call(move |conn| {
                let feed = conn
                    .query_row(
                        &format!("SELECT {FEED_COLUMNS} FROM feeds f WHERE f.url = ?1"),
                        params![url],
                        feed_from_row,
                    )
                    .optional()?;
                Ok(feed)
            })
            .await?;
        Ok(feed)
    }

    // Follow operations

    /// Follows are idempotent: following a feed twice returns the existing follow.
    pub async fn create_feed_follow(&self, user_id: Uuid, feed_id: Uuid) -> Result<FeedFollow> {
        let now = format_timestamp(&Utc::now());
        let follow = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO feed_follows (id, user_id, feed_id, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)
                     ON CONFLICT(user_id, feed_id) DO NOTHING",
                    params![
                        Uuid::new_v4().to_string(),
                        user_id.to_string(),
                        feed_id.to_string(),
                        now,
                    ],
                )?;
                let follow = conn.query_row(
                    "SELECT f.name, u.name, ff.created_at
                     FROM feed_follows ff
                     JOIN feeds f ON ff.feed_id = f.id
                     JOIN users u ON ff.user_id = u.id
                     WHERE ff.user_id = ?1 AND ff.feed_id = ?2",
                    params![user_id.to_string(), feed_id.to_string()],
                    follow_from_row,
                )?;
                Ok(follow)
            })
            .await?;
        Ok(follow)
    }

    pub async fn get_feed_follows_for_user(&self, user_id: Uuid) -> Result<Vec<FeedFollow>> {
        let follows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT f.name, u.name, ff.created_at
                     FROM feed_follows ff
                     JOIN feeds f ON ff.feed_id = f.id
                     JOIN users u ON ff.user_id = u.id
                     WHERE ff.user_id = ?1
                     ORDER BY ff.created_at, f.name",
                )?;
                let follows = stmt
                    .query_map(params![user_id.to_string()], follow_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(follows)
            })
            .await?;
        Ok(follows)
    }

    /// Returns whether a follow was removed.
    pub async fn delete_feed_follow(&self, user_id: Uuid, feed_url: &str) -> Result<bool> {
        let feed_url = feed_url.to_string();
        let deleted = self
            .conn
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM feed_follows
                     WHERE user_id = ?1
                       AND feed_id IN (SELECT id FROM feeds WHERE url = ?2)",
                    params![user_id.to_string(), feed_url],
                )?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted > 0)
    }

    // Post operations

    /// Newest posts across the feeds a user follows.
    pub async fn get_posts_for_user(&self, user_id: Uuid, limit: usize) -> Result<Vec<Post>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let posts = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {POST_COLUMNS} FROM posts p
                     JOIN feeds f ON p.feed_id = f.id
                     JOIN feed_follows ff ON ff.feed_id = f.id
                     WHERE ff.user_id = ?1
                     ORDER BY p.published_at DESC NULLS LAST, p.created_at DESC
                     LIMIT ?2"
                ))?;
                let posts = stmt
                    .query_map(params![user_id.to_string(), limit], post_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(posts)
            })
            .await?;
        Ok(posts)
    }

    #[cfg(test)]
    pub async fn get_posts_for_feed(&self, feed_id: Uuid) -> Result<Vec<Post>> {
        let posts = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {POST_COLUMNS} FROM posts p
                     JOIN feeds f ON p.feed_id = f.id
                     WHERE p.feed_id = ?1
                     ORDER BY p.url"
                ))?;
                let posts = stmt
                    .query_map(params![feed_id.to_string()], post_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(posts)
            })
            .await?;
        Ok(posts)
    }

    #[cfg(test)]
    pub async fn get_feed(&self, feed_id: Uuid) -> Result<Option<Feed>> {
        let feed = self
            .conn
            .call(move |conn| {
                let feed = conn
                    .query_row(
                        &format!("SELECT {FEED_COLUMNS} FROM feeds f WHERE f.id = ?1"),
                        params![feed_id.to_string()],
                        feed_from_row,
                    )
                    .optional()?;
                Ok(feed)
            })
            .await?;
        Ok(feed)
    }
}

#[async_trait]
impl FeedDirectory for Repository {
    async fn next_feed_to_poll(&self) -> Result<Option<Feed>> {
        let feed = self
            .conn
            .call(|conn| {
                let feed = conn
                    .query_row(
                        &format!(
                            "SELECT {FEED_COLUMNS} FROM feeds f
                             ORDER BY f.last_fetched_at ASC NULLS FIRST, f.id ASC
                             LIMIT 1"
                        ),
                        [],
                        feed_from_row,
                    )
                    .optional()?;
                Ok(feed)
            })
            .await?;
        Ok(feed)
    }

    async fn mark_fetched(&self, feed_id: Uuid, fetched_at: DateTime<Utc>) -> Result<()> {
        let updated = self
            .conn
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE feeds SET last_fetched_at = ?1, updated_at = ?1 WHERE id = ?2",
                    params![format_timestamp(&fetched_at), feed_id.to_string()],
                )?;
                Ok(updated)
            })
            .await?;

        if updated == 0 {
            return Err(AppError::FeedNotFound(feed_id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PostStore for Repository {
    async fn insert_post(&self, post: NewPost) -> Result<InsertOutcome> {
        let outcome = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"INSERT INTO posts (id, feed_id, title, url, description, published_at, created_at, updated_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                       ON CONFLICT(url) DO NOTHING"#,
                    params![
                        post.id.to_string(),
                        post.feed_id.to_string(),
                        post.title,
                        post.url,
                        post.description,
                        post.published_at.as_ref().map(format_timestamp),
                        format_timestamp(&post.created_at),
                        format_timestamp(&post.updated_at),
                    ],
                )?;
                Ok(if changed > 0 {
                    InsertOutcome::Inserted
                } else {
                    InsertOutcome::DuplicateUrl
                })
            })
            .await?;
        Ok(outcome)
    }
}

/// Fixed-width UTC form, so SQLite's text ordering is chronological.
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(row
        .get::<_, String>(idx)
        .ok()
        .and_then(|s| parse_datetime(&s))
        .unwrap_or_else(Utc::now))
}

fn uuid_column(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_column(row, 0)?,
        name: row.get(1)?,
        created_at: timestamp_column(row, 2)?,
        updated_at: timestamp_column(row, 3)?,
    })
}

fn feed_from_row(row: &Row) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: uuid_column(row, 0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        user_id: uuid_column(row, 3)?,
        last_fetched_at: row
            .get::<_, Option<String>>(4)?
            .and_then(|s| parse_datetime(&s)),
        created_at: timestamp_column(row, 5)?,
        updated_at: timestamp_column(row, 6)?,
    })
}

fn follow_from_row(row: &Row) -> rusqlite::Result<FeedFollow> {
    Ok(FeedFollow {
        feed_name: row.get(0)?,
        user_name: row.get(1)?,
        created_at: timestamp_column(row, 2)?,
    })
}

fn post_from_row(row: &Row) -> rusqlite::Result<Post> {
    Ok(Post {
        id: uuid_column(row, 0)?,
        feed_id: uuid_column(row, 1)?,
        title: row.get(2)?,
        url: row.get(3)?,
        description: row.get(4)?,
        published_at: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| parse_datetime(&s)),
        created_at: timestamp_column(row, 6)?,
        updated_at: timestamp_column(row, 7)?,
        feed_name: row.get(8)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    pub(crate) struct TestRepo {
        pub(crate) repo: Repository,
        _tmpdir: TempDir,
    }

    pub(crate) async fn test_repo() -> TestRepo {
        let tmpdir = tempfile::tempdir().unwrap();
        let db_path = tmpdir.path().join("test.db");
        let repo = Repository::new(db_path.to_string_lossy().as_ref())
            .await
            .unwrap();
        TestRepo {
            repo,
            _tmpdir: tmpdir,
        }
    }

    pub(crate) async fn seed_feed(repo: &Repository, owner: &User, url: &str) -> Feed {
        repo.create_feed(NewFeed {
            name: format!("Feed at {url}"),
            url: url.into(),
            user_id: owner.id,
        })
        .await
        .unwrap()
    }

    fn new_post(feed_id: Uuid, url: &str) -> NewPost {
        let now = Utc::now();
        NewPost {
            id: Uuid::new_v4(),
            feed_id,
            title: Some("Title".into()),
            url: url.into(),
            description: None,
            published_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn duplicate_user_name_is_rejected() {
        let test = test_repo().await;
        let repo = &test.repo;
        repo.create_user("kahya").await.unwrap();

        let err = repo.create_user("kahya").await.unwrap_err();
        assert!(matches!(err, AppError::UserExists(name) if name == "kahya"));
        assert_eq!(repo.get_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_feed_url_is_rejected() {
        let test = test_repo().await;
        let repo = &test.repo;
        let user = repo.create_user("lane").await.unwrap();
        seed_feed(repo, &user, "https://example.com/rss").await;

        let err = repo
            .create_feed(NewFeed {
                name: "Again".into(),
                url: "https://example.com/rss".into(),
                user_id: user.id,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::FeedExists(_)));
    }

    #[tokio::test]
    async fn next_feed_prefers_never_fetched_then_oldest() {
        let test = test_repo().await;
        let repo = &test.repo;
        let user = repo.create_user("lane").await.unwrap();
        let a = seed_feed(repo, &user, "https://a.example/rss").await;
        let b = seed_feed(repo, &user, "https://b.example/rss").await;
        let c = seed_feed(repo, &user, "https://c.example/rss").await;

        let now = Utc::now();
        repo.mark_fetched(a.id, now - Duration::hours(1)).await.unwrap();
        repo.mark_fetched(b.id, now - Duration::hours(2)).await.unwrap();

        let next = repo.next_feed_to_poll().await.unwrap().unwrap();
        assert_eq!(next.id, c.id);

        repo.mark_fetched(c.id, now).await.unwrap();
        let next = repo.next_feed_to_poll().await.unwrap().unwrap();
        assert_eq!(next.id, b.id);
    }

    #[tokio::test]
    async fn next_feed_is_none_without_feeds() {
        let test = test_repo().await;
        assert!(test.repo.next_feed_to_poll().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_fetched_round_trips_timestamp() {
        let test = test_repo().await;
        let repo = &test.repo;
        let user = repo.create_user("lane").await.unwrap();
        let feed = seed_feed(repo, &user, "https://a.example/rss").await;
        let at = Utc::now();

        repo.mark_fetched(feed.id, at).await.unwrap();

        let stored = repo.get_feed(feed.id).await.unwrap().unwrap();
        assert_eq!(stored.last_fetched_at, Some(at));
    }

    #[tokio::test]
    async fn mark_fetched_unknown_feed_is_an_error() {
        let test = test_repo().await;
        let err = test
            .repo
            .mark_fetched(Uuid::new_v4(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::FeedNotFound(_)));
    }

    #[tokio::test]
    async fn insert_post_reports_duplicate_url() {
        let test = test_repo().await;
        let repo = &test.repo;
        let user = repo.create_user("lane").await.unwrap();
        let feed = seed_feed(repo, &user, "https://a.example/rss").await;
        let other = seed_feed(repo, &user, "https://b.example/rss").await;

        let first = repo
            .insert_post(new_post(feed.id, "https://a.example/1"))
            .await
            .unwrap();
        // Uniqueness is global, not per feed.
        let second = repo
            .insert_post(new_post(other.id, "https://a.example/1"))
            .await
            .unwrap();

        assert_eq!(first, InsertOutcome::Inserted);
        assert_eq!(second, InsertOutcome::DuplicateUrl);
        assert_eq!(repo.get_posts_for_feed(feed.id).await.unwrap().len(), 1);
        assert!(repo.get_posts_for_feed(other.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn follows_are_idempotent_and_removable() {
        let test = test_repo().await;
        let repo = &test.repo;
        let user = repo.create_user("lane").await.unwrap();
        let feed = seed_feed(repo, &user, "https://a.example/rss").await;

        let first = repo.create_feed_follow(user.id, feed.id).await.unwrap();
        let second = repo.create_feed_follow(user.id, feed.id).await.unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(first.user_name, "lane");
        assert_eq!(first.feed_name, feed.name);

        let follows = repo.get_feed_follows_for_user(user.id).await.unwrap();
        assert_eq!(follows.len(), 1);
        assert_eq!(follows[0].created_at, first.created_at);

        assert!(repo.delete_feed_follow(user.id, &feed.url).await.unwrap());
        assert!(!repo.delete_feed_follow(user.id, &feed.url).await.unwrap());
        assert!(repo.get_feed_follows_for_user(user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn posts_for_user_are_newest_first_with_undated_last() {
        let test = test_repo().await;
        let repo = &test.repo;
        let user = repo.create_user("lane").await.unwrap();
        let feed = seed_feed(repo, &user, "https://a.example/rss").await;
        repo.create_feed_follow(user.id, feed.id).await.unwrap();

        let now = Utc::now();
        let mut old = new_post(feed.id, "https://a.example/old");
        old.published_at = Some(now - Duration::days(2));
        let mut new = new_post(feed.id, "https://a.example/new");
        new.published_at = Some(now - Duration::hours(1));
        let undated = new_post(feed.id, "https://a.example/undated");
        for post in [old, undated, new] {
            repo.insert_post(post).await.unwrap();
        }

        let posts = repo.get_posts_for_user(user.id, 10).await.unwrap();
        let urls: Vec<_> = posts.iter().map(|p| p.url.as_str()).collect();
        assert_eq!(
            urls,
            [
                "https://a.example/new",
                "https://a.example/old",
                "https://a.example/undated"
            ]
        );
        assert_eq!(posts[0].feed_name.as_deref(), Some(feed.name.as_str()));

        assert_eq!(repo.get_posts_for_user(user.id, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let test = test_repo().await;
        let repo = &test.repo;
        let user = repo.create_user("lane").await.unwrap();
        let feed = seed_feed(repo, &user, "https://a.example/rss").await;
        repo.create_feed_follow(user.id, feed.id).await.unwrap();
        repo.insert_post(new_post(feed.id, "https://a.example/1"))
            .await
            .unwrap();

        repo.reset().await.unwrap();

        assert!(repo.get_users().await.unwrap().is_empty());
        assert!(repo.get_feeds_with_owner().await.unwrap().is_empty());
        assert!(repo.next_feed_to_poll().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_datetime_in_row_falls_back_to_now() {
        let test = test_repo().await;
        let repo = &test.repo;
        let user = repo.create_user("lane").await.unwrap();

        repo.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE users SET created_at = 'not-a-datetime' WHERE id = ?1",
                    params![user.id.to_string()],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let user = repo.get_user_by_name("lane").await.unwrap().unwrap();
        assert!(user.created_at > Utc::now() - Duration::minutes(1));
    }
}
