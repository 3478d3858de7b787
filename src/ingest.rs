use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::db::PostStore;
use crate::feed::{parse_pub_date, RssItem};
use crate::models::{InsertOutcome, NewPost};

/// What happened to one batch of entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Ingestor<'a, S: PostStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: PostStore + ?Sized> Ingestor<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Stores every entry it can. Duplicates and per-entry failures never stop
    /// the batch, and nothing already inserted is rolled back.
    pub async fn ingest(&self, feed_id: Uuid, items: &[RssItem]) -> IngestReport {
        let mut report = IngestReport::default();

        for item in items {
            let Some(post) = new_post(feed_id, item, Utc::now()) else {
                warn!(feed = %feed_id, title = %item.title, "Skipping entry without a link");
                report.skipped += 1;
                continue;
            };
            let url = post.url.clone();

            match self.store.insert_post(post).await {
                Ok(InsertOutcome::Inserted) => report.inserted += 1,
                Ok(InsertOutcome::DuplicateUrl) => {
                    debug!(feed = %feed_id, url = %url, "Post already stored");
                    report.duplicates += 1;
                }
                Err(e) => {
                    error!(feed = %feed_id, url = %url, error = %e, "Could not insert post");
                    report.failed += 1;
                }
            }
        }

        report
    }
}

fn non_empty(text: &str) -> Option<String> {
    (!text.is_empty()).then(|| text.to_string())
}

/// Builds the record for one entry, or `None` when it has no link to key on.
fn new_post(feed_id: Uuid, item: &RssItem, now: DateTime<Utc>) -> Option<NewPost> {
    let url = item.link.trim();
    if url.is_empty() {
        return None;
    }

    let published_at = match parse_pub_date(&item.pub_date) {
        Ok(date) => Some(date.with_timezone(&Utc)),
        Err(e) => {
            warn!(feed = %feed_id, url, error = %e, "Storing post without publication date");
            None
        }
    };

    Some(NewPost {
        id: Uuid::new_v4(),
        feed_id,
        title: non_empty(&item.title),
        url: url.to_string(),
        description: non_empty(&item.description),
        published_at,
        created_at: now,
        updated_at: now,
    })
}
