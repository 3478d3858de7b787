//! Round-robin feed polling.
//!
//! Each cycle claims exactly one feed, the one fetched least recently, and
//! records the claim before touching the network. A feed that never answers
//! still moves to the back of the queue, so one bad feed cannot starve the
//! others. Cycles run strictly one after another on a single task.

mod interval;

use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::{FeedDirectory, PostStore};
use crate::error::{AppError, Result};
use crate::feed::FetchFeed;
use crate::ingest::{IngestReport, Ingestor};
use crate::models::Feed;

pub use interval::parse_interval;

/// How a single polling cycle ended.
#[derive(Debug)]
pub enum CycleOutcome {
    NoFeeds,
    SelectFailed,
    FetchFailed { feed: Feed },
    Ingested { feed: Feed, report: IngestReport },
}

pub struct Scheduler<'a, D: ?Sized, S: ?Sized, F: ?Sized> {
    directory: &'a D,
    posts: &'a S,
    fetcher: &'a F,
}

impl<'a, D, S, F> Scheduler<'a, D, S, F>
where
    D: FeedDirectory + ?Sized,
    S: PostStore + ?Sized,
    F: FetchFeed + ?Sized,
{
    pub fn new(directory: &'a D, posts: &'a S, fetcher: &'a F) -> Self {
        Self {
            directory,
            posts,
            fetcher,
        }
    }

    /// Polls one feed per `interval` until `shutdown` is cancelled. The first
    /// cycle starts immediately. Ticks missed while a slow cycle runs are
    /// dropped rather than queued.
    ///
    /// Only a failed claim ends the loop with an error.
    pub async fn run(&self, interval: Duration, shutdown: &CancellationToken) -> Result<()> {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Scheduler stopped");
                    return Ok(());
                }
                _ = timer.tick() => {}
            }

            match self.run_cycle(shutdown).await? {
                CycleOutcome::Ingested { feed, report } if report.failed > 0 => {
                    warn!(feed = %feed.name, failed = report.failed, "Some posts were not stored");
                }
                CycleOutcome::FetchFailed { feed } => {
                    debug!(feed = %feed.name, "Feed stays claimed until its next turn");
                }
                _ => {}
            }
        }
    }

    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleOutcome> {
        let feed = match self.directory.next_feed_to_poll().await {
            Ok(Some(feed)) => feed,
            Ok(None) => {
                debug!("No feeds registered");
                return Ok(CycleOutcome::NoFeeds);
            }
            Err(e) => {
                warn!(error = %e, "Could not select the next feed");
                return Ok(CycleOutcome::SelectFailed);
            }
        };

        self.directory
            .mark_fetched(feed.id, Utc::now())
            .await
            .map_err(|e| AppError::Claim {
                feed: feed.url.clone(),
                source: Box::new(e),
            })?;

        let rss = match self.fetcher.fetch(&feed.url, &cancel.child_token()).await {
            Ok(rss) => rss,
            Err(e) => {
                warn!(feed = %feed.name, url = %feed.url, error = %e, "Failed to fetch feed");
                return Ok(CycleOutcome::FetchFailed { feed });
            }
        };

        let report = Ingestor::new(self.posts).ingest(feed.id, &rss.items).await;
        info!(
            feed = %feed.name,
            url = %feed.url,
            entries = rss.items.len(),
            inserted = report.inserted,
            duplicates = report.duplicates,
            skipped = report.skipped,
            "Polled feed"
        );

        Ok(CycleOutcome::Ingested { feed, report })
    }
}
