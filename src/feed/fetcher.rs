use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{FetchError, Result};

use super::rss::parse_rss;
use super::RssFeed;

/// Retrieves and normalizes a single feed.
#[async_trait]
pub trait FetchFeed: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<RssFeed, FetchError>;
}

pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self { client })
    }

    async fn download(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl FetchFeed for FeedFetcher {
    async fn fetch(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<RssFeed, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            body = self.download(url) => body?,
        };

        let feed = parse_rss(&body)?;
        tracing::debug!(
            url,
            title = %feed.title,
            link = %feed.link,
            items = feed.items.len(),
            "Fetched feed"
        );
        Ok(feed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<rss version="2.0"><channel>
        <title>Boot.dev Blog</title>
        <link>https://blog.boot.dev/</link>
        <description>Learn to code &amp;amp; more</description>
        <item>
          <title>Rust &amp;amp; you</title>
          <link>https://blog.boot.dev/rust/</link>
          <pubDate>Wed, 01 May 2024 10:00:00 +0000</pubDate>
          <description>Ownership</description>
        </item>
    </channel></rss>"#;

    fn fetcher() -> FeedFetcher {
        FeedFetcher::new(&Config::default()).unwrap()
    }

    #[tokio::test]
    async fn fetches_and_decodes_feed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/index.xml")
            .match_header("user-agent", "gator")
            .with_status(200)
            .with_header("content-type", "application/rss+xml")
            .with_body(FEED)
            .create_async()
            .await;

        let url = format!("{}/index.xml", server.url());
        let feed = fetcher()
            .fetch(&url, &CancellationToken::new())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(feed.title, "Boot.dev Blog");
        assert_eq!(feed.description, "Learn to code & more");
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].title, "Rust & you");
        assert_eq!(feed.items[0].link, "https://blog.boot.dev/rust/");
    }

    #[tokio::test]
    async fn error_status_is_not_parsed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing.xml")
            .with_status(404)
            .with_body(FEED)
            .create_async()
            .await;

        let url = format!("{}/missing.xml", server.url());
        let err = fetcher()
            .fetch(&url, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status(status) if status.as_u16() == 404));
    }

    #[tokio::test]
    async fn malformed_body_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/index.xml")
            .with_status(200)
            .with_body("this is not xml")
            .create_async()
            .await;

        let url = format!("{}/index.xml", server.url());
        let err = fetcher()
            .fetch(&url, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            FetchError::Malformed { preview, .. } => assert_eq!(preview, "this is not xml"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/index.xml")
            .with_body(FEED)
            .expect(0)
            .create_async()
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let url = format!("{}/index.xml", server.url());
        let err = fetcher().fetch(&url, &cancel).await.unwrap_err();

        assert!(matches!(err, FetchError::Cancelled));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn cancelling_mid_request_aborts_it() {
        // Accepts the connection and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(socket);
        });

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let err = fetcher()
            .fetch(&format!("http://{addr}/index.xml"), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Cancelled), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(10));
        server.abort();
    }

    #[tokio::test]
    async fn unreachable_host_is_a_request_error() {
        let err = fetcher()
            .fetch("http://127.0.0.1:1/index.xml", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Request(_)));
    }
}
