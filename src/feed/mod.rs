mod dates;
mod fetcher;
mod rss;

pub use dates::parse_pub_date;
pub use fetcher::{FeedFetcher, FetchFeed};
pub use rss::{RssFeed, RssItem};
