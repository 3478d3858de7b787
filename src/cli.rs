use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::scheduler::parse_interval;

/// Command-line RSS aggregator.
#[derive(Parser, Debug)]
#[command(name = "gator", author, version, about)]
pub struct Cli {
    /// Path to the config file (defaults to the platform config directory)
    #[arg(long, global = true, env = "GATOR_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Create a user and log in as them
    Register { name: String },
    /// Switch the current user
    Login { name: String },
    /// List all users
    Users,
    /// Delete every user, feed, follow and post
    Reset,
    /// Register a feed and follow it as the current user
    #[command(name = "addfeed")]
    AddFeed { name: String, url: String },
    /// List all registered feeds
    Feeds,
    /// Follow an existing feed by URL
    Follow { url: String },
    /// List feeds the current user follows
    Following,
    /// Stop following a feed by URL
    Unfollow { url: String },
    /// Show the newest posts from followed feeds
    Browse {
        #[arg(default_value_t = 2)]
        limit: usize,
    },
    /// Poll feeds forever, one feed per interval (e.g. 1s, 1m, 1h)
    Agg {
        #[arg(value_parser = parse_interval)]
        interval: Duration,
    },
}
