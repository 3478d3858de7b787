use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::cli::Command;
use crate::config::Config;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::feed::FeedFetcher;
use crate::models::{NewFeed, User};
use crate::scheduler::Scheduler;

/// Everything a command needs, built once in `main`.
pub struct Context {
    pub repo: Repository,
    pub config: Config,
    pub config_path: PathBuf,
}

pub async fn run(command: Command, ctx: &Context) -> Result<()> {
    match command {
        Command::Register { name } => register(ctx, &name).await,
        Command::Login { name } => login(ctx, &name).await,
        Command::Users => list_users(ctx).await,
        Command::Reset => {
            ctx.repo.reset().await?;
            println!("Database has been reset.");
            Ok(())
        }
        Command::AddFeed { name, url } => add_feed(ctx, name, url).await,
        Command::Feeds => list_feeds(ctx).await,
        Command::Follow { url } => follow(ctx, &url).await,
        Command::Following => following(ctx).await,
        Command::Unfollow { url } => unfollow(ctx, &url).await,
        Command::Browse { limit } => browse(ctx, limit).await,
        Command::Agg { interval } => {
            let fetcher = FeedFetcher::new(&ctx.config)?;
            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Received Ctrl-C, stopping; aborting any in-flight fetch");
                    signal.cancel();
                }
            });

            println!("Collecting feeds every {interval:?}");
            Scheduler::new(&ctx.repo, &ctx.repo, &fetcher)
                .run(interval, &shutdown)
                .await
        }
    }
}

/// The logged-in user, for commands that act on someone's follows.
async fn current_user(ctx: &Context) -> Result<User> {
    let name = ctx
        .config
        .current_user_name
        .as_deref()
        .ok_or(AppError::NotLoggedIn)?;
    ctx.repo
        .get_user_by_name(name)
        .await?
        .ok_or_else(|| AppError::UserNotFound(name.to_string()))
}

async fn register(ctx: &Context, name: &str) -> Result<()> {
    let user = ctx.repo.create_user(name).await?;
    ctx.config.with_current_user(name).save(&ctx.config_path)?;
    println!("Registered user {} ({})", user.name, user.id);
    Ok(())
}

async fn login(ctx: &Context, name: &str) -> Result<()> {
    let user = ctx
        .repo
        .get_user_by_name(name)
        .await?
        .ok_or_else(|| AppError::UserNotFound(name.to_string()))?;
    ctx.config.with_current_user(&user.name).save(&ctx.config_path)?;
    println!("Logged in as {}", user.name);
    Ok(())
}

async fn list_users(ctx: &Context) -> Result<()> {
    let current = ctx.config.current_user_name.as_deref();
    for user in ctx.repo.get_users().await? {
        if current == Some(user.name.as_str()) {
            println!("* {} (current)", user.name);
        } else {
            println!("* {}", user.name);
        }
    }
    Ok(())
}

async fn add_feed(ctx: &Context, name: String, url: String) -> Result<()> {
    let user = current_user(ctx).await?;
    let feed = ctx
        .repo
        .create_feed(NewFeed {
            name,
            url,
            user_id: user.id,
        })
        .await?;
    let follow = ctx.repo.create_feed_follow(user.id, feed.id).await?;
    println!("Added feed {} ({})", feed.name, feed.url);
    println!("{} now follows {}", follow.user_name, follow.feed_name);
    Ok(())
}

async fn list_feeds(ctx: &Context) -> Result<()> {
    for (feed, owner) in ctx.repo.get_feeds_with_owner().await? {
        println!(" * {}\n * {}\n * {}\n---", feed.name, feed.url, owner);
    }
    Ok(())
}

async fn follow(ctx: &Context, url: &str) -> Result<()> {
    let user = current_user(ctx).await?;
    let feed = ctx
        .repo
        .get_feed_by_url(url)
        .await?
        .ok_or_else(|| AppError::FeedNotFound(url.to_string()))?;
    let follow = ctx.repo.create_feed_follow(user.id, feed.id).await?;
    println!("{} now follows {}", follow.user_name, follow.feed_name);
    Ok(())
}

async fn following(ctx: &Context) -> Result<()> {
    let user = current_user(ctx).await?;
    println!(" - {}", user.name);
    for follow in ctx.repo.get_feed_follows_for_user(user.id).await? {
        println!(
            " * {} (since {})",
            follow.feed_name,
            follow.created_at.format("%Y-%m-%d")
        );
    }
    Ok(())
}

async fn unfollow(ctx: &Context, url: &str) -> Result<()> {
    let user = current_user(ctx).await?;
    if !ctx.repo.delete_feed_follow(user.id, url).await? {
        return Err(AppError::FeedNotFound(format!("{url} (not followed)")));
    }
    println!("{} unfollowed {}", user.name, url);
    Ok(())
}

async fn browse(ctx: &Context, limit: usize) -> Result<()> {
    let user = current_user(ctx).await?;
    for post in ctx.repo.get_posts_for_user(user.id, limit).await? {
        let published = post
            .published_at
            .map(|at| at.format("%a %d %b %Y %H:%M").to_string())
            .unwrap_or_else(|| "undated".to_string());
        println!(
            "{} from {}",
            published,
            post.feed_name.as_deref().unwrap_or("unknown feed")
        );
        println!("--- {} ---", post.title.as_deref().unwrap_or("(untitled)"));
        if let Some(description) = &post.description {
            println!("    {description}");
        }
        println!("Link: {}", post.url);
        println!("=====================================");
    }
    Ok(())
}
