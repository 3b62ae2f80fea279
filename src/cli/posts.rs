//! CLI handler for `ibtikar posts`.

use crate::api::BackendClient;
use crate::auth::{AuthError, FileSessionStore, SessionStore};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::posts::{load_feed, refresh_feed, PostLabel, PostsQuery};

use super::PostsArgs;

/// Handle `ibtikar posts`.
pub async fn handle_posts(config: ClientConfig, args: PostsArgs) -> Result<()> {
    let Some(session) = FileSessionStore::new_default().load()? else {
        return Err(AuthError::NotLoggedIn.into());
    };

    let backend = BackendClient::new(&config)?;
    let query = PostsQuery::builder()
        .limit(args.limit)
        .offset(args.offset)
        .maybe_label(args.label)
        .build();
    let account_id = session.identity.id;
    let page = if args.refresh {
        let (summary, page) = refresh_feed(&backend, account_id, &query).await?;
        println!(
            "🔍 Analysed {} new posts: {} harmful, {} safe, {} unknown",
            summary.analysed(),
            summary.harmful_count,
            summary.safe_count,
            summary.unknown_count
        );
        page
    } else {
        load_feed(&backend, account_id, &query).await?
    };

    if page.items.is_empty() {
        println!("No analysed posts yet. Run `ibtikar posts --refresh` to analyse your feed.");
        return Ok(());
    }
    println!(
        "Total: {} post{}",
        page.total,
        if page.total == 1 { "" } else { "s" }
    );
    for post in &page.items {
        let marker = match post.label_kind() {
            PostLabel::Safe => "✅",
            PostLabel::Harmful => "⚠️ ",
            PostLabel::Unknown => "❔",
        };
        let when = post
            .published_at()
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown date".to_string());
        let author = post.author_id.as_deref().unwrap_or("?");
        println!("{marker} [{when}] {author}: {}", post.text.replace('\n', " "));
    }
    Ok(())
}
