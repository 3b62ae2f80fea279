//! Analysed-posts feed.

use std::cmp::Reverse;

use async_trait::async_trait;
use bon::Builder;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::IbtikarError;

/// Largest page the backend serves.
pub const MAX_PAGE_SIZE: u32 = 200;
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Classifier verdict for a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PostLabel {
    Safe,
    Harmful,
    Unknown,
}

/// A post the backend has already run through the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedPost {
    pub id: i64,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub source: Option<String>,
    pub post_id: String,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub post_created_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl AnalyzedPost {
    /// Parsed label; anything unrecognised is [`PostLabel::Unknown`].
    pub fn label_kind(&self) -> PostLabel {
        self.label.parse().unwrap_or(PostLabel::Unknown)
    }

    /// When the post was published, if the backend knows.
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.post_created_at.as_deref().and_then(parse_timestamp)
    }
}

/// Filters for a feed request.
///
/// ```
/// use ibtikar::posts::PostsQuery;
///
/// let query = PostsQuery::builder().limit(10).label("harmful".to_string()).build();
/// assert_eq!(query.limit, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct PostsQuery {
    #[builder(default = DEFAULT_PAGE_SIZE)]
    pub limit: u32,
    #[builder(default)]
    pub offset: u32,
    pub label: Option<String>,
    pub author_id: Option<String>,
    pub lang: Option<String>,
}

impl Default for PostsQuery {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PostsQuery {
    /// Query parameters for `account_id`; the limit is clamped to what the backend accepts.
    pub fn to_pairs(&self, account_id: i64) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("user_id", account_id.to_string()),
            ("limit", self.limit.clamp(1, MAX_PAGE_SIZE).to_string()),
            ("offset", self.offset.to_string()),
        ];
        let filters = [
            ("label", &self.label),
            ("author_id", &self.author_id),
            ("lang", &self.lang),
        ];
        for (key, value) in filters {
            if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                pairs.push((key, value.to_string()));
            }
        }
        pairs
    }
}

/// Feed payload: `{"items": [...]}` or a bare array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PostsPayload {
    Page {
        #[serde(default)]
        total: Option<u64>,
        items: Vec<AnalyzedPost>,
    },
    List(Vec<AnalyzedPost>),
}

impl Default for PostsPayload {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl PostsPayload {
    /// The page, with `total` falling back to the item count for bare arrays.
    pub fn into_page(self) -> PostsPage {
        match self {
            Self::Page { total, items } => PostsPage {
                total: total.unwrap_or(items.len() as u64),
                items,
            },
            Self::List(items) => PostsPage {
                total: items.len() as u64,
                items,
            },
        }
    }
}

/// One page of the feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostsPage {
    /// Posts stored for the account, across all pages.
    pub total: u64,
    pub items: Vec<AnalyzedPost>,
}

/// A post fetched from X during an analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewPost {
    #[serde(default)]
    pub source: Option<String>,
    pub post_id: String,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// A freshly classified post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewItem {
    pub post: PreviewPost,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub score: f64,
}

impl PreviewItem {
    pub fn label_kind(&self) -> PostLabel {
        self.label.parse().unwrap_or(PostLabel::Unknown)
    }
}

/// Result of asking the backend to pull and classify the latest posts.
///
/// Older backends do not report `inserted` / `skipped`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    #[serde(default)]
    pub items: Vec<PreviewItem>,
    #[serde(default)]
    pub harmful_count: u32,
    #[serde(default)]
    pub safe_count: u32,
    #[serde(default)]
    pub unknown_count: u32,
    #[serde(default)]
    pub inserted: Option<u32>,
    #[serde(default)]
    pub skipped: Option<u32>,
}

impl AnalysisSummary {
    pub fn analysed(&self) -> u32 {
        self.harmful_count + self.safe_count + self.unknown_count
    }
}

/// Source of analysed posts.
#[async_trait]
pub trait PostsClient: Send + Sync {
    async fn fetch_posts(
        &self,
        account_id: i64,
        query: &PostsQuery,
    ) -> Result<PostsPage, IbtikarError>;

    /// Pull the latest posts from X and classify them.
    async fn run_analysis(&self, account_id: i64) -> Result<AnalysisSummary, IbtikarError>;
}

/// Fetch a page and order it newest first.
pub async fn load_feed(
    client: &dyn PostsClient,
    account_id: i64,
    query: &PostsQuery,
) -> Result<PostsPage, IbtikarError> {
    let mut page = client.fetch_posts(account_id, query).await?;
    tracing::debug!(account_id, count = page.items.len(), total = page.total, "loaded posts");
    sort_newest_first(&mut page.items);
    Ok(page)
}

/// Run an analysis pass, then reload the feed so it includes the new verdicts.
pub async fn refresh_feed(
    client: &dyn PostsClient,
    account_id: i64,
    query: &PostsQuery,
) -> Result<(AnalysisSummary, PostsPage), IbtikarError> {
    let summary = client.run_analysis(account_id).await?;
    tracing::info!(
        account_id,
        harmful = summary.harmful_count,
        safe = summary.safe_count,
        unknown = summary.unknown_count,
        "analysis run finished"
    );
    let page = load_feed(client, account_id, query).await?;
    Ok((summary, page))
}

/// Newest `post_created_at` first; undated posts last; ties by descending id.
pub fn sort_newest_first(posts: &mut [AnalyzedPost]) {
    posts.sort_by_cached_key(|post| (Reverse(post.published_at()), Reverse(post.id)));
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}
