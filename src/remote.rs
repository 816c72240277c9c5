#![forbid(unsafe_code)]

//! Remote metadata source: the contract the sync orchestrator consumes plus
//! the YouTube Data API v3 client that implements it in production.
//!
//! Listings are exposed as forward-only pages bound to an opaque
//! continuation token. A consumer restarts the whole listing after a fault;
//! there is no resuming a partially consumed page.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::store::{ChannelSnapshot, CommentRecord, VideoRecord};

/// Opaque continuation cursor returned by a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageToken(String);

impl PageToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One batch of a paginated listing. `next` is `None` once the listing is
/// exhausted.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<PageToken>,
}

#[derive(Debug, Error)]
pub enum RemoteError {
    /// The one per-video condition the orchestrator tolerates instead of
    /// aborting the run.
    #[error("comments are disabled for video {video_id}")]
    CommentsDisabled { video_id: String },
    #[error("{0} not found on the remote source")]
    NotFound(String),
    /// Network failures, quota errors, and malformed responses.
    #[error("remote fetch failed: {0}")]
    Fetch(String),
}

/// Contract between the orchestrator and whatever supplies channel
/// metadata. Production uses [`YouTubeClient`]; tests substitute an
/// in-memory fake.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn channel(&self, channel_id: &str) -> Result<ChannelSnapshot, RemoteError>;

    /// One page of the channel's video listing, newest first. Pass `None`
    /// to start from the beginning.
    async fn video_page(
        &self,
        channel_id: &str,
        token: Option<&PageToken>,
    ) -> Result<Page<VideoRecord>, RemoteError>;

    /// One page of a video's comment threads, flattened so each thread's
    /// top-level comment precedes its replies.
    async fn comment_page(
        &self,
        video_id: &str,
        token: Option<&PageToken>,
    ) -> Result<Page<CommentRecord>, RemoteError>;

    /// Current statistics for a set of known video ids. Implementations
    /// bound the per-request batch size themselves.
    async fn videos_by_ids(&self, ids: &[String]) -> Result<Vec<VideoRecord>, RemoteError>;
}

pub const YOUTUBE_API_BASE: &str = "https://www.googleapis.com/youtube/v3";

const SEARCH_PAGE_SIZE: u32 = 50;
const COMMENT_PAGE_SIZE: u32 = 100;
const DETAILS_BATCH_SIZE: usize = 50;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// YouTube Data API v3 binding. All calls are blocking `ureq` requests
/// executed on the blocking thread pool.
pub struct YouTubeClient {
    agent: ureq::Agent,
    api_key: String,
    api_base: String,
}

impl YouTubeClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(HTTP_TIMEOUT).build(),
            api_key: api_key.into(),
            api_base: YOUTUBE_API_BASE.to_string(),
        }
    }

    async fn fetch<T>(&self, endpoint: &str, query: Vec<(String, String)>) -> Result<T, FetchFailure>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let agent = self.agent.clone();
        let url = format!("{}/{}", self.api_base, endpoint);
        let mut query = query;
        query.push(("key".to_string(), self.api_key.clone()));

        tokio::task::spawn_blocking(move || get_json::<T>(&agent, &url, &query))
            .await
            .map_err(|err| FetchFailure {
                status: None,
                message: format!("request task failed: {err}"),
            })?
    }

    async fn video_details(&self, ids: &[String]) -> Result<Vec<VideoRecord>, RemoteError> {
        let timestamp = Utc::now().to_rfc3339();
        let response: VideoListResponse = self
            .fetch(
                "videos",
                vec![
                    ("part".to_string(), "snippet,contentDetails,statistics".to_string()),
                    ("id".to_string(), ids.join(",")),
                ],
            )
            .await
            .map_err(FetchFailure::into_fetch_error)?;

        Ok(response
            .items
            .into_iter()
            .map(|item| video_from_item(item, &timestamp))
            .collect())
    }
}

#[async_trait]
impl RemoteSource for YouTubeClient {
    async fn channel(&self, channel_id: &str) -> Result<ChannelSnapshot, RemoteError> {
        let response: ChannelListResponse = self
            .fetch(
                "channels",
                vec![
                    ("part".to_string(), "snippet,statistics".to_string()),
                    ("id".to_string(), channel_id.to_string()),
                ],
            )
            .await
            .map_err(FetchFailure::into_fetch_error)?;

        let item = response
            .items
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::NotFound(format!("channel {channel_id}")))?;
        Ok(channel_from_item(item))
    }

    async fn video_page(
        &self,
        channel_id: &str,
        token: Option<&PageToken>,
    ) -> Result<Page<VideoRecord>, RemoteError> {
        let mut query = vec![
            ("part".to_string(), "snippet".to_string()),
            ("channelId".to_string(), channel_id.to_string()),
            ("maxResults".to_string(), SEARCH_PAGE_SIZE.to_string()),
            ("order".to_string(), "date".to_string()),
            ("type".to_string(), "video".to_string()),
        ];
        if let Some(token) = token {
            query.push(("pageToken".to_string(), token.as_str().to_string()));
        }

        let response: SearchListResponse = self
            .fetch("search", query)
            .await
            .map_err(FetchFailure::into_fetch_error)?;

        let ids: Vec<String> = response
            .items
            .into_iter()
            .filter_map(|item| item.id.video_id)
            .collect();
        let items = if ids.is_empty() {
            Vec::new()
        } else {
            self.video_details(&ids).await?
        };

        Ok(Page {
            items,
            next: response.next_page_token.map(PageToken::new),
        })
    }

    async fn comment_page(
        &self,
        video_id: &str,
        token: Option<&PageToken>,
    ) -> Result<Page<CommentRecord>, RemoteError> {
        let mut query = vec![
            ("part".to_string(), "snippet,replies".to_string()),
            ("videoId".to_string(), video_id.to_string()),
            ("maxResults".to_string(), COMMENT_PAGE_SIZE.to_string()),
            ("textFormat".to_string(), "plainText".to_string()),
        ];
        if let Some(token) = token {
            query.push(("pageToken".to_string(), token.as_str().to_string()));
        }

        let response: CommentThreadListResponse = match self.fetch("commentThreads", query).await {
            Ok(response) => response,
            Err(failure) if failure.is_comments_disabled() => {
                return Err(RemoteError::CommentsDisabled {
                    video_id: video_id.to_string(),
                });
            }
            Err(failure) => return Err(failure.into_fetch_error()),
        };

        let mut items = Vec::new();
        for thread in response.items {
            items.extend(flatten_thread(thread, video_id));
        }

        Ok(Page {
            items,
            next: response.next_page_token.map(PageToken::new),
        })
    }

    async fn videos_by_ids(&self, ids: &[String]) -> Result<Vec<VideoRecord>, RemoteError> {
        let mut videos = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(DETAILS_BATCH_SIZE) {
            videos.extend(self.video_details(chunk).await?);
        }
        Ok(videos)
    }
}

/// Intermediate failure carrying the HTTP status so the comment path can
/// recognize the disabled-comments condition before it becomes a
/// [`RemoteError`].
#[derive(Debug)]
struct FetchFailure {
    status: Option<u16>,
    message: String,
}

impl FetchFailure {
    fn is_comments_disabled(&self) -> bool {
        self.status == Some(403) || self.message.contains("commentsDisabled")
    }

    fn into_fetch_error(self) -> RemoteError {
        RemoteError::Fetch(self.message)
    }
}

fn get_json<T: DeserializeOwned>(
    agent: &ureq::Agent,
    url: &str,
    query: &[(String, String)],
) -> Result<T, FetchFailure> {
    let mut request = agent.get(url);
    for (name, value) in query {
        request = request.query(name, value);
    }

    match request.call() {
        Ok(response) => response.into_json::<T>().map_err(|err| FetchFailure {
            status: None,
            message: format!("malformed response from {url}: {err}"),
        }),
        Err(ureq::Error::Status(code, response)) => {
            let body = response.into_string().unwrap_or_default();
            Err(FetchFailure {
                status: Some(code),
                message: format!("{url} returned HTTP {code}: {body}"),
            })
        }
        Err(err) => Err(FetchFailure {
            status: None,
            message: err.to_string(),
        }),
    }
}

// Minimal views of the API payloads. Everything stays optional because the
// API omits fields freely (missing statistics, hidden like counts).

#[derive(Debug, Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<ChannelItem>,
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
    id: String,
    #[serde(default)]
    snippet: ChannelSnippet,
    #[serde(default)]
    statistics: ChannelStatistics,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelSnippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    custom_url: Option<String>,
    #[serde(default)]
    published_at: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelStatistics {
    subscriber_count: Option<String>,
    video_count: Option<String>,
    view_count: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    high: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    #[serde(rename = "default")]
    fallback: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchListResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    id: String,
    #[serde(default)]
    snippet: VideoSnippet,
    #[serde(default)]
    content_details: VideoContentDetails,
    #[serde(default)]
    statistics: VideoStatistics,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    published_at: String,
    #[serde(default)]
    thumbnails: Thumbnails,
    tags: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct VideoContentDetails {
    duration: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoStatistics {
    view_count: Option<String>,
    like_count: Option<String>,
    comment_count: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentThreadListResponse {
    #[serde(default)]
    items: Vec<CommentThread>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommentThread {
    snippet: CommentThreadSnippet,
    replies: Option<CommentReplies>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentThreadSnippet {
    top_level_comment: Option<CommentResource>,
    #[serde(default)]
    total_reply_count: i64,
}

#[derive(Debug, Deserialize)]
struct CommentReplies {
    #[serde(default)]
    comments: Vec<CommentResource>,
}

#[derive(Debug, Deserialize)]
struct CommentResource {
    id: String,
    snippet: CommentSnippet,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentSnippet {
    author_display_name: Option<String>,
    author_profile_image_url: Option<String>,
    author_channel_id: Option<AuthorChannelId>,
    text_display: Option<String>,
    text_original: Option<String>,
    like_count: Option<i64>,
    published_at: Option<String>,
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorChannelId {
    value: Option<String>,
}

/// The API reports counters as decimal strings; absent or unparsable values
/// become zero rather than an error.
fn parse_count(value: Option<&String>) -> i64 {
    value.and_then(|raw| raw.parse::<i64>().ok()).unwrap_or(0)
}

fn best_thumbnail(thumbnails: &Thumbnails) -> Option<String> {
    thumbnails
        .high
        .as_ref()
        .or(thumbnails.medium.as_ref())
        .or(thumbnails.fallback.as_ref())
        .map(|thumb| thumb.url.clone())
}

fn channel_from_item(item: ChannelItem) -> ChannelSnapshot {
    let thumbnail_url = best_thumbnail(&item.snippet.thumbnails);
    ChannelSnapshot {
        id: item.id,
        title: item.snippet.title,
        description: item.snippet.description,
        custom_url: item.snippet.custom_url,
        published_at: item.snippet.published_at,
        thumbnail_url,
        subscriber_count: parse_count(item.statistics.subscriber_count.as_ref()),
        video_count: parse_count(item.statistics.video_count.as_ref()),
        view_count: parse_count(item.statistics.view_count.as_ref()),
        last_synced: Utc::now().to_rfc3339(),
    }
}

fn video_from_item(item: VideoItem, timestamp: &str) -> VideoRecord {
    let thumbnail_url = best_thumbnail(&item.snippet.thumbnails);
    VideoRecord {
        id: item.id,
        title: item.snippet.title,
        description: item.snippet.description,
        published_at: item.snippet.published_at,
        thumbnail_url,
        duration: item.content_details.duration,
        view_count: parse_count(item.statistics.view_count.as_ref()),
        like_count: parse_count(item.statistics.like_count.as_ref()),
        comment_count: parse_count(item.statistics.comment_count.as_ref()),
        tags: item.snippet.tags.unwrap_or_default(),
        local_path: None,
        downloaded_at: None,
        last_updated: timestamp.to_string(),
    }
}

fn comment_from_resource(
    resource: CommentResource,
    video_id: &str,
    parent_id: Option<&str>,
    total_reply_count: i64,
) -> CommentRecord {
    let snippet = resource.snippet;
    CommentRecord {
        id: resource.id,
        video_id: video_id.to_string(),
        author_display_name: snippet.author_display_name.unwrap_or_default(),
        author_profile_image_url: snippet.author_profile_image_url,
        author_channel_id: snippet.author_channel_id.and_then(|channel| channel.value),
        text_display: snippet.text_display.unwrap_or_default(),
        text_original: snippet.text_original.unwrap_or_default(),
        like_count: snippet.like_count.unwrap_or(0),
        published_at: snippet.published_at.unwrap_or_default(),
        updated_at: snippet.updated_at.unwrap_or_default(),
        parent_id: parent_id.map(str::to_string),
        total_reply_count,
    }
}

/// One thread becomes the top-level comment (carrying the real reply count)
/// followed by its replies, each pointing back at the thread id. Replies
/// always record a reply count of zero.
fn flatten_thread(thread: CommentThread, video_id: &str) -> Vec<CommentRecord> {
    let mut comments = Vec::new();
    let Some(top) = thread.snippet.top_level_comment else {
        return comments;
    };
    let thread_id = top.id.clone();
    comments.push(comment_from_resource(
        top,
        video_id,
        None,
        thread.snippet.total_reply_count,
    ));
    if let Some(replies) = thread.replies {
        for reply in replies.comments {
            comments.push(comment_from_resource(reply, video_id, Some(&thread_id), 0));
        }
    }
    comments
}
