#![forbid(unsafe_code)]

//! Axum backend serving the mirrored channel.
//!
//! Requests read from the local SQLite mirror and the download directory;
//! the only paths that touch YouTube are the sync trigger and the download
//! endpoints, both of which run their work in the background. A periodic
//! task performs an incremental sync on the configured interval.

use std::{
    io::SeekFrom,
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use mirrortube_tools::config::{ConfigOverrides, resolve_config};
use mirrortube_tools::download::{DownloadManager, DownloadTask};
use mirrortube_tools::remote::YouTubeClient;
use mirrortube_tools::security::refuse_root;
use mirrortube_tools::store::{ChannelSnapshot, CommentRecord, Store, SyncRun, VideoRecord};
use mirrortube_tools::sync::{SyncEngine, SyncOptions};
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
    signal,
};
use tokio_util::io::ReaderStream;

#[derive(Debug, Clone, Default)]
struct BackendArgs {
    db_path: Option<PathBuf>,
    downloads_path: Option<PathBuf>,
    port: Option<u16>,
    host: Option<String>,
    env_file: Option<PathBuf>,
}

impl BackendArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--db=") {
                parsed.db_path = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--downloads=") {
                parsed.downloads_path = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--port=") {
                parsed.port = Some(parse_port_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--host=") {
                parsed.host = Some(value.to_string());
                continue;
            }
            if let Some(value) = arg.strip_prefix("--env-file=") {
                parsed.env_file = Some(PathBuf::from(value));
                continue;
            }

            match arg.as_str() {
                "--db" => {
                    let value = args.next().ok_or_else(|| anyhow!("--db requires a value"))?;
                    parsed.db_path = Some(PathBuf::from(value));
                }
                "--downloads" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--downloads requires a value"))?;
                    parsed.downloads_path = Some(PathBuf::from(value));
                }
                "--port" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--port requires a value"))?;
                    parsed.port = Some(parse_port_arg(&value)?);
                }
                "--host" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--host requires a value"))?;
                    parsed.host = Some(value);
                }
                "--env-file" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--env-file requires a value"))?;
                    parsed.env_file = Some(PathBuf::from(value));
                }
                _ => return Err(anyhow!("unknown argument: {arg}")),
            }
        }
        Ok(parsed)
    }

    fn into_overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            database_path: self.db_path,
            downloads_path: self.downloads_path,
            mirror_port: self.port,
            mirror_host: self.host,
            env_path: self.env_file,
            download_on_sync: None,
        }
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

/// Shared state injected into every handler.
#[derive(Clone)]
struct AppState {
    store: Store,
    downloads: DownloadManager,
    engine: Arc<SyncEngine>,
    syncing: Arc<AtomicBool>,
    downloads_dir: Arc<PathBuf>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        let body = json!({ "error": self.message });
        (self.status, headers, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::internal(format!("{err:#}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    refuse_root("backend")?;

    let args = BackendArgs::parse()?;
    let config = resolve_config(args.into_overrides())?;
    let listen_host: IpAddr = config
        .mirror_host
        .parse()
        .context("parsing MIRROR_HOST as an IP address")?;

    let store = Store::open(&config.database_path)
        .await
        .context("opening database")?;
    let downloads = DownloadManager::new(config.downloads_path.clone())?;
    let source = Arc::new(YouTubeClient::new(config.api_key.clone()));
    let engine = Arc::new(SyncEngine::new(
        store.clone(),
        source,
        downloads.clone(),
        SyncOptions {
            channel_id: config.channel_id.clone(),
            download_media: config.download_on_sync,
        },
    ));
    let syncing = Arc::new(AtomicBool::new(false));

    let state = AppState {
        store: store.clone(),
        downloads,
        engine: engine.clone(),
        syncing: syncing.clone(),
        downloads_dir: Arc::new(config.downloads_path.clone()),
    };

    spawn_scheduled_sync(engine, syncing, config.sync_interval_hours);

    let app = Router::new()
        .route("/api/health", get(health))
        .route("/api/channel", get(get_channel))
        .route("/api/videos", get(list_videos))
        .route("/api/videos/download-all", post(download_all))
        .route("/api/videos/{id}", get(get_video))
        .route("/api/videos/{id}/comments", get(get_video_comments))
        .route(
            "/api/videos/{id}/comments/export",
            get(export_video_comments),
        )
        .route(
            "/api/videos/{id}/download",
            post(download_video).delete(delete_video_media),
        )
        .route("/api/search/videos", get(search_videos))
        .route("/api/search/comments", get(search_comments))
        .route("/api/sync/status", get(sync_status))
        .route("/api/sync/start", post(start_sync))
        .route("/api/downloads", get(downloads_overview))
        .route("/api/downloads/clear", post(clear_download_queue))
        .route("/api/downloads/{id}", get(download_status))
        .route("/downloads/{file}", get(serve_download))
        .with_state(state);

    let addr = SocketAddr::new(listen_host, config.mirror_port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    println!("API server listening on http://{addr}");
    println!("Database: {}", config.database_path.display());
    println!("Channel: {}", config.channel_id);

    if store.get_channel().await?.is_none() {
        println!();
        println!("No channel data yet. Trigger the initial sync:");
        println!("  POST http://{addr}/api/sync/start with body {{\"full\": true}}");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

async fn shutdown_signal() {
    // Only graceful shutdown is affected if the handler cannot install;
    // the process still dies on the signal itself.
    if let Err(err) = signal::ctrl_c().await {
        eprintln!("Failed to install Ctrl+C handler: {}", err);
    }
}

/// Kicks off an incremental sync on a fixed cadence, skipping ticks while a
/// manual sync holds the flag.
fn spawn_scheduled_sync(engine: Arc<SyncEngine>, syncing: Arc<AtomicBool>, interval_hours: u64) {
    tokio::spawn(async move {
        let period = Duration::from_secs(interval_hours.saturating_mul(3600).max(60));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; consume it so the initial
        // sync stays a manual decision.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if syncing
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                println!("Scheduled sync skipped - sync already in progress");
                continue;
            }
            println!("Starting scheduled incremental sync...");
            if let Err(err) = engine.incremental_sync().await {
                eprintln!("  Warning: scheduled sync failed: {err:#}");
            }
            syncing.store(false, Ordering::SeqCst);
        }
    });
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn get_channel(State(state): State<AppState>) -> ApiResult<Json<ChannelSnapshot>> {
    let channel = state
        .store
        .get_channel()
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("channel not found; run an initial sync first"))?;
    Ok(Json(channel))
}

#[derive(Debug, Deserialize)]
struct ListVideosQuery {
    limit: Option<u64>,
    offset: Option<u64>,
}

#[derive(Serialize)]
struct VideoListing {
    videos: Vec<VideoRecord>,
    total: i64,
}

async fn list_videos(
    State(state): State<AppState>,
    Query(query): Query<ListVideosQuery>,
) -> ApiResult<Json<VideoListing>> {
    let videos = state
        .store
        .list_videos(query.limit, query.offset)
        .await
        .map_err(internal)?;
    let total = state.store.count_videos().await.map_err(internal)?;
    Ok(Json(VideoListing { videos, total }))
}

async fn get_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<VideoRecord>> {
    let video = state
        .store
        .get_video(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("video not found"))?;
    Ok(Json(video))
}

#[derive(Debug, Deserialize)]
struct CommentsQuery {
    limit: Option<u64>,
}

async fn get_video_comments(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<CommentsQuery>,
) -> ApiResult<Json<Vec<CommentRecord>>> {
    let comments = state
        .store
        .list_comments_for_video(&id, query.limit)
        .await
        .map_err(internal)?;
    Ok(Json(comments))
}

async fn export_video_comments(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Response> {
    let video = state
        .store
        .get_video(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("video not found"))?;
    let comments = state
        .store
        .list_comments_for_video(&id, None)
        .await
        .map_err(internal)?;

    let csv = comments_to_csv(&comments);
    let filename = format!("{}_comments.csv", filename_fragment(&video.title));

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, "text/csv".parse().unwrap());
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
            .map_err(|err| ApiError::internal(err.to_string()))?,
    );
    Ok((StatusCode::OK, headers, csv).into_response())
}

/// Flattens comment rows into the export format: author and text are
/// quoted with doubled inner quotes, replies carry their parent id.
fn comments_to_csv(comments: &[CommentRecord]) -> String {
    let mut rows =
        vec!["Author,Comment,Likes,Published Date,Is Reply,Parent Comment ID".to_string()];
    for comment in comments {
        rows.push(
            [
                csv_quote(&comment.author_display_name),
                csv_quote(&comment.text_original),
                comment.like_count.to_string(),
                comment.published_at.clone(),
                if comment.parent_id.is_some() { "Yes" } else { "No" }.to_string(),
                comment.parent_id.clone().unwrap_or_default(),
            ]
            .join(","),
        );
    }
    rows.join("\n")
}

fn csv_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn filename_fragment(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
    limit: Option<u64>,
}

fn required_query(query: Option<String>) -> ApiResult<String> {
    query
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("query parameter \"q\" is required"))
}

async fn search_videos(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<VideoRecord>>> {
    let q = required_query(query.q)?;
    let videos = state
        .store
        .search_videos(&q, query.limit.unwrap_or(50))
        .await
        .map_err(internal)?;
    Ok(Json(videos))
}

async fn search_comments(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<CommentRecord>>> {
    let q = required_query(query.q)?;
    let comments = state
        .store
        .search_comments(&q, query.limit.unwrap_or(100))
        .await
        .map_err(internal)?;
    Ok(Json(comments))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncStatusResponse {
    is_syncing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    latest_sync: Option<SyncRun>,
}

async fn sync_status(State(state): State<AppState>) -> ApiResult<Json<SyncStatusResponse>> {
    let latest_sync = state.store.latest_sync_run().await.map_err(internal)?;
    Ok(Json(SyncStatusResponse {
        is_syncing: state.syncing.load(Ordering::SeqCst),
        latest_sync,
    }))
}

#[derive(Debug, Default, Deserialize)]
struct SyncStartRequest {
    #[serde(default)]
    full: bool,
}

async fn start_sync(
    State(state): State<AppState>,
    payload: Option<Json<SyncStartRequest>>,
) -> ApiResult<Json<Value>> {
    let full = payload.map(|Json(request)| request.full).unwrap_or(false);

    if state
        .syncing
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(ApiError::conflict("sync already in progress"));
    }

    let engine = state.engine.clone();
    let flag = state.syncing.clone();
    tokio::spawn(async move {
        let result = if full {
            engine.full_sync().await
        } else {
            engine.incremental_sync().await
        };
        if let Err(err) = result {
            eprintln!("  Warning: sync failed: {err:#}");
        }
        flag.store(false, Ordering::SeqCst);
    });

    Ok(Json(json!({
        "message": "Sync started",
        "type": if full { "full" } else { "incremental" },
    })))
}

async fn download_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<Value>> {
    let video = state
        .store
        .get_video(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("video not found"))?;

    if let Some(local_path) = video.local_path {
        return Ok(Json(json!({
            "message": "Video already downloaded",
            "localPath": local_path,
        })));
    }

    let downloads = state.downloads.clone();
    let store = state.store.clone();
    let video_id = id.clone();
    let title = video.title.clone();
    tokio::spawn(async move {
        run_single_download(&store, &downloads, &video_id, &title).await;
    });

    Ok(Json(json!({ "message": "Download started", "videoId": id })))
}

#[derive(Debug, Default, Deserialize)]
struct BatchDownloadRequest {
    limit: Option<u64>,
}

async fn download_all(
    State(state): State<AppState>,
    payload: Option<Json<BatchDownloadRequest>>,
) -> ApiResult<Json<Value>> {
    let limit = payload.and_then(|Json(request)| request.limit);
    let store = state.store.clone();
    let downloads = state.downloads.clone();

    tokio::spawn(async move {
        let pending = match store.list_videos_missing_media(limit).await {
            Ok(pending) => pending,
            Err(err) => {
                eprintln!("  Warning: could not list videos to download: {err:#}");
                return;
            }
        };
        println!("Starting batch download of {} videos...", pending.len());
        for video in pending {
            run_single_download(&store, &downloads, &video.id, &video.title).await;
        }
        println!("Batch download completed");
    });

    Ok(Json(json!({ "message": "Batch download started" })))
}

/// One download attempt plus the local-path write-back. Failures are
/// logged, never raised, so batch loops continue with the next video.
async fn run_single_download(
    store: &Store,
    downloads: &DownloadManager,
    video_id: &str,
    title: &str,
) {
    let manager = downloads.clone();
    let id_for_fetch = video_id.to_string();
    let title_for_fetch = title.to_string();
    let result =
        tokio::task::spawn_blocking(move || manager.download(&id_for_fetch, &title_for_fetch))
            .await;

    match result {
        Ok(Ok(Some(path))) => {
            if let Err(err) = store.update_local_path(video_id, &path).await {
                eprintln!("  Warning: could not record media path for {video_id}: {err:#}");
            }
        }
        Ok(Ok(None)) => {
            eprintln!("  Warning: all format attempts failed for {video_id}");
        }
        Ok(Err(err)) => {
            eprintln!("  Warning: download failed for {video_id}: {err:#}");
        }
        Err(err) => {
            eprintln!("  Warning: download task failed for {video_id}: {err}");
        }
    }
}

async fn delete_video_media(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<Value>> {
    let downloads = state.downloads.clone();
    let deleted = tokio::task::spawn_blocking(move || downloads.delete(&id))
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?
        .map_err(internal)?;
    Ok(Json(json!({ "deleted": deleted })))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DownloadsOverview {
    tasks: Vec<DownloadTask>,
    failed: Vec<String>,
    downloaded_count: usize,
}

async fn downloads_overview(State(state): State<AppState>) -> ApiResult<Json<DownloadsOverview>> {
    let downloads = state.downloads.clone();
    let overview = tokio::task::spawn_blocking(move || DownloadsOverview {
        tasks: downloads.list_all(),
        failed: downloads.list_failed(),
        downloaded_count: downloads.count_downloaded(),
    })
    .await
    .map_err(|err| ApiError::internal(err.to_string()))?;
    Ok(Json(overview))
}

async fn clear_download_queue(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    state.downloads.clear_queue();
    Ok(Json(json!({ "message": "Download queue cleared" })))
}

async fn download_status(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<DownloadTask>> {
    let task = state
        .downloads
        .status(&id)
        .ok_or_else(|| ApiError::not_found("download not found"))?;
    Ok(Json(task))
}

async fn serve_download(
    State(state): State<AppState>,
    AxumPath(file): AxumPath<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    if file.contains('/') || file.contains('\\') || file.contains("..") {
        return Err(ApiError::not_found("file not found"));
    }
    let path = state.downloads_dir.join(&file);
    stream_file(path, headers.get(header::RANGE)).await
}

/// Streams a media file, honoring a single `bytes=start-end` range so
/// players can seek.
async fn stream_file(path: PathBuf, range: Option<&HeaderValue>) -> ApiResult<Response> {
    let mut file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let metadata = file
        .metadata()
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?;
    let total = metadata.len();
    let mime = MimeGuess::from_path(&path).first_or_octet_stream();

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.as_ref()).map_err(|err| ApiError::internal(err.to_string()))?,
    );
    headers.insert(header::ACCEPT_RANGES, "bytes".parse().unwrap());

    let requested = range
        .and_then(|value| value.to_str().ok())
        .and_then(|value| parse_byte_range(value, total));

    if let Some((start, end)) = requested {
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|err| ApiError::internal(err.to_string()))?;
        let length = end - start + 1;
        headers.insert(
            header::CONTENT_RANGE,
            HeaderValue::from_str(&format!("bytes {start}-{end}/{total}"))
                .map_err(|err| ApiError::internal(err.to_string()))?,
        );
        headers.insert(
            header::CONTENT_LENGTH,
            HeaderValue::from_str(&length.to_string())
                .map_err(|err| ApiError::internal(err.to_string()))?,
        );
        let stream = ReaderStream::new(file.take(length));
        Ok((StatusCode::PARTIAL_CONTENT, headers, Body::from_stream(stream)).into_response())
    } else {
        headers.insert(
            header::CONTENT_LENGTH,
            HeaderValue::from_str(&total.to_string())
                .map_err(|err| ApiError::internal(err.to_string()))?,
        );
        let stream = ReaderStream::new(file);
        Ok((StatusCode::OK, headers, Body::from_stream(stream)).into_response())
    }
}

/// Parses `bytes=start-end` (and the `bytes=-suffix` form) against the file
/// size. Unsatisfiable or malformed ranges fall back to a full response.
fn parse_byte_range(value: &str, total: u64) -> Option<(u64, u64)> {
    let ranges = value.strip_prefix("bytes=")?;
    if total == 0 {
        return None;
    }
    let (start_raw, end_raw) = ranges.split_once('-')?;

    if start_raw.is_empty() {
        let suffix: u64 = end_raw.parse().ok()?;
        if suffix == 0 {
            return None;
        }
        return Some((total.saturating_sub(suffix), total - 1));
    }

    let start: u64 = start_raw.parse().ok()?;
    if start >= total {
        return None;
    }
    let end = if end_raw.is_empty() {
        total - 1
    } else {
        end_raw.parse::<u64>().ok()?.min(total - 1)
    };
    if end < start {
        return None;
    }
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::to_bytes;
    use mirrortube_tools::remote::{Page, PageToken, RemoteError, RemoteSource};
    use tempfile::tempdir;

    /// Remote source that never returns data; handler tests only exercise
    /// the storage-backed paths.
    struct NoopSource;

    #[async_trait]
    impl RemoteSource for NoopSource {
        async fn channel(&self, channel_id: &str) -> Result<ChannelSnapshot, RemoteError> {
            Err(RemoteError::NotFound(format!("channel {channel_id}")))
        }

        async fn video_page(
            &self,
            _channel_id: &str,
            _token: Option<&PageToken>,
        ) -> Result<Page<VideoRecord>, RemoteError> {
            Ok(Page {
                items: Vec::new(),
                next: None,
            })
        }

        async fn comment_page(
            &self,
            _video_id: &str,
            _token: Option<&PageToken>,
        ) -> Result<Page<CommentRecord>, RemoteError> {
            Ok(Page {
                items: Vec::new(),
                next: None,
            })
        }

        async fn videos_by_ids(&self, _ids: &[String]) -> Result<Vec<VideoRecord>, RemoteError> {
            Ok(Vec::new())
        }
    }

    struct BackendTestContext {
        _temp: tempfile::TempDir,
        state: AppState,
    }

    impl BackendTestContext {
        async fn new() -> Self {
            let temp = tempdir().unwrap();
            let store = Store::open(&temp.path().join("mirror.db")).await.unwrap();
            let downloads_dir = temp.path().join("downloads");
            let downloads = DownloadManager::new(downloads_dir.clone()).unwrap();
            let engine = Arc::new(SyncEngine::new(
                store.clone(),
                Arc::new(NoopSource),
                downloads.clone(),
                SyncOptions {
                    channel_id: "UC123".into(),
                    download_media: false,
                },
            ));

            Self {
                state: AppState {
                    store,
                    downloads,
                    engine,
                    syncing: Arc::new(AtomicBool::new(false)),
                    downloads_dir: Arc::new(downloads_dir),
                },
                _temp: temp,
            }
        }

        async fn insert_video(&self, id: &str) {
            self.state
                .store
                .upsert_video(&sample_video(id))
                .await
                .unwrap();
        }
    }

    fn sample_video(id: &str) -> VideoRecord {
        VideoRecord {
            id: id.into(),
            title: format!("Video {id}"),
            description: "desc".into(),
            published_at: "2024-01-01T00:00:00Z".into(),
            thumbnail_url: None,
            duration: Some("PT1M0S".into()),
            view_count: 10,
            like_count: 1,
            comment_count: 0,
            tags: vec![],
            local_path: None,
            downloaded_at: None,
            last_updated: "2024-01-02T00:00:00Z".into(),
        }
    }

    fn sample_comment(id: &str, video_id: &str) -> CommentRecord {
        CommentRecord {
            id: id.into(),
            video_id: video_id.into(),
            author_display_name: "tester".into(),
            author_profile_image_url: None,
            author_channel_id: None,
            text_display: "hello world".into(),
            text_original: "hello world".into(),
            like_count: 1,
            published_at: "2024-01-01T00:00:00Z".into(),
            updated_at: "2024-01-01T00:00:00Z".into(),
            parent_id: None,
            total_reply_count: 0,
        }
    }

    #[test]
    fn backend_args_parse_flags() {
        let args = BackendArgs::from_iter(
            [
                "--db",
                "/data/mirror.db",
                "--downloads=/data/media",
                "--port",
                "9000",
                "--host=0.0.0.0",
            ]
            .into_iter()
            .map(str::to_string),
        )
        .unwrap();
        assert_eq!(args.db_path, Some(PathBuf::from("/data/mirror.db")));
        assert_eq!(args.downloads_path, Some(PathBuf::from("/data/media")));
        assert_eq!(args.port, Some(9000));
        assert_eq!(args.host.as_deref(), Some("0.0.0.0"));
    }

    #[test]
    fn backend_args_reject_unknown_flag() {
        let err = BackendArgs::from_iter(["--bogus".to_string()]).unwrap_err();
        assert!(err.to_string().contains("unknown argument"));
    }

    #[tokio::test]
    async fn list_videos_returns_window_and_total() {
        let ctx = BackendTestContext::new().await;
        for id in ["a", "b", "c"] {
            ctx.insert_video(id).await;
        }

        let Json(listing) = list_videos(
            State(ctx.state.clone()),
            Query(ListVideosQuery {
                limit: Some(2),
                offset: None,
            }),
        )
        .await
        .unwrap();

        assert_eq!(listing.videos.len(), 2);
        assert_eq!(listing.total, 3);
    }

    #[tokio::test]
    async fn get_video_missing_returns_404() {
        let ctx = BackendTestContext::new().await;
        let err = get_video(State(ctx.state.clone()), AxumPath("ghost".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn search_requires_query_parameter() {
        let ctx = BackendTestContext::new().await;
        let err = search_videos(
            State(ctx.state.clone()),
            Query(SearchQuery {
                q: None,
                limit: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn search_videos_finds_indexed_title() {
        let ctx = BackendTestContext::new().await;
        let mut video = sample_video("alpha");
        video.title = "Quantum Tunneling Explained".into();
        ctx.state.store.upsert_video(&video).await.unwrap();

        let Json(hits) = search_videos(
            State(ctx.state.clone()),
            Query(SearchQuery {
                q: Some("quantum".into()),
                limit: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "alpha");
    }

    #[tokio::test]
    async fn sync_status_reports_flag_and_latest_run() {
        let ctx = BackendTestContext::new().await;
        ctx.state.store.create_sync_run().await.unwrap();
        ctx.state.syncing.store(true, Ordering::SeqCst);

        let Json(status) = sync_status(State(ctx.state.clone())).await.unwrap();
        assert!(status.is_syncing);
        assert!(status.latest_sync.is_some());
    }

    #[tokio::test]
    async fn start_sync_conflicts_while_running() {
        let ctx = BackendTestContext::new().await;
        ctx.state.syncing.store(true, Ordering::SeqCst);

        let err = start_sync(State(ctx.state.clone()), None).await.unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn export_comments_quotes_csv_fields() {
        let ctx = BackendTestContext::new().await;
        ctx.insert_video("alpha").await;
        let mut comment = sample_comment("c1", "alpha");
        comment.text_original = "said \"hi\" there".into();
        ctx.state.store.upsert_comment(&comment).await.unwrap();

        let response = export_video_comments(State(ctx.state.clone()), AxumPath("alpha".into()))
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/csv"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.starts_with("Author,Comment,Likes"));
        assert!(text.contains("\"said \"\"hi\"\" there\""));
        assert!(text.contains("No"));
    }

    #[tokio::test]
    async fn download_video_short_circuits_when_already_downloaded() {
        let ctx = BackendTestContext::new().await;
        ctx.insert_video("alpha").await;
        ctx.state
            .store
            .update_local_path("alpha", "downloads/alpha.mp4")
            .await
            .unwrap();

        let Json(body) = download_video(State(ctx.state.clone()), AxumPath("alpha".into()))
            .await
            .unwrap();
        assert_eq!(body["message"], "Video already downloaded");
        assert_eq!(body["localPath"], "downloads/alpha.mp4");
    }

    #[tokio::test]
    async fn download_status_unknown_returns_404() {
        let ctx = BackendTestContext::new().await;
        let err = download_status(State(ctx.state.clone()), AxumPath("ghost".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn serve_download_rejects_path_traversal() {
        let ctx = BackendTestContext::new().await;
        let err = serve_download(
            State(ctx.state.clone()),
            AxumPath("../secrets.txt".into()),
            HeaderMap::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn parse_byte_range_handles_forms_and_bounds() {
        assert_eq!(parse_byte_range("bytes=0-99", 1000), Some((0, 99)));
        assert_eq!(parse_byte_range("bytes=500-", 1000), Some((500, 999)));
        assert_eq!(parse_byte_range("bytes=-100", 1000), Some((900, 999)));
        assert_eq!(parse_byte_range("bytes=0-4999", 1000), Some((0, 999)));
        assert_eq!(parse_byte_range("bytes=1000-", 1000), None);
        assert_eq!(parse_byte_range("bytes=5-2", 1000), None);
        assert_eq!(parse_byte_range("chunks=0-1", 1000), None);
        assert_eq!(parse_byte_range("bytes=0-10", 0), None);
    }

    #[test]
    fn filename_fragment_strips_specials() {
        assert_eq!(filename_fragment("My Video: Part 1"), "My_Video__Part_1");
    }
}
