#![forbid(unsafe_code)]

//! Reconciliation between the remote metadata source and local storage.
//!
//! Two modes share the same bookkeeping: a full sync walks every video and
//! its entire comment tree, while an incremental sync only pays the comment
//! cost for videos it has never seen and refreshes statistics for the rest
//! in batched lookups. Either way exactly one sync-run row is opened at the
//! start and closed exactly once, as `completed` or `failed`.
//!
//! The orchestrator assumes at most one concurrent invocation; the caller
//! holds the in-progress flag.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::download::DownloadManager;
use crate::remote::{PageToken, RemoteError, RemoteSource};
use crate::store::{Store, SyncRunUpdate};

/// Construction-time knobs for the engine. `download_media` arrives here
/// from configuration; the sync paths never read the process environment.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub channel_id: String,
    pub download_media: bool,
}

/// Tallies reported by a finished run and recorded on its sync-run row.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub videos_added: i64,
    pub videos_updated: i64,
    pub comments_added: i64,
    pub videos_downloaded: i64,
}

pub struct SyncEngine {
    store: Store,
    source: Arc<dyn RemoteSource>,
    downloads: DownloadManager,
    options: SyncOptions,
}

impl SyncEngine {
    pub fn new(
        store: Store,
        source: Arc<dyn RemoteSource>,
        downloads: DownloadManager,
        options: SyncOptions,
    ) -> Self {
        Self {
            store,
            source,
            downloads,
            options,
        }
    }

    /// Mirrors the channel from scratch: snapshot, every video, every
    /// comment thread, and (optionally) media for videos without any.
    pub async fn full_sync(&self) -> Result<SyncOutcome> {
        let run_id = self.store.create_sync_run().await?;
        match self.run_full().await {
            Ok(outcome) => {
                self.close_completed(run_id, &outcome).await?;
                print_summary("Sync completed successfully!", &outcome);
                Ok(outcome)
            }
            Err(err) => {
                self.close_failed(run_id, &err).await;
                Err(err)
            }
        }
    }

    /// Catches up with the remote source: new videos get their full
    /// comment tree, known videos only get fresh statistics.
    pub async fn incremental_sync(&self) -> Result<SyncOutcome> {
        let run_id = self.store.create_sync_run().await?;
        match self.run_incremental().await {
            Ok(outcome) => {
                self.close_completed(run_id, &outcome).await?;
                print_summary("Incremental sync completed!", &outcome);
                Ok(outcome)
            }
            Err(err) => {
                self.close_failed(run_id, &err).await;
                Err(err)
            }
        }
    }

    async fn run_full(&self) -> Result<SyncOutcome> {
        let mut outcome = SyncOutcome::default();
        println!("Starting full sync...");

        let snapshot = self
            .source
            .channel(&self.options.channel_id)
            .await
            .context("fetching channel profile")?;
        self.store.upsert_channel(&snapshot).await?;
        println!("Channel: {} ({} videos)", snapshot.title, snapshot.video_count);

        let mut token: Option<PageToken> = None;
        loop {
            let page = self
                .source
                .video_page(&self.options.channel_id, token.as_ref())
                .await
                .context("listing channel videos")?;
            for video in &page.items {
                if self.store.upsert_video(video).await?.is_new {
                    outcome.videos_added += 1;
                } else {
                    outcome.videos_updated += 1;
                }
            }
            println!(
                "Progress: {} videos processed ({} new, {} updated)",
                outcome.videos_added + outcome.videos_updated,
                outcome.videos_added,
                outcome.videos_updated
            );
            match page.next {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        let videos = self.store.list_videos(None, None).await?;
        let total = videos.len();
        for (index, video) in videos.iter().enumerate() {
            println!(
                "Fetching comments for video {}/{}: {}",
                index + 1,
                total,
                video.title
            );
            if let Err(err) = self
                .sync_comments(&video.id, &mut outcome.comments_added)
                .await
            {
                eprintln!("  Warning: comment sync failed for {}: {:#}", video.id, err);
            }
        }

        outcome.videos_downloaded = self.download_missing_media().await?;
        Ok(outcome)
    }

    async fn run_incremental(&self) -> Result<SyncOutcome> {
        let mut outcome = SyncOutcome::default();
        println!("Starting incremental sync...");

        let snapshot = self
            .source
            .channel(&self.options.channel_id)
            .await
            .context("fetching channel profile")?;
        self.store.upsert_channel(&snapshot).await?;

        let known: HashSet<String> = self
            .store
            .list_videos(None, None)
            .await?
            .into_iter()
            .map(|video| video.id)
            .collect();

        println!("Checking for new videos...");
        let mut token: Option<PageToken> = None;
        loop {
            let page = self
                .source
                .video_page(&self.options.channel_id, token.as_ref())
                .await
                .context("listing channel videos")?;
            for video in &page.items {
                if known.contains(&video.id) {
                    continue;
                }
                if self.store.upsert_video(video).await?.is_new {
                    outcome.videos_added += 1;
                    println!("New video found: {}", video.title);
                }
                // Comment volume dominates sync cost, so only brand-new
                // videos pay it here.
                if let Err(err) = self
                    .sync_comments(&video.id, &mut outcome.comments_added)
                    .await
                {
                    eprintln!("  Warning: comment sync failed for {}: {:#}", video.id, err);
                }
            }
            match page.next {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        if !known.is_empty() {
            println!("Updating video statistics...");
            let ids: Vec<String> = known.into_iter().collect();
            let refreshed = self
                .source
                .videos_by_ids(&ids)
                .await
                .context("refreshing video statistics")?;
            for video in &refreshed {
                if !self.store.upsert_video(video).await?.is_new {
                    outcome.videos_updated += 1;
                }
            }
        }

        outcome.videos_downloaded = self.download_missing_media().await?;
        Ok(outcome)
    }

    /// Walks every comment page for a video, counting newly inserted rows
    /// into `comments_added` as it goes so a mid-stream failure keeps the
    /// tally for rows already written. Disabled comments end the walk
    /// quietly; any other error propagates to the per-video handler.
    async fn sync_comments(&self, video_id: &str, comments_added: &mut i64) -> Result<()> {
        let mut token: Option<PageToken> = None;
        loop {
            let page = match self.source.comment_page(video_id, token.as_ref()).await {
                Ok(page) => page,
                Err(RemoteError::CommentsDisabled { .. }) => {
                    println!("  Comments disabled for video {video_id}");
                    return Ok(());
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("fetching comments for {video_id}"));
                }
            };
            for comment in &page.items {
                if self.store.upsert_comment(comment).await?.is_new {
                    *comments_added += 1;
                }
            }
            match page.next {
                Some(next) => token = Some(next),
                None => return Ok(()),
            }
        }
    }

    /// Sequentially fetches media for every video still lacking a local
    /// file. Individual failures are logged and skipped; the pass itself
    /// only errors when storage does.
    async fn download_missing_media(&self) -> Result<i64> {
        if !self.options.download_media {
            return Ok(0);
        }

        let pending = self.store.list_videos_missing_media(None).await?;
        if pending.is_empty() {
            println!("All videos already downloaded");
            return Ok(0);
        }

        println!("Found {} videos to download", pending.len());
        let mut downloaded = 0;
        for (index, video) in pending.iter().enumerate() {
            println!("Downloading {}/{}: {}", index + 1, pending.len(), video.title);
            let manager = self.downloads.clone();
            let video_id = video.id.clone();
            let title = video.title.clone();
            let result =
                tokio::task::spawn_blocking(move || manager.download(&video_id, &title)).await;

            match result {
                Ok(Ok(Some(path))) => {
                    if let Err(err) = self.store.update_local_path(&video.id, &path).await {
                        eprintln!(
                            "  Warning: could not record media path for {}: {:#}",
                            video.id, err
                        );
                    } else {
                        downloaded += 1;
                    }
                }
                Ok(Ok(None)) => {
                    eprintln!("  Warning: all format attempts failed for {}", video.id);
                }
                Ok(Err(err)) => {
                    eprintln!("  Warning: download failed for {}: {:#}", video.id, err);
                }
                Err(err) => {
                    eprintln!("  Warning: download task failed for {}: {}", video.id, err);
                }
            }
        }
        Ok(downloaded)
    }

    async fn close_completed(&self, run_id: i64, outcome: &SyncOutcome) -> Result<()> {
        self.store
            .update_sync_run(
                run_id,
                &SyncRunUpdate::completed(
                    outcome.videos_added,
                    outcome.videos_updated,
                    outcome.comments_added,
                ),
            )
            .await
    }

    async fn close_failed(&self, run_id: i64, err: &anyhow::Error) {
        let update = SyncRunUpdate::failed(&format!("{err:#}"));
        if let Err(store_err) = self.store.update_sync_run(run_id, &update).await {
            eprintln!("  Warning: could not record failed sync run {run_id}: {store_err:#}");
        }
    }
}

fn print_summary(headline: &str, outcome: &SyncOutcome) {
    println!();
    println!("{headline}");
    println!("- Videos added: {}", outcome.videos_added);
    println!("- Videos updated: {}", outcome.videos_updated);
    println!("- Comments added: {}", outcome.comments_added);
    if outcome.videos_downloaded > 0 {
        println!("- Videos downloaded: {}", outcome.videos_downloaded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::set_ytdlp_stub_path;
    use crate::remote::Page;
    use crate::store::{ChannelSnapshot, CommentRecord, SyncRunStatus, VideoRecord};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::{TempDir, tempdir};

    fn sample_channel() -> ChannelSnapshot {
        ChannelSnapshot {
            id: "UC123".into(),
            title: "Mirrored Channel".into(),
            description: "about".into(),
            custom_url: Some("@mirrored".into()),
            published_at: "2019-06-01T00:00:00Z".into(),
            thumbnail_url: None,
            subscriber_count: 1000,
            video_count: 2,
            view_count: 50_000,
            last_synced: "2024-01-02T00:00:00Z".into(),
        }
    }

    fn sample_video(id: &str, published_at: &str) -> VideoRecord {
        VideoRecord {
            id: id.into(),
            title: format!("Video {id}"),
            description: "desc".into(),
            published_at: published_at.into(),
            thumbnail_url: None,
            duration: Some("PT4M13S".into()),
            view_count: 100,
            like_count: 10,
            comment_count: 2,
            tags: vec!["science".into()],
            local_path: None,
            downloaded_at: None,
            last_updated: "2024-01-02T00:00:00Z".into(),
        }
    }

    fn top_comment(id: &str, video_id: &str, reply_count: i64) -> CommentRecord {
        CommentRecord {
            id: id.into(),
            video_id: video_id.into(),
            author_display_name: format!("author-{id}"),
            author_profile_image_url: None,
            author_channel_id: None,
            text_display: format!("text-{id}"),
            text_original: format!("text-{id}"),
            like_count: 1,
            published_at: "2024-01-01T00:00:00Z".into(),
            updated_at: "2024-01-01T00:00:00Z".into(),
            parent_id: None,
            total_reply_count: reply_count,
        }
    }

    fn reply_comment(id: &str, video_id: &str, parent: &str) -> CommentRecord {
        CommentRecord {
            parent_id: Some(parent.into()),
            total_reply_count: 0,
            ..top_comment(id, video_id, 0)
        }
    }

    /// In-memory stand-in for the remote source. Video listings page one
    /// inner vec at a time; comment listings return a single page per
    /// video. Statistics lookups add `stats_bump` to every view count so
    /// tests can observe the refresh.
    struct FakeSource {
        channel: ChannelSnapshot,
        fail_channel: bool,
        stats_bump: i64,
        video_pages: Mutex<Vec<Vec<VideoRecord>>>,
        comments: Mutex<HashMap<String, Vec<CommentRecord>>>,
        disabled: Vec<String>,
        comment_requests: Mutex<Vec<String>>,
    }

    impl FakeSource {
        fn new(video_pages: Vec<Vec<VideoRecord>>) -> Self {
            Self {
                channel: sample_channel(),
                fail_channel: false,
                stats_bump: 0,
                video_pages: Mutex::new(video_pages),
                comments: Mutex::new(HashMap::new()),
                disabled: Vec::new(),
                comment_requests: Mutex::new(Vec::new()),
            }
        }

        fn with_comments(self, video_id: &str, comments: Vec<CommentRecord>) -> Self {
            self.comments.lock().insert(video_id.to_string(), comments);
            self
        }

        fn comment_requests(&self) -> Vec<String> {
            self.comment_requests.lock().clone()
        }

        fn clear_comment_requests(&self) {
            self.comment_requests.lock().clear();
        }

        fn push_video_page(&self, page: Vec<VideoRecord>) {
            self.video_pages.lock().push(page);
        }
    }

    #[async_trait]
    impl RemoteSource for FakeSource {
        async fn channel(&self, _channel_id: &str) -> Result<ChannelSnapshot, RemoteError> {
            if self.fail_channel {
                return Err(RemoteError::Fetch("quota exceeded".into()));
            }
            Ok(self.channel.clone())
        }

        async fn video_page(
            &self,
            _channel_id: &str,
            token: Option<&PageToken>,
        ) -> Result<Page<VideoRecord>, RemoteError> {
            let index: usize = token
                .map(|token| token.as_str().parse().unwrap_or(0))
                .unwrap_or(0);
            let pages = self.video_pages.lock();
            let items = pages.get(index).cloned().unwrap_or_default();
            let next = if index + 1 < pages.len() {
                Some(PageToken::new((index + 1).to_string()))
            } else {
                None
            };
            Ok(Page { items, next })
        }

        async fn comment_page(
            &self,
            video_id: &str,
            _token: Option<&PageToken>,
        ) -> Result<Page<CommentRecord>, RemoteError> {
            self.comment_requests.lock().push(video_id.to_string());
            if self.disabled.iter().any(|id| id == video_id) {
                return Err(RemoteError::CommentsDisabled {
                    video_id: video_id.to_string(),
                });
            }
            let items = self
                .comments
                .lock()
                .get(video_id)
                .cloned()
                .unwrap_or_default();
            Ok(Page { items, next: None })
        }

        async fn videos_by_ids(&self, ids: &[String]) -> Result<Vec<VideoRecord>, RemoteError> {
            let pages = self.video_pages.lock();
            Ok(pages
                .iter()
                .flatten()
                .filter(|video| ids.contains(&video.id))
                .map(|video| {
                    let mut refreshed = video.clone();
                    refreshed.view_count += self.stats_bump;
                    refreshed
                })
                .collect())
        }
    }

    async fn engine_with(
        source: Arc<FakeSource>,
        download_media: bool,
    ) -> Result<(TempDir, SyncEngine, Store)> {
        let dir = tempdir()?;
        let store = Store::open(&dir.path().join("mirror.db")).await?;
        let downloads = DownloadManager::new(dir.path().join("downloads"))?;
        let engine = SyncEngine::new(
            store.clone(),
            source,
            downloads,
            SyncOptions {
                channel_id: "UC123".into(),
                download_media,
            },
        );
        Ok((dir, engine, store))
    }

    fn install_succeeding_ytdlp(dir: &Path) -> Result<PathBuf> {
        let script_path = dir.join("yt-dlp");
        let script = r#"#!/usr/bin/env bash
set -eu
output=""
while [[ $# -gt 0 ]]; do
  case "$1" in
    --output)
      shift
      output="$1"
      ;;
  esac
  shift
done
target="${output//%(ext)s/mp4}"
mkdir -p "$(dirname "$target")"
echo video > "$target"
exit 0
"#;
        fs::write(&script_path, script)?;
        #[cfg(unix)]
        {
            let mut perms = fs::metadata(&script_path)?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&script_path, perms)?;
        }
        Ok(script_path)
    }

    /// Two videos: A carries one thread with a reply, B has comments
    /// disabled. Exercises the full-sync tallies, the parent link, and the
    /// zero reply count on replies.
    #[tokio::test]
    async fn full_sync_mirrors_channel_videos_and_comments() -> Result<()> {
        let mut fake = FakeSource::new(vec![
            vec![sample_video("video-a", "2024-02-01T00:00:00Z")],
            vec![sample_video("video-b", "2024-01-01T00:00:00Z")],
        ])
        .with_comments(
            "video-a",
            vec![
                top_comment("c1", "video-a", 1),
                reply_comment("c2", "video-a", "c1"),
            ],
        );
        fake.disabled.push("video-b".into());
        let source = Arc::new(fake);

        let (_dir, engine, store) = engine_with(source.clone(), false).await?;
        let outcome = engine.full_sync().await?;

        assert_eq!(outcome.videos_added, 2);
        assert_eq!(outcome.videos_updated, 0);
        assert_eq!(outcome.comments_added, 2);
        assert_eq!(outcome.videos_downloaded, 0);

        assert!(store.get_channel().await?.is_some());
        assert_eq!(store.count_videos().await?, 2);

        let comments = store.list_comments_for_video("video-a", None).await?;
        assert_eq!(comments.len(), 2);
        let reply = comments.iter().find(|c| c.id == "c2").unwrap();
        assert_eq!(reply.parent_id.as_deref(), Some("c1"));
        assert_eq!(reply.total_reply_count, 0);
        let top = comments.iter().find(|c| c.id == "c1").unwrap();
        assert!(top.parent_id.is_none());
        assert_eq!(top.total_reply_count, 1);

        assert!(store.list_comments_for_video("video-b", None).await?.is_empty());

        let run = store.latest_sync_run().await?.expect("run recorded");
        assert_eq!(run.status, SyncRunStatus::Completed);
        assert_eq!(run.videos_added, 2);
        assert_eq!(run.comments_added, 2);
        assert!(run.completed_at.is_some());
        Ok(())
    }

    /// Against an unchanged remote, the second (incremental) run reports
    /// nothing new and never re-fetches comments for known videos.
    #[tokio::test]
    async fn full_then_incremental_only_updates_statistics() -> Result<()> {
        let mut fake = FakeSource::new(vec![vec![
            sample_video("video-a", "2024-02-01T00:00:00Z"),
            sample_video("video-b", "2024-01-01T00:00:00Z"),
        ]]);
        fake.stats_bump = 5;
        let fake = fake.with_comments("video-a", vec![top_comment("c1", "video-a", 0)]);
        let source = Arc::new(fake);

        let (_dir, engine, store) = engine_with(source.clone(), false).await?;
        let first = engine.full_sync().await?;
        assert_eq!(first.videos_added, 2);
        assert_eq!(first.comments_added, 1);

        source.clear_comment_requests();
        let second = engine.incremental_sync().await?;

        assert_eq!(second.videos_added, 0);
        assert_eq!(second.comments_added, 0);
        assert_eq!(second.videos_updated, 2);
        assert!(
            source.comment_requests().is_empty(),
            "known videos must not re-fetch comments"
        );

        let video = store.get_video("video-a").await?.unwrap();
        assert_eq!(video.view_count, 105);

        let run = store.latest_sync_run().await?.unwrap();
        assert_eq!(run.status, SyncRunStatus::Completed);
        assert_eq!(run.videos_updated, 2);
        Ok(())
    }

    /// New uploads discovered by an incremental run get their full comment
    /// tree immediately.
    #[tokio::test]
    async fn incremental_ingests_new_videos_with_comments() -> Result<()> {
        let fake = FakeSource::new(vec![vec![sample_video("video-a", "2024-02-01T00:00:00Z")]]);
        let source = Arc::new(fake);

        let (_dir, engine, store) = engine_with(source.clone(), false).await?;
        engine.full_sync().await?;

        source.push_video_page(vec![sample_video("video-new", "2024-03-01T00:00:00Z")]);
        source
            .comments
            .lock()
            .insert("video-new".into(), vec![top_comment("n1", "video-new", 0)]);
        source.clear_comment_requests();

        let outcome = engine.incremental_sync().await?;
        assert_eq!(outcome.videos_added, 1);
        assert_eq!(outcome.comments_added, 1);
        assert_eq!(source.comment_requests(), vec!["video-new".to_string()]);

        assert_eq!(store.count_videos().await?, 2);
        assert_eq!(
            store.list_comments_for_video("video-new", None).await?.len(),
            1
        );
        Ok(())
    }

    /// A failure before any per-video work marks the run failed, stores the
    /// error, and re-raises to the caller.
    #[tokio::test]
    async fn failed_channel_fetch_marks_run_failed() -> Result<()> {
        let mut fake = FakeSource::new(vec![]);
        fake.fail_channel = true;
        let source = Arc::new(fake);

        let (_dir, engine, store) = engine_with(source, false).await?;
        let err = engine.full_sync().await.unwrap_err();
        assert!(err.to_string().contains("fetching channel profile"));

        let run = store.latest_sync_run().await?.expect("run recorded");
        assert_eq!(run.status, SyncRunStatus::Failed);
        let message = run.error.unwrap_or_default();
        assert!(!message.is_empty());
        assert!(message.contains("quota exceeded"));
        assert!(run.completed_at.is_some());
        Ok(())
    }

    /// With downloads enabled the pass fetches media for every video still
    /// missing it and records the path through the store.
    #[tokio::test]
    async fn download_pass_records_local_paths() -> Result<()> {
        let fake = FakeSource::new(vec![vec![sample_video("video-a", "2024-02-01T00:00:00Z")]]);
        let source = Arc::new(fake);

        let stub_dir = tempdir()?;
        let stub = install_succeeding_ytdlp(stub_dir.path())?;
        let _guard = set_ytdlp_stub_path(stub);

        let (_dir, engine, store) = engine_with(source, true).await?;
        let outcome = engine.full_sync().await?;

        assert_eq!(outcome.videos_downloaded, 1);
        let video = store.get_video("video-a").await?.unwrap();
        let local_path = video.local_path.expect("media path recorded");
        assert!(local_path.contains("video-a"));
        assert!(video.downloaded_at.is_some());

        // A second pass has nothing left to fetch.
        let again = engine.full_sync().await?;
        assert_eq!(again.videos_downloaded, 0);
        Ok(())
    }
}
