#![forbid(unsafe_code)]

//! Media acquisition through yt-dlp.
//!
//! A download walks a fixed cascade of format preferences from highest to
//! lowest quality and stops at the first invocation that leaves a media
//! file on disk. Task state lives in an in-process registry owned by the
//! manager; nothing here is global.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
#[cfg(test)]
use std::sync::{Mutex as StdMutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;

/// Format preferences tried in order: 1080p merged streams, 1080p
/// single-file, the same pair at 720p, then whatever the source offers.
const FORMAT_CASCADE: &[&str] = &[
    "bestvideo[height<=1080]+bestaudio",
    "best[height<=1080]",
    "bestvideo[height<=720]+bestaudio",
    "best[height<=720]",
    "best",
];

/// Extensions that count as playable media when counting finished
/// downloads. Merged outputs are mp4; single-file formats may stay in
/// their native container.
const MEDIA_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm"];

const MAX_TITLE_FRAGMENT: usize = 100;

#[cfg(test)]
static YT_DLP_STUB: StdMutex<Option<PathBuf>> = StdMutex::new(None);
#[cfg(test)]
static STUB_USE_LOCK: StdMutex<()> = StdMutex::new(());

fn yt_dlp_command() -> Command {
    #[cfg(test)]
    {
        if let Some(path) = YT_DLP_STUB.lock().unwrap().clone() {
            return Command::new(path);
        }
    }
    Command::new("yt-dlp")
}

#[cfg(test)]
pub(crate) fn set_ytdlp_stub_path(path: PathBuf) -> YtDlpStubGuard {
    let guard = STUB_USE_LOCK.lock().unwrap();
    {
        let mut lock = YT_DLP_STUB.lock().unwrap();
        *lock = Some(path);
    }
    YtDlpStubGuard { lock: Some(guard) }
}

#[cfg(test)]
pub(crate) struct YtDlpStubGuard {
    lock: Option<MutexGuard<'static, ()>>,
}

#[cfg(test)]
impl Drop for YtDlpStubGuard {
    fn drop(&mut self) {
        *YT_DLP_STUB.lock().unwrap() = None;
        self.lock.take();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    Queued,
    Downloading,
    Completed,
    Failed,
}

impl DownloadState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// In-memory record of one download request. Survives in the registry
/// until explicitly cleared.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadTask {
    pub video_id: String,
    pub title: String,
    pub status: DownloadState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

/// Cheap-to-clone handle over the download directory and the shared task
/// registry. Methods block on the external yt-dlp process; async callers
/// run them through `spawn_blocking`.
///
/// Concurrent `download` calls for the same video id are not deduplicated
/// here; callers that must avoid double fetches check `is_downloaded` (or
/// the stored local path) first.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<DownloadManagerInner>,
}

struct DownloadManagerInner {
    downloads_dir: PathBuf,
    tasks: Mutex<HashMap<String, DownloadTask>>,
    failed: Mutex<Vec<String>>,
}

impl DownloadManager {
    pub fn new(downloads_dir: impl Into<PathBuf>) -> Result<Self> {
        let downloads_dir = downloads_dir.into();
        fs::create_dir_all(&downloads_dir)
            .with_context(|| format!("creating downloads directory {}", downloads_dir.display()))?;
        Ok(Self {
            inner: Arc::new(DownloadManagerInner {
                downloads_dir,
                tasks: Mutex::new(HashMap::new()),
                failed: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Fetches media for a video, walking the format cascade until one
    /// attempt leaves an output file named with the video id prefix.
    ///
    /// Returns the relative media path on success and `Ok(None)` once the
    /// cascade is exhausted; exhaustion marks the task `failed` and records
    /// the id in the failed list instead of surfacing an error, so batch
    /// callers simply continue with the next video.
    pub fn download(&self, video_id: &str, title: &str) -> Result<Option<String>> {
        self.register_task(video_id, title);
        fs::create_dir_all(&self.inner.downloads_dir).with_context(|| {
            format!(
                "creating downloads directory {}",
                self.inner.downloads_dir.display()
            )
        })?;
        self.mark_downloading(video_id);

        let safe_title = sanitize_title(title);
        let output_template = self
            .inner
            .downloads_dir
            .join(format!("{video_id}-{safe_title}.%(ext)s"));
        let video_url = format!("https://www.youtube.com/watch?v={video_id}");

        let mut last_error = String::from("no formats attempted");
        for format_spec in FORMAT_CASCADE {
            match run_format_attempt(&video_url, format_spec, &output_template) {
                Ok(()) => {
                    last_error = format!("format {format_spec} produced no output file");
                }
                Err(message) => {
                    eprintln!("  Warning: {message}");
                    last_error = message;
                }
            }

            // The attempt may exit zero without producing a file (or fail
            // after writing one), so the directory scan is the arbiter.
            if let Some(file_name) = self.find_media_file(video_id) {
                self.mark_completed(video_id);
                return Ok(Some(self.relative_media_path(&file_name)));
            }
        }

        self.mark_failed(video_id, &last_error);
        Ok(None)
    }

    pub fn is_downloaded(&self, video_id: &str) -> bool {
        self.find_media_file(video_id).is_some()
    }

    /// Absolute path of the downloaded media for a video, if any.
    pub fn resolve_path(&self, video_id: &str) -> Option<PathBuf> {
        self.find_media_file(video_id)
            .map(|name| self.inner.downloads_dir.join(name))
    }

    /// Removes the downloaded file for a video. Returns whether a file was
    /// actually deleted.
    pub fn delete(&self, video_id: &str) -> Result<bool> {
        let Some(name) = self.find_media_file(video_id) else {
            return Ok(false);
        };
        let path = self.inner.downloads_dir.join(&name);
        fs::remove_file(&path).with_context(|| format!("deleting {}", path.display()))?;
        Ok(true)
    }

    /// Number of finished media files in the download directory.
    pub fn count_downloaded(&self) -> usize {
        let Ok(entries) = fs::read_dir(&self.inner.downloads_dir) else {
            return 0;
        };
        entries
            .flatten()
            .filter(|entry| entry.path().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| MEDIA_EXTENSIONS.contains(&ext))
            })
            .count()
    }

    pub fn status(&self, video_id: &str) -> Option<DownloadTask> {
        self.inner.tasks.lock().get(video_id).cloned()
    }

    /// Every tracked task, ordered by video id for stable output.
    pub fn list_all(&self) -> Vec<DownloadTask> {
        let mut tasks: Vec<DownloadTask> = self.inner.tasks.lock().values().cloned().collect();
        tasks.sort_by(|a, b| a.video_id.cmp(&b.video_id));
        tasks
    }

    pub fn list_failed(&self) -> Vec<String> {
        self.inner.failed.lock().clone()
    }

    /// Drops queued/downloading/completed entries from the registry.
    /// Failed tasks and the failed-id list stay so operators can audit a
    /// batch pass after the fact.
    pub fn clear_queue(&self) {
        self.inner
            .tasks
            .lock()
            .retain(|_, task| task.status == DownloadState::Failed);
    }

    fn register_task(&self, video_id: &str, title: &str) {
        self.inner.tasks.lock().insert(
            video_id.to_string(),
            DownloadTask {
                video_id: video_id.to_string(),
                title: title.to_string(),
                status: DownloadState::Queued,
                error: None,
                started_at: None,
                completed_at: None,
            },
        );
    }

    fn mark_downloading(&self, video_id: &str) {
        if let Some(task) = self.inner.tasks.lock().get_mut(video_id) {
            task.status = DownloadState::Downloading;
            task.started_at = Some(Utc::now().to_rfc3339());
            task.error = None;
            task.completed_at = None;
        }
    }

    fn mark_completed(&self, video_id: &str) {
        if let Some(task) = self.inner.tasks.lock().get_mut(video_id) {
            task.status = DownloadState::Completed;
            task.completed_at = Some(Utc::now().to_rfc3339());
        }
    }

    fn mark_failed(&self, video_id: &str, error: &str) {
        if let Some(task) = self.inner.tasks.lock().get_mut(video_id) {
            task.status = DownloadState::Failed;
            task.error = Some(error.to_string());
            task.completed_at = Some(Utc::now().to_rfc3339());
        }
        let mut failed = self.inner.failed.lock();
        if !failed.iter().any(|id| id == video_id) {
            failed.push(video_id.to_string());
        }
    }

    /// Finds the finished media file carrying the video id prefix.
    /// In-flight `.part` files never count.
    fn find_media_file(&self, video_id: &str) -> Option<String> {
        let entries = fs::read_dir(&self.inner.downloads_dir).ok()?;
        let mut matches: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with(video_id) && !name.ends_with(".part"))
            .collect();
        matches.sort();
        matches.into_iter().next()
    }

    /// Media paths are stored relative to the download directory's parent
    /// (e.g. `downloads/abc-Title.mp4`) so the REST layer can serve them
    /// without knowing the absolute root.
    fn relative_media_path(&self, file_name: &str) -> String {
        match self.inner.downloads_dir.file_name() {
            Some(dir) => Path::new(dir).join(file_name).to_string_lossy().into_owned(),
            None => file_name.to_string(),
        }
    }
}

/// Replaces everything except letters, digits, spaces, and dashes, then
/// caps the length so output paths stay well under filesystem limits.
fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == ' ' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_TITLE_FRAGMENT)
        .collect()
}

fn run_format_attempt(
    video_url: &str,
    format_spec: &str,
    output_template: &Path,
) -> Result<(), String> {
    let mut command = yt_dlp_command();
    command
        .arg("--format")
        .arg(format_spec)
        .arg("--merge-output-format")
        .arg("mp4")
        .arg("--output")
        .arg(output_template)
        .arg("--no-progress")
        .arg("--no-warnings")
        .arg(video_url);

    match command.status() {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(format!(
            "yt-dlp exited with status {status} for format {format_spec}"
        )),
        Err(err) => Err(format!(
            "failed to run yt-dlp for format {format_spec}: {err}"
        )),
    }
}
