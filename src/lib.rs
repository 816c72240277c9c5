#![forbid(unsafe_code)]

//! Library shared by the MirrorTube binaries.
//!
//! The crate mirrors a single YouTube channel into a locally queryable
//! SQLite database (metadata, threaded comments, full-text search) and can
//! optionally pull the media files themselves through yt-dlp for offline
//! playback.

pub mod config;
pub mod download;
pub mod remote;
pub mod security;
pub mod store;
pub mod sync;
