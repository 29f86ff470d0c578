//! YouTube audio downloads via yt-dlp.
//!
//! A download is two yt-dlp runs: a metadata probe, then audio extraction to
//! `<downloads>/<id>.mp3`.  The finished song goes to the front of the
//! library, replacing any earlier record with the same id.

pub mod metadata;
pub mod progress;
pub mod ytdlp;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use playgen_proto::library::{LibraryError, LibraryStore};
use playgen_proto::models::Song;
use playgen_proto::platform::ToolPaths;
use playgen_proto::protocol::{DownloadProgress, ImportReport, ResolvedPlaylist};
use playgen_proto::youtube::{self, UrlError};

pub use metadata::VideoMetadata;
pub use progress::{parse_progress_line, ProgressSink};

pub const DEFAULT_IMPORT_NAME: &str = "Imported playlist";

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    InvalidUrl(#[from] UrlError),
    #[error("Failed to run yt-dlp: {0}")]
    Spawn(#[source] std::io::Error),
    /// yt-dlp ran and failed; carries its stderr.
    #[error("{0}")]
    Tool(String),
    #[error("Failed to parse video info: {0}")]
    Metadata(String),
    #[error("Song already downloaded")]
    AlreadyDownloaded(String),
    #[error(transparent)]
    Library(#[from] LibraryError),
    #[error("Could not create downloads folder: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Downloader {
    store: Arc<LibraryStore>,
    yt_dlp: PathBuf,
    ffmpeg_dir: Option<PathBuf>,
    downloads_dir: PathBuf,
    progress_tx: mpsc::Sender<DownloadProgress>,
}

impl Downloader {
    pub fn new(
        store: Arc<LibraryStore>,
        tools: &ToolPaths,
        downloads_dir: PathBuf,
        progress_tx: mpsc::Sender<DownloadProgress>,
    ) -> Self {
        // An unresolved yt-dlp is still tried by name so the spawn error
        // reaches the caller.
        let yt_dlp = tools.yt_dlp.clone().unwrap_or_else(|| PathBuf::from("yt-dlp"));
        let ffmpeg_dir = tools
            .ffmpeg
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf);
        Self {
            store,
            yt_dlp,
            ffmpeg_dir,
            downloads_dir,
            progress_tx,
        }
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    /// Validate `url` and probe it.  No external call for invalid links.
    pub async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata, DownloadError> {
        let canonical = youtube::canonical_video_url(url)?;
        ytdlp::fetch_metadata(&self.yt_dlp, &canonical).await
    }

    /// Extract audio for an already probed video.
    pub async fn download_audio(&self, url: &str, meta: &VideoMetadata) -> Result<PathBuf, DownloadError> {
        let canonical = youtube::canonical_video_url(url)?;
        tokio::fs::create_dir_all(&self.downloads_dir).await?;
        let sink = ProgressSink::new(self.progress_tx.clone(), &meta.id, &meta.title);
        ytdlp::download_audio(
            &self.yt_dlp,
            self.ffmpeg_dir.as_deref(),
            &canonical,
            &meta.id,
            &self.downloads_dir,
            sink,
        )
        .await
    }

    /// Probe, download and record one video.
    pub async fn download_song(&self, url: &str) -> Result<Song, DownloadError> {
        let meta = self.fetch_metadata(url).await?;

        if self.store.song_path(&meta.id).await.is_some() {
            info!("{} is already in the library", meta.id);
            return Err(DownloadError::AlreadyDownloaded(meta.id));
        }

        let path = self.download_audio(url, &meta).await?;
        let song = self.store.add_or_replace_song(meta.into_song(path)).await;
        info!("Added \"{}\" ({})", song.title, song.id);
        Ok(song)
    }

    /// Entry URLs of a remote playlist.  Nothing is downloaded.
    pub async fn resolve_playlist(&self, url: &str) -> Result<ResolvedPlaylist, DownloadError> {
        let canonical = youtube::canonical_playlist_url(url)?;
        let resolved = ytdlp::list_playlist(&self.yt_dlp, &canonical).await?;
        info!(
            "Resolved playlist {:?} with {} entries",
            resolved.title,
            resolved.urls.len()
        );
        Ok(resolved)
    }

    /// Resolve a remote playlist, mirror it as a local playlist and download
    /// each entry in turn.  Entry failures are counted, not returned.
    pub async fn import_playlist(&self, url: &str) -> Result<ImportReport, DownloadError> {
        let resolved = self.resolve_playlist(url).await?;
        let name = resolved
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_IMPORT_NAME);
        let playlist = self.store.create_playlist(name).await?;

        let (mut added, mut skipped, mut failed) = (0, 0, 0);
        for entry in &resolved.urls {
            match self.download_song(entry).await {
                Ok(song) => {
                    self.store.add_to_playlist(&playlist.id, &song.id).await;
                    added += 1;
                }
                Err(DownloadError::AlreadyDownloaded(id)) => {
                    self.store.add_to_playlist(&playlist.id, &id).await;
                    skipped += 1;
                }
                Err(e) => {
                    warn!("Import of {} failed: {}", entry, e);
                    failed += 1;
                }
            }
        }

        info!(
            "Imported \"{}\": {} added, {} skipped, {} failed",
            playlist.name, added, skipped, failed
        );
        let playlist = self.store.playlist(&playlist.id).await.unwrap_or(playlist);
        Ok(ImportReport {
            playlist,
            added,
            skipped,
            failed,
        })
    }
}
