//! Parsing of `yt-dlp --dump-json` and `--flat-playlist` output.

use chrono::Utc;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

use playgen_proto::models::Song;
use playgen_proto::protocol::ResolvedPlaylist;
use playgen_proto::youtube::watch_url;

/// The fields of a video kept in the library.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    pub thumbnail: String,
    pub duration: u64,
    pub channel: String,
}

#[derive(Deserialize)]
struct InfoJson {
    id: String,
    title: Option<String>,
    thumbnail: Option<String>,
    duration: Option<f64>,
    channel: Option<String>,
    uploader: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl VideoMetadata {
    /// Parse the info JSON printed by `--dump-json`.  The first non-empty
    /// line is used.
    pub fn from_info_json(stdout: &str) -> Result<Self, serde_json::Error> {
        let line = stdout.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        let info: InfoJson = serde_json::from_str(line)?;

        let thumbnail = non_empty(info.thumbnail)
            .unwrap_or_else(|| format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", info.id));
        let channel = non_empty(info.channel)
            .or_else(|| non_empty(info.uploader))
            .unwrap_or_else(|| "Unknown".to_string());
        let duration = info
            .duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .map_or(0, |d| d.trunc() as u64);

        Ok(Self {
            title: non_empty(info.title).unwrap_or_else(|| "Unknown".to_string()),
            thumbnail,
            duration,
            channel,
            id: info.id,
        })
    }

    pub fn into_song(self, file_path: PathBuf) -> Song {
        Song {
            id: self.id,
            title: self.title,
            thumbnail: self.thumbnail,
            duration: self.duration,
            channel: self.channel,
            file_path,
            date_added: Utc::now(),
        }
    }
}

#[derive(Deserialize)]
struct FlatEntry {
    id: Option<String>,
    url: Option<String>,
    playlist_title: Option<String>,
    playlist: Option<String>,
}

/// One JSON object per line; unparsable lines are skipped.
pub fn parse_flat_playlist(stdout: &str) -> ResolvedPlaylist {
    let mut resolved = ResolvedPlaylist::default();

    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let entry: FlatEntry = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(e) => {
                debug!("flat-playlist: skipping line: {}", e);
                continue;
            }
        };

        if resolved.title.is_none() {
            resolved.title = non_empty(entry.playlist_title).or_else(|| non_empty(entry.playlist));
        }

        if let Some(url) = non_empty(entry.id).map(|id| watch_url(&id)).or(entry.url) {
            resolved.urls.push(url);
        }
    }

    resolved
}
