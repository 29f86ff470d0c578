use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

pub const DEFAULT_VOLUME: f32 = 0.8;

/// A downloaded track.  `id` is the YouTube video id and is unique within
/// the library.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    pub id: String,
    #[serde(default = "unknown")]
    pub title: String,
    #[serde(default)]
    pub thumbnail: String,
    /// Length in whole seconds.
    #[serde(default)]
    pub duration: u64,
    #[serde(default = "unknown")]
    pub channel: String,
    pub file_path: PathBuf,
    #[serde(default = "Utc::now")]
    pub date_added: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub id: String,
    pub name: String,
    /// Song ids in play order.  Never holds the same id twice.
    #[serde(default)]
    pub songs: Vec<String>,
    #[serde(default = "Utc::now")]
    pub date_created: DateTime<Utc>,
}

impl Playlist {
    pub fn contains(&self, song_id: &str) -> bool {
        self.songs.iter().any(|id| id == song_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    None,
    All,
    One,
}

impl RepeatMode {
    /// none → all → one → none
    pub fn cycle(self) -> Self {
        match self {
            RepeatMode::None => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default)]
    pub last_song_id: Option<String>,
    #[serde(default)]
    pub last_playlist_id: Option<String>,
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default)]
    pub repeat: RepeatMode,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            last_song_id: None,
            last_playlist_id: None,
            volume: DEFAULT_VOLUME,
            shuffle: false,
            repeat: RepeatMode::None,
        }
    }
}

/// Partial session update.  Absent fields keep their stored value; for the
/// two ids an explicit `null` clears the stored value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionPatch {
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_song_id: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_playlist_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shuffle: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<RepeatMode>,
}

impl Session {
    pub fn merge(&mut self, patch: SessionPatch) {
        if let Some(id) = patch.last_song_id {
            self.last_song_id = id;
        }
        if let Some(id) = patch.last_playlist_id {
            self.last_playlist_id = id;
        }
        if let Some(volume) = patch.volume {
            self.volume = clamp_volume(volume);
        }
        if let Some(shuffle) = patch.shuffle {
            self.shuffle = shuffle;
        }
        if let Some(repeat) = patch.repeat {
            self.repeat = repeat;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_true")]
    pub mini_player_on_minimize: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mini_player_on_minimize: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mini_player_on_minimize: Option<bool>,
}

impl Settings {
    pub fn merge(&mut self, patch: SettingsPatch) {
        if let Some(value) = patch.mini_player_on_minimize {
            self.mini_player_on_minimize = value;
        }
    }
}

/// The whole persisted document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Library {
    #[serde(default)]
    pub songs: Vec<Song>,
    #[serde(default)]
    pub playlists: Vec<Playlist>,
    #[serde(default)]
    pub session: Session,
    #[serde(default)]
    pub settings: Settings,
}

impl Library {
    pub fn song(&self, id: &str) -> Option<&Song> {
        self.songs.iter().find(|s| s.id == id)
    }

    pub fn playlist(&self, id: &str) -> Option<&Playlist> {
        self.playlists.iter().find(|p| p.id == id)
    }

    pub fn playlist_mut(&mut self, id: &str) -> Option<&mut Playlist> {
        self.playlists.iter_mut().find(|p| p.id == id)
    }

    /// Songs of a playlist in playlist order, skipping ids with no record.
    pub fn resolve_playlist(&self, playlist: &Playlist) -> Vec<Song> {
        playlist
            .songs
            .iter()
            .filter_map(|id| self.song(id))
            .cloned()
            .collect()
    }

    /// Bring a freshly deserialized document in line with the invariants.
    pub fn normalize(&mut self) {
        let mut seen = HashSet::new();
        self.songs.retain(|s| seen.insert(s.id.clone()));

        for playlist in &mut self.playlists {
            dedup_ids(&mut playlist.songs);
        }

        self.session.volume = clamp_volume(self.session.volume);

        let dangling = self
            .session
            .last_playlist_id
            .as_deref()
            .is_some_and(|id| self.playlist(id).is_none());
        if dangling {
            self.session.last_playlist_id = None;
        }
    }
}

/// Drop repeated ids, keeping the first occurrence.
pub fn dedup_ids(ids: &mut Vec<String>) {
    let mut seen = HashSet::new();
    ids.retain(|id| seen.insert(id.clone()));
}

pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        return DEFAULT_VOLUME;
    }
    volume.clamp(0.0, 1.0)
}

fn unknown() -> String {
    "Unknown".to_string()
}

fn default_volume() -> f32 {
    DEFAULT_VOLUME
}

fn default_true() -> bool {
    true
}

/// Marks a field as present so `null` becomes `Some(None)`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
