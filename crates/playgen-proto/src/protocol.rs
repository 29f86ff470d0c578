use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::{Playlist, Session, SessionPatch, Settings, SettingsPatch, Song};
use crate::platform::DependencyReport;
use crate::player::{PlayState, PlayerSnapshot};
use crate::queue::View;

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent from a client to the daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum Command {
    // window relay
    Window { action: WindowAction },
    MiniPlayer { action: MiniPlayerCommand },

    // downloads
    CheckDependencies,
    DownloadSong { url: String },
    ResolvePlaylist { url: String },
    ImportPlaylist { url: String },
    GetDownloadsPath,
    OpenDownloadsFolder,

    // library
    ListSongs,
    DeleteSong { id: String },
    ResolveSongPath { id: String },

    // playlists
    ListPlaylists,
    PlaylistSongs { playlist_id: String },
    CreatePlaylist { name: String },
    RenamePlaylist { playlist_id: String, name: String },
    DeletePlaylist { playlist_id: String },
    AddToPlaylist { playlist_id: String, song_id: String },
    RemoveFromPlaylist { playlist_id: String, song_id: String },
    ReorderPlaylist { playlist_id: String, song_ids: Vec<String> },
    /// Drag `dragged` onto `target` inside a playlist.
    MoveInPlaylist {
        playlist_id: String,
        dragged: String,
        target: String,
        insert_before: bool,
    },
    ExportPlaylist { playlist_id: String, destination: PathBuf },

    // session
    GetSession,
    SaveSession { patch: SessionPatch },
    GetSettings,
    SaveSettings { patch: SettingsPatch },

    // playback
    Play { song_id: String },
    PlayAll,
    PlayPlaylist { playlist_id: String },
    TogglePlay,
    Next,
    Prev,
    SeekTo { seconds: f64 },
    ToggleShuffle,
    SetShuffle { enabled: bool },
    CycleRepeat,
    Volume { value: f32 },
    SetView { view: View },
    GetState,
}

/// A command plus the id its `Reply` will carry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    #[serde(default)]
    pub request_id: u64,
    #[serde(flatten)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WindowAction {
    Minimize,
    Maximize,
    Close,
    ShowMiniPlayer,
    HideMiniPlayer,
    RestoreMain,
}

/// Buttons on the mini-player.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MiniPlayerCommand {
    Restore,
    Close,
    TogglePlay,
    Next,
    Prev,
}

/// What the mini-player shows.  Pushed on every playback change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MiniPlayerState {
    pub title: Option<String>,
    pub channel: Option<String>,
    pub thumbnail: Option<String>,
    pub state: PlayState,
    pub position_secs: f64,
    pub duration_secs: Option<f64>,
}

impl From<&PlayerSnapshot> for MiniPlayerState {
    fn from(snapshot: &PlayerSnapshot) -> Self {
        let song = snapshot.current_song.as_ref();
        Self {
            title: song.map(|s| s.title.clone()),
            channel: song.map(|s| s.channel.clone()),
            thumbnail: song.map(|s| s.thumbnail.clone()),
            state: snapshot.state,
            position_secs: snapshot.position_secs,
            duration_secs: snapshot
                .duration_secs
                .or_else(|| song.map(|s| s.duration as f64)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadProgress {
    pub id: String,
    pub percent: f32,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResolvedPlaylist {
    pub title: Option<String>,
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportReport {
    pub playlist: Playlist,
    pub added: usize,
    /// Entries that were already in the library.
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportReport {
    pub folder: PathBuf,
    pub copied: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DownloadOutcome {
    Downloaded { song: Song },
    /// Not a failure: the song and its file are already present.
    AlreadyDownloaded { id: String },
}

/// Answer to a single `Request`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Error { message: String },
    Dependencies { report: DependencyReport },
    Download { outcome: DownloadOutcome },
    ResolvedPlaylist { playlist: ResolvedPlaylist },
    Imported { report: ImportReport },
    Exported { report: ExportReport },
    Path { path: Option<PathBuf> },
    Songs { songs: Vec<Song> },
    Song { song: Option<Song> },
    Playlists { playlists: Vec<Playlist> },
    Playlist { playlist: Option<Playlist> },
    Session { session: Session },
    Settings { settings: Settings },
    State { state: PlayerSnapshot },
}

impl Response {
    pub fn error(message: impl ToString) -> Self {
        Response::Error {
            message: message.to_string(),
        }
    }
}

/// Messages sent from the daemon to clients (broadcasts)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full state snapshot.
    Hello {
        protocol_version: u32,
        state: PlayerSnapshot,
    },
    State {
        data: PlayerSnapshot,
    },
    /// Sent only to the connection that issued the request.
    Reply {
        request_id: u64,
        response: Response,
    },
    DownloadProgress {
        progress: DownloadProgress,
    },
    Window {
        action: WindowAction,
    },
    MiniPlayer {
        state: MiniPlayerState,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}
