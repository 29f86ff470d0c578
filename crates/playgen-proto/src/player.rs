//! Playback controller: queue position, play state and repeat/shuffle modes.
//!
//! The controller never touches audio itself.  Each transition returns the
//! `Transport` instruction the audio output has to carry out.

use crate::models::{clamp_volume, Library, RepeatMode, Session, SessionPatch, Song};
use crate::queue::{build_queue_random, View};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `prev()` restarts the current track instead of navigating past this point.
pub const RESTART_THRESHOLD_SECS: f64 = 3.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlayState {
    #[default]
    Idle,
    Playing,
    Paused,
}

/// What the audio output should do after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Transport {
    Load(Song),
    /// Seek to 0; `resume` also unpauses.
    Restart { resume: bool },
    Pause,
    Resume,
    Stop,
}

#[derive(Debug, Error, PartialEq)]
pub enum PlayError {
    #[error("Playlist is empty")]
    EmptyPlaylist,
    #[error("Library is empty")]
    EmptyLibrary,
    #[error("Playlist not found")]
    UnknownPlaylist,
}

/// Serializable view of the controller for clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub state: PlayState,
    pub current_song: Option<Song>,
    pub queue: Vec<Song>,
    pub queue_index: Option<usize>,
    pub view: View,
    pub shuffle: bool,
    pub repeat: RepeatMode,
    pub volume: f32,
    pub position_secs: f64,
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct PlaybackController {
    state: PlayState,
    queue: Vec<Song>,
    queue_index: Option<usize>,
    current_song: Option<Song>,
    view: View,
    shuffle: bool,
    repeat: RepeatMode,
    volume: f32,
    position_secs: f64,
    duration_secs: Option<f64>,
}

impl Default for PlaybackController {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackController {
    pub fn new() -> Self {
        let session = Session::default();
        Self {
            state: PlayState::Idle,
            queue: Vec::new(),
            queue_index: None,
            current_song: None,
            view: View::All,
            shuffle: session.shuffle,
            repeat: session.repeat,
            volume: session.volume,
            position_secs: 0.0,
            duration_secs: None,
        }
    }

    /// Apply the persisted session at startup.  The last song becomes current
    /// but does not start playing.
    pub fn restore(&mut self, library: &Library) {
        let session = &library.session;
        self.volume = clamp_volume(session.volume);
        self.shuffle = session.shuffle;
        self.repeat = session.repeat;
        self.view = match session.last_playlist_id.as_deref() {
            Some(id) if library.playlist(id).is_some() => View::Playlist(id.to_string()),
            _ => View::All,
        };
        self.current_song = session
            .last_song_id
            .as_deref()
            .and_then(|id| library.song(id))
            .cloned();
    }

    /// Take over a session update from a client.  A song that is playing or
    /// paused stays current; `last_song_id` only moves the idle selection.
    pub fn apply_session(&mut self, patch: &SessionPatch, library: &Library) {
        if let Some(volume) = patch.volume {
            self.set_volume(volume);
        }
        if let Some(repeat) = patch.repeat {
            self.repeat = repeat;
        }
        if let Some(playlist_id) = &patch.last_playlist_id {
            self.view = match playlist_id.as_deref() {
                Some(id) if library.playlist(id).is_some() => View::Playlist(id.to_string()),
                _ => View::All,
            };
        }
        if let Some(song_id) = &patch.last_song_id {
            if self.state == PlayState::Idle {
                self.current_song = song_id.as_deref().and_then(|id| library.song(id)).cloned();
                self.queue_index = self
                    .current_song
                    .as_ref()
                    .and_then(|cur| self.queue.iter().position(|s| s.id == cur.id));
                self.position_secs = 0.0;
            }
        }
        if let Some(shuffle) = patch.shuffle {
            if shuffle != self.shuffle {
                self.set_shuffle(shuffle, library);
            }
        }
    }

    // ── accessors ─────────────────────────────────────────────────────────────

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn queue(&self) -> &[Song] {
        &self.queue
    }

    /// `None` when nothing in the queue is selected.
    pub fn queue_index(&self) -> Option<usize> {
        self.queue_index
    }

    pub fn current_song(&self) -> Option<&Song> {
        self.current_song.as_ref()
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn position_secs(&self) -> f64 {
        self.position_secs
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            state: self.state,
            current_song: self.current_song.clone(),
            queue: self.queue.clone(),
            queue_index: self.queue_index,
            view: self.view.clone(),
            shuffle: self.shuffle,
            repeat: self.repeat,
            volume: self.volume,
            position_secs: self.position_secs,
            duration_secs: self.duration_secs,
        }
    }

    /// The persisted-worthy fields, as a session update.
    pub fn session_patch(&self) -> SessionPatch {
        SessionPatch {
            last_song_id: Some(self.current_song.as_ref().map(|s| s.id.clone())),
            last_playlist_id: Some(self.view.playlist_id().map(str::to_string)),
            volume: Some(self.volume),
            shuffle: Some(self.shuffle),
            repeat: Some(self.repeat),
        }
    }

    // ── transitions ───────────────────────────────────────────────────────────

    /// Start `song`, rebuilding the queue from the current view.  A song that
    /// is not part of the rebuilt queue still plays; the index is `None`.
    pub fn play(&mut self, song: Song, library: &Library) -> Transport {
        self.current_song = Some(song.clone());
        self.rebuild_queue(library);
        self.start(song)
    }

    /// Switch to the whole library and play its first song.
    pub fn play_all(&mut self, library: &Library) -> Result<Transport, PlayError> {
        let first = library.songs.first().cloned().ok_or(PlayError::EmptyLibrary)?;
        self.view = View::All;
        Ok(self.play(first, library))
    }

    /// Switch to a playlist and play its first resolvable song.
    pub fn play_playlist(&mut self, playlist_id: &str, library: &Library) -> Result<Transport, PlayError> {
        let playlist = library.playlist(playlist_id).ok_or(PlayError::UnknownPlaylist)?;
        let first = library
            .resolve_playlist(playlist)
            .into_iter()
            .next()
            .ok_or(PlayError::EmptyPlaylist)?;
        self.view = View::Playlist(playlist_id.to_string());
        Ok(self.play(first, library))
    }

    /// Playing ↔ paused.  Nothing happens while idle.
    pub fn toggle(&mut self) -> Option<Transport> {
        match self.state {
            PlayState::Idle => None,
            PlayState::Playing => {
                self.state = PlayState::Paused;
                Some(Transport::Pause)
            }
            PlayState::Paused => {
                self.state = PlayState::Playing;
                Some(Transport::Resume)
            }
        }
    }

    pub fn next(&mut self) -> Option<Transport> {
        if self.queue.is_empty() {
            return None;
        }

        if self.repeat == RepeatMode::One {
            self.position_secs = 0.0;
            self.state = PlayState::Playing;
            return Some(Transport::Restart { resume: true });
        }

        let mut next = self.queue_index.map_or(0, |i| i + 1);
        if next >= self.queue.len() {
            if self.repeat == RepeatMode::All {
                next = 0;
            } else {
                self.state = PlayState::Idle;
                self.position_secs = 0.0;
                return Some(Transport::Stop);
            }
        }

        self.queue_index = Some(next);
        let song = self.queue[next].clone();
        Some(self.start(song))
    }

    /// Natural end of the current track.
    pub fn track_ended(&mut self) -> Option<Transport> {
        self.next()
    }

    pub fn prev(&mut self) -> Option<Transport> {
        if self.queue.is_empty() {
            return None;
        }

        if self.position_secs > RESTART_THRESHOLD_SECS {
            self.position_secs = 0.0;
            return Some(Transport::Restart { resume: false });
        }

        let prev = match self.queue_index {
            Some(i) if i > 0 => i - 1,
            _ if self.repeat == RepeatMode::All => self.queue.len() - 1,
            _ => {
                self.position_secs = 0.0;
                return Some(Transport::Restart { resume: false });
            }
        };

        self.queue_index = Some(prev);
        let song = self.queue[prev].clone();
        Some(self.start(song))
    }

    /// Change shuffle and, if a queue exists, re-derive it around the
    /// current song.
    pub fn set_shuffle(&mut self, shuffle: bool, library: &Library) {
        self.shuffle = shuffle;
        if !self.queue.is_empty() {
            self.rebuild_queue(library);
        }
    }

    pub fn toggle_shuffle(&mut self, library: &Library) {
        self.set_shuffle(!self.shuffle, library);
    }

    /// none → all → one → none.  The queue is left alone.
    pub fn cycle_repeat(&mut self) -> RepeatMode {
        self.repeat = self.repeat.cycle();
        self.repeat
    }

    pub fn set_volume(&mut self, volume: f32) -> f32 {
        self.volume = clamp_volume(volume);
        self.volume
    }

    /// Change the visible scope.  The running queue is kept until the next
    /// `play`.
    pub fn set_view(&mut self, view: View) {
        self.view = view;
    }

    /// The view's playlist was deleted: fall back to the whole library.
    pub fn playlist_deleted(&mut self, playlist_id: &str) -> bool {
        if self.view.playlist_id() == Some(playlist_id) {
            self.view = View::All;
            true
        } else {
            false
        }
    }

    pub fn update_position(&mut self, secs: f64) {
        self.position_secs = secs.max(0.0);
    }

    pub fn update_duration(&mut self, secs: Option<f64>) {
        self.duration_secs = secs;
    }

    /// A song was deleted from the library.  Stops playback if it was current
    /// and removes it from the queue, keeping the index on the same song.
    pub fn forget_song(&mut self, song_id: &str) -> Option<Transport> {
        if let Some(idx) = self.queue.iter().position(|s| s.id == song_id) {
            self.queue.remove(idx);
            self.queue_index = match self.queue_index {
                Some(i) if i == idx => None,
                Some(i) if i > idx => Some(i - 1),
                other => other,
            };
        }

        if self.current_song.as_ref().is_some_and(|s| s.id == song_id) {
            self.current_song = None;
            self.queue_index = None;
            self.position_secs = 0.0;
            let was_active = self.state != PlayState::Idle;
            self.state = PlayState::Idle;
            return was_active.then_some(Transport::Stop);
        }
        None
    }

    /// The audio output could not start the current track.
    pub fn playback_failed(&mut self) {
        self.state = PlayState::Idle;
        self.position_secs = 0.0;
    }

    fn start(&mut self, song: Song) -> Transport {
        self.current_song = Some(song.clone());
        self.state = PlayState::Playing;
        self.position_secs = 0.0;
        self.duration_secs = None;
        Transport::Load(song)
    }

    fn rebuild_queue(&mut self, library: &Library) {
        let pinned = self.current_song.as_ref().map(|s| s.id.clone());
        self.queue = build_queue_random(
            &self.view,
            &library.songs,
            &library.playlists,
            self.shuffle,
            pinned.as_deref(),
        );
        self.queue_index = pinned
            .as_deref()
            .and_then(|id| self.queue.iter().position(|s| s.id == id));
    }
}
