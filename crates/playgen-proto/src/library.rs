//! Library store: the single owned `Library` document plus its JSON file.
//!
//! Every mutation is read-modify-write under the write lock and is followed
//! by a full rewrite of the document.  Persist failures are logged and never
//! returned to the caller; the in-memory copy stays authoritative.

use crate::models::{
    dedup_ids, Library, Playlist, Session, SessionPatch, Settings, SettingsPatch, Song,
};
use chrono::Utc;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

#[derive(Debug, Error, PartialEq)]
pub enum LibraryError {
    #[error("playlist name must not be empty")]
    EmptyName,
}

pub struct LibraryStore {
    library: Arc<RwLock<Library>>,
    path: PathBuf,
    /// Held from snapshot to rename; the temp path is shared.
    save_lock: Mutex<()>,
}

impl LibraryStore {
    /// Read the document at `path`.  A missing or unreadable file yields an
    /// empty library.
    pub async fn load(path: PathBuf) -> Self {
        let library = Self::read_document(&path).await;
        info!(
            "Library loaded from {:?}: {} songs, {} playlists",
            path,
            library.songs.len(),
            library.playlists.len()
        );
        Self {
            library: Arc::new(RwLock::new(library)),
            path,
            save_lock: Mutex::new(()),
        }
    }

    async fn read_document(path: &Path) -> Library {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Library::default(),
            Err(e) => {
                warn!("Failed to read library {:?}: {}", path, e);
                return Library::default();
            }
        };
        match serde_json::from_str::<Library>(&content) {
            Ok(mut library) => {
                library.normalize();
                library
            }
            Err(e) => {
                warn!("Library {:?} is corrupt, starting empty: {}", path, e);
                Library::default()
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Full copy of the current document.
    pub async fn snapshot(&self) -> Library {
        self.library.read().await.clone()
    }

    /// Write the whole document: temp file beside the target, then rename, so
    /// readers never observe a partial file.
    pub async fn save(&self) -> anyhow::Result<()> {
        // a later save always snapshots a state at least as new as an earlier one
        let _guard = self.save_lock.lock().await;
        let json = {
            let library = self.library.read().await;
            serde_json::to_string_pretty(&*library)?
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn persist(&self) {
        if let Err(e) = self.save().await {
            error!("Failed to persist library to {:?}: {}", self.path, e);
        }
    }

    // ── songs ─────────────────────────────────────────────────────────────────

    /// All songs, most recent first.  Records whose audio file is gone are
    /// dropped (and the pruned document persisted).
    pub async fn songs(&self) -> Vec<Song> {
        let pruned = {
            let mut library = self.library.write().await;
            let before = library.songs.len();
            library.songs.retain(|s| s.file_path.exists());
            before - library.songs.len()
        };
        if pruned > 0 {
            info!("Pruned {} songs with missing audio files", pruned);
            self.persist().await;
        }
        self.library.read().await.songs.clone()
    }

    pub async fn song(&self, id: &str) -> Option<Song> {
        self.library.read().await.song(id).cloned()
    }

    /// Path to the song's audio file, only if the file is still on disk.
    pub async fn song_path(&self, id: &str) -> Option<PathBuf> {
        let library = self.library.read().await;
        library
            .song(id)
            .map(|s| s.file_path.clone())
            .filter(|p| p.exists())
    }

    /// Insert `song` at the front, replacing any record with the same id.
    pub async fn add_or_replace_song(&self, song: Song) -> Song {
        {
            let mut library = self.library.write().await;
            library.songs.retain(|s| s.id != song.id);
            library.songs.insert(0, song.clone());
        }
        self.persist().await;
        song
    }

    /// Remove the record, unlink its file and drop the id from every playlist.
    pub async fn remove_song(&self, id: &str) -> Option<Song> {
        let removed = {
            let mut library = self.library.write().await;
            let idx = library.songs.iter().position(|s| s.id == id)?;
            let song = library.songs.remove(idx);
            for playlist in &mut library.playlists {
                playlist.songs.retain(|sid| sid != id);
            }
            song
        };

        if let Err(e) = tokio::fs::remove_file(&removed.file_path).await {
            warn!("Could not delete {:?}: {}", removed.file_path, e);
        }

        self.persist().await;
        Some(removed)
    }

    // ── playlists ─────────────────────────────────────────────────────────────

    pub async fn playlists(&self) -> Vec<Playlist> {
        self.library.read().await.playlists.clone()
    }

    pub async fn playlist(&self, id: &str) -> Option<Playlist> {
        self.library.read().await.playlist(id).cloned()
    }

    /// Resolved songs of a playlist; dangling ids are skipped.
    pub async fn playlist_songs(&self, id: &str) -> Option<Vec<Song>> {
        let library = self.library.read().await;
        let playlist = library.playlist(id)?;
        Some(library.resolve_playlist(playlist))
    }

    pub async fn create_playlist(&self, name: &str) -> Result<Playlist, LibraryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LibraryError::EmptyName);
        }

        let playlist = {
            let mut library = self.library.write().await;
            let mut id = generate_playlist_id();
            while library.playlist(&id).is_some() {
                id = generate_playlist_id();
            }
            let playlist = Playlist {
                id,
                name: name.to_string(),
                songs: Vec::new(),
                date_created: Utc::now(),
            };
            library.playlists.push(playlist.clone());
            playlist
        };

        self.persist().await;
        Ok(playlist)
    }

    pub async fn rename_playlist(
        &self,
        id: &str,
        name: &str,
    ) -> Result<Option<Playlist>, LibraryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LibraryError::EmptyName);
        }
        Ok(self
            .mutate_playlist(id, |p| p.name = name.to_string())
            .await)
    }

    /// Callers showing this playlist as their view must fall back to the
    /// unfiltered view.
    pub async fn delete_playlist(&self, id: &str) -> Option<Playlist> {
        let removed = {
            let mut library = self.library.write().await;
            let idx = library.playlists.iter().position(|p| p.id == id)?;
            let removed = library.playlists.remove(idx);
            if library.session.last_playlist_id.as_deref() == Some(id) {
                library.session.last_playlist_id = None;
            }
            removed
        };
        self.persist().await;
        Some(removed)
    }

    pub async fn add_to_playlist(&self, playlist_id: &str, song_id: &str) -> Option<Playlist> {
        self.mutate_playlist(playlist_id, |p| {
            if !p.contains(song_id) {
                p.songs.push(song_id.to_string());
            }
        })
        .await
    }

    pub async fn remove_from_playlist(&self, playlist_id: &str, song_id: &str) -> Option<Playlist> {
        self.mutate_playlist(playlist_id, |p| p.songs.retain(|id| id != song_id))
            .await
    }

    /// Replace the playlist order wholesale.  Ids are not checked against the
    /// song collection.
    pub async fn reorder_playlist(&self, playlist_id: &str, ids: Vec<String>) -> Option<Playlist> {
        self.mutate_playlist(playlist_id, move |p| {
            p.songs = ids;
            dedup_ids(&mut p.songs);
        })
        .await
    }

    async fn mutate_playlist<F>(&self, id: &str, f: F) -> Option<Playlist>
    where
        F: FnOnce(&mut Playlist),
    {
        let updated = {
            let mut library = self.library.write().await;
            let playlist = library.playlist_mut(id)?;
            f(playlist);
            playlist.clone()
        };
        self.persist().await;
        Some(updated)
    }

    // ── session / settings ────────────────────────────────────────────────────

    pub async fn session(&self) -> Session {
        self.library.read().await.session.clone()
    }

    pub async fn save_session(&self, patch: SessionPatch) -> Session {
        let session = {
            let mut library = self.library.write().await;
            library.session.merge(patch);
            library.session.clone()
        };
        self.persist().await;
        session
    }

    pub async fn settings(&self) -> Settings {
        self.library.read().await.settings.clone()
    }

    pub async fn save_settings(&self, patch: SettingsPatch) -> Settings {
        let settings = {
            let mut library = self.library.write().await;
            library.settings.merge(patch);
            library.settings.clone()
        };
        self.persist().await;
        settings
    }
}

/// Base36 milliseconds since the epoch followed by five random base36 chars.
fn generate_playlist_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    let mut millis = Utc::now().timestamp_millis().max(0) as u64;
    let mut prefix = Vec::new();
    loop {
        prefix.push(ALPHABET[(millis % 36) as usize]);
        millis /= 36;
        if millis == 0 {
            break;
        }
    }
    prefix.reverse();

    let mut rng = rand::thread_rng();
    let suffix = (0..5).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())]);

    prefix.into_iter().chain(suffix).map(char::from).collect()
}
