//! Copy a playlist's audio files into a folder named after the playlist.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use playgen_proto::library::LibraryStore;
use playgen_proto::protocol::ExportReport;

const MAX_TITLE_CHARS: usize = 100;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Playlist not found")]
    UnknownPlaylist,
    #[error("Could not create {path:?}: {source}")]
    CreateFolder {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Make `name` usable as a file or folder name on every platform.
pub fn sanitize_file_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = replaced.trim().trim_end_matches('.').trim_end();
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned.to_string()
    }
}

/// `<title>.<ext>`, or `<title> (n).<ext>` for the first n ≥ 2 not yet taken.
fn unique_file_name(stem: &str, ext: &str, folder: &Path, taken: &mut HashSet<String>) -> String {
    let compose = |suffix: Option<usize>| {
        let stem = match suffix {
            Some(n) => format!("{stem} ({n})"),
            None => stem.to_string(),
        };
        if ext.is_empty() {
            stem
        } else {
            format!("{stem}.{ext}")
        }
    };

    let mut candidate = compose(None);
    let mut n = 2;
    while taken.contains(&candidate.to_lowercase()) || folder.join(&candidate).exists() {
        candidate = compose(Some(n));
        n += 1;
    }
    taken.insert(candidate.to_lowercase());
    candidate
}

/// Copy every resolvable song of the playlist into
/// `<destination>/<playlist name>`.  A missing or unreadable source counts as
/// failed and the batch continues.
pub async fn export_playlist(
    store: &LibraryStore,
    playlist_id: &str,
    destination: &Path,
) -> Result<ExportReport, ExportError> {
    let playlist = store
        .playlist(playlist_id)
        .await
        .ok_or(ExportError::UnknownPlaylist)?;
    let songs = store.playlist_songs(playlist_id).await.unwrap_or_default();

    let folder = destination.join(sanitize_file_name(&playlist.name));
    tokio::fs::create_dir_all(&folder)
        .await
        .map_err(|source| ExportError::CreateFolder {
            path: folder.clone(),
            source,
        })?;

    let mut taken = HashSet::new();
    let (mut copied, mut failed) = (0, 0);

    for song in songs {
        let stem: String = sanitize_file_name(&song.title)
            .chars()
            .take(MAX_TITLE_CHARS)
            .collect();
        let stem = sanitize_file_name(&stem);
        let ext = song
            .file_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp3");
        let name = unique_file_name(&stem, ext, &folder, &mut taken);

        match tokio::fs::copy(&song.file_path, folder.join(&name)).await {
            Ok(_) => copied += 1,
            Err(e) => {
                warn!("Export: could not copy {:?}: {}", song.file_path, e);
                taken.remove(&name.to_lowercase());
                failed += 1;
            }
        }
    }

    info!(
        "Exported \"{}\" to {:?}: {} copied, {} failed",
        playlist.name, folder, copied, failed
    );
    Ok(ExportReport {
        folder,
        copied,
        failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use playgen_proto::models::Song;
    use tempfile::TempDir;

    fn song(dir: &Path, id: &str, title: &str, write: bool) -> Song {
        let file_path = dir.join(format!("{id}.mp3"));
        if write {
            std::fs::write(&file_path, id.as_bytes()).unwrap();
        }
        Song {
            id: id.to_string(),
            title: title.to_string(),
            thumbnail: String::new(),
            duration: 1,
            channel: String::new(),
            file_path,
            date_added: Utc::now(),
        }
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("AC/DC: Back in Black?"), "AC_DC_ Back in Black_");
        assert_eq!(sanitize_file_name("  spaced out...  "), "spaced out");
        assert_eq!(sanitize_file_name("tab\there"), "tab_here");
        assert_eq!(sanitize_file_name("..."), "untitled");
        assert_eq!(sanitize_file_name(""), "untitled");
        assert_eq!(sanitize_file_name("naïve café"), "naïve café");
    }

    #[test]
    fn test_unique_file_name() {
        let dir = TempDir::new().unwrap();
        let mut taken = HashSet::new();
        assert_eq!(unique_file_name("Song", "mp3", dir.path(), &mut taken), "Song.mp3");
        assert_eq!(unique_file_name("Song", "mp3", dir.path(), &mut taken), "Song (2).mp3");
        assert_eq!(unique_file_name("song", "mp3", dir.path(), &mut taken), "song (3).mp3");

        std::fs::write(dir.path().join("Other.mp3"), b"").unwrap();
        assert_eq!(unique_file_name("Other", "mp3", dir.path(), &mut taken), "Other (2).mp3");
    }

    #[tokio::test]
    async fn test_export_counts_missing_sources() {
        let dir = TempDir::new().unwrap();
        let library_dir = dir.path().join("lib");
        std::fs::create_dir_all(&library_dir).unwrap();
        let store = LibraryStore::load(dir.path().join("db.json")).await;

        let present_a = song(&library_dir, "a", "Same Title", true);
        let present_b = song(&library_dir, "b", "Same Title", true);
        let missing = song(&library_dir, "c", "Gone", false);
        for s in [present_a, present_b, missing] {
            store.add_or_replace_song(s).await;
        }
        let playlist = store.create_playlist("Road: Trip").await.unwrap();
        for id in ["a", "b", "c", "dangling"] {
            store.add_to_playlist(&playlist.id, id).await;
        }

        let dest = dir.path().join("out");
        let report = export_playlist(&store, &playlist.id, &dest).await.unwrap();
        assert_eq!(report.copied, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.folder, dest.join("Road_ Trip"));
        assert_eq!(std::fs::read(report.folder.join("Same Title.mp3")).unwrap(), b"a");
        assert_eq!(std::fs::read(report.folder.join("Same Title (2).mp3")).unwrap(), b"b");
        assert!(!report.folder.join("Gone.mp3").exists());
    }

    #[tokio::test]
    async fn test_long_titles_are_capped() {
        let dir = TempDir::new().unwrap();
        let store = LibraryStore::load(dir.path().join("db.json")).await;
        let long = "x".repeat(250);
        store.add_or_replace_song(song(dir.path(), "a", &long, true)).await;
        let playlist = store.create_playlist("P").await.unwrap();
        store.add_to_playlist(&playlist.id, "a").await;

        let report = export_playlist(&store, &playlist.id, &dir.path().join("out")).await.unwrap();
        assert_eq!(report.copied, 1);
        let expected = format!("{}.mp3", "x".repeat(MAX_TITLE_CHARS));
        assert!(report.folder.join(expected).exists());
    }

    #[tokio::test]
    async fn test_unknown_playlist() {
        let dir = TempDir::new().unwrap();
        let store = LibraryStore::load(dir.path().join("db.json")).await;
        let err = export_playlist(&store, "nope", dir.path()).await.unwrap_err();
        assert!(matches!(err, ExportError::UnknownPlaylist));
    }
}
