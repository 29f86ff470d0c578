//! Downloads against a shell script standing in for yt-dlp.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use playgen_daemon::download::{DownloadError, Downloader};
use playgen_proto::library::LibraryStore;
use playgen_proto::platform::ToolPaths;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Answers `--dump-json` and `--flat-playlist` probes and "downloads" by
/// touching the `-o` target.  Special ids:
/// - `broken` fails the metadata probe
/// - `latin1` writes a non-UTF-8 warning and a long progress stream
/// - `nofile` exits 0 without producing audio
/// - `exitone` produces audio but exits 1
const FAKE_YT_DLP: &str = r#"#!/bin/sh
for last; do :; done
id="${last##*v=}"
out=""
prev=""
flat=0
probe=0
for arg in "$@"; do
  [ "$prev" = "-o" ] && out="$arg"
  [ "$arg" = "--flat-playlist" ] && flat=1
  [ "$arg" = "--dump-json" ] && probe=1
  prev="$arg"
done

if [ "$flat" = 1 ]; then
  echo '{"id":"vid1","playlist_title":"Road Trip"}'
  echo '{"id":"broken","playlist_title":"Road Trip"}'
  echo '{"id":"vid1","playlist_title":"Road Trip"}'
  exit 0
fi

if [ "$id" = "broken" ]; then
  echo "ERROR: [youtube] broken: Video unavailable" >&2
  exit 1
fi

if [ "$probe" = 1 ]; then
  echo "{\"id\":\"$id\",\"title\":\"Title $id\",\"duration\":181.4,\"uploader\":\"Uploader\"}"
  exit 0
fi

target=$(echo "$out" | sed -e "s/%(id)s/$id/" -e "s/%(ext)s/mp3/")

case "$id" in
  latin1)
    printf 'WARNING: caf\351 title\n' >&2
    i=0
    while [ "$i" -lt 3000 ]; do
      echo "[download] $((i % 100)).0% of 3.00MiB"
      i=$((i + 1))
    done
    ;;
  nofile)
    echo "[download] 100.0% of 3.00MiB"
    exit 0
    ;;
  exitone)
    : > "$target"
    echo "ERROR: Postprocessing: audio conversion failed" >&2
    exit 1
    ;;
esac

echo "[download]  50.0% of 3.00MiB at 1.00MiB/s ETA 00:01"
echo "[download] 100.0% of 3.00MiB" >&2
: > "$target"
exit 0
"#;

fn install_fake(dir: &Path) -> PathBuf {
    let path = dir.join("yt-dlp");
    std::fs::write(&path, FAKE_YT_DLP).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[tokio::test]
async fn download_and_import_through_fake_yt_dlp() {
    let dir = TempDir::new().unwrap();
    let fake = install_fake(dir.path());
    let store = Arc::new(LibraryStore::load(dir.path().join("db.json")).await);
    let (progress_tx, mut progress_rx) = mpsc::channel(64);
    let tools = ToolPaths {
        yt_dlp: Some(fake),
        ffmpeg: None,
        mpv: None,
    };
    let downloads = dir.path().join("downloads");
    let downloader = Downloader::new(store.clone(), &tools, downloads.clone(), progress_tx);

    // single video, extra query parameters dropped
    let song = downloader
        .download_song("youtu.be/abc123?si=share")
        .await
        .unwrap();
    assert_eq!(song.id, "abc123");
    assert_eq!(song.title, "Title abc123");
    assert_eq!(song.duration, 181);
    assert_eq!(song.channel, "Uploader");
    assert_eq!(song.thumbnail, "https://i.ytimg.com/vi/abc123/hqdefault.jpg");
    assert_eq!(song.file_path, downloads.join("abc123.mp3"));
    assert!(song.file_path.exists());

    let mut percents = Vec::new();
    while let Ok(progress) = progress_rx.try_recv() {
        assert_eq!(progress.id, "abc123");
        percents.push(progress.percent);
    }
    assert!(percents.contains(&50.0));
    assert!(percents.contains(&100.0));

    // same id again
    let err = downloader
        .download_song("https://www.youtube.com/watch?v=abc123&list=xyz")
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::AlreadyDownloaded(ref id) if id == "abc123"));

    // tool failure surfaces its stderr
    let err = downloader
        .download_song("https://www.youtube.com/watch?v=broken")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Video unavailable"));

    // playlist: one new, one failing, one repeat
    let report = downloader
        .import_playlist("https://www.youtube.com/playlist?list=PLroad")
        .await
        .unwrap();
    assert_eq!(report.playlist.name, "Road Trip");
    assert_eq!((report.added, report.skipped, report.failed), (1, 1, 1));
    assert_eq!(report.playlist.songs, vec!["vid1"]);

    let songs = store.songs().await;
    let ids: Vec<_> = songs.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["vid1", "abc123"]);
    while progress_rx.try_recv().is_ok() {}

    // undecodable bytes on stderr neither stop the reader nor fail the run
    let song = downloader
        .download_song("https://www.youtube.com/watch?v=latin1")
        .await
        .unwrap();
    assert_eq!(song.file_path, downloads.join("latin1.mp3"));
    let mut latin1_events = 0;
    while let Ok(progress) = progress_rx.try_recv() {
        assert_eq!(progress.id, "latin1");
        latin1_events += 1;
    }
    assert!(latin1_events > 0);

    let before = store.songs().await;

    // exit 0 alone is not success
    let err = downloader
        .download_song("https://www.youtube.com/watch?v=nofile")
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::Tool(_)));
    assert!(!downloads.join("nofile.mp3").exists());
    assert_eq!(store.songs().await, before);

    // nor is the file alone
    let err = downloader
        .download_song("https://www.youtube.com/watch?v=exitone")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("audio conversion failed"));
    assert!(downloads.join("exitone.mp3").exists());
    assert_eq!(store.songs().await, before);
    assert!(store.song("exitone").await.is_none());
}
