use chrono::Utc;
use playgen_proto::models::Song;
use std::path::Path;

/// A song whose audio file exists under `dir`.
pub fn song_on_disk(dir: &Path, id: &str) -> Song {
    let file_path = dir.join(format!("{id}.mp3"));
    std::fs::write(&file_path, b"ID3").expect("fixture file should be writable");
    Song {
        id: id.to_string(),
        title: format!("Song {id}"),
        thumbnail: format!("https://i.ytimg.com/vi/{id}/hqdefault.jpg"),
        duration: 180,
        channel: "Fixture".to_string(),
        file_path,
        date_added: Utc::now(),
    }
}
