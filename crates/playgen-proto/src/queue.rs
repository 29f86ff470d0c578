//! Play queue construction and playlist drag-reorder.

use crate::models::{Playlist, Song};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// The song scope currently shown: the whole library or one playlist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum View {
    #[default]
    All,
    Playlist(String),
}

impl View {
    pub fn playlist_id(&self) -> Option<&str> {
        match self {
            View::All => None,
            View::Playlist(id) => Some(id),
        }
    }
}

/// Build the play queue for `view`.
///
/// Playlist views map ids to records in playlist order and skip ids that no
/// longer resolve; a playlist that no longer exists falls back to the whole
/// library.  With `shuffle`, the sequence is permuted first and the pinned
/// song is then moved to the front.  The pin is applied after the shuffle,
/// so the remaining songs keep their shuffled relative order.
pub fn build_queue<R: Rng + ?Sized>(
    view: &View,
    songs: &[Song],
    playlists: &[Playlist],
    shuffle: bool,
    pinned_id: Option<&str>,
    rng: &mut R,
) -> Vec<Song> {
    let mut queue: Vec<Song> = match view
        .playlist_id()
        .and_then(|id| playlists.iter().find(|p| p.id == id))
    {
        Some(playlist) => playlist
            .songs
            .iter()
            .filter_map(|id| songs.iter().find(|s| &s.id == id))
            .cloned()
            .collect(),
        None => songs.to_vec(),
    };

    if shuffle {
        queue.shuffle(rng);
        if let Some(pinned) = pinned_id {
            if let Some(idx) = queue.iter().position(|s| s.id == pinned) {
                if idx > 0 {
                    let song = queue.remove(idx);
                    queue.insert(0, song);
                }
            }
        }
    }

    queue
}

/// `build_queue` with the thread-local RNG.
pub fn build_queue_random(
    view: &View,
    songs: &[Song],
    playlists: &[Playlist],
    shuffle: bool,
    pinned_id: Option<&str>,
) -> Vec<Song> {
    build_queue(view, songs, playlists, shuffle, pinned_id, &mut rand::thread_rng())
}

/// New playlist order after dropping `dragged` onto `target`.
///
/// `dragged` is removed from its old slot (if any) and inserted before or
/// after `target`, whose position is looked up after the removal.  An absent
/// target appends.  Dropping an item onto itself is filtered by the caller.
pub fn compute_reorder_insertion(
    existing: &[String],
    dragged: &str,
    target: &str,
    insert_before: bool,
) -> Vec<String> {
    let mut ids: Vec<String> = existing.iter().filter(|id| *id != dragged).cloned().collect();

    match ids.iter().position(|id| id == target) {
        Some(idx) => {
            let at = if insert_before { idx } else { idx + 1 };
            ids.insert(at, dragged.to_string());
        }
        None => ids.push(dragged.to_string()),
    }

    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn song(id: &str) -> Song {
        Song {
            id: id.to_string(),
            title: id.to_uppercase(),
            thumbnail: String::new(),
            duration: 60,
            channel: String::new(),
            file_path: PathBuf::from(format!("/music/{id}.mp3")),
            date_added: Utc::now(),
        }
    }

    fn songs(n: usize) -> Vec<Song> {
        (0..n).map(|i| song(&format!("s{i}"))).collect()
    }

    fn ids(queue: &[Song]) -> Vec<&str> {
        queue.iter().map(|s| s.id.as_str()).collect()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_all_view_keeps_store_order() {
        let library = songs(5);
        let mut rng = StdRng::seed_from_u64(1);
        let queue = build_queue(&View::All, &library, &[], false, Some("s3"), &mut rng);
        assert_eq!(queue, library);
    }

    #[test]
    fn test_playlist_view_drops_dangling_ids() {
        let library = songs(3);
        let playlist = Playlist {
            id: "p".into(),
            name: "P".into(),
            songs: strings(&["s2", "deleted", "s0"]),
            date_created: Utc::now(),
        };
        let mut rng = StdRng::seed_from_u64(1);
        let queue = build_queue(
            &View::Playlist("p".into()),
            &library,
            &[playlist],
            false,
            None,
            &mut rng,
        );
        assert_eq!(ids(&queue), vec!["s2", "s0"]);
    }

    #[test]
    fn test_missing_playlist_falls_back_to_all() {
        let library = songs(3);
        let mut rng = StdRng::seed_from_u64(1);
        let queue = build_queue(&View::Playlist("gone".into()), &library, &[], false, None, &mut rng);
        assert_eq!(queue, library);
    }

    #[test]
    fn test_shuffle_pins_current_song() {
        let library = songs(10);
        let mut rng = StdRng::seed_from_u64(42);
        for trial in 0..100 {
            let pinned = format!("s{}", trial % 10);
            let queue = build_queue(&View::All, &library, &[], true, Some(&pinned), &mut rng);
            assert_eq!(queue[0].id, pinned);
            assert_eq!(queue.len(), 10);
            let unique: HashSet<_> = queue.iter().map(|s| s.id.clone()).collect();
            assert_eq!(unique.len(), 10);
        }
    }

    #[test]
    fn test_pin_applied_after_shuffle() {
        let library = songs(8);
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);

        let unpinned = build_queue(&View::All, &library, &[], true, None, &mut a);
        let pinned = build_queue(&View::All, &library, &[], true, Some("s5"), &mut b);

        let mut expected: Vec<&str> = ids(&unpinned).into_iter().filter(|id| *id != "s5").collect();
        expected.insert(0, "s5");
        assert_eq!(ids(&pinned), expected);
    }

    #[test]
    fn test_shuffle_without_pin_is_permutation() {
        let library = songs(6);
        let queue = build_queue_random(&View::All, &library, &[], true, Some("absent"));
        let mut got = ids(&queue);
        got.sort();
        let mut want = ids(&library);
        want.sort();
        assert_eq!(got, want);
    }

    #[test]
    fn test_reorder_before_and_after() {
        let existing = strings(&["a", "b", "c", "d"]);
        assert_eq!(compute_reorder_insertion(&existing, "d", "b", true), strings(&["a", "d", "b", "c"]));
        assert_eq!(compute_reorder_insertion(&existing, "a", "c", false), strings(&["b", "c", "a", "d"]));
        assert_eq!(compute_reorder_insertion(&existing, "a", "d", false), strings(&["b", "c", "d", "a"]));
    }

    #[test]
    fn test_reorder_missing_target_appends() {
        let existing = strings(&["a", "b", "c"]);
        assert_eq!(compute_reorder_insertion(&existing, "a", "zz", true), strings(&["b", "c", "a"]));
    }

    #[test]
    fn test_reorder_new_item_is_inserted() {
        let existing = strings(&["a", "b"]);
        assert_eq!(compute_reorder_insertion(&existing, "n", "b", true), strings(&["a", "n", "b"]));
    }

    #[test]
    fn test_reorder_is_permutation() {
        let existing = strings(&["a", "b", "c", "d", "e"]);
        for dragged in &existing {
            for target in &existing {
                if dragged == target {
                    continue;
                }
                for before in [true, false] {
                    let out = compute_reorder_insertion(&existing, dragged, target, before);
                    assert_eq!(out.len(), existing.len());
                    assert_eq!(out.iter().filter(|id| *id == dragged).count(), 1);
                    let set: HashSet<_> = out.iter().collect();
                    assert_eq!(set, existing.iter().collect::<HashSet<_>>());
                    let d = out.iter().position(|id| id == dragged).unwrap();
                    let t = out.iter().position(|id| id == target).unwrap();
                    assert_eq!(d + 1 == t, before);
                    assert_eq!(t + 1 == d, !before);
                }
            }
        }
    }
}
