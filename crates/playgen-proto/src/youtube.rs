//! YouTube URL validation and canonicalization.
//!
//! Only watch, shorts and youtu.be links are accepted.  A canonical URL is
//! `https://www.youtube.com/watch?v=<id>` with every other parameter dropped.

use thiserror::Error;
use url::Url;

const WATCH_BASE: &str = "https://www.youtube.com/watch?v=";
const PLAYLIST_BASE: &str = "https://www.youtube.com/playlist?list=";

const YOUTUBE_HOSTS: &[&str] = &["youtube.com", "www.youtube.com", "music.youtube.com", "m.youtube.com"];

#[derive(Debug, Error, PartialEq)]
pub enum UrlError {
    #[error("Invalid YouTube URL")]
    InvalidVideoUrl,
    #[error("Invalid YouTube playlist URL")]
    InvalidPlaylistUrl,
}

/// Watch URL for a bare video id.
pub fn watch_url(video_id: &str) -> String {
    format!("{WATCH_BASE}{video_id}")
}

/// Extract the video id from any accepted link form.
pub fn video_id(raw: &str) -> Result<String, UrlError> {
    let url = parse_lenient(raw).ok_or(UrlError::InvalidVideoUrl)?;
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();

    let id = if host == "youtu.be" {
        url.path_segments()
            .and_then(|mut segments| segments.next())
            .map(str::to_string)
    } else if YOUTUBE_HOSTS.contains(&host.as_str()) {
        let path = url.path();
        if path == "/watch" {
            url.query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned())
        } else if let Some(rest) = path.strip_prefix("/shorts/") {
            rest.split('/').next().map(str::to_string)
        } else {
            None
        }
    } else {
        None
    };

    id.filter(|id| is_valid_id(id)).ok_or(UrlError::InvalidVideoUrl)
}

/// Validate a single-video link and reduce it to its canonical watch URL.
pub fn canonical_video_url(raw: &str) -> Result<String, UrlError> {
    video_id(raw).map(|id| watch_url(&id))
}

/// Validate a playlist link (any YouTube page carrying `list=`) and reduce it
/// to `https://www.youtube.com/playlist?list=<id>`.
pub fn canonical_playlist_url(raw: &str) -> Result<String, UrlError> {
    let url = parse_lenient(raw).ok_or(UrlError::InvalidPlaylistUrl)?;
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    if !YOUTUBE_HOSTS.contains(&host.as_str()) {
        return Err(UrlError::InvalidPlaylistUrl);
    }
    url.query_pairs()
        .find(|(key, _)| key == "list")
        .map(|(_, value)| value.into_owned())
        .filter(|id| is_valid_id(id))
        .map(|id| format!("{PLAYLIST_BASE}{id}"))
        .ok_or(UrlError::InvalidPlaylistUrl)
}

fn parse_lenient(raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let with_scheme = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    Url::parse(&with_scheme).ok()
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_tracking_parameters() {
        assert_eq!(
            canonical_video_url("https://www.youtube.com/watch?v=abc123&list=xyz&feature=share"),
            Ok("https://www.youtube.com/watch?v=abc123".to_string())
        );
    }

    #[test]
    fn test_accepted_forms() {
        let cases = [
            "youtube.com/watch?v=dQw4w9WgXcQ",
            "http://music.youtube.com/watch?v=dQw4w9WgXcQ&si=foo",
            "https://m.youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?t=42",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "  https://www.youtube.com/watch?v=dQw4w9WgXcQ  ",
        ];
        for case in cases {
            assert_eq!(
                canonical_video_url(case).as_deref(),
                Ok("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
                "case {case}"
            );
        }
    }

    #[test]
    fn test_rejected_forms() {
        let cases = [
            "",
            "not a url",
            "https://vimeo.com/12345",
            "https://www.youtube.com/",
            "https://www.youtube.com/watch",
            "https://www.youtube.com/watch?v=",
            "https://www.youtube.com/watch?v=bad%20id",
            "https://www.youtube.com/channel/UCabc",
            "https://notyoutube.com/watch?v=abc",
        ];
        for case in cases {
            assert_eq!(canonical_video_url(case), Err(UrlError::InvalidVideoUrl), "case {case}");
        }
    }

    #[test]
    fn test_playlist_urls() {
        assert_eq!(
            canonical_playlist_url("https://www.youtube.com/watch?v=abc&list=PLxyz_1-2"),
            Ok("https://www.youtube.com/playlist?list=PLxyz_1-2".to_string())
        );
        assert_eq!(
            canonical_playlist_url("youtube.com/playlist?list=PLabc"),
            Ok("https://www.youtube.com/playlist?list=PLabc".to_string())
        );
        assert_eq!(
            canonical_playlist_url("https://www.youtube.com/watch?v=abc"),
            Err(UrlError::InvalidPlaylistUrl)
        );
        assert_eq!(
            canonical_playlist_url("https://example.com/playlist?list=PLabc"),
            Err(UrlError::InvalidPlaylistUrl)
        );
    }
}
