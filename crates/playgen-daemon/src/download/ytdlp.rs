//! yt-dlp process plumbing

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use super::metadata::{parse_flat_playlist, VideoMetadata};
use super::progress::ProgressSink;
use super::DownloadError;
use playgen_proto::protocol::ResolvedPlaylist;

/// Output template handed to `-o`.  yt-dlp substitutes the video id and the
/// final extension.
pub const OUTPUT_TEMPLATE: &str = "%(id)s.%(ext)s";

pub fn metadata_args(url: &str) -> Vec<OsString> {
    ["--dump-json", "--no-download", "--no-playlist", url]
        .into_iter()
        .map(OsString::from)
        .collect()
}

pub fn download_args(url: &str, output_dir: &Path, ffmpeg_dir: Option<&Path>) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-x",
        "--audio-format",
        "mp3",
        "--audio-quality",
        "0",
        "-o",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(output_dir.join(OUTPUT_TEMPLATE).into_os_string());
    args.push("--no-playlist".into());
    args.push("--newline".into());
    if let Some(dir) = ffmpeg_dir {
        args.push("--ffmpeg-location".into());
        args.push(dir.as_os_str().to_os_string());
    }
    args.push(url.into());
    args
}

pub fn flat_playlist_args(url: &str) -> Vec<OsString> {
    ["--flat-playlist", "--dump-json", url]
        .into_iter()
        .map(OsString::from)
        .collect()
}

/// Where yt-dlp leaves the extracted audio for `id`.
pub fn expected_audio_path(output_dir: &Path, id: &str) -> PathBuf {
    output_dir.join(format!("{id}.mp3"))
}

fn tool_error(stderr: &str, fallback: &str) -> DownloadError {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        DownloadError::Tool(fallback.to_string())
    } else {
        DownloadError::Tool(stderr.to_string())
    }
}

/// Run yt-dlp to completion and capture both streams.
async fn run_captured(yt_dlp: &Path, args: Vec<OsString>) -> Result<(bool, String, String), DownloadError> {
    debug!("yt-dlp {:?}", args);
    let output = Command::new(yt_dlp)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(DownloadError::Spawn)?;
    Ok((
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    ))
}

/// `yt-dlp --dump-json --no-download` for an already canonical URL.
pub async fn fetch_metadata(yt_dlp: &Path, url: &str) -> Result<VideoMetadata, DownloadError> {
    let (ok, stdout, stderr) = run_captured(yt_dlp, metadata_args(url)).await?;
    if !ok {
        return Err(tool_error(&stderr, "Failed to get video info"));
    }
    VideoMetadata::from_info_json(&stdout).map_err(|e| DownloadError::Metadata(e.to_string()))
}

/// List a remote playlist without downloading anything.
pub async fn list_playlist(yt_dlp: &Path, url: &str) -> Result<ResolvedPlaylist, DownloadError> {
    let (ok, stdout, stderr) = run_captured(yt_dlp, flat_playlist_args(url)).await?;
    if !ok {
        return Err(tool_error(&stderr, "Failed to list playlist"));
    }
    Ok(parse_flat_playlist(&stdout))
}

async fn pump_lines<R>(stream: R, sink: ProgressSink, keep: bool) -> String
where
    R: AsyncRead + Unpin,
{
    let mut collected = String::new();
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    // Raw bytes: console codepages and echoed titles are not always UTF-8,
    // and the pipe must be drained to EOF or yt-dlp dies on a broken pipe.
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(&['\r', '\n'][..]);
                sink.observe(line);
                if keep {
                    collected.push_str(line);
                    collected.push('\n');
                }
            }
            Err(e) => {
                debug!("yt-dlp output read error: {}", e);
                break;
            }
        }
    }
    collected
}

/// Extract mp3 audio for `id` into `output_dir`.
///
/// Both output streams are scanned for progress.  Success needs a zero exit
/// code and `<output_dir>/<id>.mp3` on disk.
pub async fn download_audio(
    yt_dlp: &Path,
    ffmpeg_dir: Option<&Path>,
    url: &str,
    id: &str,
    output_dir: &Path,
    sink: ProgressSink,
) -> Result<PathBuf, DownloadError> {
    let args = download_args(url, output_dir, ffmpeg_dir);
    info!("Starting download of {} into {}", url, output_dir.display());
    debug!("yt-dlp {:?}", args);

    let mut child = Command::new(yt_dlp)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(DownloadError::Spawn)?;

    let stdout_task = child
        .stdout
        .take()
        .map(|out| tokio::spawn(pump_lines(out, sink.clone(), false)));
    let stderr_task = child
        .stderr
        .take()
        .map(|err| tokio::spawn(pump_lines(err, sink, true)));

    let status = child.wait().await.map_err(DownloadError::Spawn)?;

    if let Some(task) = stdout_task {
        let _ = task.await;
    }
    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    let path = expected_audio_path(output_dir, id);
    if !status.success() || !path.exists() {
        debug!("yt-dlp exited with {:?}, {:?} exists: {}", status.code(), path, path.exists());
        return Err(tool_error(&stderr, "Download failed"));
    }

    info!("Download complete: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_metadata_args() {
        assert_eq!(
            strings(&metadata_args("https://www.youtube.com/watch?v=abc")),
            vec!["--dump-json", "--no-download", "--no-playlist", "https://www.youtube.com/watch?v=abc"]
        );
    }

    #[test]
    fn test_download_args() {
        let dir = Path::new("/data/downloads");
        let args = strings(&download_args("https://www.youtube.com/watch?v=abc", dir, None));
        assert_eq!(
            args,
            vec![
                "-x",
                "--audio-format",
                "mp3",
                "--audio-quality",
                "0",
                "-o",
                "/data/downloads/%(id)s.%(ext)s",
                "--no-playlist",
                "--newline",
                "https://www.youtube.com/watch?v=abc",
            ]
        );

        let args = strings(&download_args("u", dir, Some(Path::new("/opt/ffmpeg/bin"))));
        let at = args.iter().position(|a| a == "--ffmpeg-location").unwrap();
        assert_eq!(args[at + 1], "/opt/ffmpeg/bin");
        assert_eq!(args.last().map(String::as_str), Some("u"));
    }

    #[test]
    fn test_tool_error_uses_stderr_when_present() {
        match tool_error("  ERROR: Video unavailable\n", "fallback") {
            DownloadError::Tool(msg) => assert_eq!(msg, "ERROR: Video unavailable"),
            other => panic!("unexpected {other:?}"),
        }
        match tool_error("", "fallback") {
            DownloadError::Tool(msg) => assert_eq!(msg, "fallback"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pump_lines_survives_invalid_utf8() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let sink = ProgressSink::new(tx, "abc", "Title");
        let output: &[u8] = b"WARNING: caf\xe9 title\r\n[download]  42.0% of 3MiB\n[download] 100%";
        let collected = pump_lines(output, sink, true).await;

        assert_eq!(
            collected,
            "WARNING: caf\u{fffd} title\n[download]  42.0% of 3MiB\n[download] 100%\n"
        );
        assert_eq!(rx.recv().await.map(|p| p.percent), Some(42.0));
        assert_eq!(rx.recv().await.map(|p| p.percent), Some(100.0));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let err = fetch_metadata(Path::new("/nonexistent/yt-dlp"), "https://www.youtube.com/watch?v=abc")
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Spawn(_)));
    }
}
