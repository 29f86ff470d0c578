//! Percent extraction from yt-dlp output.
//!
//! yt-dlp writes progress to both stdout and stderr, one `--newline`
//! terminated line per update:
//!
//! ```text
//! [download]  45.3% of ~4.12MiB at  2.56MiB/s ETA 00:02
//! ```

use regex::Regex;
use std::sync::OnceLock;
use tokio::sync::mpsc;

use playgen_proto::protocol::DownloadProgress;

static PERCENT_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// First `NN%` / `NN.N%` token in `line`.
pub fn parse_progress_line(line: &str) -> Option<f32> {
    let re = PERCENT_RE
        .get_or_init(|| Regex::new(r"(\d+(\.\d+)?)%").ok())
        .as_ref()?;
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

/// Where one download reports its progress.  Values are display hints and
/// may repeat or go backwards between the audio and post-processing passes.
#[derive(Clone)]
pub struct ProgressSink {
    tx: mpsc::Sender<DownloadProgress>,
    id: String,
    title: String,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<DownloadProgress>, id: &str, title: &str) -> Self {
        Self {
            tx,
            id: id.to_string(),
            title: title.to_string(),
        }
    }

    /// Scan `line` and forward any percent found.  Never waits: a full or
    /// closed channel drops the update.
    pub fn observe(&self, line: &str) {
        if let Some(percent) = parse_progress_line(line) {
            let _ = self.tx.try_send(DownloadProgress {
                id: self.id.clone(),
                percent,
                title: self.title.clone(),
            });
        }
    }
}
