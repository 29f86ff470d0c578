use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::ToolsConfig;

pub const DAEMON_TCP_PORT: u16 = 9877;
const DAEMON_TCP_HOST: &str = "127.0.0.1";

pub fn daemon_address(port: u16) -> String {
    format!("{}:{}", DAEMON_TCP_HOST, port)
}

#[cfg(unix)]
pub fn mpv_socket_name() -> String {
    format!("{}/playgen-mpv.sock", std::env::temp_dir().display())
}

#[cfg(windows)]
pub fn mpv_socket_name() -> String {
    "playgen-mpv".to_string()
}

#[cfg(unix)]
pub fn mpv_socket_arg() -> String {
    format!("--input-ipc-server={}", mpv_socket_name())
}

#[cfg(windows)]
pub fn mpv_socket_arg() -> String {
    format!("--input-ipc-server=\\\\.\\pipe\\{}", mpv_socket_name())
}

pub fn data_dir() -> PathBuf {
    // ~/.local/share on macOS too, not Application Support
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("playgen")
    }
    #[cfg(windows)]
    {
        if let Some(portable) = beside_exe_dir("data") {
            return portable;
        }

        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("playgen")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                if exe_dir.join("config.toml").exists() {
                    return exe_dir.to_path_buf();
                }
            }
        }
    }

    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("playgen")
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("playgen")
    }
}

#[cfg(windows)]
fn beside_exe_dir(name: &str) -> Option<PathBuf> {
    let exe_path = std::env::current_exe().ok()?;
    let dir = exe_path.parent()?.join(name);
    dir.exists().then_some(dir)
}

/// External programs the daemon shells out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    YtDlp,
    Ffmpeg,
    Mpv,
}

impl Tool {
    pub fn env_var(self) -> &'static str {
        match self {
            Tool::YtDlp => "YT_DLP_PATH",
            Tool::Ffmpeg => "FFMPEG_PATH",
            Tool::Mpv => "MPV_PATH",
        }
    }

    #[cfg(unix)]
    fn binary_names(self) -> &'static [&'static str] {
        match self {
            Tool::YtDlp => &["yt-dlp"],
            Tool::Ffmpeg => &["ffmpeg"],
            Tool::Mpv => &["mpv"],
        }
    }

    #[cfg(windows)]
    fn binary_names(self) -> &'static [&'static str] {
        match self {
            Tool::YtDlp => &["yt-dlp.exe", "yt-dlp"],
            Tool::Ffmpeg => &["ffmpeg.exe", "ffmpeg"],
            Tool::Mpv => &["mpv.exe", "mpv"],
        }
    }
}

fn find_beside_exe(names: &[&str]) -> Option<PathBuf> {
    let current_exe = std::env::current_exe().ok()?;
    let dir = current_exe.parent()?;
    for name in names {
        let p = dir.join(name);
        if p.exists() {
            return Some(p);
        }
        let p = dir.join("external").join(name);
        if p.exists() {
            return Some(p);
        }
    }
    None
}

fn find_on_path(names: &[&str]) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        for name in names {
            let p = dir.join(name);
            if p.is_file() {
                return Some(p);
            }
        }
    }
    None
}

/// Locate a tool.
///
/// Searches in order:
/// 1. The tool's environment variable (`YT_DLP_PATH`, `FFMPEG_PATH`, `MPV_PATH`)
/// 2. The config override
/// 3. Beside the current executable (or its `external/` folder)
/// 4. PATH
pub fn find_tool(tool: Tool, configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = std::env::var_os(tool.env_var()).map(PathBuf::from) {
        if p.exists() {
            return Some(p);
        }
    }

    if let Some(p) = configured {
        if p.exists() {
            return Some(p.to_path_buf());
        }
    }

    find_beside_exe(tool.binary_names()).or_else(|| find_on_path(tool.binary_names()))
}

/// Which external tools were found at startup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DependencyReport {
    pub yt_dlp: bool,
    pub ffmpeg: bool,
    pub mpv: bool,
}

impl DependencyReport {
    pub fn all_found(&self) -> bool {
        self.yt_dlp && self.ffmpeg && self.mpv
    }
}

/// Resolved tool paths, `None` when a tool is missing.
#[derive(Debug, Clone, Default)]
pub struct ToolPaths {
    pub yt_dlp: Option<PathBuf>,
    pub ffmpeg: Option<PathBuf>,
    pub mpv: Option<PathBuf>,
}

impl ToolPaths {
    pub fn discover(tools: &ToolsConfig) -> Self {
        Self {
            yt_dlp: find_tool(Tool::YtDlp, tools.yt_dlp.as_deref()),
            ffmpeg: find_tool(Tool::Ffmpeg, tools.ffmpeg.as_deref()),
            mpv: find_tool(Tool::Mpv, tools.mpv.as_deref()),
        }
    }

    pub fn report(&self) -> DependencyReport {
        DependencyReport {
            yt_dlp: self.yt_dlp.is_some(),
            ffmpeg: self.ffmpeg.is_some(),
            mpv: self.mpv.is_some(),
        }
    }
}
