use clap::{Parser, Subcommand};
use playgen_proto::models::SettingsPatch;
use playgen_proto::protocol::{Command, MiniPlayerCommand, WindowAction};
use playgen_proto::queue::View;
use std::path::PathBuf;

/// playgen - control the PlayGen daemon from the terminal
#[derive(Parser, Debug)]
#[command(name = "playgen", version, about)]
pub struct Args {
    /// Daemon TCP port (defaults to the configured one)
    #[arg(long)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub action: Action,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Action {
    /// Report which external tools the daemon found
    Deps,
    /// Download a YouTube video's audio into the library
    Download { url: String },
    /// List the entries of a YouTube playlist without downloading
    Resolve { url: String },
    /// Download every entry of a YouTube playlist into a new local playlist
    Import { url: String },
    /// Print the downloads folder
    Downloads {
        /// Open it in the file manager instead
        #[arg(long)]
        open: bool,
    },
    /// List library songs
    Songs,
    /// Delete a song and its audio file reference
    Delete { id: String },
    /// Print the audio file of a song
    Path { id: String },
    /// Playlist management
    #[command(subcommand)]
    Playlist(PlaylistAction),
    /// Play one song from the library
    Play { song_id: String },
    /// Play the whole library from the beginning
    PlayAll,
    Toggle,
    Next,
    Prev,
    /// Seek within the current song
    Seek { seconds: f64 },
    Shuffle {
        /// on or off; toggles when omitted
        state: Option<OnOff>,
    },
    /// Cycle repeat: none → all → one
    Repeat,
    /// Volume in percent
    Volume { percent: u8 },
    /// Show a playlist (or the whole library with no id)
    View { playlist_id: Option<String> },
    /// Current player state
    State,
    Session,
    Settings {
        /// Switch to the mini-player when the main window is minimised
        #[arg(long)]
        mini_player_on_minimize: Option<bool>,
    },
    /// Relay a window action to the shell
    Window { action: WindowArg },
    /// Relay a mini-player control
    Mini { action: MiniArg },
    /// Print every broadcast until interrupted
    Watch,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum PlaylistAction {
    List,
    Songs { id: String },
    Create { name: String },
    Rename { id: String, name: String },
    Delete { id: String },
    Add { id: String, song_id: String },
    Remove { id: String, song_id: String },
    /// Move `dragged` next to `target`
    Move {
        id: String,
        dragged: String,
        target: String,
        #[arg(long)]
        after: bool,
    },
    /// Copy the playlist's audio files into `<destination>/<playlist name>`
    Export { id: String, destination: PathBuf },
    Play { id: String },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum OnOff {
    On,
    Off,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum WindowArg {
    Minimize,
    Maximize,
    Close,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum MiniArg {
    Restore,
    Close,
    Toggle,
    Next,
    Prev,
}

impl Action {
    /// The request to send, or `None` for `watch`.
    pub fn into_command(self) -> Option<Command> {
        let cmd = match self {
            Action::Deps => Command::CheckDependencies,
            Action::Download { url } => Command::DownloadSong { url },
            Action::Resolve { url } => Command::ResolvePlaylist { url },
            Action::Import { url } => Command::ImportPlaylist { url },
            Action::Downloads { open: false } => Command::GetDownloadsPath,
            Action::Downloads { open: true } => Command::OpenDownloadsFolder,
            Action::Songs => Command::ListSongs,
            Action::Delete { id } => Command::DeleteSong { id },
            Action::Path { id } => Command::ResolveSongPath { id },
            Action::Playlist(action) => action.into_command(),
            Action::Play { song_id } => Command::Play { song_id },
            Action::PlayAll => Command::PlayAll,
            Action::Toggle => Command::TogglePlay,
            Action::Next => Command::Next,
            Action::Prev => Command::Prev,
            Action::Seek { seconds } => Command::SeekTo { seconds },
            Action::Shuffle { state: None } => Command::ToggleShuffle,
            Action::Shuffle { state: Some(s) } => Command::SetShuffle {
                enabled: s == OnOff::On,
            },
            Action::Repeat => Command::CycleRepeat,
            Action::Volume { percent } => Command::Volume {
                value: f32::from(percent.min(100)) / 100.0,
            },
            Action::View { playlist_id } => Command::SetView {
                view: playlist_id.map_or(View::All, View::Playlist),
            },
            Action::State => Command::GetState,
            Action::Session => Command::GetSession,
            Action::Settings {
                mini_player_on_minimize: None,
            } => Command::GetSettings,
            Action::Settings {
                mini_player_on_minimize,
            } => Command::SaveSettings {
                patch: SettingsPatch {
                    mini_player_on_minimize,
                },
            },
            Action::Window { action } => Command::Window {
                action: match action {
                    WindowArg::Minimize => WindowAction::Minimize,
                    WindowArg::Maximize => WindowAction::Maximize,
                    WindowArg::Close => WindowAction::Close,
                },
            },
            Action::Mini { action } => Command::MiniPlayer {
                action: match action {
                    MiniArg::Restore => MiniPlayerCommand::Restore,
                    MiniArg::Close => MiniPlayerCommand::Close,
                    MiniArg::Toggle => MiniPlayerCommand::TogglePlay,
                    MiniArg::Next => MiniPlayerCommand::Next,
                    MiniArg::Prev => MiniPlayerCommand::Prev,
                },
            },
            Action::Watch => return None,
        };
        Some(cmd)
    }
}

impl PlaylistAction {
    fn into_command(self) -> Command {
        match self {
            PlaylistAction::List => Command::ListPlaylists,
            PlaylistAction::Songs { id } => Command::PlaylistSongs { playlist_id: id },
            PlaylistAction::Create { name } => Command::CreatePlaylist { name },
            PlaylistAction::Rename { id, name } => Command::RenamePlaylist {
                playlist_id: id,
                name,
            },
            PlaylistAction::Delete { id } => Command::DeletePlaylist { playlist_id: id },
            PlaylistAction::Add { id, song_id } => Command::AddToPlaylist {
                playlist_id: id,
                song_id,
            },
            PlaylistAction::Remove { id, song_id } => Command::RemoveFromPlaylist {
                playlist_id: id,
                song_id,
            },
            PlaylistAction::Move {
                id,
                dragged,
                target,
                after,
            } => Command::MoveInPlaylist {
                playlist_id: id,
                dragged,
                target,
                insert_before: !after,
            },
            PlaylistAction::Export { id, destination } => Command::ExportPlaylist {
                playlist_id: id,
                destination,
            },
            PlaylistAction::Play { id } => Command::PlayPlaylist { playlist_id: id },
        }
    }
}
