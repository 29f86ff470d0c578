pub mod core;
pub mod download;
pub mod export;
pub mod http;
pub mod mpv;
pub mod socket;

use playgen_proto::player::PlayerSnapshot;
use playgen_proto::protocol::{Broadcast, DownloadProgress, MiniPlayerState, WindowAction};
use std::sync::Arc;

/// Fan-out from DaemonCore (and the log layer) to every connected client.
#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    State(Arc<PlayerSnapshot>),
    DownloadProgress(DownloadProgress),
    Window(WindowAction),
    MiniPlayer(MiniPlayerState),
    Log(String),
    Error(String),
}

impl BroadcastMessage {
    pub fn into_broadcast(self) -> Broadcast {
        match self {
            BroadcastMessage::State(data) => Broadcast::State {
                data: (*data).clone(),
            },
            BroadcastMessage::DownloadProgress(progress) => Broadcast::DownloadProgress { progress },
            BroadcastMessage::Window(action) => Broadcast::Window { action },
            BroadcastMessage::MiniPlayer(state) => Broadcast::MiniPlayer { state },
            BroadcastMessage::Log(message) => Broadcast::Log { message },
            BroadcastMessage::Error(message) => Broadcast::Error { message },
        }
    }
}
