/// DaemonCore: single-owner event loop for playback state.
///
/// Every input (socket and HTTP requests, mpv events, download progress and
/// completions) arrives as a `DaemonEvent` on one mpsc channel.  DaemonCore
/// owns the `PlaybackController` and the `MpvDriver` exclusively, so
/// transitions are applied one at a time.  The `LibraryStore` is shared; it
/// serialises its own writers.
///
/// After each transition DaemonCore republishes the player snapshot and
/// broadcasts it, together with the mini-player view, to all listeners.
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use playgen_proto::config::Config;
use playgen_proto::library::LibraryStore;
use playgen_proto::platform::ToolPaths;
use playgen_proto::player::{PlaybackController, PlayerSnapshot, Transport};
use playgen_proto::protocol::{
    Command, DownloadOutcome, DownloadProgress, MiniPlayerCommand, MiniPlayerState, Response,
    WindowAction,
};
use playgen_proto::queue::compute_reorder_insertion;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tracing::{debug, error, info, warn};

use crate::download::{DownloadError, Downloader};
use crate::export;
use crate::mpv::{MpvDriver, MpvEvent, MpvHandle, OBS_DURATION, OBS_PAUSE, OBS_TIME_POS};
use crate::BroadcastMessage;

/// Latest published player state, readable without going through the loop.
pub type SharedSnapshot = Arc<RwLock<PlayerSnapshot>>;

// ── DaemonEvent ───────────────────────────────────────────────────────────────

/// All inputs into the DaemonCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from a socket client or the HTTP API.
    Request {
        command: Command,
        reply: oneshot::Sender<Response>,
    },
    DownloadProgress(DownloadProgress),
    /// A download task finished; `Ok` carries the song id.
    DownloadFinished {
        url: String,
        result: Result<String, String>,
    },
    MpvEvent(MpvEvent),
    /// Heartbeat: check mpv liveness.
    HeartbeatTick,
    Shutdown,
}

/// Cloneable sender side used by the socket server and the HTTP API.
#[derive(Clone)]
pub struct CoreHandle {
    tx: mpsc::Sender<DaemonEvent>,
}

impl CoreHandle {
    pub fn new(tx: mpsc::Sender<DaemonEvent>) -> Self {
        Self { tx }
    }

    /// Queue `command` behind everything submitted before it.  The reply
    /// arrives on the returned receiver.
    pub async fn submit(&self, command: Command) -> anyhow::Result<oneshot::Receiver<Response>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(DaemonEvent::Request { command, reply })
            .await
            .map_err(|_| anyhow!("daemon core is not running"))?;
        Ok(rx)
    }

    pub async fn request(&self, command: Command) -> anyhow::Result<Response> {
        let rx = self.submit(command).await?;
        rx.await.context("daemon core dropped the request")
    }
}

// ── DaemonCore ────────────────────────────────────────────────────────────────

pub struct DaemonCore {
    store: Arc<LibraryStore>,
    downloader: Arc<Downloader>,
    tools: ToolPaths,
    player: PlaybackController,
    mpv_driver: MpvDriver,
    /// `None` until the first song is loaded, or after mpv died.
    mpv_handle: Option<MpvHandle>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    snapshot: SharedSnapshot,
}

impl DaemonCore {
    pub async fn new(
        config: &Config,
        store: Arc<LibraryStore>,
        tools: ToolPaths,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> Self {
        let (progress_tx, mut progress_rx) = mpsc::channel::<DownloadProgress>(256);
        let forward_tx = event_tx.clone();
        tokio::spawn(async move {
            while let Some(progress) = progress_rx.recv().await {
                if forward_tx
                    .send(DaemonEvent::DownloadProgress(progress))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        let downloader = Arc::new(Downloader::new(
            store.clone(),
            &tools,
            config.paths.downloads_dir.clone(),
            progress_tx,
        ));

        let mut player = PlaybackController::new();
        player.restore(&store.snapshot().await);
        let snapshot = Arc::new(RwLock::new(player.snapshot()));

        let deps = tools.report();
        if !deps.all_found() {
            warn!(
                "Missing tools: yt-dlp={} ffmpeg={} mpv={}",
                deps.yt_dlp, deps.ffmpeg, deps.mpv
            );
        }

        Self {
            store,
            downloader,
            mpv_driver: MpvDriver::new(tools.mpv.clone()),
            tools,
            player,
            mpv_handle: None,
            event_tx,
            broadcast_tx,
            snapshot,
        }
    }

    pub fn store(&self) -> Arc<LibraryStore> {
        Arc::clone(&self.store)
    }

    pub fn snapshot(&self) -> SharedSnapshot {
        Arc::clone(&self.snapshot)
    }

    pub fn handle(&self) -> CoreHandle {
        CoreHandle::new(self.event_tx.clone())
    }

    /// Run until `Shutdown` or until every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("DaemonCore: starting event loop");

        let heartbeat_tx = self.event_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(10)).await;
                if heartbeat_tx.send(DaemonEvent::HeartbeatTick).await.is_err() {
                    break;
                }
            }
        });

        while let Some(evt) = event_rx.recv().await {
            match evt {
                DaemonEvent::Shutdown => {
                    info!("DaemonCore: shutdown requested");
                    break;
                }

                DaemonEvent::Request { command, reply } => {
                    debug!("DaemonCore: command {:?}", command);
                    self.handle_request(command, reply).await;
                }

                DaemonEvent::DownloadProgress(progress) => {
                    let _ = self
                        .broadcast_tx
                        .send(BroadcastMessage::DownloadProgress(progress));
                }

                DaemonEvent::DownloadFinished { url, result } => match result {
                    Ok(id) => info!("DaemonCore: download of {} finished ({})", url, id),
                    Err(message) => {
                        warn!("DaemonCore: download of {} failed: {}", url, message);
                        let _ = self.broadcast_tx.send(BroadcastMessage::Error(message));
                    }
                },

                DaemonEvent::MpvEvent(evt) => self.handle_mpv_event(evt).await,

                DaemonEvent::HeartbeatTick => {
                    if self.mpv_handle.is_some() && !self.mpv_driver.process_alive() {
                        warn!("DaemonCore: heartbeat: mpv process died");
                        self.mpv_handle = None;
                    }
                }
            }
        }

        self.persist_session().await;
        self.mpv_driver.kill().await;
        Ok(())
    }

    // ── requests ──────────────────────────────────────────────────────────────

    async fn handle_request(&mut self, command: Command, reply: oneshot::Sender<Response>) {
        // Long-running work leaves the loop and answers from its own task.
        match command {
            Command::DownloadSong { url } => self.spawn_download(url, reply),
            Command::ResolvePlaylist { url } => {
                let downloader = self.downloader.clone();
                tokio::spawn(async move {
                    let response = match downloader.resolve_playlist(&url).await {
                        Ok(playlist) => Response::ResolvedPlaylist { playlist },
                        Err(e) => Response::error(e),
                    };
                    let _ = reply.send(response);
                });
            }
            Command::ImportPlaylist { url } => {
                let downloader = self.downloader.clone();
                tokio::spawn(async move {
                    let response = match downloader.import_playlist(&url).await {
                        Ok(report) => Response::Imported { report },
                        Err(e) => {
                            warn!("Import of {} failed: {}", url, e);
                            Response::error(e)
                        }
                    };
                    let _ = reply.send(response);
                });
            }
            Command::ExportPlaylist {
                playlist_id,
                destination,
            } => {
                let store = self.store.clone();
                tokio::spawn(async move {
                    let response =
                        match export::export_playlist(&store, &playlist_id, &destination).await {
                            Ok(report) => Response::Exported { report },
                            Err(e) => Response::error(e),
                        };
                    let _ = reply.send(response);
                });
            }
            other => {
                let response = match self.handle_command(other).await {
                    Ok(response) => response,
                    Err(e) => {
                        error!("DaemonCore: command error: {:#}", e);
                        Response::error(e)
                    }
                };
                let _ = reply.send(response);
            }
        }
    }

    fn spawn_download(&self, url: String, reply: oneshot::Sender<Response>) {
        let downloader = self.downloader.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let (response, result) = match downloader.download_song(&url).await {
                Ok(song) => {
                    let id = song.id.clone();
                    (
                        Response::Download {
                            outcome: DownloadOutcome::Downloaded { song },
                        },
                        Ok(id),
                    )
                }
                Err(DownloadError::AlreadyDownloaded(id)) => (
                    Response::Download {
                        outcome: DownloadOutcome::AlreadyDownloaded { id: id.clone() },
                    },
                    Ok(id),
                ),
                Err(e) => (Response::error(&e), Err(e.to_string())),
            };
            let _ = reply.send(response);
            let _ = event_tx
                .send(DaemonEvent::DownloadFinished { url, result })
                .await;
        });
    }

    async fn handle_command(&mut self, cmd: Command) -> anyhow::Result<Response> {
        let response = match cmd {
            // window relay
            Command::Window { action } => {
                let action = if action == WindowAction::Minimize
                    && self.store.settings().await.mini_player_on_minimize
                {
                    WindowAction::ShowMiniPlayer
                } else {
                    action
                };
                self.relay_window(action);
                Response::Ok
            }
            Command::MiniPlayer { action } => match action {
                MiniPlayerCommand::Restore => {
                    self.relay_window(WindowAction::RestoreMain);
                    Response::Ok
                }
                MiniPlayerCommand::Close => {
                    self.relay_window(WindowAction::HideMiniPlayer);
                    Response::Ok
                }
                MiniPlayerCommand::TogglePlay => self.toggle().await,
                MiniPlayerCommand::Next => {
                    let t = self.player.next();
                    self.after_transition(t, true).await
                }
                MiniPlayerCommand::Prev => {
                    let t = self.player.prev();
                    self.after_transition(t, true).await
                }
            },

            // downloads
            Command::CheckDependencies => Response::Dependencies {
                report: self.tools.report(),
            },
            Command::GetDownloadsPath => Response::Path {
                path: Some(self.downloader.downloads_dir().to_path_buf()),
            },
            Command::OpenDownloadsFolder => {
                let dir = self.downloader.downloads_dir().to_path_buf();
                tokio::fs::create_dir_all(&dir)
                    .await
                    .with_context(|| format!("creating {:?}", dir))?;
                open_folder(&dir)?;
                Response::Ok
            }

            // library
            Command::ListSongs => Response::Songs {
                songs: self.store.songs().await,
            },
            Command::DeleteSong { id } => {
                let removed = self.store.remove_song(&id).await;
                if removed.is_some() {
                    info!("DaemonCore: deleted song {}", id);
                    let t = self.player.forget_song(&id);
                    self.after_transition(t, true).await;
                }
                Response::Song { song: removed }
            }
            Command::ResolveSongPath { id } => Response::Path {
                path: self.store.song_path(&id).await,
            },

            // playlists
            Command::ListPlaylists => Response::Playlists {
                playlists: self.store.playlists().await,
            },
            Command::PlaylistSongs { playlist_id } => Response::Songs {
                songs: self
                    .store
                    .playlist_songs(&playlist_id)
                    .await
                    .unwrap_or_default(),
            },
            Command::CreatePlaylist { name } => Response::Playlist {
                playlist: Some(self.store.create_playlist(&name).await?),
            },
            Command::RenamePlaylist { playlist_id, name } => Response::Playlist {
                playlist: self.store.rename_playlist(&playlist_id, &name).await?,
            },
            Command::DeletePlaylist { playlist_id } => {
                let removed = self.store.delete_playlist(&playlist_id).await;
                if removed.is_some() && self.player.playlist_deleted(&playlist_id) {
                    info!("DaemonCore: viewed playlist deleted, showing all songs");
                    self.after_transition(None, true).await;
                }
                Response::Playlist { playlist: removed }
            }
            Command::AddToPlaylist {
                playlist_id,
                song_id,
            } => Response::Playlist {
                playlist: self.store.add_to_playlist(&playlist_id, &song_id).await,
            },
            Command::RemoveFromPlaylist {
                playlist_id,
                song_id,
            } => Response::Playlist {
                playlist: self.store.remove_from_playlist(&playlist_id, &song_id).await,
            },
            Command::ReorderPlaylist {
                playlist_id,
                song_ids,
            } => Response::Playlist {
                playlist: self.store.reorder_playlist(&playlist_id, song_ids).await,
            },
            Command::MoveInPlaylist {
                playlist_id,
                dragged,
                target,
                insert_before,
            } => {
                let playlist = match self.store.playlist(&playlist_id).await {
                    Some(p) if dragged != target => {
                        let order =
                            compute_reorder_insertion(&p.songs, &dragged, &target, insert_before);
                        self.store.reorder_playlist(&playlist_id, order).await
                    }
                    other => other,
                };
                Response::Playlist { playlist }
            }

            // session
            Command::GetSession => Response::Session {
                session: self.store.session().await,
            },
            Command::SaveSession { patch } => {
                // the controller owns these fields and persists them itself
                let library = self.store.snapshot().await;
                self.player.apply_session(&patch, &library);
                if patch.volume.is_some() {
                    self.sync_volume().await;
                }
                self.after_transition(None, true).await;
                Response::Session {
                    session: self.store.session().await,
                }
            }
            Command::GetSettings => Response::Settings {
                settings: self.store.settings().await,
            },
            Command::SaveSettings { patch } => Response::Settings {
                settings: self.store.save_settings(patch).await,
            },

            // playback
            Command::Play { song_id } => {
                let library = self.store.snapshot().await;
                let song = library
                    .song(&song_id)
                    .cloned()
                    .ok_or_else(|| anyhow!("Song not found"))?;
                let t = self.player.play(song, &library);
                self.after_transition(Some(t), true).await
            }
            Command::PlayAll => {
                let library = self.store.snapshot().await;
                let t = self.player.play_all(&library)?;
                self.after_transition(Some(t), true).await
            }
            Command::PlayPlaylist { playlist_id } => {
                let library = self.store.snapshot().await;
                let t = self.player.play_playlist(&playlist_id, &library)?;
                self.after_transition(Some(t), true).await
            }
            Command::TogglePlay => self.toggle().await,
            Command::Next => {
                let t = self.player.next();
                self.after_transition(t, true).await
            }
            Command::Prev => {
                let t = self.player.prev();
                self.after_transition(t, true).await
            }
            Command::SeekTo { seconds } => {
                if let Some(h) = self.mpv_handle.clone() {
                    h.seek_to(seconds).await?;
                }
                self.player.update_position(seconds);
                self.after_transition(None, false).await
            }
            Command::ToggleShuffle => {
                let library = self.store.snapshot().await;
                self.player.toggle_shuffle(&library);
                self.after_transition(None, true).await
            }
            Command::SetShuffle { enabled } => {
                let library = self.store.snapshot().await;
                self.player.set_shuffle(enabled, &library);
                self.after_transition(None, true).await
            }
            Command::CycleRepeat => {
                self.player.cycle_repeat();
                self.after_transition(None, true).await
            }
            Command::Volume { value } => {
                self.player.set_volume(value);
                self.sync_volume().await;
                self.after_transition(None, true).await
            }
            Command::SetView { view } => {
                self.player.set_view(view);
                self.after_transition(None, true).await
            }
            Command::GetState => Response::State {
                state: self.player.snapshot(),
            },

            Command::DownloadSong { .. }
            | Command::ResolvePlaylist { .. }
            | Command::ImportPlaylist { .. }
            | Command::ExportPlaylist { .. } => {
                return Err(anyhow!("long-running command reached the loop"));
            }
        };
        Ok(response)
    }

    async fn toggle(&mut self) -> Response {
        let t = self.player.toggle();
        self.after_transition(t, false).await
    }

    async fn sync_volume(&self) {
        if let Some(h) = self.mpv_handle.clone() {
            if let Err(e) = h.set_volume(self.player.volume()).await {
                warn!("mpv: set volume failed: {}", e);
            }
        }
    }

    fn relay_window(&self, action: WindowAction) {
        debug!("DaemonCore: window action {:?}", action);
        let _ = self.broadcast_tx.send(BroadcastMessage::Window(action));
    }

    // ── transitions ───────────────────────────────────────────────────────────

    /// Carry out `transport`, persist the session if asked, publish.
    async fn after_transition(&mut self, transport: Option<Transport>, persist: bool) -> Response {
        if let Some(transport) = transport {
            self.apply_transport(transport).await;
        }
        if persist {
            self.persist_session().await;
        }
        self.publish().await;
        Response::State {
            state: self.player.snapshot(),
        }
    }

    async fn apply_transport(&mut self, transport: Transport) {
        debug!("DaemonCore: transport {:?}", transport);
        match transport {
            Transport::Load(song) => self.load(&song.id, &song.title).await,
            Transport::Restart { resume: true } => {
                // after end-of-file mpv has already unloaded the track
                if let Some(song) = self.player.current_song().cloned() {
                    self.load(&song.id, &song.title).await;
                }
            }
            Transport::Restart { resume: false } => {
                if let Some(h) = self.mpv_handle.clone() {
                    if let Err(e) = h.seek_to(0.0).await {
                        debug!("mpv: restart seek failed: {}", e);
                    }
                }
            }
            Transport::Pause | Transport::Resume => {
                let paused = matches!(transport, Transport::Pause);
                if let Some(h) = self.mpv_handle.clone() {
                    if let Err(e) = h.set_pause(paused).await {
                        warn!("mpv: set pause failed: {}", e);
                    }
                }
            }
            Transport::Stop => {
                if let Some(h) = self.mpv_handle.clone() {
                    let _ = h.stop().await;
                }
            }
        }
    }

    async fn load(&mut self, song_id: &str, title: &str) {
        let Some(path) = self.store.song_path(song_id).await else {
            warn!("DaemonCore: audio file for \"{}\" is missing", title);
            self.player.playback_failed();
            if let Some(h) = self.mpv_handle.clone() {
                let _ = h.stop().await;
            }
            let _ = self
                .broadcast_tx
                .send(BroadcastMessage::Error(format!("Audio file missing for \"{}\"", title)));
            return;
        };

        let volume = self.player.volume();
        if let Some(h) = self.ensure_mpv_handle().await {
            info!("DaemonCore: playing {:?}", path);
            if let Err(e) = h.load_file(&path, volume).await {
                warn!("mpv: loadfile failed: {}", e);
            }
        }
    }

    async fn ensure_mpv_handle(&mut self) -> Option<MpvHandle> {
        if self.mpv_handle.is_some() && !self.mpv_driver.process_alive() {
            warn!("DaemonCore: mpv process died, dropping handle");
            self.mpv_handle = None;
        }

        if self.mpv_handle.is_none() {
            if !self.mpv_driver.available() {
                warn!("DaemonCore: mpv not found, playback has no audio output");
                return None;
            }

            let (tx, mut rx) = mpsc::channel::<MpvEvent>(64);
            let core_tx = self.event_tx.clone();
            tokio::spawn(async move {
                while let Some(evt) = rx.recv().await {
                    if core_tx.send(DaemonEvent::MpvEvent(evt)).await.is_err() {
                        break;
                    }
                }
            });

            match self.mpv_driver.spawn_and_connect(self.player.volume(), tx).await {
                Ok(h) => self.mpv_handle = Some(h),
                Err(e) => {
                    warn!("DaemonCore: failed to start mpv: {}", e);
                    return None;
                }
            }
        }

        self.mpv_handle.clone()
    }

    async fn handle_mpv_event(&mut self, evt: MpvEvent) {
        if let Some((obs_id, data)) = evt.as_property_change() {
            match obs_id {
                OBS_TIME_POS => {
                    if let Some(secs) = data.as_f64() {
                        let tick = secs.floor() != self.player.position_secs().floor();
                        self.player.update_position(secs);
                        if tick {
                            self.publish().await;
                        }
                    }
                }
                OBS_DURATION => {
                    self.player.update_duration(data.as_f64());
                    self.publish().await;
                }
                OBS_PAUSE => debug!("mpv: pause → {:?}", data.as_bool()),
                _ => {}
            }
            return;
        }

        if evt.is_end_of_file() {
            info!("mpv: end of track");
            let t = self.player.track_ended();
            self.after_transition(t, true).await;
        }
    }

    async fn persist_session(&self) {
        self.store.save_session(self.player.session_patch()).await;
    }

    async fn publish(&mut self) {
        let snapshot = self.player.snapshot();
        *self.snapshot.write().await = snapshot.clone();
        let mini = MiniPlayerState::from(&snapshot);
        let _ = self
            .broadcast_tx
            .send(BroadcastMessage::State(Arc::new(snapshot)));
        let _ = self.broadcast_tx.send(BroadcastMessage::MiniPlayer(mini));
    }
}

fn open_folder(dir: &Path) -> anyhow::Result<()> {
    #[cfg(target_os = "macos")]
    let opener = "open";
    #[cfg(windows)]
    let opener = "explorer";
    #[cfg(all(unix, not(target_os = "macos")))]
    let opener = "xdg-open";

    tokio::process::Command::new(opener)
        .arg(dir)
        .spawn()
        .with_context(|| format!("launching {} for {:?}", opener, dir))?;
    Ok(())
}

/// Build everything DaemonCore needs from the config.
pub async fn build(
    config: &Config,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> (DaemonCore, mpsc::Receiver<DaemonEvent>) {
    let store = Arc::new(LibraryStore::load(config.daemon.library_file.clone()).await);
    let tools = ToolPaths::discover(&config.tools);
    let (event_tx, event_rx) = mpsc::channel::<DaemonEvent>(256);
    let core = DaemonCore::new(config, store, tools, broadcast_tx, event_tx).await;
    (core, event_rx)
}

/// Config rooted in `dir`.
#[cfg(test)]
pub(crate) fn config_in(dir: &Path) -> Config {
    let mut config = Config::default();
    config.daemon.library_file = dir.join("playgen-db.json");
    config.paths.downloads_dir = dir.join("downloads");
    config
}
