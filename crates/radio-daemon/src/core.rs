//! SessionCore: single-owner event loop for all mutable session state.
//!
//! Every input (API commands, debounce timers, directory responses, sink
//! failures) arrives as a `CoreEvent` on one channel and is handled to
//! completion before the next.  SessionCore owns the `PlaybackSession` (and
//! through it the audio sink), the `BrowseState` and the `SearchPipeline`
//! exclusively; no other task touches them.
//!
//! Directory requests run as spawned tasks and post their result back as an
//! event tagged with the generation they were issued under: the list
//! generation for top stations, the view generation for searches.  Results
//! whose generation is no longer current are dropped.
//!
//! After each event the core publishes a `PlayerSnapshot` to the
//! `StateManager` and broadcasts `StateUpdated` when it changed.

use std::sync::Arc;

use radio_proto::browse::BrowseState;
use radio_proto::config::Config;
use radio_proto::protocol::{Command, Notice, NoticeKind, PlayerSnapshot};
use radio_proto::state::StateManager;
use radio_proto::station::StationRecord;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::directory::{FetchError, StationDirectory};
use crate::search::{QueryInput, SearchPipeline};
use crate::session::PlaybackSession;
use crate::sink::{AudioSink, SinkEvent};
use crate::BroadcastMessage;

pub const MSG_LOAD_FAILED: &str =
    "Failed to load stations. Please check your connection and try again.";
pub const MSG_NO_STATIONS: &str = "No stations found. Please try again later.";
pub const MSG_SEARCH_FAILED: &str = "Search failed. Please try again.";
pub const MSG_PLAYBACK_FAILED: &str = "Unable to play this station. Please try another one.";
pub const MSG_VOLUME_FAILED: &str = "Unable to change the volume.";

// ── CoreEvent ─────────────────────────────────────────────────────────────────

/// All inputs into the SessionCore loop.
#[derive(Debug)]
pub enum CoreEvent {
    /// A command from the HTTP API.
    Command(Command),
    /// A debounce timer ran out.
    SearchDue { ticket: u64 },
    TopStationsLoaded {
        list_generation: u64,
        result: Result<Vec<StationRecord>, FetchError>,
    },
    SearchLoaded {
        generation: u64,
        query: String,
        result: Result<Vec<StationRecord>, FetchError>,
    },
    /// Asynchronous failure reported by the audio sink.
    Sink(SinkEvent),
    /// Shutdown requested.
    Shutdown,
}

// ── SessionCore ───────────────────────────────────────────────────────────────

pub struct SessionCore<D, S>
where
    D: StationDirectory + 'static,
    S: AudioSink,
{
    directory: Arc<D>,
    session: PlaybackSession<S>,
    browse: BrowseState,
    search: SearchPipeline,
    /// Stations requested per list/search call.
    limit: usize,
    /// Loop-back sender for timers and directory tasks.
    event_tx: mpsc::Sender<CoreEvent>,
    state_manager: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    notice: Option<Notice>,
    next_notice_id: u64,
}

impl<D, S> SessionCore<D, S>
where
    D: StationDirectory + 'static,
    S: AudioSink,
{
    pub async fn new(
        config: &Config,
        directory: Arc<D>,
        sink: S,
        event_tx: mpsc::Sender<CoreEvent>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        let session = PlaybackSession::start(sink, config.playback.default_volume).await;
        Self {
            directory,
            session,
            browse: BrowseState::new(),
            search: SearchPipeline::new(config.search.debounce()),
            limit: config.directory.limit,
            event_tx,
            state_manager: Arc::new(StateManager::new()),
            broadcast_tx,
            notice: None,
            next_notice_id: 1,
        }
    }

    /// Borrow the state manager (for use by the HTTP server).
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    /// Run the core event loop.  Returns when a `Shutdown` event is received
    /// or every sender is gone.  The audio sink is released on the way out.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<CoreEvent>) -> anyhow::Result<()> {
        info!("SessionCore: starting event loop");

        self.reload();
        self.publish().await;

        loop {
            match event_rx.recv().await {
                None => {
                    info!("SessionCore: event channel closed, shutting down");
                    break;
                }
                Some(CoreEvent::Shutdown) => {
                    info!("SessionCore: shutdown requested");
                    break;
                }
                Some(evt) => {
                    self.handle_event(evt).await;
                    self.publish().await;
                }
            }
        }

        self.search.abandon();
        let Self { session, .. } = self;
        session.end().await;
        Ok(())
    }

    async fn handle_event(&mut self, evt: CoreEvent) {
        match evt {
            CoreEvent::Command(cmd) => {
                info!("SessionCore: command {:?}", cmd);
                self.handle_command(cmd).await;
            }
            CoreEvent::SearchDue { ticket } => {
                if let Some(query) = self.search.take_due(ticket) {
                    self.spawn_search(query);
                }
            }
            CoreEvent::TopStationsLoaded {
                list_generation,
                result,
            } => {
                self.on_top_stations(list_generation, result);
            }
            CoreEvent::SearchLoaded {
                generation,
                query,
                result,
            } => {
                self.on_search(generation, query, result);
            }
            CoreEvent::Sink(event) => {
                if self.session.on_sink_event(event).is_some() {
                    self.raise(NoticeKind::PlaybackFailed, MSG_PLAYBACK_FAILED);
                }
            }
            CoreEvent::Shutdown => {}
        }
    }

    // ── command handlers ──────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::ReloadStations => {
                self.search.abandon();
                self.reload();
            }
            Command::QueryChanged { query } => {
                if self.search.input(&query, &self.event_tx) == QueryInput::Cleared {
                    self.browse.clear_search();
                }
            }
            Command::SetGenre { genre } => {
                self.search.abandon();
                self.browse.set_genre(genre);
            }
            Command::Select { id } => self.select(&id).await,
            Command::TogglePlayback => {
                if self.session.toggle().await.is_err() {
                    self.raise(NoticeKind::PlaybackFailed, MSG_PLAYBACK_FAILED);
                }
            }
            Command::Stop => {
                if let Err(e) = self.session.stop().await {
                    warn!("SessionCore: stop failed: {}", e);
                    self.raise(NoticeKind::PlaybackFailed, MSG_PLAYBACK_FAILED);
                }
            }
            Command::SetVolume { level } => {
                if let Err(e) = self.session.set_volume(level).await {
                    warn!("SessionCore: volume change failed: {}", e);
                    self.raise(NoticeKind::PlaybackFailed, MSG_VOLUME_FAILED);
                }
            }
            Command::ToggleMute => {
                if let Err(e) = self.session.toggle_mute().await {
                    warn!("SessionCore: mute toggle failed: {}", e);
                    self.raise(NoticeKind::PlaybackFailed, MSG_VOLUME_FAILED);
                }
            }
            Command::SetMuted { muted } => {
                if let Err(e) = self.session.set_muted(muted).await {
                    warn!("SessionCore: mute change failed: {}", e);
                    self.raise(NoticeKind::PlaybackFailed, MSG_VOLUME_FAILED);
                }
            }
            Command::ToggleFavorite { id } => {
                let now = self.browse.toggle_favorite(&id);
                info!("SessionCore: favorite {} → {}", id, now);
            }
            Command::DismissNotice => {
                self.notice = None;
            }
        }
    }

    async fn select(&mut self, id: &str) {
        let station = self.browse.find(id).cloned().or_else(|| {
            self.session
                .state()
                .active_station
                .clone()
                .filter(|s| s.id == id)
        });
        let Some(station) = station else {
            warn!("SessionCore: select for unknown station {}", id);
            return;
        };
        if self.session.select(station).await.is_err() {
            self.raise(NoticeKind::PlaybackFailed, MSG_PLAYBACK_FAILED);
        }
        debug!(
            "SessionCore: {} is now {}",
            id,
            self.session.state().status.label()
        );
    }

    // ── directory requests ────────────────────────────────────────────────────

    fn reload(&mut self) {
        let list_generation = self.browse.begin_reload();
        let directory = Arc::clone(&self.directory);
        let tx = self.event_tx.clone();
        let limit = self.limit;
        info!("SessionCore: loading top stations (list gen {})", list_generation);
        tokio::spawn(async move {
            let result = directory.list_top_stations(limit).await;
            let _ = tx
                .send(CoreEvent::TopStationsLoaded {
                    list_generation,
                    result,
                })
                .await;
        });
    }

    fn spawn_search(&mut self, query: String) {
        let generation = self.browse.begin_search(query.clone());
        self.search.issued(generation);
        let directory = Arc::clone(&self.directory);
        let tx = self.event_tx.clone();
        let limit = self.limit;
        info!("SessionCore: searching {:?} (gen {})", query, generation);
        tokio::spawn(async move {
            let result = directory.search_by_name(&query, limit).await;
            let _ = tx
                .send(CoreEvent::SearchLoaded {
                    generation,
                    query,
                    result,
                })
                .await;
        });
    }

    fn on_top_stations(
        &mut self,
        list_generation: u64,
        result: Result<Vec<StationRecord>, FetchError>,
    ) {
        if !self.browse.is_current_list(list_generation) {
            debug!(
                "SessionCore: discarding stale top-station result (list gen {}, now {}): ok={}",
                list_generation,
                self.browse.list_generation(),
                result.is_ok()
            );
            return;
        }
        match result {
            Ok(stations) => {
                info!("SessionCore: loaded {} stations", stations.len());
                self.browse.apply_top_stations(list_generation, stations);
            }
            Err(e) => {
                warn!("SessionCore: loading stations failed: {}", e);
                let (kind, message) = match e {
                    FetchError::Network(_) => (NoticeKind::LoadFailed, MSG_LOAD_FAILED),
                    FetchError::Empty => (NoticeKind::NoStations, MSG_NO_STATIONS),
                };
                self.browse.fail_load(list_generation, message);
                self.raise(kind, message);
            }
        }
    }

    fn on_search(
        &mut self,
        generation: u64,
        query: String,
        result: Result<Vec<StationRecord>, FetchError>,
    ) {
        self.search.settle(generation);
        if !self.browse.is_current(generation) {
            debug!(
                "SessionCore: discarding stale search {:?} (gen {}, now {}): ok={}",
                query,
                generation,
                self.browse.generation(),
                result.is_ok()
            );
            return;
        }
        match result {
            Ok(stations) => {
                info!("SessionCore: search {:?} found {} stations", query, stations.len());
                self.browse.apply_search(generation, stations);
            }
            Err(FetchError::Empty) => {
                info!("SessionCore: search {:?} found nothing", query);
                self.browse.apply_search(generation, Vec::new());
                self.raise(
                    NoticeKind::NoMatches,
                    format!("No stations match \"{}\".", query),
                );
            }
            Err(e) => {
                warn!("SessionCore: search {:?} failed: {}", query, e);
                self.browse.fail_search(generation, MSG_SEARCH_FAILED);
                self.raise(NoticeKind::SearchFailed, MSG_SEARCH_FAILED);
            }
        }
    }

    // ── publishing ────────────────────────────────────────────────────────────

    fn raise(&mut self, kind: NoticeKind, message: impl Into<String>) {
        let notice = Notice {
            id: self.next_notice_id,
            kind,
            message: message.into(),
        };
        self.next_notice_id += 1;
        let _ = self.broadcast_tx.send(BroadcastMessage::Notice(notice.clone()));
        self.notice = Some(notice);
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            rev: 0,
            session: self.session.snapshot(),
            browse: self.browse.snapshot(self.search.is_searching()),
            notice: self.notice.clone(),
        }
    }

    async fn publish(&self) {
        let before = self.state_manager.rev().await;
        let rev = self.state_manager.publish(self.snapshot()).await;
        if rev != before {
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated { rev });
        }
    }
}
