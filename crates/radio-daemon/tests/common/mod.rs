//! Test doubles for driving `SessionCore` end to end: a directory that
//! answers from a script (with per-request delays) and a sink that records
//! every call.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use radio_daemon::core::{CoreEvent, SessionCore};
use radio_daemon::directory::{FetchError, StationDirectory};
use radio_daemon::sink::{AudioSink, PlaybackError};
use radio_daemon::BroadcastMessage;
use radio_proto::config::Config;
use radio_proto::protocol::{Command, PlayerSnapshot};
use radio_proto::state::StateManager;
use radio_proto::station::StationRecord;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

pub fn station(id: &str, genre: &str) -> StationRecord {
    StationRecord {
        id: id.to_string(),
        name: format!("Station {id}"),
        stream_url: format!("http://stream/{id}"),
        country: "Unknown".into(),
        country_code: "XX".into(),
        language: "Unknown".into(),
        genre: genre.to_string(),
        votes: 0,
        click_count: 0,
        favicon_url: None,
        codec: "MP3".into(),
    }
}

pub fn top_list() -> Vec<StationRecord> {
    vec![
        station("a", "jazz,smooth"),
        station("b", "Rock"),
        station("c", "classic rock"),
        station("d", "news"),
    ]
}

pub fn ids(stations: &[StationRecord]) -> Vec<&str> {
    stations.iter().map(|s| s.id.as_str()).collect()
}

// ── directory ─────────────────────────────────────────────────────────────────

type Reply = (Duration, Result<Vec<StationRecord>, FetchError>);

/// Top-list replies are consumed in order (the last one repeats); search
/// replies are keyed by query and default to `FetchError::Empty`.
pub struct ScriptedDirectory {
    top: Mutex<VecDeque<Reply>>,
    searches: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedDirectory {
    pub fn new() -> Self {
        Self {
            top: Mutex::new(VecDeque::new()),
            searches: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_top(self, delay: Duration, reply: Result<Vec<StationRecord>, FetchError>) -> Self {
        self.top.lock().unwrap().push_back((delay, reply));
        self
    }

    pub fn with_search(
        self,
        query: &str,
        delay: Duration,
        reply: Result<Vec<StationRecord>, FetchError>,
    ) -> Self {
        self.searches
            .lock()
            .unwrap()
            .insert(query.to_string(), (delay, reply));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn search_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix("search:").map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl StationDirectory for ScriptedDirectory {
    async fn list_top_stations(&self, _limit: usize) -> Result<Vec<StationRecord>, FetchError> {
        self.calls.lock().unwrap().push("top".into());
        let (delay, reply) = {
            let mut top = self.top.lock().unwrap();
            match top.len() {
                0 => (Duration::ZERO, Ok(top_list())),
                1 => top[0].clone(),
                _ => top.pop_front().unwrap(),
            }
        };
        tokio::time::sleep(delay).await;
        reply
    }

    async fn search_by_name(
        &self,
        query: &str,
        _limit: usize,
    ) -> Result<Vec<StationRecord>, FetchError> {
        self.calls.lock().unwrap().push(format!("search:{query}"));
        let (delay, reply) = self
            .searches
            .lock()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or((Duration::ZERO, Err(FetchError::Empty)));
        tokio::time::sleep(delay).await;
        reply
    }
}

// ── sink ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Load(String),
    Play,
    Pause,
    Stop,
    Volume(f32),
}

#[derive(Debug, Default)]
pub struct SinkLog {
    pub calls: Vec<SinkCall>,
    pub source: Option<String>,
    pub level: f32,
    pub reject: HashSet<String>,
}

impl SinkLog {
    pub fn loads(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, SinkCall::Load(_)))
            .count()
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub log: Arc<Mutex<SinkLog>>,
    source: Option<String>,
}

impl RecordingSink {
    pub fn rejecting(url: &str) -> Self {
        let sink = Self::default();
        sink.log.lock().unwrap().reject.insert(url.to_string());
        sink
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn load(&mut self, url: &str) -> Result<(), PlaybackError> {
        let mut log = self.log.lock().unwrap();
        assert!(log.source.is_none(), "second source loaded while one is held");
        log.calls.push(SinkCall::Load(url.to_string()));
        log.source = Some(url.to_string());
        self.source = Some(url.to_string());
        Ok(())
    }

    async fn play(&mut self) -> Result<(), PlaybackError> {
        let mut log = self.log.lock().unwrap();
        log.calls.push(SinkCall::Play);
        match log.source.clone() {
            Some(url) if log.reject.contains(&url) => {
                Err(PlaybackError::Unsupported("no audio".into()))
            }
            Some(_) => Ok(()),
            None => Err(PlaybackError::Unavailable("nothing loaded".into())),
        }
    }

    async fn pause(&mut self) -> Result<(), PlaybackError> {
        self.log.lock().unwrap().calls.push(SinkCall::Pause);
        Ok(())
    }

    async fn set_volume(&mut self, level: f32) -> Result<(), PlaybackError> {
        let mut log = self.log.lock().unwrap();
        log.calls.push(SinkCall::Volume(level));
        log.level = level;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), PlaybackError> {
        let mut log = self.log.lock().unwrap();
        log.calls.push(SinkCall::Stop);
        log.source = None;
        self.source = None;
        Ok(())
    }

    fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }
}

// ── harness ───────────────────────────────────────────────────────────────────

pub struct Harness {
    pub event_tx: mpsc::Sender<CoreEvent>,
    pub state: Arc<StateManager>,
    pub directory: Arc<ScriptedDirectory>,
    pub sink: Arc<Mutex<SinkLog>>,
    pub broadcast_rx: broadcast::Receiver<BroadcastMessage>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl Harness {
    pub async fn start(directory: ScriptedDirectory, sink: RecordingSink) -> Self {
        let config = Config::default();
        let directory = Arc::new(directory);
        let sink_log = Arc::clone(&sink.log);
        let (event_tx, event_rx) = mpsc::channel(64);
        let (broadcast_tx, broadcast_rx) = broadcast::channel(64);

        let core = SessionCore::new(
            &config,
            Arc::clone(&directory),
            sink,
            event_tx.clone(),
            broadcast_tx,
        )
        .await;
        let state = core.state_manager();
        let task = tokio::spawn(core.run(event_rx));

        let harness = Self {
            event_tx,
            state,
            directory,
            sink: sink_log,
            broadcast_rx,
            task,
        };
        harness.settle().await;
        harness
    }

    pub async fn send(&self, cmd: Command) {
        self.event_tx.send(CoreEvent::Command(cmd)).await.unwrap();
        self.settle().await;
    }

    /// Let every runnable task finish.  With the paused clock this only
    /// advances time once everything is idle.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    pub async fn snapshot(&self) -> PlayerSnapshot {
        self.state.get_state().await
    }

    pub async fn shutdown(self) {
        self.event_tx.send(CoreEvent::Shutdown).await.unwrap();
        self.task.await.unwrap().unwrap();
    }
}
