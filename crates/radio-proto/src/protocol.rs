use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::browse::Genre;
use crate::station::StationRecord;

/// Commands accepted by the session core.  The HTTP API translates each
/// request into exactly one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Fetch the top-station list again (also the retry affordance after a
    /// failed load).
    ReloadStations,
    /// The search box changed.  Sent once per keystroke.
    QueryChanged { query: String },
    SetGenre { genre: Genre },
    /// Select a station by id: play, pause, resume or switch.
    Select { id: String },
    TogglePlayback,
    Stop,
    /// Requested level; clamped to 0..=100 by the controller.
    SetVolume { level: i32 },
    ToggleMute,
    SetMuted { muted: bool },
    ToggleFavorite { id: String },
    DismissNotice,
}

/// Playback status as tracked by the session controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "state", content = "reason")]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Playing,
    Paused,
    /// The sink rejected the stream.  The controller stays usable.
    Failed(String),
}

impl PlaybackStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, PlaybackStatus::Failed(_))
    }

    /// Short label for status lines.
    pub fn label(&self) -> &'static str {
        match self {
            PlaybackStatus::Idle => "idle",
            PlaybackStatus::Playing => "playing",
            PlaybackStatus::Paused => "paused",
            PlaybackStatus::Failed(_) => "failed",
        }
    }
}

/// State of the station list view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "state", content = "message")]
pub enum LoadState {
    #[default]
    Loading,
    Ready,
    /// The list could not be loaded; the page offers a retry.
    Failed(String),
}

/// User-facing message categories.  Every surfaced error maps to exactly one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    LoadFailed,
    NoStations,
    SearchFailed,
    NoMatches,
    PlaybackFailed,
}

/// A dismissable message for the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notice {
    /// Monotonic id so the page can tell a repeated message from a new one.
    pub id: u64,
    pub kind: NoticeKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SessionSnapshot {
    pub active_station: Option<StationRecord>,
    pub status: PlaybackStatus,
    pub volume: u8,
    pub muted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BrowseSnapshot {
    pub visible: Vec<StationRecord>,
    pub genre: Genre,
    pub search_query: Option<String>,
    pub is_searching: bool,
    pub load: LoadState,
    pub favorite_ids: Vec<String>,
    /// Favorite stations found among the known stations.
    #[serde(default)]
    pub favorites: Vec<StationRecord>,
    /// Size of the full top-station list.
    pub total_stations: usize,
    pub fetched_at: Option<DateTime<Local>>,
}

/// Everything the page needs to render, published after every event.
/// `rev` increases monotonically with each publish.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PlayerSnapshot {
    #[serde(default)]
    pub rev: u64,
    pub session: SessionSnapshot,
    pub browse: BrowseSnapshot,
    pub notice: Option<Notice>,
}

impl PlayerSnapshot {
    /// Look up a station the page could have offered for selection.
    pub fn knows_station(&self, id: &str) -> bool {
        self.browse.visible.iter().any(|s| s.id == id)
            || self
                .session
                .active_station
                .as_ref()
                .is_some_and(|s| s.id == id)
    }
}
