//! Playback session controller.
//!
//! Owns the one audio sink for the lifetime of the session and keeps
//! `SessionState` consistent with it:
//!
//! ```text
//!   Idle    ── select A ──────────────► Playing(A) | Failed
//!   Playing(A) ── select A / toggle ──► Paused(A)
//!   Paused(A)  ── select A / toggle ──► Playing(A)   (same source, no reload)
//!   Playing/Paused(A) ── select B ────► stop A, load B ─► Playing(B) | Failed
//!   Failed  ── select any ────────────► fresh load
//! ```
//!
//! While `status == Playing` the sink's source is the active station's
//! stream URL.  Volume is stored separately from mute so unmuting restores
//! the exact level.

use radio_proto::protocol::{PlaybackStatus, SessionSnapshot};
use radio_proto::station::StationRecord;
use tracing::{debug, info, warn};

use crate::sink::{AudioSink, PlaybackError, SinkEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub active_station: Option<StationRecord>,
    pub status: PlaybackStatus,
    /// Stored level, 0-100.  Kept while muted.
    pub volume: u8,
    pub muted: bool,
}

pub struct PlaybackSession<S: AudioSink> {
    sink: S,
    state: SessionState,
}

impl<S: AudioSink> PlaybackSession<S> {
    /// Take ownership of the sink and apply the initial volume.
    pub async fn start(sink: S, volume: u8) -> Self {
        let mut session = Self {
            sink,
            state: SessionState {
                active_station: None,
                status: PlaybackStatus::Idle,
                volume: volume.min(100),
                muted: false,
            },
        };
        if let Err(e) = session.apply_volume().await {
            warn!("session: initial volume not applied: {}", e);
        }
        session
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            active_station: self.state.active_station.clone(),
            status: self.state.status.clone(),
            volume: self.state.volume,
            muted: self.state.muted,
        }
    }

    /// Level actually sent to the sink.
    pub fn effective_volume(&self) -> f32 {
        if self.state.muted {
            0.0
        } else {
            f32::from(self.state.volume) / 100.0
        }
    }

    fn is_active(&self, station: &StationRecord) -> bool {
        self.state
            .active_station
            .as_ref()
            .is_some_and(|a| a.id == station.id)
    }

    // ── transport ─────────────────────────────────────────────────────────────

    /// A station was picked.  Pauses or resumes when it is already active,
    /// otherwise replaces the current stream.
    pub async fn select(&mut self, station: StationRecord) -> Result<(), PlaybackError> {
        match self.state.status {
            PlaybackStatus::Playing if self.is_active(&station) => self.pause().await,
            PlaybackStatus::Paused if self.is_active(&station) => self.resume().await,
            _ => self.load_and_play(station).await,
        }
    }

    /// Play/pause button.  Retries a failed station; does nothing when idle.
    pub async fn toggle(&mut self) -> Result<(), PlaybackError> {
        match &self.state.status {
            PlaybackStatus::Playing => self.pause().await,
            PlaybackStatus::Paused => self.resume().await,
            PlaybackStatus::Failed(_) => match self.state.active_station.clone() {
                Some(station) => self.load_and_play(station).await,
                None => Ok(()),
            },
            PlaybackStatus::Idle => {
                debug!("session: toggle ignored while idle");
                Ok(())
            }
        }
    }

    /// Drop the active station.  A sink that refuses to stop leaves the
    /// session `Failed` rather than `Idle`.
    pub async fn stop(&mut self) -> Result<(), PlaybackError> {
        info!("session: stopping playback");
        self.state.active_station = None;
        match self.sink.stop().await {
            Ok(()) => {
                self.state.status = PlaybackStatus::Idle;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn load_and_play(&mut self, station: StationRecord) -> Result<(), PlaybackError> {
        info!("session: playing '{}' ({})", station.name, station.stream_url);
        let url = station.stream_url.clone();
        self.state.active_station = Some(station);
        self.state.status = PlaybackStatus::Idle;

        match self.open_source(&url).await {
            Ok(()) => {
                self.state.status = PlaybackStatus::Playing;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Release whatever is playing, then load and start `url`.
    async fn open_source(&mut self, url: &str) -> Result<(), PlaybackError> {
        if let Some(previous) = self.sink.source() {
            debug!("session: releasing previous source {}", previous);
            self.sink.stop().await?;
        }
        self.sink.load(url).await?;
        self.sink.set_volume(self.effective_volume()).await?;
        self.sink.play().await
    }

    async fn pause(&mut self) -> Result<(), PlaybackError> {
        match self.sink.pause().await {
            Ok(()) => {
                self.state.status = PlaybackStatus::Paused;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn resume(&mut self) -> Result<(), PlaybackError> {
        match self.sink.play().await {
            Ok(()) => {
                self.state.status = PlaybackStatus::Playing;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn fail(&mut self, error: PlaybackError) -> PlaybackError {
        let name = self
            .state
            .active_station
            .as_ref()
            .map(|s| s.name.as_str())
            .unwrap_or("-");
        warn!("session: playback of '{}' failed: {}", name, error);
        self.state.status = PlaybackStatus::Failed(error.to_string());
        error
    }

    // ── volume ────────────────────────────────────────────────────────────────

    /// Clamp to 0..=100 and apply, unless muted.
    pub async fn set_volume(&mut self, level: i32) -> Result<(), PlaybackError> {
        // Lossless: clamped into u8 range first.
        self.state.volume = level.clamp(0, 100) as u8;
        self.apply_volume().await
    }

    pub async fn set_muted(&mut self, muted: bool) -> Result<(), PlaybackError> {
        self.state.muted = muted;
        self.apply_volume().await
    }

    pub async fn toggle_mute(&mut self) -> Result<(), PlaybackError> {
        self.set_muted(!self.state.muted).await
    }

    async fn apply_volume(&mut self) -> Result<(), PlaybackError> {
        self.sink.set_volume(self.effective_volume()).await
    }

    // ── sink notifications ────────────────────────────────────────────────────

    /// Apply an asynchronous sink failure.  Returns the error when it hit the
    /// active stream; failures for other URLs are stale and ignored.
    pub fn on_sink_event(&mut self, event: SinkEvent) -> Option<PlaybackError> {
        match event {
            SinkEvent::Failed { url, error } => {
                let is_active_stream = self
                    .state
                    .active_station
                    .as_ref()
                    .is_some_and(|s| s.stream_url == url);
                let is_running = matches!(
                    self.state.status,
                    PlaybackStatus::Playing | PlaybackStatus::Paused
                );
                if is_active_stream && is_running {
                    Some(self.fail(error))
                } else {
                    debug!("session: ignoring sink failure for {}: {}", url, error);
                    None
                }
            }
        }
    }

    /// End the session: stop the sink and clear its source.
    pub async fn end(mut self) {
        info!("session: ending, releasing audio sink");
        if let Err(e) = self.sink.stop().await {
            warn!("session: sink stop on teardown failed: {}", e);
        }
    }
}
