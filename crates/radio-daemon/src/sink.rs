//! The audio sink boundary.
//!
//! A sink holds at most one source at a time.  `load` replaces the source
//! (leaving it paused), `play` starts or resumes it and resolves once audio
//! is flowing or the sink gives up.  Failures that happen later, mid-stream,
//! arrive as `SinkEvent`s on the channel the sink was built with.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    /// The sink cannot decode the stream (bad format, no audio).
    #[error("unsupported stream: {0}")]
    Unsupported(String),
    /// The stream could not be reached or dropped while playing.
    #[error("stream interrupted: {0}")]
    Interrupted(String),
    /// The sink itself is not available (player missing or crashed).
    #[error("audio output unavailable: {0}")]
    Unavailable(String),
}

/// Unsolicited sink notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// Playback of `url` failed after it had been started.
    Failed { url: String, error: PlaybackError },
}

#[async_trait]
pub trait AudioSink: Send {
    /// Replace the current source with `url`.  The previous source is
    /// released before the new one is opened.
    async fn load(&mut self, url: &str) -> Result<(), PlaybackError>;

    /// Start or resume the current source.
    async fn play(&mut self) -> Result<(), PlaybackError>;

    async fn pause(&mut self) -> Result<(), PlaybackError>;

    /// Output level in 0.0..=1.0.
    async fn set_volume(&mut self, level: f32) -> Result<(), PlaybackError>;

    /// Stop playback and clear the source.
    async fn stop(&mut self) -> Result<(), PlaybackError>;

    /// The URL currently loaded, if any.
    fn source(&self) -> Option<&str>;
}
