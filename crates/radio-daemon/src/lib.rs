//! Station-session daemon: the single-owner session core, the directory
//! client, the debounced search pipeline, the mpv audio sink and the HTTP
//! API the browser page talks to.

pub mod core;
pub mod directory;
pub mod http;
pub mod mpv;
pub mod search;
pub mod session;
pub mod sink;

use radio_proto::protocol::Notice;

/// Fan-out from the session core to event-stream listeners.
#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    /// A new snapshot was published.
    StateUpdated { rev: u64 },
    /// A user-facing message was raised.
    Notice(Notice),
}
