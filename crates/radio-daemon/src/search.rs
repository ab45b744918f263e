//! Debounced search pipeline.
//!
//! Keystrokes reset a quiet-period timer; only when the timer runs out is a
//! search issued.  Each timer has a ticket and a cancellation token.  A newer
//! keystroke cancels the pending timer, and a `SearchDue` whose ticket is not
//! the latest one is ignored (it may already be queued when the cancel
//! lands).
//!
//! ```text
//!   "j"  "ja"  "jaz"            (quiet 500ms)
//!    │    │     │ ─────────────────────────► SearchDue{ticket 3} → search "jaz"
//!    ╳    ╳   (tickets 1 and 2 cancelled)
//! ```
//!
//! Staleness of responses is decided by the browse generation; this module
//! only tracks which generation the outstanding search belongs to so it can
//! report `is_searching`.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::CoreEvent;

/// What a keystroke turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryInput {
    /// Blank query: show the full list now, no request.
    Cleared,
    /// A timer was (re)started.
    Scheduled { ticket: u64 },
}

struct PendingTimer {
    ticket: u64,
    query: String,
    cancel: CancellationToken,
}

pub struct SearchPipeline {
    quiet: Duration,
    next_ticket: u64,
    pending: Option<PendingTimer>,
    /// Generation of the search currently awaiting a response.
    in_flight: Option<u64>,
}

impl SearchPipeline {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            next_ticket: 0,
            pending: None,
            in_flight: None,
        }
    }

    /// Feed one change of the search box.
    pub fn input(&mut self, raw: &str, events: &mpsc::Sender<CoreEvent>) -> QueryInput {
        self.cancel_pending();

        let query = raw.trim();
        if query.is_empty() {
            self.in_flight = None;
            return QueryInput::Cleared;
        }

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let cancel = CancellationToken::new();
        self.pending = Some(PendingTimer {
            ticket,
            query: query.to_string(),
            cancel: cancel.clone(),
        });

        let quiet = self.quiet;
        let tx = events.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(quiet) => {
                    let _ = tx.send(CoreEvent::SearchDue { ticket }).await;
                }
            }
        });
        debug!("search: timer {} armed for {:?}", ticket, query);
        QueryInput::Scheduled { ticket }
    }

    /// A timer ran out.  Returns the query to send if `ticket` is still the
    /// latest timer.
    pub fn take_due(&mut self, ticket: u64) -> Option<String> {
        match self.pending.take() {
            Some(timer) if timer.ticket == ticket => Some(timer.query),
            other => {
                debug!("search: dropping superseded timer {}", ticket);
                self.pending = other;
                None
            }
        }
    }

    /// Record that the search for `generation` has been sent.
    pub fn issued(&mut self, generation: u64) {
        self.in_flight = Some(generation);
    }

    /// A search response arrived.  Returns `true` if it answered the
    /// outstanding search.
    pub fn settle(&mut self, generation: u64) -> bool {
        if self.in_flight == Some(generation) {
            self.in_flight = None;
            true
        } else {
            false
        }
    }

    /// The user left search mode some other way (genre pick, reload).
    pub fn abandon(&mut self) {
        self.cancel_pending();
        self.in_flight = None;
    }

    pub fn is_searching(&self) -> bool {
        self.in_flight.is_some()
    }

    #[cfg(test)]
    fn has_pending_timer(&self) -> bool {
        self.pending.is_some()
    }

    fn cancel_pending(&mut self) {
        if let Some(timer) = self.pending.take() {
            timer.cancel.cancel();
        }
    }
}

impl Drop for SearchPipeline {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn due_ticket(event: CoreEvent) -> u64 {
        match event {
            CoreEvent::SearchDue { ticket } => ticket,
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_keystrokes_fire_once_after_quiet_period() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut pipeline = SearchPipeline::new(Duration::from_millis(500));

        for text in ["j", "ja", "jaz"] {
            pipeline.input(text, &tx);
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        let last = Instant::now();
        let QueryInput::Scheduled { ticket } = pipeline.input("jazz", &tx) else {
            panic!("expected a scheduled search");
        };

        let fired = due_ticket(rx.recv().await.unwrap());
        assert_eq!(fired, ticket);
        let waited = last.elapsed();
        assert!(waited >= Duration::from_millis(500) && waited < Duration::from_millis(510));
        assert_eq!(pipeline.take_due(fired).as_deref(), Some("jazz"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_query_cancels_without_request() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut pipeline = SearchPipeline::new(Duration::from_millis(500));

        pipeline.input("rock", &tx);
        assert_eq!(pipeline.input("   ", &tx), QueryInput::Cleared);
        assert!(!pipeline.has_pending_timer());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_ticket_is_ignored() {
        let (tx, _rx) = mpsc::channel(16);
        let mut pipeline = SearchPipeline::new(Duration::from_millis(500));

        let QueryInput::Scheduled { ticket: old } = pipeline.input("a", &tx) else {
            panic!("expected a scheduled search");
        };
        let QueryInput::Scheduled { ticket: new } = pipeline.input("ab", &tx) else {
            panic!("expected a scheduled search");
        };
        assert_eq!(pipeline.take_due(old), None);
        assert!(pipeline.has_pending_timer());
        assert_eq!(pipeline.take_due(new).as_deref(), Some("ab"));
    }

    #[tokio::test]
    async fn test_is_searching_follows_latest_request() {
        let (tx, _rx) = mpsc::channel(16);
        let mut pipeline = SearchPipeline::new(Duration::from_millis(500));
        assert!(!pipeline.is_searching());

        pipeline.issued(1);
        pipeline.issued(2);
        assert!(pipeline.is_searching());
        assert!(!pipeline.settle(1));
        assert!(pipeline.is_searching());
        assert!(pipeline.settle(2));
        assert!(!pipeline.is_searching());

        pipeline.issued(3);
        pipeline.input("", &tx);
        assert!(!pipeline.is_searching());

        pipeline.issued(4);
        pipeline.abandon();
        assert!(!pipeline.is_searching());
    }
}
