//! mpv-backed audio sink with separated reader/writer IPC tasks.
//!
//! Architecture:
//!
//! ```text
//!   MpvSink::spawn()
//!         │
//!         ├── writer_task   ← receives PendingRequest via mpsc, serialises → socket
//!         ├── reader_task   ← reads JSON lines from socket
//!         │                      ├── response (has request_id) → matched oneshot::Sender
//!         │                      └── event                     → broadcast (MpvEvent)
//!         └── watch_task    ← end-file errors for the playing URL → SinkEvent::Failed
//! ```
//!
//! `load` sends `loadfile <url> replace` with mpv paused; `play` unpauses and,
//! for a fresh source, waits for `file-loaded` (success) or an `end-file`
//! error (rejection), bounded by the start timeout.
//!
//! The mpv child is spawned with `kill_on_drop`, so dropping the sink always
//! releases the audio device.
//!
//! Platform notes:
//! - Unix:   Unix domain sockets
//! - Windows: Named pipes  \\.\pipe\<name>

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

use crate::sink::{AudioSink, PlaybackError, SinkEvent};

// ── global request-id counter ─────────────────────────────────────────────────

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

// ── internal channel types ────────────────────────────────────────────────────

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event that arrived unsolicited (no request_id).  `seq` numbers
/// events in arrival order.
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub seq: u64,
    pub raw: Value,
}

impl MpvEvent {
    /// Returns the event name, e.g. "end-file", "start-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    /// The playback error carried by this event, if it ends playback
    /// abnormally.  `end-file` with reason `stop`/`quit` is a normal stop.
    pub fn playback_error(&self) -> Option<PlaybackError> {
        match self.event_name()? {
            "end-file" => match self.raw.get("reason").and_then(Value::as_str)? {
                "error" => {
                    let detail = self
                        .raw
                        .get("file_error")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string();
                    let lower = detail.to_lowercase();
                    if lower.contains("format") || lower.contains("no audio") {
                        Some(PlaybackError::Unsupported(detail))
                    } else {
                        Some(PlaybackError::Interrupted(detail))
                    }
                }
                "eof" => Some(PlaybackError::Interrupted("stream ended".into())),
                _ => None,
            },
            "shutdown" => Some(PlaybackError::Unavailable("mpv exited".into())),
            _ => None,
        }
    }
}

// ── IPC handle ────────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.  Use `send()` to fire a command
/// and await the response.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn load_file(&self, url: &str) -> anyhow::Result<()> {
        self.send(json!(["loadfile", url, "replace"])).await?;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    pub async fn set_volume(&self, vol: f32) -> anyhow::Result<()> {
        let vol_pct = (vol * 100.0).clamp(0.0, 100.0);
        self.send(json!(["set_property", "volume", vol_pct])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }
}

/// Start the reader/writer tasks over an already-connected IPC stream.
fn start_io_tasks<R, W>(read_half: R, write_half: W, events: broadcast::Sender<MpvEvent>) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    // pending map: req_id → reply channel.  Shared between writer (inserts) and reader (resolves).
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, events));

    MpvHandle { tx: cmd_tx }
}

// ── sink ──────────────────────────────────────────────────────────────────────

pub struct MpvSink {
    handle: MpvHandle,
    process: Option<tokio::process::Child>,
    socket_name: Option<String>,
    events: broadcast::Sender<MpvEvent>,
    /// URL loaded into mpv, if any.
    source: Option<String>,
    /// Subscribed before `loadfile`; taken by the first `play`.
    start_rx: Option<broadcast::Receiver<MpvEvent>>,
    /// URL confirmed playing and the seq of its `file-loaded`; read by the
    /// watch task.
    playing: watch::Sender<Option<(String, u64)>>,
    start_timeout: Duration,
    watcher: JoinHandle<()>,
}

impl MpvSink {
    /// Spawn a private mpv process and connect to its IPC endpoint.
    pub async fn spawn(
        volume: u8,
        start_timeout: Duration,
        notify: mpsc::Sender<SinkEvent>,
    ) -> anyhow::Result<Self> {
        let socket_name = radio_proto::platform::mpv_socket_name();

        info!("mpv: spawning new process");
        let mpv_binary = radio_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        #[cfg(unix)]
        let _ = tokio::fs::remove_file(&socket_name).await;

        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--pause")
            .arg(radio_proto::platform::mpv_socket_arg(&socket_name))
            .arg("--quiet")
            .arg(format!("--volume={}", volume.min(100)))
            .arg(format!("--network-timeout={}", start_timeout.as_secs().max(1)))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let (events, _) = broadcast::channel(64);
        let handle = Self::connect(&socket_name, events.clone()).await?;
        info!("mpv: connected to IPC endpoint {}", socket_name);

        let mut sink = Self::attach(handle, events, start_timeout, notify);
        sink.process = Some(child);
        sink.socket_name = Some(socket_name);
        Ok(sink)
    }

    /// Wrap an existing IPC connection.
    pub fn attach(
        handle: MpvHandle,
        events: broadcast::Sender<MpvEvent>,
        start_timeout: Duration,
        notify: mpsc::Sender<SinkEvent>,
    ) -> Self {
        let (playing, playing_rx) = watch::channel(None);
        let watcher = tokio::spawn(watch_task(events.subscribe(), playing_rx, notify));
        Self {
            handle,
            process: None,
            socket_name: None,
            events,
            source: None,
            start_rx: None,
            playing,
            start_timeout,
            watcher,
        }
    }

    /// Drive an mpv that is already reachable over `read_half`/`write_half`.
    pub fn over_stream<R, W>(
        read_half: R,
        write_half: W,
        start_timeout: Duration,
        notify: mpsc::Sender<SinkEvent>,
    ) -> Self
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
        W: tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (events, _) = broadcast::channel(64);
        let handle = start_io_tasks(read_half, write_half, events.clone());
        Self::attach(handle, events, start_timeout, notify)
    }

    #[cfg(unix)]
    async fn connect(
        socket_name: &str,
        events: broadcast::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        let socket_path = std::path::PathBuf::from(socket_name);

        // Wait for socket to appear
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(read_half, write_half, events))
    }

    #[cfg(windows)]
    async fn connect(
        socket_name: &str,
        events: broadcast::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        let pipe_path = format!(r"\\.\pipe\{}", socket_name);
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(read_half, write_half, events));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }

    fn clear_source(&mut self) {
        self.playing.send_replace(None);
        self.start_rx = None;
        self.source = None;
    }

    async fn abort_start(&mut self, error: PlaybackError) -> PlaybackError {
        warn!("mpv: start failed: {}", error);
        self.clear_source();
        if let Err(e) = self.handle.stop().await {
            debug!("mpv: stop after failed start: {}", e);
        }
        error
    }
}

fn unavailable(e: anyhow::Error) -> PlaybackError {
    PlaybackError::Unavailable(e.to_string())
}

/// Wait for the outcome of a `loadfile`.  Returns the seq of `file-loaded`.
async fn await_start(rx: &mut broadcast::Receiver<MpvEvent>) -> Result<u64, PlaybackError> {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if event.event_name() == Some("file-loaded") {
                    return Ok(event.seq);
                }
                if let Some(error) = event.playback_error() {
                    return Err(error);
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                debug!("mpv: start waiter lagged by {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => {
                return Err(PlaybackError::Unavailable("mpv connection closed".into()));
            }
        }
    }
}

#[async_trait]
impl AudioSink for MpvSink {
    async fn load(&mut self, url: &str) -> Result<(), PlaybackError> {
        debug!("mpv: load {}", url);
        self.clear_source();
        self.handle.set_pause(true).await.map_err(unavailable)?;
        let rx = self.events.subscribe();
        self.handle.load_file(url).await.map_err(unavailable)?;
        self.source = Some(url.to_string());
        self.start_rx = Some(rx);
        Ok(())
    }

    async fn play(&mut self) -> Result<(), PlaybackError> {
        let Some(url) = self.source.clone() else {
            return Err(PlaybackError::Unavailable("no source loaded".into()));
        };
        self.handle.set_pause(false).await.map_err(unavailable)?;

        // Resume of a source that already started.
        let Some(mut rx) = self.start_rx.take() else {
            return Ok(());
        };

        match tokio::time::timeout(self.start_timeout, await_start(&mut rx)).await {
            Ok(Ok(seq)) => {
                info!("mpv: playing {}", url);
                self.playing.send_replace(Some((url, seq)));
                Ok(())
            }
            Ok(Err(e)) => Err(self.abort_start(e).await),
            Err(_) => {
                let e = PlaybackError::Interrupted(format!(
                    "stream did not start within {}s",
                    self.start_timeout.as_secs()
                ));
                Err(self.abort_start(e).await)
            }
        }
    }

    async fn pause(&mut self) -> Result<(), PlaybackError> {
        self.handle.set_pause(true).await.map_err(unavailable)
    }

    async fn set_volume(&mut self, level: f32) -> Result<(), PlaybackError> {
        self.handle.set_volume(level).await.map_err(unavailable)
    }

    async fn stop(&mut self) -> Result<(), PlaybackError> {
        self.clear_source();
        self.handle.stop().await.map_err(unavailable)
    }

    fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }
}

impl Drop for MpvSink {
    fn drop(&mut self) {
        self.watcher.abort();
        if let Some(child) = self.process.as_mut() {
            let _ = child.start_kill();
        }
        #[cfg(unix)]
        if let Some(path) = &self.socket_name {
            let _ = std::fs::remove_file(path);
        }
    }
}

// ── watch task ────────────────────────────────────────────────────────────────

/// Forward abnormal ends of the playing stream as `SinkEvent::Failed`.
/// Events older than the stream's `file-loaded` belong to an earlier load.
async fn watch_task(
    mut events: broadcast::Receiver<MpvEvent>,
    playing: watch::Receiver<Option<(String, u64)>>,
    notify: mpsc::Sender<SinkEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                debug!("mpv watch: lagged by {} events", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(error) = event.playback_error() else {
            continue;
        };
        let current = playing.borrow().clone();
        if let Some((url, since)) = current.filter(|(_, since)| event.seq > *since) {
            debug!("mpv watch: event {} after start {}", event.seq, since);
            warn!("mpv: stream {} failed: {}", url, error);
            if notify.send(SinkEvent::Failed { url, error }).await.is_err() {
                break;
            }
        }
    }
    debug!("mpv watch: task exiting");
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    events: broadcast::Sender<MpvEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut seq: u64 = 0;
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                // Fail all pending requests
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC connection closed")));
                }
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            debug!("mpv reader: response req={} ok", req_id);
                            Ok(val)
                        } else {
                            let err = val["error"]
                                .as_str()
                                .unwrap_or("unknown error")
                                .to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    seq += 1;
                    let _ = events.send(MpvEvent { seq, raw: val });
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC read error: {}", e)));
                }
                break;
            }
        }
    }
    // The process is gone or unreachable; tell listeners the way mpv would.
    let _ = events.send(MpvEvent {
        seq: seq + 1,
        raw: json!({ "event": "shutdown" }),
    });
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register reply channel before writing so reader can match it
        {
            let mut map = pending.lock().await;
            map.insert(req.req_id, req.reply);
        }
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            let mut map = pending.lock().await;
            if let Some(tx) = map.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, DuplexStream};

    const BAD_URL: &str = "http://stream/bad";

    /// Minimal mpv stand-in: acknowledges every command, answers `loadfile`
    /// with `file-loaded` (or an `end-file` error for `BAD_URL`), and writes
    /// any injected events.
    async fn fake_mpv(stream: DuplexStream, mut inject: mpsc::Receiver<Value>) {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut lines = BufReader::new(read_half).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Ok(Some(line)) = line else { break };
                    let msg: Value = serde_json::from_str(&line).unwrap();
                    let reply = json!({"request_id": msg["request_id"], "error": "success", "data": null});
                    write_half.write_all(format!("{}\n", reply).as_bytes()).await.unwrap();
                    if msg["command"][0] == "loadfile" {
                        let event = if msg["command"][1] == BAD_URL {
                            json!({"event": "end-file", "reason": "error", "file_error": "unrecognized file format"})
                        } else {
                            json!({"event": "file-loaded"})
                        };
                        write_half.write_all(format!("{}\n", event).as_bytes()).await.unwrap();
                    }
                }
                Some(event) = inject.recv() => {
                    write_half.write_all(format!("{}\n", event).as_bytes()).await.unwrap();
                }
            }
        }
    }

    fn sink_with_fake() -> (MpvSink, mpsc::Sender<Value>, mpsc::Receiver<SinkEvent>) {
        let (ours, theirs) = tokio::io::duplex(4096);
        let (inject_tx, inject_rx) = mpsc::channel(8);
        tokio::spawn(fake_mpv(theirs, inject_rx));
        let (notify_tx, notify_rx) = mpsc::channel(8);
        let (read_half, write_half) = tokio::io::split(ours);
        let sink = MpvSink::over_stream(read_half, write_half, Duration::from_secs(2), notify_tx);
        (sink, inject_tx, notify_rx)
    }

    #[test]
    fn test_end_file_classification() {
        let ev = |raw: Value| MpvEvent { seq: 1, raw };
        assert_eq!(
            ev(json!({"event": "end-file", "reason": "error", "file_error": "no audio or video data played"}))
                .playback_error(),
            Some(PlaybackError::Unsupported("no audio or video data played".into()))
        );
        assert_eq!(
            ev(json!({"event": "end-file", "reason": "error", "file_error": "loading failed"}))
                .playback_error(),
            Some(PlaybackError::Interrupted("loading failed".into()))
        );
        assert_eq!(ev(json!({"event": "end-file", "reason": "stop"})).playback_error(), None);
        assert_eq!(ev(json!({"event": "file-loaded"})).playback_error(), None);
        assert!(matches!(
            ev(json!({"event": "shutdown"})).playback_error(),
            Some(PlaybackError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_load_then_play_waits_for_file_loaded() {
        let (mut sink, _inject, _notify) = sink_with_fake();
        sink.load("http://stream/a").await.unwrap();
        assert_eq!(sink.source(), Some("http://stream/a"));

        sink.play().await.unwrap();
        assert_eq!(
            sink.playing.borrow().as_ref().map(|(url, _)| url.as_str()),
            Some("http://stream/a")
        );

        // Pause and resume do not wait for another file-loaded.
        sink.pause().await.unwrap();
        sink.play().await.unwrap();

        sink.stop().await.unwrap();
        assert_eq!(sink.source(), None);
    }

    #[tokio::test]
    async fn test_rejected_stream_fails_play_and_clears_source() {
        let (mut sink, _inject, _notify) = sink_with_fake();
        sink.load(BAD_URL).await.unwrap();
        let err = sink.play().await.unwrap_err();
        assert_eq!(err, PlaybackError::Unsupported("unrecognized file format".into()));
        assert_eq!(sink.source(), None);

        sink.load("http://stream/good").await.unwrap();
        sink.play().await.unwrap();
    }

    #[tokio::test]
    async fn test_mid_stream_error_is_reported() {
        let (mut sink, inject, mut notify) = sink_with_fake();
        sink.load("http://stream/a").await.unwrap();
        sink.play().await.unwrap();

        inject
            .send(json!({"event": "end-file", "reason": "error", "file_error": "connection reset"}))
            .await
            .unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), notify.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            SinkEvent::Failed {
                url: "http://stream/a".into(),
                error: PlaybackError::Interrupted("connection reset".into()),
            }
        );
    }

    #[tokio::test]
    async fn test_play_without_source_is_unavailable() {
        let (mut sink, _inject, _notify) = sink_with_fake();
        assert!(matches!(sink.play().await, Err(PlaybackError::Unavailable(_))));
    }
}
