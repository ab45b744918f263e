use std::sync::Arc;

use radio_daemon::core::{CoreEvent, SessionCore};
use radio_daemon::directory::DirectoryClient;
use radio_daemon::http::{self, HttpState};
use radio_daemon::mpv::MpvSink;
use radio_daemon::sink::SinkEvent;
use radio_daemon::BroadcastMessage;
use radio_proto::config::Config;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = radio_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override; keep connection-level chatter from the HTTP
    // client internals out of the log.
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "info,radio_daemon=debug,hyper_util=warn,reqwest=warn",
                )
            }),
        )
        .with_ansi(false)
        .init();

    // Print log path to stderr so the operator can tail it immediately.
    eprintln!("radio-daemon log: {}", log_path.display());
    info!("radio-daemon starting…");

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    // Event channel: all external inputs funnel into SessionCore
    let (event_tx, event_rx) = mpsc::channel::<CoreEvent>(256);

    // Sink failures arrive on their own channel and are forwarded into the loop.
    let (sink_tx, mut sink_rx) = mpsc::channel::<SinkEvent>(16);
    let forward_tx = event_tx.clone();
    tokio::spawn(async move {
        while let Some(event) = sink_rx.recv().await {
            if forward_tx.send(CoreEvent::Sink(event)).await.is_err() {
                break;
            }
        }
    });

    let sink = MpvSink::spawn(
        config.playback.default_volume,
        config.playback.start_timeout(),
        sink_tx,
    )
    .await?;
    let directory = Arc::new(DirectoryClient::new(&config.directory)?);

    let core = SessionCore::new(
        &config,
        directory,
        sink,
        event_tx.clone(),
        broadcast_tx.clone(),
    )
    .await;

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            HttpState {
                state_manager: core.state_manager(),
                event_tx: event_tx.clone(),
                broadcast_tx: broadcast_tx.clone(),
            },
        );
    } else {
        warn!("HTTP API disabled in config; nothing can drive the session");
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            let _ = shutdown_tx.send(CoreEvent::Shutdown).await;
        }
    });

    info!("Daemon initialised, running event loop");
    core.run(event_rx).await?;

    Ok(())
}
