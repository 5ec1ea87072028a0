//! Notification sound daemon (ntsvd) - main entry point

use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use ntsv_common::events::EventBus;
use ntsv_daemon::api::{self, AppContext};
use ntsv_daemon::facade::WavTranscoder;
use ntsv_daemon::playback::PacedSink;
use ntsv_daemon::policy::LocalAuthority;
use ntsv_daemon::runtime::{self, Daemon, DaemonEvent, DaemonParts};
use ntsv_daemon::services::{LoggingToneService, WatchedSenders};
use ntsv_daemon::DaemonConfig;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for ntsvd
#[derive(Parser, Debug)]
#[command(name = "ntsvd")]
#[command(about = "Notification sound arbitration daemon")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "NTSV_CONFIG")]
    config: Option<PathBuf>,

    /// Port for the HTTP control surface
    #[arg(short, long, env = "NTSV_PORT")]
    port: Option<u16>,

    /// Address for the HTTP control surface
    #[arg(long)]
    bind_address: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config =
        DaemonConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind_address) = args.bind_address {
        config.bind_address = bind_address;
    }

    init_tracing(&config)?;
    info!("Starting ntsvd v{}", env!("CARGO_PKG_VERSION"));
    info!("Decoded tones in {}", config.decode_dir.display());

    // Daemon loop and its collaborators
    let (events, rx) = runtime::channel();
    let bus = EventBus::default();
    let parts = DaemonParts {
        sink: Box::new(PacedSink::new(events.clone())),
        tones: Box::new(LoggingToneService),
        tracker: Box::new(WatchedSenders::new()),
        authority: Box::new(LocalAuthority::new(events.clone(), config.auto_grant()?)),
        profile: Box::new(config.profile.clone()),
        transcoder: Box::new(WavTranscoder::new(config.decode_dir.clone(), events.clone())),
    };
    let daemon = Daemon::new(parts, config.daemon_settings()?, bus.clone(), events, rx);
    let handle = daemon.handle();
    let daemon_task = tokio::spawn(daemon.run());

    handle.post(DaemonEvent::AudioReady);
    handle.post(DaemonEvent::StartupDone);

    // HTTP control surface
    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_address))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let ctx = AppContext {
        handle: handle.clone(),
        bus,
    };
    api::serve(listener, ctx, shutdown_signal())
        .await
        .context("Server error")?;

    // Finish every notification before exiting
    handle.post(DaemonEvent::Shutdown);
    daemon_task.await.context("Daemon loop panicked")?;

    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(config: &DaemonConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_filter()));

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
