//! Live session command
//!
//! `glasswing session --url <url> [--seconds N] [--backend mock|cdp]`
//!
//! Creates a live object, mounts a surface for it, lets it run, captures on
//! the way out and prints the record before and after plus the sync events.

use crate::config::AppConfig;
use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use glasswing_canvas::{
    HostRequest, LifecycleSignal, LiveCanvas, MockSurfaceBackend, Position, SqliteDocumentStore,
    SurfaceBackend, SyncTimelineEntry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use uuid::Uuid;

/// Surface backend to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// In-process mock engine
    Mock,
    /// Headless Chromium (requires the `cdp` feature)
    Cdp,
}

#[derive(Args, Debug)]
pub struct SessionArgs {
    /// Url to open
    #[arg(long)]
    pub url: String,
    /// How long to keep the surface mounted
    #[arg(long, default_value_t = 5)]
    pub seconds: u64,
    /// Surface backend
    #[arg(long, value_enum, default_value_t = BackendKind::Mock)]
    pub backend: BackendKind,
}

pub async fn run(args: SessionArgs, config: &AppConfig) -> Result<()> {
    let url = config.store.resolve_url()?;
    let store = Arc::new(
        SqliteDocumentStore::connect(&url)
            .await
            .with_context(|| format!("Failed to open document store at {url}"))?,
    );

    let mock = Arc::new(MockSurfaceBackend::new());
    let backend: Arc<dyn SurfaceBackend> = match args.backend {
        BackendKind::Mock => mock.clone() as Arc<dyn SurfaceBackend>,
        BackendKind::Cdp => cdp_backend(config).await?,
    };
    info!(backend = backend.name(), "Starting live session");

    let (canvas, mut host_rx) = LiveCanvas::new(store, backend, config.live.clone())?;
    let canvas = Arc::new(canvas);
    let watcher = canvas.watch_document();

    let id = canvas
        .create_live_object(Some(&args.url), Position::default())
        .await?;
    print_record("Before", &canvas, id).await?;

    let mut signals = canvas.controller().subscribe();
    canvas.view_mounted(id);
    canvas.view_ready(id);

    let deadline = tokio::time::sleep(Duration::from_secs(args.seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            Some(request) = host_rx.recv() => handle_request(&canvas, request).await,
            signal = signals.recv() => match signal {
                Ok(LifecycleSignal::LoadFinish { record_id }) if args.backend == BackendKind::Mock => {
                    // Nobody scrolls a mock surface; do it so the capture has something to commit
                    if let Some(handle) = canvas.controller().handle(record_id) {
                        mock.set_scroll(handle.surface_id(), 0.0, 480.0);
                    }
                }
                Ok(signal) => info!(?signal, "Lifecycle"),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "Lifecycle stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    match canvas.capture_now(id).await {
        Some(outcome) => info!(?outcome, "Final capture"),
        None => warn!(record_id = %id, "No live surface at the end of the session"),
    }
    canvas.shutdown().await;
    watcher.await.context("Document watcher panicked")?;

    print_record("After", &canvas, id).await?;
    println!("\nSync events:");
    for event in canvas.recorder().get_events().await {
        let entry = SyncTimelineEntry::from(&event);
        println!(
            "  {} {:<20} {}",
            entry.timestamp.format("%H:%M:%S%.3f"),
            entry.event_type.as_str(),
            entry.summary
        );
    }
    Ok(())
}

async fn handle_request(canvas: &LiveCanvas, request: HostRequest) {
    match &request {
        HostRequest::Select { record_id } => info!(record_id = %record_id, "Select requested"),
        HostRequest::OpenLiveObject { source, url, .. } => {
            match canvas.fulfil(&request).await {
                Ok(Some(created)) => {
                    info!(source = %source, url = %url, created = %created, "Popup opened as sibling object");
                }
                Ok(None) => {}
                Err(e) => warn!(source = %source, url = %url, error = %e, "Could not open popup object"),
            }
        }
    }
}

async fn print_record(label: &str, canvas: &LiveCanvas, id: Uuid) -> Result<()> {
    let record = canvas.bridge().record(id).await?;
    println!("\n{label}:");
    println!("{}", super::records::summary_line(&record));
    println!(
        "  snapshot: {}",
        record
            .snapshot()
            .map_or_else(|| "none".to_string(), |s| format!("{} bytes", s.len()))
    );
    Ok(())
}

#[cfg(feature = "cdp")]
async fn cdp_backend(config: &AppConfig) -> Result<Arc<dyn SurfaceBackend>> {
    let backend = glasswing_canvas::CdpSurfaceBackend::launch((&config.cdp).into(), &config.live.sandbox)
        .await
        .context("Failed to launch Chromium")?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "cdp"))]
async fn cdp_backend(_config: &AppConfig) -> Result<Arc<dyn SurfaceBackend>> {
    anyhow::bail!("the cdp backend requires building with `--features cdp`")
}
