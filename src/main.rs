use anyhow::{Context, Result};
use capture_control::{
    create_router, AppState, ChannelAllocator, Config, EngineHandle, SessionManager,
    SimulatedEngine,
};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "capture-control", about = "REST control plane for recording sessions")]
struct Args {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config/capture-control")]
    config: String,

    /// Override service.http.bind
    #[arg(long)]
    bind: Option<String>,

    /// Override service.http.port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut cfg = Config::load(&args.config)?;
    if let Some(bind) = args.bind {
        cfg.service.http.bind = bind;
    }
    if let Some(port) = args.port {
        cfg.service.http.port = port;
    }

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    let output_dir = cfg.output_dir();
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create output dir {}", output_dir.display()))?;
    info!("Recordings will be written to {}", output_dir.display());

    warn!("No native capture engine linked, using the simulated engine");
    let engine = Arc::new(SimulatedEngine::new(
        cfg.engine.display_width,
        cfg.engine.display_height,
    ));
    let engine = Arc::new(EngineHandle::new(engine, cfg.engine_settings()));

    // A failure here is retried on the first start request
    if let Err(e) = engine.initialize() {
        warn!("Capture engine not ready: {}", e);
    }

    let sessions = Arc::new(SessionManager::new(
        engine,
        Arc::new(ChannelAllocator::new(cfg.engine.max_channels)),
        cfg.recording_settings(),
    ));

    let state = AppState::new(Arc::clone(&sessions), output_dir)
        .with_extension(cfg.recording.extension.clone());
    let app = create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
        })
        .await
        .context("HTTP server failed")?;

    // Sessions first, then the engine they depend on
    tokio::task::spawn_blocking(move || sessions.shutdown())
        .await
        .context("Session shutdown panicked")?;

    info!("Goodbye");
    Ok(())
}
