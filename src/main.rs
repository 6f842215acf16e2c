use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use r58_studio::web::{router, AppState};
use r58_studio::{Config, Platform};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the configured listen address, e.g. 0.0.0.0:8080.
    #[arg(long)]
    listen: Option<String>,

    /// Replace capture hardware and hardware codecs with test sources so
    /// the whole control plane runs on a machine without an RK3588.
    #[arg(long)]
    test_mode: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = CliArgs::parse();
    info!(config = %args.config.display(), test_mode = args.test_mode, "Starting");

    r58_studio::media::ensure_gst().context("GStreamer initialization failed")?;

    let mut config = Config::from_file(&args.config)?;
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    let listen = config.server.listen.clone();
    let platform = Platform { test_mode: args.test_mode };

    let state = AppState::build(config, platform);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisors = state.spawn_supervisors(shutdown_rx);

    // The restored mode decides who owns the capture devices at boot.
    state.mode.resume().await;

    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("Failed to bind {listen}"))?;
    info!("Control plane listening on http://{listen}");

    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("HTTP server failed")?;

    // Ordered teardown: finalize recordings first, then the consumers,
    // then release the devices.
    let _ = shutdown_tx.send(true);
    if let Err(e) = state.recording.stop_all().await {
        warn!(error = %e, "Recording shutdown incomplete");
    }
    if let Err(e) = state.mixer.stop().await {
        warn!(error = %e, "Mixer shutdown incomplete");
    }
    state.reveal.stop_all().await;
    state.ingest.stop_all().await;

    for handle in supervisors {
        let _ = handle.await;
    }
    info!("Shutdown complete");
    Ok(())
}
