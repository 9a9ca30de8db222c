// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! NVR core — camera ingestion, detection, and live streaming.
//!
//! Usage:
//!   nvr serve    --config config.toml
//!   nvr validate --config config.toml

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use nvr::api::{self, AppState};
use nvr::config::ConfigStore;
use nvr::detector_manager::DetectorManager;
use nvr::predictor::OrtPredictorLoader;
use nvr::signaling;
use nvr::stream_manager::CameraStreamManager;
use nvr::streams::webrtc::WebRtcManager;
use nvr::telemetry::GlobalState;

#[derive(Parser)]
#[command(name = "nvr", about = "Camera ingestion, detection, and live streaming core", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the capture/detection/streaming core and HTTP API.
    Serve {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Load and validate a config file, then exit.
    Validate {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => run_serve(config).await,
        Command::Validate { config } => run_validate(config),
    }
}

fn run_validate(config_path: PathBuf) {
    match ConfigStore::from_file(&config_path) {
        Ok(store) => {
            println!("config OK: {} cameras, {} models, {} detectors", store.list_cameras().len(), store.list_models().len(), store.list_detectors(false).len());
        }
        Err(e) => {
            eprintln!("invalid config: {e}");
            std::process::exit(1);
        }
    }
}

async fn run_serve(config_path: PathBuf) {
    gstreamer::init().expect("gstreamer init failed");

    let config = match ConfigStore::from_file(&config_path) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let stream_manager = Arc::new(CameraStreamManager::new(config.clone()));
    let global = Arc::new(GlobalState::new());
    let loader = Arc::new(OrtPredictorLoader);
    let detector_manager = Arc::new(DetectorManager::new(
        config.clone(),
        stream_manager.clone(),
        global.clone(),
        loader,
    ));
    let webrtc_manager = Arc::new(WebRtcManager::new(global.clone()));

    info!(
        cameras = config.list_cameras().len(),
        models = config.list_models().len(),
        detectors = config.list_detectors(false).len(),
        "starting nvr core"
    );

    // Background reconcile tick: converges running Detector Workers to the
    // config store's desired set without requiring an explicit signal.
    let reconcile_manager = detector_manager.clone();
    let reconcile_interval = std::time::Duration::from_millis(config.api().reconcile_interval_ms);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(reconcile_interval);
        loop {
            ticker.tick().await;
            reconcile_manager.reconcile(Default::default()).await;
        }
    });

    // WebRTC signalling listener (§4.5.4, §6).
    let signaling_manager = webrtc_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = signaling::serve(signaling_manager).await {
            error!(error = %e, "signalling listener exited");
        }
    });

    let bind_addr = format!("{}:{}", config.api().bind, config.api().port);
    let state = Arc::new(AppState {
        config: config.clone(),
        detector_manager: detector_manager.clone(),
        webrtc_manager,
    });
    tokio::spawn(async move {
        api::start_server(state, &bind_addr).await;
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping workers");
    detector_manager.stop_all().await;
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
