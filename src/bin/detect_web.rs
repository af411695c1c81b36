//! detect_web - object detection web server
//!
//! This binary:
//! 1. Loads configuration (file named by DETECT_WEB_CONFIG, then env, then flags)
//! 2. Builds and warms up the configured detector backend
//! 3. Serves the upload forms and MJPEG streams until Ctrl-C

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use detect_web::{ApiServer, AppState, BackendRegistry, DetectWebConfig};

#[derive(Parser, Debug)]
#[command(name = "detect_web", about = "Object detection web front-end")]
struct Args {
    /// Config file (.toml or .json)
    #[arg(long, env = "DETECT_WEB_CONFIG")]
    config: Option<PathBuf>,

    /// Listen port, overriding PORT and the config file
    #[arg(long)]
    port: Option<u16>,

    /// Detector backend: cpu, stub or tract
    #[arg(long)]
    backend: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = DetectWebConfig::load_from(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(backend) = args.backend {
        config.detector.backend = backend;
        config.validate()?;
    }

    let registry = BackendRegistry::from_settings(&config.detector)?;
    log::info!("detector backends available: {}", registry.list().join(", "));
    let detector = registry.prepare_default()?;

    let handle = ApiServer::new(AppState::new(config, detector))
        .spawn()
        .await?;
    log::info!("detect_web running on http://{}", handle.addr);

    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("detect_web waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv().await;
    log::info!("shutdown signal received, stopping server...");
    handle.stop().await?;

    Ok(())
}
