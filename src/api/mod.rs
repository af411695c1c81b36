//! HTTP front-end.
//!
//! | route         | method   | purpose                                    |
//! |---------------|----------|--------------------------------------------|
//! | `/`           | GET      | landing page                               |
//! | `/vidpred`    | GET/POST | video upload, redirects to `/video_feed`   |
//! | `/video_feed` | GET      | annotated MJPEG stream of `video_path`     |
//! | `/imgpred`    | GET/POST | image upload, renders the annotated result |
//! | `/live_feed`  | GET      | annotated MJPEG stream from a camera       |
//!
//! `/static` serves the static directory and `/results` the annotated images.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;

use crate::config::DetectWebConfig;
use crate::detect::SharedDetector;
use crate::uploads::UploadStore;

pub mod handlers;
mod pages;

/// Open streams are given this long to finish after `stop`.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// State shared by every handler. The detector is the only mutable part.
#[derive(Clone)]
pub struct AppState {
    pub detector: SharedDetector,
    pub config: Arc<DetectWebConfig>,
    pub uploads: UploadStore,
}

impl AppState {
    pub fn new(config: DetectWebConfig, detector: SharedDetector) -> Self {
        let uploads = UploadStore::new(&config.storage);
        Self {
            detector,
            config: Arc::new(config),
            uploads,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.config.storage.static_dir);
    let results = ServeDir::new(state.uploads.result_dir());
    let body_limit = state.config.server.max_upload_bytes;

    Router::new()
        .route("/", get(handlers::index))
        .route(
            "/vidpred",
            get(handlers::index).post(handlers::video_upload),
        )
        .route("/video_feed", get(handlers::video_feed))
        .route(
            "/imgpred",
            get(handlers::index).post(handlers::image_upload),
        )
        .route("/live_feed", get(handlers::live_feed))
        .nest_service("/static", static_files)
        .nest_service("/results", results)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting connections and wait for in-flight requests.
    ///
    /// Streams still open after a short grace period are cut off.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let Some(mut join) = self.join.take() else {
            return Ok(());
        };
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut join).await {
            Ok(result) => result.map_err(|_| anyhow!("http server task panicked"))?,
            Err(_) => {
                log::warn!("open streams did not finish in time, aborting");
                join.abort();
            }
        }
        Ok(())
    }
}

pub struct ApiServer {
    addr: String,
    state: AppState,
}

impl ApiServer {
    pub fn new(state: AppState) -> Self {
        Self {
            addr: state.config.server.addr(),
            state,
        }
    }

    /// Override the configured listen address (e.g. `127.0.0.1:0` in tests).
    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    pub async fn spawn(self) -> Result<ApiHandle> {
        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("bind {}", self.addr))?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(self.state);
        let join = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(err) = served {
                log::error!("http server stopped: {}", err);
            }
        });

        log::info!("listening on http://{}", addr);
        Ok(ApiHandle {
            addr,
            shutdown: Some(shutdown_tx),
            join: Some(join),
        })
    }
}
