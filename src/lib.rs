//! detect-web
//!
//! A small web front-end around an object detector. Users upload an image and
//! get it back annotated, upload a video and watch it annotated as an MJPEG
//! stream, or watch a live camera the same way.
//!
//! # Module Structure
//!
//! - `ingest`: frame sources (uploaded video files, cameras, `stub://` synthetic sources)
//! - `detect`: detector backends behind `DetectorBackend`, plus the backend registry
//! - `annotate`: boxes and labels drawn onto frames
//! - `stream`: JPEG encoding and the multipart streaming body
//! - `pipeline`: per-frame detection and the single-image pipeline
//! - `uploads`: per-request upload and result paths
//! - `api`: routes, handlers and the server lifecycle
//! - `config`: file + environment configuration

pub mod annotate;
pub mod api;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod stream;
pub mod uploads;

pub use api::{router, ApiHandle, ApiServer, AppState};
pub use config::DetectWebConfig;
pub use detect::{BackendRegistry, Detection, DetectionResult, DetectorBackend, SharedDetector};
pub use frame::Frame;
pub use ingest::{CameraSource, FileConfig, FileSource, FrameSource};
