use axum::body::Body;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use serde::Deserialize;

use super::pages::{render_index, PageContext};
use super::AppState;
use crate::ingest::{CameraSource, FileConfig, FileSource};
use crate::pipeline::run_image_pipeline;
use crate::stream::{start_annotated_stream, AnnotatedStream, MULTIPART_CONTENT_TYPE};
use crate::uploads::{UploadError, UploadStore, RESULT_FILE_NAME};

pub const NO_VIDEO_PROVIDED: &str = "Error: No video file provided.";
pub const VIDEO_NOT_FOUND: &str = "Error: Video file not found.";
pub const NO_VIDEO_SELECTED: &str = "No video file selected. Please choose a video file.";
pub const NO_IMAGE_SELECTED: &str = "No file selected. Please choose an image file.";
const UPLOAD_FAILED: &str = "The upload could not be saved. Please try again.";
const IMAGE_FAILED: &str = "The uploaded file could not be processed as an image.";

pub const FRAME_SOURCE_HEADER: &str = "x-frame-source";

type MultipartResult = std::result::Result<Multipart, MultipartRejection>;

#[derive(Debug, Deserialize)]
pub struct VideoFeedQuery {
    video_path: Option<String>,
}

pub async fn index() -> Html<String> {
    Html(render_index(&PageContext::default()))
}

fn error_page(message: &str) -> Response {
    Html(render_index(&PageContext {
        error: Some(message),
        ..PageContext::default()
    }))
    .into_response()
}

pub async fn video_upload(State(state): State<AppState>, multipart: MultipartResult) -> Response {
    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            log::warn!("video upload rejected: {}", rejection);
            return error_page(NO_VIDEO_SELECTED);
        }
    };
    let id = UploadStore::new_request_id();
    let dest = state.uploads.video_path(&id);
    match state.uploads.save_field(&mut multipart, "file", &dest).await {
        Ok(_) => {
            if let Err(err) = state.uploads.retain_recent(state.uploads.video_dir(), &id).await {
                log::warn!("video retention failed: {:#}", err);
            }
            let saved = dest.to_string_lossy();
            let encoded: String = url::form_urlencoded::byte_serialize(saved.as_bytes()).collect();
            Redirect::to(&format!("/video_feed?video_path={}", encoded)).into_response()
        }
        Err(UploadError::Missing) => {
            log::warn!("video upload rejected: no file in field 'file'");
            error_page(NO_VIDEO_SELECTED)
        }
        Err(UploadError::Failed(err)) => {
            log::warn!("video upload failed: {:#}", err);
            state.uploads.discard(&dest).await;
            error_page(UPLOAD_FAILED)
        }
    }
}

pub async fn video_feed(
    State(state): State<AppState>,
    Query(query): Query<VideoFeedQuery>,
) -> Response {
    let Some(requested) = query.video_path.filter(|path| !path.is_empty()) else {
        return plain_text(StatusCode::OK, NO_VIDEO_PROVIDED);
    };
    let Some(path) = state.uploads.resolve_video(&requested).await else {
        log::warn!("video feed rejected: {} not found", requested);
        return plain_text(StatusCode::NOT_FOUND, VIDEO_NOT_FOUND);
    };

    let stream = start_annotated_stream(
        move || FileSource::open(FileConfig::new(path)),
        state.detector.clone(),
        state.config.stream.clone(),
    )
    .await;
    multipart_response(stream)
}

pub async fn image_upload(State(state): State<AppState>, multipart: MultipartResult) -> Response {
    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            log::warn!("image upload rejected: {}", rejection);
            return error_page(NO_IMAGE_SELECTED);
        }
    };
    let id = UploadStore::new_request_id();
    let upload = state.uploads.image_path(&id);
    match state.uploads.save_field(&mut multipart, "image", &upload).await {
        Ok(_) => {}
        Err(UploadError::Missing) => {
            log::warn!("image upload rejected: no file in field 'image'");
            return error_page(NO_IMAGE_SELECTED);
        }
        Err(UploadError::Failed(err)) => {
            log::warn!("image upload failed: {:#}", err);
            state.uploads.discard(&upload).await;
            return error_page(UPLOAD_FAILED);
        }
    }

    let result = state.uploads.result_path(&id);
    let detector = state.detector.clone();
    let quality = state.config.stream.jpeg_quality;
    let job_upload = upload.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        run_image_pipeline(&detector, &job_upload, &result, quality)
    })
    .await;
    state.uploads.discard(&upload).await;

    match outcome {
        Ok(Ok(outcome)) => {
            log::info!(
                "image request {}: {} detections (top confidence {:.2})",
                id,
                outcome.detections,
                outcome.max_confidence
            );
            if let Err(err) = state.uploads.retain_recent(state.uploads.result_dir(), &id).await {
                log::warn!("result retention failed: {:#}", err);
            }
            let image_path = format!("/results/{}/{}", id, RESULT_FILE_NAME);
            Html(render_index(&PageContext {
                image_path: Some(&image_path),
                ..PageContext::default()
            }))
            .into_response()
        }
        Ok(Err(err)) => {
            log::warn!("image pipeline failed: {:#}", err);
            error_page(IMAGE_FAILED)
        }
        Err(err) => {
            log::error!("image pipeline task failed: {}", err);
            error_page(IMAGE_FAILED)
        }
    }
}

pub async fn live_feed(State(state): State<AppState>) -> Response {
    let cameras = state.config.camera.clone();
    let stream = start_annotated_stream(
        move || CameraSource::probe(&cameras),
        state.detector.clone(),
        state.config.stream.clone(),
    )
    .await;
    multipart_response(stream)
}

/// Always 200; an unavailable source is reported in a header and the body
/// ends without a chunk.
fn multipart_response(stream: AnnotatedStream) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(MULTIPART_CONTENT_TYPE));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if !stream.is_available() {
        headers.insert(FRAME_SOURCE_HEADER, HeaderValue::from_static("unavailable"));
    }
    (StatusCode::OK, headers, Body::from_stream(stream.body)).into_response()
}

fn plain_text(status: StatusCode, body: &'static str) -> Response {
    (
        status,
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}
