//! Upload storage.
//!
//! Every request gets its own directory named by a random identifier, so
//! concurrent uploads never share a path:
//!
//! - videos:  `<static>/uploads/<id>/uploaded_video.mp4`
//! - images:  `<work>/uploads/<id>/uploaded_image.jpg`
//! - results: `<work>/results/<id>/result_image.jpg`
//!
//! Only the newest `retain_requests` directories survive under each root.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{anyhow, Context, Result};
use axum::extract::multipart::{Field, Multipart};
use rand::RngCore;
use tokio::io::AsyncWriteExt;

use crate::config::StorageSettings;
use crate::ingest::is_synthetic;

pub const VIDEO_FILE_NAME: &str = "uploaded_video.mp4";
pub const IMAGE_FILE_NAME: &str = "uploaded_image.jpg";
pub const RESULT_FILE_NAME: &str = "result_image.jpg";

const REQUEST_ID_BYTES: usize = 16;

/// Why an upload could not be taken.
#[derive(Debug)]
pub enum UploadError {
    /// The form had no usable file under the expected field.
    Missing,
    /// The body could not be read or the file could not be written.
    Failed(anyhow::Error),
}

#[derive(Clone, Debug)]
pub struct UploadStore {
    video_dir: PathBuf,
    image_dir: PathBuf,
    result_dir: PathBuf,
    retain: usize,
    allow_synthetic: bool,
}

impl UploadStore {
    pub fn new(storage: &StorageSettings) -> Self {
        Self {
            video_dir: storage.video_upload_dir(),
            image_dir: storage.image_upload_dir(),
            result_dir: storage.result_dir(),
            retain: storage.retain_requests.max(1),
            allow_synthetic: storage.allow_synthetic_video,
        }
    }

    pub fn video_dir(&self) -> &Path {
        &self.video_dir
    }

    pub fn result_dir(&self) -> &Path {
        &self.result_dir
    }

    pub fn new_request_id() -> String {
        let mut id = [0u8; REQUEST_ID_BYTES];
        rand::thread_rng().fill_bytes(&mut id);
        hex::encode(id)
    }

    pub fn video_path(&self, id: &str) -> PathBuf {
        self.video_dir.join(id).join(VIDEO_FILE_NAME)
    }

    pub fn image_path(&self, id: &str) -> PathBuf {
        self.image_dir.join(id).join(IMAGE_FILE_NAME)
    }

    pub fn result_path(&self, id: &str) -> PathBuf {
        self.result_dir.join(id).join(RESULT_FILE_NAME)
    }

    /// Stream the file in form field `field_name` to `dest`.
    ///
    /// The field must be present and carry a non-empty filename. Its content
    /// is not inspected.
    pub async fn save_field(
        &self,
        multipart: &mut Multipart,
        field_name: &str,
        dest: &Path,
    ) -> std::result::Result<u64, UploadError> {
        loop {
            let field = multipart
                .next_field()
                .await
                .map_err(|err| UploadError::Failed(anyhow!("read multipart body: {}", err)))?;
            let Some(field) = field else {
                return Err(UploadError::Missing);
            };
            if field.name() != Some(field_name) {
                continue;
            }
            let has_filename = field
                .file_name()
                .is_some_and(|name| !name.trim().is_empty());
            if !has_filename {
                return Err(UploadError::Missing);
            }
            return write_field(field, dest).await.map_err(UploadError::Failed);
        }
    }

    /// Remove an upload and, once empty, its request directory.
    pub async fn discard(&self, upload: &Path) {
        if let Err(err) = tokio::fs::remove_file(upload).await {
            if err.kind() != ErrorKind::NotFound {
                log::warn!("failed to remove upload {}: {}", upload.display(), err);
            }
        }
        if let Some(dir) = upload.parent() {
            let _ = tokio::fs::remove_dir(dir).await;
        }
    }

    /// Drop the oldest request directories under `root` so that at most
    /// `retain_requests` remain. `current` is never removed.
    pub async fn retain_recent(&self, root: &Path, current: &str) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err).with_context(|| format!("list {}", root.display())),
        };
        let mut others = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("list {}", root.display()))?
        {
            if entry.file_name().to_str() == Some(current) {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if meta.is_dir() {
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                others.push((modified, entry.path()));
            }
        }

        let keep = self.retain - 1;
        if others.len() <= keep {
            return Ok(0);
        }
        others.sort_by(|a, b| b.0.cmp(&a.0));
        let mut removed = 0;
        for (_, dir) in others.into_iter().skip(keep) {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {
                    log::debug!("pruned {}", dir.display());
                    removed += 1;
                }
                Err(err) => log::warn!("failed to prune {}: {}", dir.display(), err),
            }
        }
        Ok(removed)
    }

    /// Map a requested `video_path` to something the stream may open.
    ///
    /// `stub://` URIs pass through only when synthetic video is enabled.
    /// Paths must name an existing file inside the video upload directory;
    /// anything else yields `None`.
    pub async fn resolve_video(&self, requested: &str) -> Option<String> {
        if is_synthetic(requested) {
            if !self.allow_synthetic {
                log::warn!("synthetic video path rejected: {}", requested);
                return None;
            }
            return Some(requested.to_string());
        }
        let root = tokio::fs::canonicalize(&self.video_dir).await.ok()?;
        let path = tokio::fs::canonicalize(requested).await.ok()?;
        if !path.starts_with(&root) {
            log::warn!("video path outside upload dir rejected: {}", requested);
            return None;
        }
        let meta = tokio::fs::metadata(&path).await.ok()?;
        if !meta.is_file() {
            return None;
        }
        Some(path.to_string_lossy().into_owned())
    }
}

async fn write_field(mut field: Field<'_>, dest: &Path) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create upload dir {}", parent.display()))?;
    }
    let mut file = tokio::fs::File::create(dest)
        .await
        .with_context(|| format!("create upload {}", dest.display()))?;

    let mut written = 0u64;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|err| anyhow!("read upload body: {}", err))?
    {
        file.write_all(&chunk)
            .await
            .with_context(|| format!("write upload {}", dest.display()))?;
        written += chunk.len() as u64;
    }
    file.flush().await.context("flush upload")?;
    log::info!("saved upload {} ({} bytes)", dest.display(), written);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(root: &Path) -> StorageSettings {
        StorageSettings {
            static_dir: root.join("static"),
            work_dir: root.join("work"),
            retain_requests: 3,
            allow_synthetic_video: true,
        }
    }

    fn store(root: &Path) -> UploadStore {
        UploadStore::new(&settings(root))
    }

    fn request_dirs(root: &Path) -> std::io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(root)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    #[test]
    fn request_ids_are_unique_hex() {
        let a = UploadStore::new_request_id();
        let b = UploadStore::new_request_id();
        assert_eq!(a.len(), REQUEST_ID_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn paths_are_scoped_by_request() {
        let store = store(Path::new("/srv"));
        assert_eq!(
            store.video_path("abc"),
            PathBuf::from("/srv/static/uploads/abc/uploaded_video.mp4")
        );
        assert_eq!(
            store.result_path("abc"),
            PathBuf::from("/srv/work/results/abc/result_image.jpg")
        );
        assert_ne!(store.image_path("a"), store.image_path("b"));
    }

    #[tokio::test]
    async fn resolve_video_confines_to_upload_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store(dir.path());
        let inside = store.video_path("abc");
        std::fs::create_dir_all(inside.parent().context("parent")?)?;
        std::fs::write(&inside, b"video")?;
        let outside = dir.path().join("secret.mp4");
        std::fs::write(&outside, b"video")?;

        assert!(store.resolve_video(&inside.to_string_lossy()).await.is_some());
        assert!(store.resolve_video(&outside.to_string_lossy()).await.is_none());
        let traversal = store.video_dir().join("abc/../../../secret.mp4");
        assert!(store.resolve_video(&traversal.to_string_lossy()).await.is_none());
        assert!(store.resolve_video("/nonexistent/clip.mp4").await.is_none());
        assert_eq!(
            store.resolve_video("stub://clip?frames=2").await.as_deref(),
            Some("stub://clip?frames=2")
        );
        Ok(())
    }

    #[tokio::test]
    async fn synthetic_video_needs_opt_in() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = UploadStore::new(&StorageSettings {
            allow_synthetic_video: false,
            ..settings(dir.path())
        });
        assert!(store.resolve_video("stub://clip?frames=2").await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn retain_recent_keeps_newest_directories() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store(dir.path());
        let mut ids = Vec::new();
        for _ in 0..5 {
            let id = UploadStore::new_request_id();
            let path = store.video_path(&id);
            std::fs::create_dir_all(path.parent().context("parent")?)?;
            std::fs::write(&path, b"video")?;
            store.retain_recent(store.video_dir(), &id).await?;
            ids.push(id);
        }

        let remaining = request_dirs(store.video_dir())?;
        assert_eq!(remaining.len(), 3);
        assert!(remaining.contains(&ids[4]));
        Ok(())
    }

    #[tokio::test]
    async fn retain_recent_tolerates_missing_root() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store(dir.path());
        assert_eq!(store.retain_recent(store.result_dir(), "abc").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn discard_removes_file_and_request_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store(dir.path());
        let path = store.image_path("abc");
        let request_dir = path.parent().context("parent")?.to_path_buf();
        std::fs::create_dir_all(&request_dir)?;
        std::fs::write(&path, b"partial")?;

        store.discard(&path).await;
        assert!(!request_dir.exists());
        // A second discard of the same path is a no-op.
        store.discard(&path).await;
        Ok(())
    }
}
