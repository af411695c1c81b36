use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;
const DEFAULT_STATIC_DIR: &str = "static";
const DEFAULT_WORK_DIR: &str = "/tmp/static";
const DEFAULT_RETAIN_REQUESTS: usize = 16;
const DEFAULT_BACKEND: &str = "cpu";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_CAMERA_DEVICES: [&str; 3] = ["/dev/video0", "/dev/video1", "/dev/video2"];
const DEFAULT_CAMERA_FPS: u32 = 15;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_BUFFER_FRAMES: usize = 2;

const KNOWN_BACKENDS: [&str; 3] = ["cpu", "stub", "tract"];

#[derive(Debug, Deserialize, Default)]
struct DetectWebConfigFile {
    server: Option<ServerConfigFile>,
    storage: Option<StorageConfigFile>,
    detector: Option<DetectorConfigFile>,
    camera: Option<CameraConfigFile>,
    stream: Option<StreamConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    host: Option<String>,
    port: Option<u16>,
    max_upload_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    static_dir: Option<PathBuf>,
    work_dir: Option<PathBuf>,
    retain_requests: Option<usize>,
    allow_synthetic_video: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    devices: Option<Vec<String>>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    jpeg_quality: Option<u8>,
    buffer_frames: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct DetectWebConfig {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub detector: DetectorSettings,
    pub camera: CameraSettings,
    pub stream: StreamSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Request body cap applied to the upload routes.
    pub max_upload_bytes: usize,
}

impl ServerSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Filesystem roots. Uploaded videos live under `static_dir/uploads`;
/// uploaded images and annotated results live under `work_dir`.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub static_dir: PathBuf,
    pub work_dir: PathBuf,
    /// Request directories kept per root; older ones are pruned when a new
    /// one is created.
    pub retain_requests: usize,
    /// Accept `stub://` URIs as `video_path` on the video feed.
    pub allow_synthetic_video: bool,
}

impl StorageSettings {
    pub fn video_upload_dir(&self) -> PathBuf {
        self.static_dir.join("uploads")
    }

    pub fn image_upload_dir(&self) -> PathBuf {
        self.work_dir.join("uploads")
    }

    pub fn result_dir(&self) -> PathBuf {
        self.work_dir.join("results")
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            retain_requests: DEFAULT_RETAIN_REQUESTS,
            allow_synthetic_video: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// Registry name of the backend to use (`cpu`, `stub`, `tract`).
    pub backend: String,
    /// ONNX model for the `tract` backend.
    pub model_path: Option<PathBuf>,
    /// Square model input side in pixels.
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            model_path: None,
            input_size: DEFAULT_INPUT_SIZE,
            confidence_threshold: DEFAULT_CONFIDENCE,
            iou_threshold: DEFAULT_IOU,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// Devices probed in order by the live feed; the first that opens wins.
    pub devices: Vec<String>,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            devices: DEFAULT_CAMERA_DEVICES
                .iter()
                .map(|d| d.to_string())
                .collect(),
            target_fps: DEFAULT_CAMERA_FPS,
            width: DEFAULT_CAMERA_WIDTH,
            height: DEFAULT_CAMERA_HEIGHT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub jpeg_quality: u8,
    /// Encoded chunks buffered between the frame producer and the socket.
    pub buffer_frames: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            buffer_frames: DEFAULT_BUFFER_FRAMES,
        }
    }
}

impl DetectWebConfig {
    /// Load from the file named by `DETECT_WEB_CONFIG` (if any), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DETECT_WEB_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, but with an explicit config file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DetectWebConfigFile) -> Self {
        let defaults = Self::default();
        let server = file.server.unwrap_or_default();
        let storage = file.storage.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let stream = file.stream.unwrap_or_default();

        Self {
            server: ServerSettings {
                host: server.host.unwrap_or(defaults.server.host),
                port: server.port.unwrap_or(defaults.server.port),
                max_upload_bytes: server
                    .max_upload_bytes
                    .unwrap_or(defaults.server.max_upload_bytes),
            },
            storage: StorageSettings {
                static_dir: storage.static_dir.unwrap_or(defaults.storage.static_dir),
                work_dir: storage.work_dir.unwrap_or(defaults.storage.work_dir),
                retain_requests: storage
                    .retain_requests
                    .unwrap_or(defaults.storage.retain_requests),
                allow_synthetic_video: storage
                    .allow_synthetic_video
                    .unwrap_or(defaults.storage.allow_synthetic_video),
            },
            detector: DetectorSettings {
                backend: detector.backend.unwrap_or(defaults.detector.backend),
                model_path: detector.model_path,
                input_size: detector.input_size.unwrap_or(defaults.detector.input_size),
                confidence_threshold: detector
                    .confidence_threshold
                    .unwrap_or(defaults.detector.confidence_threshold),
                iou_threshold: detector
                    .iou_threshold
                    .unwrap_or(defaults.detector.iou_threshold),
            },
            camera: CameraSettings {
                devices: camera.devices.unwrap_or(defaults.camera.devices),
                target_fps: camera.target_fps.unwrap_or(defaults.camera.target_fps),
                width: camera.width.unwrap_or(defaults.camera.width),
                height: camera.height.unwrap_or(defaults.camera.height),
            },
            stream: StreamSettings {
                jpeg_quality: stream.jpeg_quality.unwrap_or(defaults.stream.jpeg_quality),
                buffer_frames: stream
                    .buffer_frames
                    .unwrap_or(defaults.stream.buffer_frames),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("PORT") {
            if !port.trim().is_empty() {
                self.server.port = port
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("PORT must be a TCP port number"))?;
            }
        }
        if let Ok(host) = std::env::var("DETECT_WEB_HOST") {
            if !host.trim().is_empty() {
                self.server.host = host;
            }
        }
        if let Ok(limit) = std::env::var("DETECT_WEB_MAX_UPLOAD_BYTES") {
            self.server.max_upload_bytes = limit
                .trim()
                .parse()
                .map_err(|_| anyhow!("DETECT_WEB_MAX_UPLOAD_BYTES must be an integer"))?;
        }
        if let Ok(dir) = std::env::var("DETECT_WEB_STATIC_DIR") {
            if !dir.trim().is_empty() {
                self.storage.static_dir = PathBuf::from(dir);
            }
        }
        if let Ok(dir) = std::env::var("DETECT_WEB_WORK_DIR") {
            if !dir.trim().is_empty() {
                self.storage.work_dir = PathBuf::from(dir);
            }
        }
        if let Ok(retain) = std::env::var("DETECT_WEB_RETAIN_REQUESTS") {
            self.storage.retain_requests = retain
                .trim()
                .parse()
                .map_err(|_| anyhow!("DETECT_WEB_RETAIN_REQUESTS must be an integer"))?;
        }
        if let Ok(flag) = std::env::var("DETECT_WEB_ALLOW_SYNTHETIC_VIDEO") {
            self.storage.allow_synthetic_video = parse_bool(&flag).ok_or_else(|| {
                anyhow!("DETECT_WEB_ALLOW_SYNTHETIC_VIDEO must be true or false")
            })?;
        }
        if let Ok(backend) = std::env::var("DETECT_WEB_BACKEND") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_lowercase();
            }
        }
        if let Ok(path) = std::env::var("DETECT_WEB_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(devices) = std::env::var("DETECT_WEB_CAMERAS") {
            self.camera.devices = split_csv(&devices);
        }
        if let Ok(quality) = std::env::var("DETECT_WEB_JPEG_QUALITY") {
            self.stream.jpeg_quality = quality
                .trim()
                .parse()
                .map_err(|_| anyhow!("DETECT_WEB_JPEG_QUALITY must be an integer in 1..=100"))?;
        }
        Ok(())
    }

    /// Normalise the backend name and check every setting is usable.
    pub fn validate(&mut self) -> Result<()> {
        self.detector.backend = self.detector.backend.to_lowercase();
        if !KNOWN_BACKENDS.contains(&self.detector.backend.as_str()) {
            return Err(anyhow!(
                "unknown detector backend '{}' (expected one of {})",
                self.detector.backend,
                KNOWN_BACKENDS.join(", ")
            ));
        }
        if self.detector.backend == "tract" && self.detector.model_path.is_none() {
            return Err(anyhow!("the tract backend requires a model path"));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input size must be greater than zero"));
        }
        for (name, value) in [
            ("confidence threshold", self.detector.confidence_threshold),
            ("iou threshold", self.detector.iou_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(anyhow!("{} must be in (0, 1], got {}", name, value));
            }
        }
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(anyhow!(
                "jpeg quality must be in 1..=100, got {}",
                self.stream.jpeg_quality
            ));
        }
        if self.stream.buffer_frames == 0 {
            return Err(anyhow!("stream buffer must hold at least one frame"));
        }
        if self.storage.retain_requests == 0 {
            return Err(anyhow!("retain_requests must be at least 1"));
        }
        if self.server.max_upload_bytes == 0 {
            return Err(anyhow!("max upload size must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<DetectWebConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_all_interfaces_on_5000() {
        let cfg = DetectWebConfig::default();
        assert_eq!(cfg.server.addr(), "0.0.0.0:5000");
        assert_eq!(cfg.camera.devices.len(), 3);
        assert_eq!(cfg.storage.result_dir(), PathBuf::from("/tmp/static/results"));
        assert_eq!(cfg.storage.video_upload_dir(), PathBuf::from("static/uploads"));
    }

    #[test]
    fn validate_rejects_tract_without_model() {
        let mut cfg = DetectWebConfig::default();
        cfg.detector.backend = "tract".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_quality() {
        let mut cfg = DetectWebConfig::default();
        cfg.stream.jpeg_quality = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_retention() {
        let mut cfg = DetectWebConfig::default();
        cfg.storage.retain_requests = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn synthetic_video_is_off_by_default() {
        assert!(!DetectWebConfig::default().storage.allow_synthetic_video);
        assert_eq!(parse_bool(" Yes "), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn split_csv_drops_blank_entries() {
        assert_eq!(
            split_csv(" /dev/video0, ,stub://cam "),
            vec!["/dev/video0", "stub://cam"]
        );
    }
}
