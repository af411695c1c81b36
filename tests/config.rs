use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::Builder;

use detect_web::config::DetectWebConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "DETECT_WEB_CONFIG",
        "PORT",
        "DETECT_WEB_HOST",
        "DETECT_WEB_STATIC_DIR",
        "DETECT_WEB_WORK_DIR",
        "DETECT_WEB_BACKEND",
        "DETECT_WEB_MODEL_PATH",
        "DETECT_WEB_CAMERAS",
        "DETECT_WEB_JPEG_QUALITY",
        "DETECT_WEB_MAX_UPLOAD_BYTES",
        "DETECT_WEB_RETAIN_REQUESTS",
        "DETECT_WEB_ALLOW_SYNTHETIC_VIDEO",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = DetectWebConfig::load().expect("load defaults");
    assert_eq!(cfg.server.addr(), "0.0.0.0:5000");
    assert_eq!(cfg.detector.backend, "cpu");
    assert_eq!(
        cfg.camera.devices,
        vec!["/dev/video0", "/dev/video1", "/dev/video2"]
    );
    assert_eq!(cfg.stream.jpeg_quality, 80);
}

#[test]
fn port_env_selects_listen_port() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("PORT", "8123");

    let cfg = DetectWebConfig::load().expect("load config");
    assert_eq!(cfg.server.addr(), "0.0.0.0:8123");

    std::env::set_var("PORT", "not-a-port");
    assert!(DetectWebConfig::load().is_err());
    clear_env();
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".json").tempfile().expect("temp config");
    let json = r#"{
        "server": { "host": "127.0.0.1", "port": 9000 },
        "storage": { "static_dir": "/srv/static", "work_dir": "/srv/work" },
        "detector": { "backend": "STUB", "confidence_threshold": 0.5 },
        "camera": { "devices": ["stub://cam"], "target_fps": 5 },
        "stream": { "jpeg_quality": 60, "buffer_frames": 4 }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("DETECT_WEB_CONFIG", file.path());
    std::env::set_var("DETECT_WEB_CAMERAS", "/dev/video4, stub://backup");
    std::env::set_var("DETECT_WEB_JPEG_QUALITY", "90");

    let cfg = DetectWebConfig::load().expect("load config");
    assert_eq!(cfg.server.addr(), "127.0.0.1:9000");
    assert_eq!(cfg.storage.static_dir, PathBuf::from("/srv/static"));
    assert_eq!(cfg.storage.result_dir(), PathBuf::from("/srv/work/results"));
    assert_eq!(cfg.detector.backend, "stub");
    assert_eq!(cfg.detector.confidence_threshold, 0.5);
    assert_eq!(cfg.camera.devices, vec!["/dev/video4", "stub://backup"]);
    assert_eq!(cfg.camera.target_fps, 5);
    assert_eq!(cfg.stream.jpeg_quality, 90);
    assert_eq!(cfg.stream.buffer_frames, 4);

    clear_env();
}

#[test]
fn loads_toml_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
        [server]
        port = 7000
        max_upload_bytes = 1048576

        [storage]
        retain_requests = 4
        allow_synthetic_video = true

        [detector]
        backend = "stub"
        iou_threshold = 0.6
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let cfg = DetectWebConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.server.port, 7000);
    assert_eq!(cfg.server.max_upload_bytes, 1_048_576);
    assert_eq!(cfg.detector.backend, "stub");
    assert_eq!(cfg.detector.iou_threshold, 0.6);
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.storage.retain_requests, 4);
    assert!(cfg.storage.allow_synthetic_video);
}

#[test]
fn retention_and_synthetic_video_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = DetectWebConfig::load().expect("load defaults");
    assert!(!cfg.storage.allow_synthetic_video);

    std::env::set_var("DETECT_WEB_RETAIN_REQUESTS", "3");
    std::env::set_var("DETECT_WEB_ALLOW_SYNTHETIC_VIDEO", "true");
    let cfg = DetectWebConfig::load().expect("load config");
    assert_eq!(cfg.storage.retain_requests, 3);
    assert!(cfg.storage.allow_synthetic_video);

    std::env::set_var("DETECT_WEB_RETAIN_REQUESTS", "0");
    assert!(DetectWebConfig::load().is_err());

    std::env::set_var("DETECT_WEB_RETAIN_REQUESTS", "3");
    std::env::set_var("DETECT_WEB_ALLOW_SYNTHETIC_VIDEO", "sometimes");
    assert!(DetectWebConfig::load().is_err());
    clear_env();
}

#[test]
fn rejects_invalid_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("DETECT_WEB_BACKEND", "yolo9000");
    assert!(DetectWebConfig::load().is_err());

    std::env::set_var("DETECT_WEB_BACKEND", "tract");
    let err = DetectWebConfig::load().expect_err("tract needs a model");
    assert!(err.to_string().contains("model path"));

    clear_env();
    std::env::set_var("DETECT_WEB_JPEG_QUALITY", "101");
    assert!(DetectWebConfig::load().is_err());

    clear_env();
    let mut file = Builder::new().suffix(".json").tempfile().expect("temp config");
    std::io::Write::write_all(&mut file, b"{ not json").expect("write config");
    assert!(DetectWebConfig::load_from(Some(file.path())).is_err());
}
