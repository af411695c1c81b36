use anyhow::Result;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use tempfile::tempdir;

use detect_web::detect::StubBackend;
use detect_web::{ApiServer, AppState, BackendRegistry, DetectWebConfig};

fn request(addr: SocketAddr, path: &str) -> Result<(String, Vec<u8>)> {
    let mut stream = TcpStream::connect(addr)?;
    write!(
        stream,
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        path
    )?;
    let mut response = Vec::new();
    stream.read_to_end(&mut response)?;

    let split = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
        .unwrap_or(response.len());
    let headers = String::from_utf8_lossy(&response[..split]).to_string();
    Ok((headers, response[split..].to_vec()))
}

async fn spawn_server(root: &std::path::Path) -> Result<detect_web::ApiHandle> {
    let mut config = DetectWebConfig::default();
    config.storage.static_dir = root.join("static");
    config.storage.work_dir = root.join("work");
    config.storage.allow_synthetic_video = true;
    config.camera.devices = vec!["/nonexistent/video0".to_string()];

    let mut registry = BackendRegistry::new();
    registry.register(StubBackend::new());
    let detector = registry.prepare_default()?;

    ApiServer::new(AppState::new(config, detector))
        .with_addr("127.0.0.1:0")
        .spawn()
        .await
}

#[tokio::test(flavor = "multi_thread")]
async fn serves_routes_over_tcp() -> Result<()> {
    let dir = tempdir()?;
    let handle = spawn_server(dir.path()).await?;
    let addr = handle.addr;

    let (headers, body) =
        tokio::task::spawn_blocking(move || request(addr, "/video_feed")).await??;
    assert!(headers.starts_with("HTTP/1.1 200"));
    assert_eq!(body, b"Error: No video file provided.");

    let (headers, body) = tokio::task::spawn_blocking(move || {
        request(addr, "/video_feed?video_path=stub%3A%2F%2Fclip%3Fframes%3D2%26width%3D32%26height%3D32")
    })
    .await??;
    assert!(headers.starts_with("HTTP/1.1 200"));
    assert!(headers
        .to_ascii_lowercase()
        .contains("content-type: multipart/x-mixed-replace; boundary=frame"));
    let parts = body
        .windows(b"--frame\r\n".len())
        .filter(|w| *w == b"--frame\r\n")
        .count();
    assert_eq!(parts, 2);

    let (headers, _) = tokio::task::spawn_blocking(move || request(addr, "/live_feed")).await??;
    assert!(headers.starts_with("HTTP/1.1 200"));
    assert!(headers.contains("x-frame-source: unavailable"));

    handle.stop().await?;
    assert!(TcpStream::connect(addr).is_err());
    Ok(())
}
