use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use live_detect::config::ClientConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "LIVE_DETECT_CONFIG",
        "LIVE_DETECT_SERVICE_URL",
        "LIVE_DETECT_CAMERA",
        "LIVE_DETECT_FPS",
        "LIVE_DETECT_TIMEOUT_MS",
        "LIVE_DETECT_JPEG_QUALITY",
        "LIVE_DETECT_API_ADDR",
        "LIVE_DETECT_OVERLAY_PATH",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "service": {
            "url": "http://detector.local:5000/detect",
            "timeout_ms": 2500
        },
        "camera": {
            "device": "stub://desk",
            "width": 1280,
            "height": 720
        },
        "detection": {
            "fps": 5,
            "autostart_delay_ms": 250,
            "max_backoff_ms": 4000
        },
        "capture": {
            "jpeg_quality": 80
        },
        "api": {
            "addr": "127.0.0.1:9100"
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("LIVE_DETECT_CONFIG", file.path());
    std::env::set_var("LIVE_DETECT_FPS", "1");
    std::env::set_var("LIVE_DETECT_OVERLAY_PATH", "/tmp/overlay.png");

    let cfg = ClientConfig::load().expect("load config");

    assert_eq!(cfg.service.url, "http://detector.local:5000/detect");
    assert_eq!(cfg.service.timeout, Duration::from_millis(2500));
    assert_eq!(cfg.camera.device, "stub://desk");
    assert_eq!((cfg.camera.width, cfg.camera.height), (1280, 720));
    assert_eq!(cfg.detection.fps, 1);
    assert_eq!(cfg.capture.jpeg_quality, 80);
    assert_eq!(cfg.capture.min_encoded_bytes, 1024);
    assert_eq!(cfg.api_addr, "127.0.0.1:9100");
    assert_eq!(
        cfg.overlay_path.as_deref(),
        Some(std::path::Path::new("/tmp/overlay.png"))
    );

    let settings = cfg.loop_settings();
    assert_eq!(settings.autostart_delay, Some(Duration::from_millis(250)));
    assert_eq!(settings.max_backoff, Duration::from_secs(4));

    clear_env();
}

#[test]
fn defaults_without_file() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    let cfg = ClientConfig::load().expect("load config");
    assert_eq!(cfg.service.url, "http://localhost:5000/detect");
    assert_eq!(cfg.service.timeout, Duration::from_secs(5));
    assert_eq!(cfg.camera.device, "/dev/video0");
    assert_eq!(cfg.detection.fps, 2);
    assert_eq!(cfg.api_addr, "127.0.0.1:8790");
    assert!(cfg.overlay_path.is_none());
}

#[test]
fn invalid_env_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    std::env::set_var("LIVE_DETECT_FPS", "fast");
    assert!(ClientConfig::load().is_err());
    clear_env();

    std::env::set_var("LIVE_DETECT_FPS", "60");
    assert!(ClientConfig::load().is_err());
    clear_env();

    std::env::set_var("LIVE_DETECT_JPEG_QUALITY", "0");
    assert!(ClientConfig::load().is_err());
    clear_env();

    std::env::set_var("LIVE_DETECT_SERVICE_URL", "file:///detect");
    assert!(ClientConfig::load().is_err());
    clear_env();
}

#[test]
fn unreadable_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"{ not json").expect("write config");
    std::env::set_var("LIVE_DETECT_CONFIG", file.path());
    let err = ClientConfig::load().unwrap_err();
    assert!(err.to_string().contains("invalid config file"));

    clear_env();
}
