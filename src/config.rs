use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::camera::CameraConstraints;
use crate::detect_loop::{LoopSettings, MAX_FPS, MIN_FPS};
use crate::frame::{CaptureSettings, DEFAULT_JPEG_QUALITY, DEFAULT_MIN_ENCODED_BYTES};

const DEFAULT_SERVICE_URL: &str = "http://localhost:5000/detect";
const DEFAULT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CAMERA: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_DETECTION_FPS: u32 = 2;
const DEFAULT_AUTOSTART_MS: u64 = 1_000;
const DEFAULT_MAX_BACKOFF_MS: u64 = 8_000;
const DEFAULT_API_ADDR: &str = "127.0.0.1:8790";

#[derive(Debug, Deserialize, Default)]
struct ClientConfigFile {
    service: Option<ServiceConfigFile>,
    camera: Option<CameraConfigFile>,
    detection: Option<DetectionConfigFile>,
    capture: Option<CaptureConfigFile>,
    api: Option<ApiConfigFile>,
    overlay: Option<OverlayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    url: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    fps: Option<u32>,
    autostart: Option<bool>,
    autostart_delay_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    jpeg_quality: Option<u8>,
    min_encoded_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub service: ServiceSettings,
    pub camera: CameraSettings,
    pub detection: DetectionSettings,
    pub capture: CaptureSettings,
    pub api_addr: String,
    /// Where `live_detect` keeps the latest rendered overlay, if anywhere.
    pub overlay_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub fps: u32,
    pub autostart: bool,
    pub autostart_delay: Duration,
    pub max_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_file(ClientConfigFile::default())
    }
}

impl ClientConfig {
    /// Defaults, then the JSON file named by `LIVE_DETECT_CONFIG`, then
    /// `LIVE_DETECT_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LIVE_DETECT_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ClientConfigFile) -> Self {
        let service = file.service.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let capture = file.capture.unwrap_or_default();
        Self {
            service: ServiceSettings {
                url: service
                    .url
                    .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string()),
                timeout: Duration::from_millis(service.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)),
            },
            camera: CameraSettings {
                device: camera.device.unwrap_or_else(|| DEFAULT_CAMERA.to_string()),
                width: camera.width.unwrap_or(DEFAULT_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_HEIGHT),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
            },
            detection: DetectionSettings {
                fps: detection.fps.unwrap_or(DEFAULT_DETECTION_FPS),
                autostart: detection.autostart.unwrap_or(true),
                autostart_delay: Duration::from_millis(
                    detection.autostart_delay_ms.unwrap_or(DEFAULT_AUTOSTART_MS),
                ),
                max_backoff: Duration::from_millis(
                    detection.max_backoff_ms.unwrap_or(DEFAULT_MAX_BACKOFF_MS),
                ),
            },
            capture: CaptureSettings {
                jpeg_quality: capture.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                min_encoded_bytes: capture
                    .min_encoded_bytes
                    .unwrap_or(DEFAULT_MIN_ENCODED_BYTES),
            },
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            overlay_path: file.overlay.and_then(|overlay| overlay.path),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_string("LIVE_DETECT_SERVICE_URL") {
            self.service.url = url;
        }
        if let Some(device) = env_string("LIVE_DETECT_CAMERA") {
            self.camera.device = device;
        }
        if let Some(fps) = env_string("LIVE_DETECT_FPS") {
            self.detection.fps = fps
                .parse()
                .map_err(|_| anyhow!("LIVE_DETECT_FPS must be an integer frame rate"))?;
        }
        if let Some(timeout) = env_string("LIVE_DETECT_TIMEOUT_MS") {
            let millis: u64 = timeout.parse().map_err(|_| {
                anyhow!("LIVE_DETECT_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.service.timeout = Duration::from_millis(millis);
        }
        if let Some(quality) = env_string("LIVE_DETECT_JPEG_QUALITY") {
            self.capture.jpeg_quality = quality
                .parse()
                .map_err(|_| anyhow!("LIVE_DETECT_JPEG_QUALITY must be an integer 1-100"))?;
        }
        if let Some(addr) = env_string("LIVE_DETECT_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(path) = env_string("LIVE_DETECT_OVERLAY_PATH") {
            self.overlay_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.service.url)
            .map_err(|e| anyhow!("invalid service url {}: {}", self.service.url, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "service url must be http or https, got '{}'",
                url.scheme()
            ));
        }
        if self.service.timeout.is_zero() {
            return Err(anyhow!("service timeout must be greater than zero"));
        }
        if !(MIN_FPS..=MAX_FPS).contains(&self.detection.fps) {
            return Err(anyhow!(
                "detection fps must be between {} and {}, got {}",
                MIN_FPS,
                MAX_FPS,
                self.detection.fps
            ));
        }
        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return Err(anyhow!(
                "jpeg quality must be between 1 and 100, got {}",
                self.capture.jpeg_quality
            ));
        }
        if self.camera.device.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        self.api_addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("invalid api addr {}: {}", self.api_addr, e))?;
        Ok(())
    }

    pub fn camera_constraints(&self) -> CameraConstraints {
        CameraConstraints {
            width: self.camera.width,
            height: self.camera.height,
            target_fps: self.camera.target_fps,
        }
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            max_backoff: self.detection.max_backoff,
            autostart_delay: self
                .detection
                .autostart
                .then_some(self.detection.autostart_delay),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<ClientConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = ClientConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.service.url, "http://localhost:5000/detect");
        assert_eq!(cfg.detection.fps, 2);
        assert_eq!(cfg.capture.jpeg_quality, 95);
        assert_eq!(cfg.loop_settings().autostart_delay, Some(Duration::from_secs(1)));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut cfg = ClientConfig::default();
        cfg.detection.fps = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = ClientConfig::default();
        cfg.capture.jpeg_quality = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = ClientConfig::default();
        cfg.service.timeout = Duration::ZERO;
        assert!(cfg.validate().is_err());

        let mut cfg = ClientConfig::default();
        cfg.service.url = "ws://localhost:5000/detect".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = ClientConfig::default();
        cfg.api_addr = "localhost".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn autostart_can_be_turned_off() {
        let file: ClientConfigFile =
            serde_json::from_str(r#"{"detection": {"autostart": false}}"#).unwrap();
        let cfg = ClientConfig::from_file(file);
        assert_eq!(cfg.loop_settings().autostart_delay, None);
    }
}
