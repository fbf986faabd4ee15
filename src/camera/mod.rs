//! Camera access.
//!
//! A `CameraSession` owns at most one live video stream obtained from a
//! `CameraBackend`:
//! - Synthetic cameras (`stub://...`) for tests and demos
//! - Network cameras serving JPEG snapshots or MJPEG (`http(s)://...`)
//! - Local V4L2 devices (feature: camera-v4l2)
//!
//! The session is constructed once and shared (`Arc`) with every component that
//! needs frames or video geometry. Only the session starts or stops the device;
//! dropping the session releases it.

mod http;
#[cfg(feature = "camera-v4l2")]
mod normalize;
mod synthetic;
#[cfg(feature = "camera-v4l2")]
mod v4l2;

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::sync::{Mutex, MutexGuard};

pub use http::HttpCamera;
pub use synthetic::SyntheticCamera;
#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2Camera;

/// Requested capture geometry. Backends treat these as ideal values and
/// report the negotiated native size through [`VideoStream::video_size`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraConstraints {
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            target_fps: 30,
        }
    }
}

/// Terminal acquisition failures. Never retried automatically.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CameraError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
}

impl CameraError {
    pub(crate) fn from_io(what: &str, err: &std::io::Error) -> Self {
        let message = format!("{}: {}", what, err);
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => CameraError::PermissionDenied(message),
            _ => CameraError::DeviceUnavailable(message),
        }
    }
}

/// Platform service that hands out device streams.
pub trait CameraBackend: Send {
    /// Human-readable device identifier for logs.
    fn device(&self) -> &str;

    fn open(&mut self, constraints: &CameraConstraints)
        -> Result<Box<dyn VideoStream>, CameraError>;
}

/// A live device stream.
pub trait VideoStream: Send {
    /// Current native resolution. `(0, 0)` until the source has produced
    /// its first image.
    fn video_size(&self) -> (u32, u32);

    /// The current video image.
    fn current_image(&mut self) -> Result<RgbImage>;

    /// Stop every underlying device track. Called exactly once by the session.
    fn stop(&mut self);
}

/// Geometry of the acquired stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamInfo {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

struct SessionState {
    backend: Box<dyn CameraBackend>,
    stream: Option<Box<dyn VideoStream>>,
    last_error: Option<CameraError>,
    releases: u64,
}

/// Exclusive owner of the camera device connection.
pub struct CameraSession {
    state: Mutex<SessionState>,
}

impl CameraSession {
    pub fn new(backend: Box<dyn CameraBackend>) -> Self {
        Self {
            state: Mutex::new(SessionState {
                backend,
                stream: None,
                last_error: None,
                releases: 0,
            }),
        }
    }

    /// Pick a backend from a device string.
    ///
    /// `stub://` selects the synthetic camera, `http://`/`https://` a network
    /// camera, anything else a V4L2 device path.
    pub fn for_device(device: &str) -> Self {
        Self::new(backend_for(device))
    }

    /// Acquire the device stream, or return the already active one.
    pub fn acquire(&self, constraints: &CameraConstraints) -> Result<StreamInfo, CameraError> {
        let mut state = self.lock();
        let device = state.backend.device().to_string();
        if let Some(stream) = state.stream.as_ref() {
            let (width, height) = stream.video_size();
            return Ok(StreamInfo {
                device,
                width,
                height,
            });
        }

        match state.backend.open(constraints) {
            Ok(stream) => {
                let (width, height) = stream.video_size();
                log::info!("camera {} acquired ({}x{})", device, width, height);
                state.stream = Some(stream);
                state.last_error = None;
                Ok(StreamInfo {
                    device,
                    width,
                    height,
                })
            }
            Err(err) => {
                log::error!("camera {} acquisition failed: {}", device, err);
                state.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Stop the device and clear the handle. A no-op when nothing is active.
    pub fn release(&self) {
        let mut state = self.lock();
        if let Some(mut stream) = state.stream.take() {
            stream.stop();
            state.releases += 1;
            log::info!("camera {} released", state.backend.device());
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().stream.is_some()
    }

    pub fn last_error(&self) -> Option<CameraError> {
        self.lock().last_error.clone()
    }

    /// How many times an active stream has been released.
    pub fn release_count(&self) -> u64 {
        self.lock().releases
    }

    /// Native resolution of the active stream.
    pub fn video_size(&self) -> Result<(u32, u32)> {
        let state = self.lock();
        let stream = state
            .stream
            .as_ref()
            .ok_or_else(|| anyhow!("camera session has no active stream"))?;
        Ok(stream.video_size())
    }

    /// Read the current image from the active stream.
    pub fn current_image(&self) -> Result<RgbImage> {
        let mut state = self.lock();
        let stream = state
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("camera session has no active stream"))?;
        stream.current_image()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // The state stays coherent even if a holder panicked mid-read.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.release();
    }
}

fn backend_for(device: &str) -> Box<dyn CameraBackend> {
    if device.starts_with("stub://") {
        Box::new(SyntheticCamera::new(device))
    } else if device.starts_with("http://") || device.starts_with("https://") {
        Box::new(HttpCamera::new(device))
    } else {
        local_device(device)
    }
}

#[cfg(feature = "camera-v4l2")]
fn local_device(device: &str) -> Box<dyn CameraBackend> {
    Box::new(V4l2Camera::new(device))
}

#[cfg(not(feature = "camera-v4l2"))]
fn local_device(device: &str) -> Box<dyn CameraBackend> {
    Box::new(UnsupportedDevice {
        device: device.to_string(),
    })
}

#[cfg(not(feature = "camera-v4l2"))]
struct UnsupportedDevice {
    device: String,
}

#[cfg(not(feature = "camera-v4l2"))]
impl CameraBackend for UnsupportedDevice {
    fn device(&self) -> &str {
        &self.device
    }

    fn open(&mut self, _: &CameraConstraints) -> Result<Box<dyn VideoStream>, CameraError> {
        Err(CameraError::DeviceUnavailable(format!(
            "{}: local devices require the camera-v4l2 feature",
            self.device
        )))
    }
}
