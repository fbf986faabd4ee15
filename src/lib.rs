//! Live detection client
//!
//! Captures stills from a camera, sends them to a remote object-detection
//! service at a throttled rate, keeps the latest result set in a shared
//! store, and draws a grid plus labelled boxes over the video.
//!
//! # Module Structure
//!
//! - `camera`: camera session and backends (synthetic, HTTP, V4L2)
//! - `frame`: offscreen capture and JPEG encoding
//! - `detect`: detection wire types and the HTTP client
//! - `detect_loop`: throttled capture → detect → publish scheduler
//! - `store`: replace-on-publish detection state with subscriptions
//! - `overlay`: grid and bounding box rendering
//! - `views`, `ui`, `api`: consumers of the store
//! - `config`: file and environment configuration

pub mod api;
pub mod camera;
pub mod config;
pub mod detect;
pub mod detect_loop;
pub mod frame;
pub mod overlay;
pub mod store;
pub mod ui;
pub mod views;

pub use camera::{CameraConstraints, CameraError, CameraSession};
pub use detect::{
    Detection, DetectionRequestError, DetectionResult, DetectionService, HttpDetectionClient,
};
pub use detect_loop::{DetectionLoop, LoopControl, LoopHandle, LoopStatus, TickOutcome};
pub use frame::{CaptureSettings, Frame, FrameCapture, FrameSource};
pub use overlay::{OverlayRenderer, RasterSurface, Surface};
pub use store::{DetectionPublisher, DetectionSnapshot, DetectionStore, Subscription};
