//! Frame capture.
//!
//! - `Frame`: one encoded still, alive for a single loop iteration.
//! - `FrameCapture`: snapshots the camera's current image onto an owned
//!   offscreen surface and encodes it as JPEG.
//! - `FrameSource`: the seam the detection loop captures through.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use std::sync::Arc;

use crate::camera::CameraSession;

pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Encoded payloads below this size are treated as blank frames.
pub const DEFAULT_MIN_ENCODED_BYTES: usize = 1024;

/// Encoded still image plus the geometry it was captured at.
///
/// Not `Clone`: a frame is consumed by exactly one submission.
#[derive(Debug)]
pub struct Frame {
    jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn from_jpeg(jpeg: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            jpeg,
            width,
            height,
        }
    }

    pub fn jpeg(&self) -> &[u8] {
        &self.jpeg
    }

    pub fn encoded_len(&self) -> usize {
        self.jpeg.len()
    }

    /// Encode an RGB image as JPEG at `quality` (clamped to 1..=100).
    pub fn encode(image: &RgbImage, quality: u8) -> Result<Self> {
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
            .encode_image(image)
            .context("encode frame as jpeg")?;
        Ok(Self::from_jpeg(jpeg, image.width(), image.height()))
    }

    /// Standard base64 of the JPEG bytes, without a data-URL prefix.
    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(&self.jpeg)
    }
}

/// Anything the detection loop can pull frames from.
///
/// `Ok(None)` means "nothing usable this tick" and is not an error.
pub trait FrameSource: Send {
    fn capture_frame(&mut self) -> Result<Option<Frame>>;
}

#[derive(Clone, Debug)]
pub struct CaptureSettings {
    /// JPEG quality, 1..=100.
    pub jpeg_quality: u8,
    /// Sanity floor for the encoded payload.
    pub min_encoded_bytes: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            min_encoded_bytes: DEFAULT_MIN_ENCODED_BYTES,
        }
    }
}

/// Counters for capture outcomes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_encoded: u64,
    pub not_ready: u64,
    pub too_small: u64,
}

pub struct FrameCapture {
    camera: Arc<CameraSession>,
    settings: CaptureSettings,
    surface: RgbImage,
    stats: CaptureStats,
}

impl FrameCapture {
    pub fn new(camera: Arc<CameraSession>, settings: CaptureSettings) -> Self {
        Self {
            camera,
            settings,
            surface: RgbImage::new(0, 0),
            stats: CaptureStats::default(),
        }
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    /// Snapshot the current video image.
    ///
    /// Errors when the session has no active stream. Returns `Ok(None)` when
    /// the video has no geometry yet or the encoded still is implausibly small.
    pub fn capture_frame(&mut self) -> Result<Option<Frame>> {
        let (width, height) = self.camera.video_size()?;
        if width == 0 || height == 0 {
            self.stats.not_ready += 1;
            log::debug!("video not ready ({}x{}), skipping capture", width, height);
            return Ok(None);
        }

        if self.surface.dimensions() != (width, height) {
            self.surface = RgbImage::new(width, height);
        } else {
            // A paused or just-started source may deliver a partial image.
            self.surface.pixels_mut().for_each(|p| *p = Rgb([0, 0, 0]));
        }

        let image = self.camera.current_image()?;
        image::imageops::replace(&mut self.surface, &image, 0, 0);

        let frame = Frame::encode(&self.surface, self.settings.jpeg_quality)?;
        if frame.encoded_len() < self.settings.min_encoded_bytes {
            self.stats.too_small += 1;
            log::warn!(
                "encoded frame too small ({} bytes < {}), skipping",
                frame.encoded_len(),
                self.settings.min_encoded_bytes
            );
            return Ok(None);
        }

        self.stats.frames_encoded += 1;
        Ok(Some(frame))
    }
}

impl FrameSource for FrameCapture {
    fn capture_frame(&mut self) -> Result<Option<Frame>> {
        FrameCapture::capture_frame(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{
        CameraBackend, CameraConstraints, CameraError, CameraSession, VideoStream,
    };

    struct FixedCamera {
        size: (u32, u32),
        color: Rgb<u8>,
    }

    struct FixedStream {
        size: (u32, u32),
        color: Rgb<u8>,
    }

    impl CameraBackend for FixedCamera {
        fn device(&self) -> &str {
            "fixed"
        }

        fn open(
            &mut self,
            _: &CameraConstraints,
        ) -> Result<Box<dyn VideoStream>, CameraError> {
            Ok(Box::new(FixedStream {
                size: self.size,
                color: self.color,
            }))
        }
    }

    impl VideoStream for FixedStream {
        fn video_size(&self) -> (u32, u32) {
            self.size
        }

        fn current_image(&mut self) -> Result<RgbImage> {
            Ok(RgbImage::from_pixel(self.size.0, self.size.1, self.color))
        }

        fn stop(&mut self) {}
    }

    fn capture_for(size: (u32, u32), color: Rgb<u8>) -> FrameCapture {
        let session = Arc::new(CameraSession::new(Box::new(FixedCamera { size, color })));
        session.acquire(&CameraConstraints::default()).unwrap();
        FrameCapture::new(session, CaptureSettings::default())
    }

    #[test]
    fn zero_width_or_height_is_not_ready() {
        let mut capture = capture_for((0, 480), Rgb([0, 0, 0]));
        assert!(capture.capture_frame().unwrap().is_none());

        let mut capture = capture_for((640, 0), Rgb([0, 0, 0]));
        assert!(capture.capture_frame().unwrap().is_none());
        assert_eq!(capture.stats().not_ready, 1);
    }

    #[test]
    fn tiny_blank_frame_is_skipped() {
        let mut capture = capture_for((8, 8), Rgb([0, 0, 0]));
        assert!(capture.capture_frame().unwrap().is_none());
        assert_eq!(capture.stats().too_small, 1);
    }

    #[test]
    fn synthetic_frame_encodes_to_jpeg() -> Result<()> {
        let session = Arc::new(CameraSession::for_device("stub://test"));
        session.acquire(&CameraConstraints {
            width: 320,
            height: 240,
            target_fps: 10,
        })?;
        let mut capture = FrameCapture::new(session, CaptureSettings::default());

        let frame = capture.capture_frame()?.expect("frame");
        assert_eq!((frame.width, frame.height), (320, 240));
        assert_eq!(&frame.jpeg()[..2], &[0xFF, 0xD8]);
        assert!(frame.encoded_len() >= DEFAULT_MIN_ENCODED_BYTES);

        let decoded = image::load_from_memory(frame.jpeg())?;
        assert_eq!((decoded.width(), decoded.height()), (320, 240));
        Ok(())
    }

    #[test]
    fn capture_without_stream_is_an_error() {
        let session = Arc::new(CameraSession::for_device("stub://test"));
        let mut capture = FrameCapture::new(session, CaptureSettings::default());
        assert!(capture.capture_frame().is_err());
    }

    #[test]
    fn base64_has_no_data_url_prefix() {
        let frame = Frame::from_jpeg(vec![0xFF, 0xD8, 0xFF, 0xD9], 1, 1);
        assert_eq!(frame.to_base64(), "/9j/2Q==");
    }
}
