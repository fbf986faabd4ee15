//! Synthetic camera (`stub://`) for tests and demos.
//!
//! Produces a moving gradient scene at the requested resolution.
//! Two reserved names simulate platform refusals:
//! - `stub://denied` fails with `PermissionDenied`
//! - `stub://missing` fails with `DeviceUnavailable`

use anyhow::Result;
use image::{Rgb, RgbImage};

use super::{CameraBackend, CameraConstraints, CameraError, VideoStream};

pub struct SyntheticCamera {
    device: String,
}

impl SyntheticCamera {
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
        }
    }
}

impl CameraBackend for SyntheticCamera {
    fn device(&self) -> &str {
        &self.device
    }

    fn open(
        &mut self,
        constraints: &CameraConstraints,
    ) -> Result<Box<dyn VideoStream>, CameraError> {
        match self.device.trim_start_matches("stub://") {
            "denied" => Err(CameraError::PermissionDenied(format!(
                "{}: access refused",
                self.device
            ))),
            "missing" => Err(CameraError::DeviceUnavailable(format!(
                "{}: no such device",
                self.device
            ))),
            _ => {
                log::info!("SyntheticCamera: connected to {}", self.device);
                Ok(Box::new(SyntheticStream::new(
                    constraints.width,
                    constraints.height,
                )))
            }
        }
    }
}

struct SyntheticStream {
    width: u32,
    height: u32,
    frame_count: u64,
    stopped: bool,
}

impl SyntheticStream {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_count: 0,
            stopped: false,
        }
    }

    /// Gradient background with a bright block drifting across it.
    fn render_scene(&self) -> RgbImage {
        let block = (self.width.min(self.height) / 4).max(1);
        let travel = self.width.saturating_sub(block).max(1);
        let block_x = ((self.frame_count * 8) % travel as u64) as u32;
        let block_y = self.height.saturating_sub(block) / 2;
        let noise = rand::random::<u8>() % 4;

        RgbImage::from_fn(self.width, self.height, |x, y| {
            let inside =
                (block_x..block_x + block).contains(&x) && (block_y..block_y + block).contains(&y);
            if inside {
                Rgb([240, 200, 40])
            } else {
                let r = ((x * 255) / self.width.max(1)) as u8;
                let g = ((y * 255) / self.height.max(1)) as u8;
                Rgb([r, g, 96u8.wrapping_add(noise)])
            }
        })
    }
}

impl VideoStream for SyntheticStream {
    fn video_size(&self) -> (u32, u32) {
        if self.stopped {
            (0, 0)
        } else {
            (self.width, self.height)
        }
    }

    fn current_image(&mut self) -> Result<RgbImage> {
        self.frame_count += 1;
        Ok(self.render_scene())
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}
