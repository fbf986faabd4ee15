//! V4L2 camera backend.
//!
//! Opens a local device node (e.g. `/dev/video0`), negotiates the requested
//! geometry, and keeps a memory-mapped capture stream for the lifetime of the
//! session. Unreadable device nodes map to `PermissionDenied`; missing or busy
//! devices map to `DeviceUnavailable`.

use anyhow::{anyhow, Result};
use image::RgbImage;
use ouroboros::self_referencing;

use super::normalize::{to_rgb_image, PixelFormat};
use super::{CameraBackend, CameraConstraints, CameraError, VideoStream};

pub struct V4l2Camera {
    device: String,
}

impl V4l2Camera {
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
        }
    }
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

struct V4l2Stream {
    device: String,
    state: Option<DeviceState>,
    format: PixelFormat,
    width: u32,
    height: u32,
}

impl CameraBackend for V4l2Camera {
    fn device(&self) -> &str {
        &self.device
    }

    fn open(
        &mut self,
        constraints: &CameraConstraints,
    ) -> Result<Box<dyn VideoStream>, CameraError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&self.device)
            .map_err(|err| CameraError::from_io(&format!("open {}", self.device), &err))?;
        let mut format = device
            .format()
            .map_err(|err| CameraError::from_io(&format!("read format of {}", self.device), &err))?;
        format.width = constraints.width;
        format.height = constraints.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: failed to set format on {}: {}",
                    self.device,
                    err
                );
                device.format().map_err(|err| {
                    CameraError::from_io(&format!("read format of {}", self.device), &err)
                })?
            }
        };
        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            CameraError::DeviceUnavailable(format!(
                "{}: unsupported pixel format {}",
                self.device, format.fourcc
            ))
        })?;

        if constraints.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(constraints.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Camera: failed to set fps on {}: {}", self.device, err);
            }
        }

        let state = DeviceStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
            },
        }
        .try_build()
        .map_err(|err| {
            CameraError::from_io(&format!("start capture on {}", self.device), &err)
        })?;

        log::info!(
            "V4l2Camera: connected to {} ({}x{} {})",
            self.device,
            format.width,
            format.height,
            format.fourcc
        );
        Ok(Box::new(V4l2Stream {
            device: self.device.clone(),
            state: Some(state),
            format: pixel_format,
            width: format.width,
            height: format.height,
        }))
    }
}

impl VideoStream for V4l2Stream {
    fn video_size(&self) -> (u32, u32) {
        if self.state.is_some() {
            (self.width, self.height)
        } else {
            (0, 0)
        }
    }

    fn current_image(&mut self) -> Result<RgbImage> {
        use v4l::io::traits::CaptureStream;

        let (width, height, format) = (self.width, self.height, self.format);
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| anyhow!("v4l2 device {} stopped", self.device))?;
        state.with_stream_mut(|stream| {
            let (buf, _meta) = stream
                .next()
                .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))?;
            to_rgb_image(buf, width, height, format)
        })
    }

    fn stop(&mut self) {
        // Dropping the stream unmaps the buffers and stops streaming; dropping
        // the device closes the node.
        self.state = None;
    }
}
